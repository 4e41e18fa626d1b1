// Secondary command buffer sample
//
// Each slot gets a secondary command buffer recorded once, at rebuild time,
// against that slot's framebuffer. The per-frame primary only begins the
// pass and executes it. Because the secondaries reference framebuffers they
// are part of the swapchain-dependent set and are re-recorded on resize.

use anyhow::{Context, Result};
use ash::vk;

use super::FrameParams;
use crate::backend::render_pass::{self, MAIN_PASS};
use crate::backend::{AttachmentImage, VulkanDevice, VulkanSurface};
use crate::frame::{Extent2D, RebuildContext, RenderPassRegistry};

/// Grid cells per row/column drawn by each secondary buffer
const GRID: u32 = 6;
const CELL_COLOR: [f32; 4] = [0.9, 0.55, 0.2, 1.0];

pub struct SecondaryTargets {
    pub extent: Extent2D,
    render_pass: vk::RenderPass,
    depth: AttachmentImage,
    framebuffers: Vec<vk::Framebuffer>,
    secondaries: Vec<vk::CommandBuffer>,
}

impl SecondaryTargets {
    pub fn build(
        ctx: &RebuildContext<'_, VulkanDevice, VulkanSurface>,
        passes: &RenderPassRegistry<vk::RenderPass>,
    ) -> Result<Self> {
        let device = ctx.device.as_ref();
        let render_pass = *passes.get(MAIN_PASS)?;

        let depth = AttachmentImage::depth_target(device, ctx.extent, "secondary.depth")?;

        let mut targets = Self {
            extent: ctx.extent,
            render_pass,
            depth,
            framebuffers: Vec::new(),
            secondaries: Vec::new(),
        };

        if let Err(e) = targets.record_secondaries(device, ctx) {
            targets.destroy(device);
            return Err(e);
        }

        Ok(targets)
    }

    fn record_secondaries(
        &mut self,
        device: &VulkanDevice,
        ctx: &RebuildContext<'_, VulkanDevice, VulkanSurface>,
    ) -> Result<()> {
        let vk_extent = ctx.surface.vk_extent();

        self.framebuffers = render_pass::create_framebuffers(
            device,
            self.render_pass,
            ctx.surface.image_views(),
            Some(self.depth.view),
            vk_extent,
        )?;

        let count = u32::try_from(self.framebuffers.len()).context("Too many swapchain images")?;
        self.secondaries = device.allocate_secondary_command_buffers(count)?;

        for (slot, (&secondary, &framebuffer)) in
            self.secondaries.iter().zip(&self.framebuffers).enumerate()
        {
            let inheritance = vk::CommandBufferInheritanceInfo::default()
                .render_pass(self.render_pass)
                .subpass(0)
                .framebuffer(framebuffer);

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
                .inheritance_info(&inheritance);

            unsafe { device.device.begin_command_buffer(secondary, &begin_info) }
                .with_context(|| format!("Failed to begin secondary buffer {}", slot))?;

            record_grid(device, secondary, vk_extent);

            unsafe { device.device.end_command_buffer(secondary) }
                .with_context(|| format!("Failed to end secondary buffer {}", slot))?;
        }

        log::debug!("Recorded {} secondary command buffers", self.secondaries.len());
        Ok(())
    }

    pub fn record(
        &self,
        device: &VulkanDevice,
        command_buffer: vk::CommandBuffer,
        slot: usize,
        params: &FrameParams,
    ) -> Result<()> {
        let (Some(&framebuffer), Some(&secondary)) =
            (self.framebuffers.get(slot), self.secondaries.get(slot))
        else {
            anyhow::bail!("No secondary command buffer for slot {}", slot);
        };

        let clear_values = render_pass::clear_values(params.animated_clear());
        render_pass::begin_render_pass(
            device,
            command_buffer,
            self.render_pass,
            framebuffer,
            self.depth.vk_extent(),
            &clear_values,
            vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
        );
        unsafe {
            device.device.cmd_execute_commands(command_buffer, &[secondary]);
        }
        render_pass::end_render_pass(device, command_buffer);

        Ok(())
    }

    pub fn destroy(self, device: &VulkanDevice) {
        device.free_command_buffers(&self.secondaries);
        render_pass::destroy_framebuffers(device, &self.framebuffers);
        self.depth.destroy(device);
    }
}

/// Checkerboard of squares over the whole framebuffer
fn record_grid(device: &VulkanDevice, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
    let cell_w = extent.width as f32 / GRID as f32;
    let cell_h = extent.height as f32 / GRID as f32;
    let size = cell_w.min(cell_h) * 0.6;

    for row in 0..GRID {
        for col in 0..GRID {
            if (row + col) % 2 == 1 {
                continue;
            }
            let cx = (col as f32 + 0.5) * cell_w;
            let cy = (row as f32 + 0.5) * cell_h;
            render_pass::clear_rect(
                device,
                command_buffer,
                render_pass::square_in(extent, cx, cy, size),
                CELL_COLOR,
            );
        }
    }
}
