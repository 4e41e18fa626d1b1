// Clear sample - one pass into the swapchain image with a depth buffer

use anyhow::Result;
use ash::vk;

use super::FrameParams;
use crate::backend::render_pass::{self, MAIN_PASS};
use crate::backend::{AttachmentImage, VulkanDevice, VulkanSurface};
use crate::frame::{Extent2D, RebuildContext, RenderPassRegistry};

pub struct ClearTargets {
    pub extent: Extent2D,
    render_pass: vk::RenderPass,
    depth: AttachmentImage,
    /// One per swapchain image, indexed by slot
    framebuffers: Vec<vk::Framebuffer>,
}

impl ClearTargets {
    pub fn build(
        ctx: &RebuildContext<'_, VulkanDevice, VulkanSurface>,
        passes: &RenderPassRegistry<vk::RenderPass>,
    ) -> Result<Self> {
        let device = ctx.device.as_ref();
        let render_pass = *passes.get(MAIN_PASS)?;

        let depth = AttachmentImage::depth_target(device, ctx.extent, "clear.depth")?;

        let framebuffers = match render_pass::create_framebuffers(
            device,
            render_pass,
            ctx.surface.image_views(),
            Some(depth.view),
            ctx.surface.vk_extent(),
        ) {
            Ok(framebuffers) => framebuffers,
            Err(e) => {
                depth.destroy(device);
                return Err(e);
            }
        };

        Ok(Self {
            extent: ctx.extent,
            render_pass,
            depth,
            framebuffers,
        })
    }

    pub fn record(
        &self,
        device: &VulkanDevice,
        command_buffer: vk::CommandBuffer,
        slot: usize,
        params: &FrameParams,
    ) -> Result<()> {
        let Some(&framebuffer) = self.framebuffers.get(slot) else {
            anyhow::bail!("No framebuffer for slot {}", slot);
        };

        let clear_values = render_pass::clear_values(params.animated_clear());
        render_pass::begin_render_pass(
            device,
            command_buffer,
            self.render_pass,
            framebuffer,
            self.depth.vk_extent(),
            &clear_values,
            vk::SubpassContents::INLINE,
        );
        render_pass::end_render_pass(device, command_buffer);

        Ok(())
    }

    pub fn destroy(self, device: &VulkanDevice) {
        render_pass::destroy_framebuffers(device, &self.framebuffers);
        self.depth.destroy(device);
    }
}
