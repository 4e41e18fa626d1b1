// Post effect sample - mosaic
//
// The scene is rendered into an offscreen target `block` times smaller than
// the swapchain, then blitted up with nearest filtering so every texel
// becomes a block x block cell. An overlay pass draws the cursor marker at
// full resolution on top.
//
// ┌──────────────┐  blit (NEAREST)  ┌───────────────┐  overlay  ┌─────────┐
// │ render_target│ ───────────────> │ swapchain img │ ────────> │ present │
// │  extent/block│                  │ TRANSFER_DST  │   LOAD    │         │
// └──────────────┘                  └───────────────┘           └─────────┘

use anyhow::Result;
use ash::vk;
use glam::Vec2;

use super::FrameParams;
use crate::backend::render_pass::{self, OVERLAY_PASS, RENDER_TARGET_PASS};
use crate::backend::{AttachmentImage, VulkanDevice, VulkanSurface};
use crate::frame::{Extent2D, RebuildContext, RenderPassRegistry};

/// Side of the moving square, in swapchain pixels
const SQUARE_SIZE: f32 = 160.0;
const CURSOR_SIZE: f32 = 12.0;

pub struct PostEffectTargets {
    pub extent: Extent2D,
    block: u32,

    // Offscreen scene at reduced size
    scene_pass: vk::RenderPass,
    scene_color: AttachmentImage,
    scene_depth: AttachmentImage,
    scene_framebuffer: vk::Framebuffer,

    // Swapchain side, indexed by slot
    overlay_pass: vk::RenderPass,
    overlay_framebuffers: Vec<vk::Framebuffer>,
    swapchain_images: Vec<vk::Image>,
}

impl PostEffectTargets {
    pub fn build(
        ctx: &RebuildContext<'_, VulkanDevice, VulkanSurface>,
        passes: &RenderPassRegistry<vk::RenderPass>,
        block: u32,
    ) -> Result<Self> {
        let device = ctx.device.as_ref();
        let block = block.max(1);
        let scene_extent = ctx.extent.scaled_down(block);
        let scene_pass = *passes.get(RENDER_TARGET_PASS)?;
        let overlay_pass = *passes.get(OVERLAY_PASS)?;

        log::debug!("Mosaic target {} (block {})", scene_extent, block);

        let scene_color = AttachmentImage::color_target(
            device,
            scene_extent,
            ctx.surface.format(),
            "post_effect.color",
        )?;

        let scene_depth = match AttachmentImage::depth_target(device, scene_extent, "post_effect.depth") {
            Ok(depth) => depth,
            Err(e) => {
                scene_color.destroy(device);
                return Err(e);
            }
        };

        let scene_framebuffer = match render_pass::create_framebuffer(
            device,
            scene_pass,
            &[scene_color.view, scene_depth.view],
            scene_color.vk_extent(),
        ) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                scene_depth.destroy(device);
                scene_color.destroy(device);
                return Err(e);
            }
        };

        let overlay_framebuffers = match render_pass::create_framebuffers(
            device,
            overlay_pass,
            ctx.surface.image_views(),
            None,
            ctx.surface.vk_extent(),
        ) {
            Ok(framebuffers) => framebuffers,
            Err(e) => {
                render_pass::destroy_framebuffers(device, &[scene_framebuffer]);
                scene_depth.destroy(device);
                scene_color.destroy(device);
                return Err(e);
            }
        };

        Ok(Self {
            extent: ctx.extent,
            block,
            scene_pass,
            scene_color,
            scene_depth,
            scene_framebuffer,
            overlay_pass,
            overlay_framebuffers,
            swapchain_images: ctx.surface.images().to_vec(),
        })
    }

    pub fn record(
        &self,
        device: &VulkanDevice,
        command_buffer: vk::CommandBuffer,
        slot: usize,
        params: &FrameParams,
    ) -> Result<()> {
        let (Some(&swapchain_image), Some(&overlay_framebuffer)) =
            (self.swapchain_images.get(slot), self.overlay_framebuffers.get(slot))
        else {
            anyhow::bail!("No swapchain image for slot {}", slot);
        };

        let full_extent = vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        };
        let scene_extent = self.scene_color.vk_extent();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Scene into the reduced target
        // ─────────────────────────────────────────────────────────────────────
        let clear_values = render_pass::clear_values(params.animated_clear());
        render_pass::begin_render_pass(
            device,
            command_buffer,
            self.scene_pass,
            self.scene_framebuffer,
            scene_extent,
            &clear_values,
            vk::SubpassContents::INLINE,
        );

        // Circle the window center, offset by the drag
        let center = Vec2::new(full_extent.width as f32, full_extent.height as f32) / 2.0;
        let orbit = Vec2::new(params.time.cos(), params.time.sin()) * center.min_element() * 0.5;
        let square = (center + orbit + params.pan) / self.block as f32;
        render_pass::clear_rect(
            device,
            command_buffer,
            render_pass::square_in(scene_extent, square.x, square.y, SQUARE_SIZE / self.block as f32),
            [1.0, 0.85, 0.2, 1.0],
        );
        render_pass::end_render_pass(device, command_buffer);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Upscale into the swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let color_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        // COLOR_ATTACHMENT_OUTPUT as source chains onto the acquire wait
        let to_transfer_dst = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(swapchain_image)
            .subresource_range(color_range);

        let color_layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let blit = vk::ImageBlit::default()
            .src_subresource(color_layers)
            .src_offsets([vk::Offset3D::default(), corner(scene_extent)])
            .dst_subresource(color_layers)
            .dst_offsets([vk::Offset3D::default(), corner(full_extent)]);

        unsafe {
            device.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer_dst],
            );

            device.device.cmd_blit_image(
                command_buffer,
                self.scene_color.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::NEAREST,
            );
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Overlay at full resolution, leaves the image presentable
        // ─────────────────────────────────────────────────────────────────────
        render_pass::begin_render_pass(
            device,
            command_buffer,
            self.overlay_pass,
            overlay_framebuffer,
            full_extent,
            &[],
            vk::SubpassContents::INLINE,
        );
        if let Some(cursor) = params.cursor {
            render_pass::clear_rect(
                device,
                command_buffer,
                render_pass::square_in(full_extent, cursor.x, cursor.y, CURSOR_SIZE),
                [1.0, 1.0, 1.0, 1.0],
            );
        }
        render_pass::end_render_pass(device, command_buffer);

        Ok(())
    }

    pub fn destroy(self, device: &VulkanDevice) {
        render_pass::destroy_framebuffers(device, &self.overlay_framebuffers);
        render_pass::destroy_framebuffers(device, &[self.scene_framebuffer]);
        self.scene_depth.destroy(device);
        self.scene_color.destroy(device);
    }
}

fn corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}
