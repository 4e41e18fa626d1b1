// Render passes and framebuffers
//
// Three attachment layouts cover every sample:
// - main:          swapchain color (cleared) + depth, ends in PRESENT_SRC
// - render_target: offscreen color + depth, ends in TRANSFER_SRC for a blit
// - overlay:       swapchain color loaded after a blit, ends in PRESENT_SRC

use anyhow::{Context, Result};
use ash::vk;

use super::image::DEPTH_FORMAT;
use super::VulkanDevice;
use crate::frame::RenderPassRegistry;

pub const MAIN_PASS: &str = "main";
pub const RENDER_TARGET_PASS: &str = "render_target";
pub const OVERLAY_PASS: &str = "overlay";

/// Create a render pass for color rendering with depth, presented afterwards
pub fn create_main_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    create_color_depth_pass(device, format, vk::ImageLayout::PRESENT_SRC_KHR)
        .context("Failed to create main render pass")
}

/// Offscreen pass whose color output is read back by a transfer
pub fn create_render_target_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    create_color_depth_pass(device, format, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .context("Failed to create render_target pass")
}

fn create_color_depth_pass(
    device: &VulkanDevice,
    format: vk::Format,
    color_final_layout: vk::ImageLayout,
) -> Result<vk::RenderPass> {
    // Color attachment
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(color_final_layout);

    // Depth attachment
    let depth_attachment = vk::AttachmentDescription::default()
        .format(DEPTH_FORMAT)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE) // Don't need to store depth
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_attachment_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    // Single subpass with color and depth
    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref);

    let stages =
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;

    let readback = color_final_layout == vk::ImageLayout::TRANSFER_SRC_OPTIMAL;

    // A readback target may still be read by the previous frame's blit
    let src_stages = if readback {
        stages | vk::PipelineStageFlags::TRANSFER
    } else {
        stages
    };

    let mut dependencies = vec![vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(src_stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    if readback {
        // Blit must see the finished color writes
        dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ),
        );
    }

    let attachments = [color_attachment, depth_attachment];
    let subpasses = [subpass];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }?;
    Ok(render_pass)
}

/// Color-only pass that keeps what a blit wrote into the swapchain image
pub fn create_overlay_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);

    // Wait for the blit before loading
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::TRANSFER)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        );

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create overlay render pass")
}

/// Build every named pass the samples use for swapchain images in `format`
pub fn create_pass_registry(device: &VulkanDevice, format: vk::Format) -> Result<RenderPassRegistry<vk::RenderPass>> {
    let mut registry = RenderPassRegistry::new();

    let built = (|| -> Result<()> {
        registry.register(MAIN_PASS, create_main_pass(device, format)?)?;
        registry.register(RENDER_TARGET_PASS, create_render_target_pass(device, format)?)?;
        registry.register(OVERLAY_PASS, create_overlay_pass(device, format)?)?;
        Ok(())
    })();

    if let Err(e) = built {
        destroy_pass_registry(device, registry);
        return Err(e);
    }

    log::info!(
        "Created render passes: {}",
        registry.names().collect::<Vec<_>>().join(", ")
    );
    Ok(registry)
}

pub fn destroy_pass_registry(device: &VulkanDevice, mut registry: RenderPassRegistry<vk::RenderPass>) {
    registry.destroy_all(|render_pass| unsafe {
        device.device.destroy_render_pass(render_pass, None);
    });
    debug_assert!(registry.is_empty());
}

pub fn create_framebuffer(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let framebuffer_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
        .context("Failed to create framebuffer")
}

/// Create framebuffers for each swapchain image, optionally sharing one depth view
pub fn create_framebuffers(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    image_views: &[vk::ImageView],
    depth_image_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());
    for &image_view in image_views {
        let attachments: Vec<vk::ImageView> =
            std::iter::once(image_view).chain(depth_image_view).collect();

        match create_framebuffer(device, render_pass, &attachments, extent) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                destroy_framebuffers(device, &framebuffers);
                return Err(e);
            }
        }
    }
    Ok(framebuffers)
}

pub fn destroy_framebuffers(device: &VulkanDevice, framebuffers: &[vk::Framebuffer]) {
    for &framebuffer in framebuffers {
        unsafe { device.device.destroy_framebuffer(framebuffer, None) };
    }
}

/// Color clear for attachment 0, depth clear to 1.0 for attachment 1
pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

pub fn begin_render_pass(
    device: &VulkanDevice,
    command_buffer: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    clear_values: &[vk::ClearValue],
    contents: vk::SubpassContents,
) {
    let render_pass_info = vk::RenderPassBeginInfo::default()
        .render_pass(render_pass)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .clear_values(clear_values);

    unsafe {
        device
            .device
            .cmd_begin_render_pass(command_buffer, &render_pass_info, contents);
    }
}

pub fn end_render_pass(device: &VulkanDevice, command_buffer: vk::CommandBuffer) {
    unsafe { device.device.cmd_end_render_pass(command_buffer) };
}

/// Fill `rect` of color attachment 0 inside the current pass
pub fn clear_rect(device: &VulkanDevice, command_buffer: vk::CommandBuffer, rect: vk::Rect2D, color: [f32; 4]) {
    if rect.extent.width == 0 || rect.extent.height == 0 {
        return;
    }

    let attachment = vk::ClearAttachment {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        color_attachment: 0,
        clear_value: vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
    };
    let clear_rect = vk::ClearRect {
        rect,
        base_array_layer: 0,
        layer_count: 1,
    };

    unsafe {
        device
            .device
            .cmd_clear_attachments(command_buffer, &[attachment], &[clear_rect]);
    }
}

/// Square of side `size` centered at (`cx`, `cy`), clipped to `extent`
pub fn square_in(extent: vk::Extent2D, cx: f32, cy: f32, size: f32) -> vk::Rect2D {
    let half = size.max(0.0) / 2.0;
    let x0 = (cx - half).clamp(0.0, extent.width as f32);
    let y0 = (cy - half).clamp(0.0, extent.height as f32);
    let x1 = (cx + half).clamp(0.0, extent.width as f32);
    let y1 = (cy + half).clamp(0.0, extent.height as f32);

    vk::Rect2D {
        offset: vk::Offset2D {
            x: x0 as i32,
            y: y0 as i32,
        },
        extent: vk::Extent2D {
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_is_clipped_to_extent() {
        let extent = vk::Extent2D {
            width: 100,
            height: 50,
        };

        let inside = square_in(extent, 50.0, 25.0, 10.0);
        assert_eq!((inside.offset.x, inside.offset.y), (45, 20));
        assert_eq!((inside.extent.width, inside.extent.height), (10, 10));

        let corner = square_in(extent, 98.0, 2.0, 10.0);
        assert_eq!((corner.offset.x, corner.offset.y), (93, 0));
        assert_eq!((corner.extent.width, corner.extent.height), (7, 7));

        let outside = square_in(extent, -40.0, -40.0, 10.0);
        assert_eq!(outside.extent.width, 0);
    }
}
