// Attachment images - offscreen color and depth targets
//
// Memory comes from gpu-allocator instead of one vkAllocateMemory per image.
// Every image here is swapchain-sized, so it lives in a sample's resource set
// and is destroyed with it on resize.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::{AllocationError, MemoryLocation};

use super::VulkanDevice;
use crate::frame::{Extent2D, GpuError};

/// Depth format used by every depth attachment
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

impl From<AllocationError> for GpuError {
    fn from(error: AllocationError) -> Self {
        match error {
            AllocationError::OutOfMemory => GpuError::OutOfMemory,
            other => GpuError::Backend(other.to_string()),
        }
    }
}

/// Image + view + memory for use as a framebuffer attachment
pub struct AttachmentImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: Extent2D,
    allocation: Option<Allocation>,
}

impl AttachmentImage {
    pub fn new(
        device: &VulkanDevice,
        extent: Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(GpuError::from)
            .with_context(|| format!("Failed to create image '{}'", name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.with_allocator(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(GpuError::from)
                .with_context(|| format!("Failed to allocate memory for '{}'", name))
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // Build the rest; on failure hand back what exists so far
        let mut attachment = Self {
            image,
            view: vk::ImageView::null(),
            format,
            extent,
            allocation: Some(allocation),
        };

        if let Err(e) = attachment.bind_and_view(device, aspect, name) {
            attachment.destroy(device);
            return Err(e);
        }

        Ok(attachment)
    }

    /// Color target that can be rendered to and then blitted from
    pub fn color_target(device: &VulkanDevice, extent: Extent2D, format: vk::Format, name: &str) -> Result<Self> {
        Self::new(
            device,
            extent,
            format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
            name,
        )
    }

    pub fn depth_target(device: &VulkanDevice, extent: Extent2D, name: &str) -> Result<Self> {
        Self::new(
            device,
            extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            name,
        )
    }

    fn bind_and_view(&mut self, device: &VulkanDevice, aspect: vk::ImageAspectFlags, name: &str) -> Result<()> {
        let Some(allocation) = self.allocation.as_ref() else {
            anyhow::bail!("Image '{}' has no memory", name);
        };

        unsafe {
            device
                .device
                .bind_image_memory(self.image, allocation.memory(), allocation.offset())
        }
        .map_err(GpuError::from)
        .with_context(|| format!("Failed to bind memory for '{}'", name))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        self.view = unsafe { device.device.create_image_view(&view_info, None) }
            .map_err(GpuError::from)
            .with_context(|| format!("Failed to create view for '{}'", name))?;

        Ok(())
    }

    pub fn vk_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    pub fn destroy(mut self, device: &VulkanDevice) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.device.destroy_image_view(self.view, None);
            }
            device.device.destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            let freed = device.with_allocator(|allocator| {
                allocator.free(allocation).map_err(GpuError::from)?;
                Ok(())
            });
            if let Err(e) = freed {
                log::warn!("Failed to free image memory: {:#}", e);
            }
        }
    }
}
