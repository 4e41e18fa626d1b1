// Swapchain - Window presentation
//
// Owns the window surface and the chain of images we render to and present.
// Recreation hands the old swapchain to the driver (`old_swapchain`) before
// destroying it, so the presentation engine can retire images in order.

use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

use super::VulkanDevice;
use crate::frame::{
    AcquireOutcome, Extent2D, GpuError, GpuResult, PresentOutcome, PresentationSurface,
    SwapchainInfo,
};

/// What the application would like the swapchain to look like.
/// Unsupported requests fall back at the next `configure`.
#[derive(Debug, Clone, Copy)]
pub struct SurfacePreferences {
    pub present_mode: vk::PresentModeKHR,
    pub format: vk::SurfaceFormatKHR,
}

impl Default for SurfacePreferences {
    fn default() -> Self {
        Self {
            present_mode: vk::PresentModeKHR::FIFO,
            format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        }
    }
}

fn same_format(a: vk::SurfaceFormatKHR, b: vk::SurfaceFormatKHR) -> bool {
    a.format == b.format && a.color_space == b.color_space
}

struct Swapchain {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    fn destroy(self, device: &VulkanDevice) {
        unsafe {
            for &view in &self.image_views {
                device.device.destroy_image_view(view, None);
            }
            device.swapchain_loader.destroy_swapchain(self.handle, None);
        }
    }
}

/// Window surface plus the swapchain currently built on it
pub struct VulkanSurface {
    surface: vk::SurfaceKHR,
    swapchain: Option<Swapchain>,
    preferences: Mutex<SurfacePreferences>,
    device: Arc<VulkanDevice>,
}

impl VulkanSurface {
    /// Take ownership of `surface`; no swapchain exists until `configure`
    pub fn new(device: Arc<VulkanDevice>, surface: vk::SurfaceKHR, preferences: SurfacePreferences) -> Self {
        Self {
            surface,
            swapchain: None,
            preferences: Mutex::new(preferences),
            device,
        }
    }

    /// Replace the preferences used by the next `configure`
    pub fn set_preferences(&self, preferences: SurfacePreferences) {
        *self.preferences.lock() = preferences;
    }

    pub fn images(&self) -> &[vk::Image] {
        self.swapchain.as_ref().map_or(&[], |s| s.images.as_slice())
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        self.swapchain.as_ref().map_or(&[], |s| s.image_views.as_slice())
    }

    /// Negotiated color format (UNDEFINED before the first `configure`)
    pub fn format(&self) -> vk::Format {
        self.swapchain.as_ref().map_or(vk::Format::UNDEFINED, |s| s.format)
    }

    pub fn vk_extent(&self) -> vk::Extent2D {
        self.swapchain.as_ref().map_or(vk::Extent2D::default(), |s| s.extent)
    }

    fn choose_format(
        formats: &[vk::SurfaceFormatKHR],
        desired: vk::SurfaceFormatKHR,
    ) -> GpuResult<vk::SurfaceFormatKHR> {
        let chosen = formats
            .iter()
            .copied()
            .find(|&f| same_format(f, desired))
            .or_else(|| formats.first().copied())
            .ok_or_else(|| GpuError::Backend("surface reports no formats".to_string()))?;

        if !same_format(chosen, desired) {
            log::warn!(
                "Surface format {:?}/{:?} unsupported, using {:?}/{:?}",
                desired.format,
                desired.color_space,
                chosen.format,
                chosen.color_space
            );
        }
        Ok(chosen)
    }

    // IMMEDIATE: No vsync, lowest latency, may tear
    // MAILBOX: No vsync, no tearing, triple buffered
    // FIFO: Vsync enabled, guaranteed available
    fn choose_present_mode(modes: &[vk::PresentModeKHR], desired: vk::PresentModeKHR) -> vk::PresentModeKHR {
        if modes.contains(&desired) {
            desired
        } else {
            log::warn!("Present mode {:?} unsupported, falling back to FIFO", desired);
            vk::PresentModeKHR::FIFO
        }
    }

    fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
        let mut image_count = desired.max(caps.min_image_count).max(2);
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }
        image_count
    }

    fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: Extent2D) -> vk::Extent2D {
        if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: requested
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: requested
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        }
    }

    fn create_image_views(&self, images: &[vk::Image], format: vk::Format) -> GpuResult<Vec<vk::ImageView>> {
        let mut views = Vec::with_capacity(images.len());
        for &image in images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            match unsafe { self.device.device.create_image_view(&create_info, None) } {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views {
                        unsafe { self.device.device.destroy_image_view(view, None) };
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(views)
    }
}

impl PresentationSurface<VulkanDevice> for VulkanSurface {
    fn configure(&mut self, extent: Extent2D, desired_image_count: u32) -> GpuResult<SwapchainInfo> {
        let device = Arc::clone(&self.device);
        let preferences = *self.preferences.lock();

        // Query surface capabilities
        let (caps, formats, present_modes) = unsafe {
            let loader = &device.surface_loader;
            (
                loader.get_physical_device_surface_capabilities(device.physical_device, self.surface)?,
                loader.get_physical_device_surface_formats(device.physical_device, self.surface)?,
                loader.get_physical_device_surface_present_modes(device.physical_device, self.surface)?,
            )
        };

        let surface_format = Self::choose_format(&formats, preferences.format)?;
        let present_mode = Self::choose_present_mode(&present_modes, preferences.present_mode);
        let image_count = Self::choose_image_count(&caps, desired_image_count);
        let vk_extent = Self::choose_extent(&caps, extent);

        let old_swapchain = self
            .swapchain
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.handle);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(vk_extent)
            .image_array_layers(1)
            // TRANSFER_DST: post effects blit into the swapchain image
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }?;

        // The old swapchain is retired either way once a new one was requested
        if let Some(old) = self.swapchain.take() {
            old.destroy(&device);
        }

        let images = match unsafe { device.swapchain_loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { device.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(e.into());
            }
        };

        let image_views = match self.create_image_views(&images, surface_format.format) {
            Ok(views) => views,
            Err(e) => {
                unsafe { device.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(e);
            }
        };

        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}",
            images.len(),
            vk_extent.width,
            vk_extent.height,
            surface_format.format,
            present_mode
        );

        let info = SwapchainInfo {
            extent: Extent2D::new(vk_extent.width, vk_extent.height),
            image_count: images.len(),
        };

        self.swapchain = Some(Swapchain {
            handle,
            images,
            image_views,
            format: surface_format.format,
            extent: vk_extent,
        });

        Ok(info)
    }

    fn acquire_next_image(&mut self, signal: &vk::Semaphore) -> GpuResult<AcquireOutcome> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| GpuError::Backend("acquire without a swapchain".to_string()))?;

        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                swapchain.handle,
                u64::MAX,
                *signal,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn present(&mut self, image_index: u32, wait: &vk::Semaphore) -> GpuResult<PresentOutcome> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| GpuError::Backend("present without a swapchain".to_string()))?;

        let wait_semaphores = [*wait];
        let swapchains = [swapchain.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.graphics_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(&self.device);
        }
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        self.release();
        unsafe {
            self.device.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
