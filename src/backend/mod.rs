// Backend module - Vulkan implementation of the frame seams
//
// Design: Thin wrapper around ash with safety and ergonomics
// `VulkanDevice` is the `frame::Device`, `VulkanSurface` the
// `frame::PresentationSurface`; everything else is helpers for samples.

pub mod device;
pub mod image;
pub mod render_pass;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use image::AttachmentImage;
pub use swapchain::{SurfacePreferences, VulkanSurface};
