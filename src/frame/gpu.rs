// GPU seams - what the frame controller needs from a device and a surface
//
// The controller never sees a backend type directly. A backend (Vulkan here,
// a mock in the tests) provides fences, semaphores and command buffers through
// `Device`, and swapchain images through `PresentationSurface`.

use std::fmt;

use super::error::GpuResult;

/// Size of the presentation surface in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-area surface
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Extent divided by `factor` in both dimensions, never below 1x1
    pub fn scaled_down(&self, factor: u32) -> Self {
        let factor = factor.max(1);
        Self {
            width: (self.width / factor).max(1),
            height: (self.height / factor).max(1),
        }
    }
}

impl fmt::Display for Extent2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Result of asking the surface for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// Surface no longer matches the swapchain; nothing was signaled
    OutOfDate,
}

/// Result of handing a rendered image back to the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn wants_rebuild(&self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// What the surface actually negotiated when (re)configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub extent: Extent2D,
    pub image_count: usize,
}

/// One queue submission issued by the controller
///
/// The wait on `wait` happens at the color-attachment-output stage, so vertex
/// work may start before the presentation engine releases the image.
pub struct Submission<'a, D: Device + ?Sized> {
    pub command_buffer: &'a D::CommandBuffer,
    pub wait: &'a D::Semaphore,
    pub signal: &'a D::Semaphore,
    pub fence: &'a D::Fence,
}

/// GPU device and its presentation-capable queue
pub trait Device {
    type Fence;
    type Semaphore;
    type CommandBuffer;

    /// True if the selected queue can present to the window surface
    fn supports_presentation(&self) -> bool;

    fn create_fence(&self, signaled: bool) -> GpuResult<Self::Fence>;
    fn destroy_fence(&self, fence: Self::Fence);

    fn create_semaphore(&self) -> GpuResult<Self::Semaphore>;
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);

    /// Allocate one primary command buffer that can be reset individually
    fn allocate_command_buffer(&self) -> GpuResult<Self::CommandBuffer>;
    fn free_command_buffer(&self, command_buffer: Self::CommandBuffer);

    /// Block until `fence` is signaled or `timeout_ns` elapses
    fn wait_for_fence(&self, fence: &Self::Fence, timeout_ns: u64) -> GpuResult<()>;
    fn reset_fence(&self, fence: &Self::Fence) -> GpuResult<()>;

    /// Reset and begin recording
    fn begin_commands(&self, command_buffer: &Self::CommandBuffer) -> GpuResult<()>;
    fn end_commands(&self, command_buffer: &Self::CommandBuffer) -> GpuResult<()>;

    fn submit(&self, submission: Submission<'_, Self>) -> GpuResult<()>;

    fn wait_idle(&self) -> GpuResult<()>;
}

/// Window surface plus the swapchain built on it
pub trait PresentationSurface<D: Device> {
    /// Create the swapchain, or replace the existing one, at `extent`.
    ///
    /// `desired_image_count` is a request; the surface clamps it to what the
    /// presentation engine supports and to at least 2.
    fn configure(&mut self, extent: Extent2D, desired_image_count: u32) -> GpuResult<SwapchainInfo>;

    fn acquire_next_image(&mut self, signal: &D::Semaphore) -> GpuResult<AcquireOutcome>;

    fn present(&mut self, image_index: u32, wait: &D::Semaphore) -> GpuResult<PresentOutcome>;

    /// Destroy the swapchain. The surface itself stays usable for `configure`.
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_area_extents() {
        assert!(Extent2D::new(0, 480).is_zero_area());
        assert!(Extent2D::new(640, 0).is_zero_area());
        assert!(!Extent2D::new(1, 1).is_zero_area());
    }

    #[test]
    fn scaled_down_never_collapses() {
        assert_eq!(Extent2D::new(640, 480).scaled_down(8), Extent2D::new(80, 60));
        assert_eq!(Extent2D::new(3, 3).scaled_down(8), Extent2D::new(1, 1));
        assert_eq!(Extent2D::new(640, 480).scaled_down(0), Extent2D::new(640, 480));
    }

    #[test]
    fn extent_display() {
        assert_eq!(Extent2D::new(1280, 720).to_string(), "1280x720");
    }

    #[test]
    fn only_clean_presents_keep_the_swapchain() {
        assert!(!PresentOutcome::Presented.wants_rebuild());
        assert!(PresentOutcome::Suboptimal.wants_rebuild());
        assert!(PresentOutcome::OutOfDate.wants_rebuild());
    }
}
