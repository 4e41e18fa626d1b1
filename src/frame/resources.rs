// Swapchain-dependent resources and the contexts handed to render callbacks

use std::sync::Arc;

use super::gpu::{Device, Extent2D};

/// Everything sized from the surface extent: depth buffer, framebuffers,
/// offscreen targets, pre-recorded secondary command buffers.
///
/// The set is built by the rebuild callback and destroyed as one unit.
/// `destroy` consumes the set, so no member can outlive a resize.
pub trait SwapchainResources<D: Device> {
    /// Extent the set was built for
    fn extent(&self) -> Extent2D;

    /// Release every member. Called only while the device is idle.
    fn destroy(self, device: &D);
}

/// Handed to the rebuild callback after the swapchain was (re)configured
pub struct RebuildContext<'a, D, S> {
    pub device: &'a Arc<D>,
    pub surface: &'a S,
    pub extent: Extent2D,
    pub image_count: usize,
}

/// Handed to the record callback once per rendered frame
///
/// The command buffer is already recording and is ended by the controller
/// after the callback returns; the callback must not keep it.
pub struct FrameContext<'a, D: Device, R> {
    pub slot: usize,
    pub command_buffer: &'a D::CommandBuffer,
    pub resources: &'a R,
    pub extent: Extent2D,
    /// Number of frames submitted before this one
    pub frame_number: u64,
}
