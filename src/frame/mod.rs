// Frame module - backend-agnostic frame lifecycle
//
// Design: the controller only sequences acquire/wait/record/submit/present and
// the swapchain rebuild protocol. Devices, surfaces and resource sets plug in
// through traits, so the same protocol runs on Vulkan or on a test double.

pub mod controller;
pub mod error;
pub mod gpu;
pub mod registry;
pub mod resources;

pub use controller::{
    ControllerDesc, FrameLifecycleController, FrameOutcome, LifecycleState, SkipReason,
    INFINITE_TIMEOUT,
};
pub use error::{FrameError, FrameStage, GpuError, GpuResult};
pub use gpu::{
    AcquireOutcome, Device, Extent2D, PresentOutcome, PresentationSurface, Submission,
    SwapchainInfo,
};
pub use registry::RenderPassRegistry;
pub use resources::{FrameContext, RebuildContext, SwapchainResources};
