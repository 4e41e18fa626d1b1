// Frame lifecycle and swapchain rebuild protocol
//
// `frame` is the backend-agnostic core; `backend` runs it on Vulkan;
// `samples` are the render graphs the binary can drive.

pub mod backend;
pub mod config;
pub mod frame;
pub mod input;
pub mod samples;
