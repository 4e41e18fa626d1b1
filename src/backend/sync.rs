// Synchronization primitives
//
// Fences for GPU-CPU and semaphores for GPU-GPU sync. Ownership lives in the
// frame controller's slots; these helpers only create and retire handles.

use ash::vk;

pub fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence, vk::Result> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::default().flags(flags);

    unsafe { device.create_fence(&fence_info, None) }
}

pub fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore, vk::Result> {
    let semaphore_info = vk::SemaphoreCreateInfo::default();

    unsafe { device.create_semaphore(&semaphore_info, None) }
}

/// Block until `fence` signals. `vk::Result::TIMEOUT` comes back as an error.
pub fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<(), vk::Result> {
    unsafe { device.wait_for_fences(&[fence], true, timeout_ns) }
}

pub fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<(), vk::Result> {
    unsafe { device.reset_fences(&[fence]) }
}

pub fn destroy_fence(device: &ash::Device, fence: vk::Fence) {
    unsafe { device.destroy_fence(fence, None) }
}

pub fn destroy_semaphore(device: &ash::Device, semaphore: vk::Semaphore) {
    unsafe { device.destroy_semaphore(semaphore, None) }
}
