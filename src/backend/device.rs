// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers and window surface extensions
// - Window surface creation
// - Physical device selection (prefer discrete GPU that can present)
// - Logical device + queue + command pool creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::sync;
use crate::frame::{Device, GpuError, GpuResult, Submission};

/// Rendering waits for the acquired image only where color is written
const WAIT_STAGES: [vk::PipelineStageFlags; 1] = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Destroyed in reverse declaration order by Drop
    allocator: Mutex<Option<Allocator>>,
    command_pool: vk::CommandPool,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Extension loaders
    pub surface_loader: ash::khr::surface::Instance,
    pub swapchain_loader: ash::khr::swapchain::Device,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    present_supported: bool,

    // Only present with validation layers
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Create the Vulkan device together with a surface for `window`
    ///
    /// The surface has to exist before the GPU is picked, because only a
    /// queue family that can present to it is acceptable.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `window` - Window to present into
    pub fn new<W>(
        app_name: &str,
        enable_validation: bool,
        window: &W,
    ) -> Result<(Arc<Self>, vk::SurfaceKHR)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("No Vulkan surface support for this windowing system")?
            .to_vec();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        // Needed for HDR10 color spaces; without it the surface reports sRGB only
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .unwrap_or_default();
        let has_colorspace = available.iter().any(|ext| {
            ext.extension_name_as_c_str()
                .is_ok_and(|name| name == ash::ext::swapchain_colorspace::NAME)
        });
        if has_colorspace {
            extensions.push(ash::ext::swapchain_colorspace::NAME.as_ptr());
        }
        let instance = Self::create_instance(&entry, app_name, &extensions, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Create window surface
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;

        // Step 5: Pick physical device (GPU)
        let (physical_device, graphics_queue_family, present_supported) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;
        if !present_supported {
            log::warn!("Selected GPU has no queue family that can present to this window");
        }

        // Step 6: Create logical device
        let (device, graphics_queue) =
            Self::create_logical_device(&instance, physical_device, graphics_queue_family)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 7: Command pool shared by every slot
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            // RESET: each slot re-records its own buffer every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        // Step 8: Memory allocator
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let vulkan_device = Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            command_pool,
            device,
            physical_device,
            instance,
            _entry: entry,
            surface_loader,
            swapchain_loader,
            graphics_queue,
            graphics_queue_family,
            present_supported,
            debug_utils,
            properties,
        });

        Ok((vulkan_device, surface))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        extensions: &[*const c_char],
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Frame Lifecycle")?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        // Validation layers
        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    /// Returns the device, its graphics queue family, and whether that family
    /// can present to `surface`
    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32, bool)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let graphics_families = queue_families
                .iter()
                .enumerate()
                .filter(|(_, props)| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(i, _)| i as u32);

            let mut chosen = None;
            for family in graphics_families {
                let can_present = unsafe {
                    surface_loader.get_physical_device_surface_support(device, family, surface)
                }
                .unwrap_or(false);

                if can_present {
                    chosen = Some((family, true));
                    break;
                }
                chosen.get_or_insert((family, false));
            }

            let Some((family, can_present)) = chosen else {
                continue;
            };

            // Prefer discrete GPU, and anything that can present over anything that can't
            let mut score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };
            if can_present {
                score += 10_000;
            }

            if score > best_score {
                best_score = score;
                best_device = Some((device, family, can_present));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No GPU with a graphics queue found"))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities);

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        Ok((device, graphics_queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(allocator)
    }

    /// Run `f` with exclusive access to the memory allocator
    pub fn with_allocator<T>(&self, f: impl FnOnce(&mut Allocator) -> Result<T>) -> Result<T> {
        let mut guard = self.allocator.lock();
        let allocator = guard.as_mut().context("Memory allocator already destroyed")?;
        f(allocator)
    }

    /// Allocate secondary command buffers from the shared pool
    pub fn allocate_secondary_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::SECONDARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate secondary command buffers")
    }

    pub fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, command_buffers);
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL => GpuError::OutOfMemory,
            vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
            vk::Result::TIMEOUT => GpuError::Timeout,
            vk::Result::ERROR_SURFACE_LOST_KHR => GpuError::SurfaceLost,
            other => GpuError::Backend(format!("Vulkan error: {:?}", other)),
        }
    }
}

impl Device for VulkanDevice {
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type CommandBuffer = vk::CommandBuffer;

    fn supports_presentation(&self) -> bool {
        self.present_supported
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        Ok(sync::create_fence(&self.device, signaled)?)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        sync::destroy_fence(&self.device, fence);
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        Ok(sync::create_semaphore(&self.device)?)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        sync::destroy_semaphore(&self.device, semaphore);
    }

    fn allocate_command_buffer(&self) -> GpuResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Backend("driver returned no command buffer".to_string()))
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        self.free_command_buffers(&[command_buffer]);
    }

    fn wait_for_fence(&self, fence: &vk::Fence, timeout_ns: u64) -> GpuResult<()> {
        Ok(sync::wait_for_fence(&self.device, *fence, timeout_ns)?)
    }

    fn reset_fence(&self, fence: &vk::Fence) -> GpuResult<()> {
        Ok(sync::reset_fence(&self.device, *fence)?)
    }

    fn begin_commands(&self, command_buffer: &vk::CommandBuffer) -> GpuResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .reset_command_buffer(*command_buffer, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(*command_buffer, &begin_info)?;
        }
        Ok(())
    }

    fn end_commands(&self, command_buffer: &vk::CommandBuffer) -> GpuResult<()> {
        unsafe { self.device.end_command_buffer(*command_buffer) }?;
        Ok(())
    }

    fn submit(&self, submission: Submission<'_, Self>) -> GpuResult<()> {
        let wait_semaphores = [*submission.wait];
        let signal_semaphores = [*submission.signal];
        let command_buffers = [*submission.command_buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores) // Wait for image to be available
            .wait_dst_stage_mask(&WAIT_STAGES) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        unsafe {
            self.device.queue_submit(
                self.graphics_queue,
                &[submit_info],
                *submission.fence, // Signal this fence when GPU is done
            )
        }?;
        Ok(())
    }

    fn wait_idle(&self) -> GpuResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Slots and swapchains were released by their owners already
        let _ = VulkanDevice::wait_idle(self);

        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);

            // Allocator frees its memory blocks through the device
            drop(self.allocator.lock().take());

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// Routes validation messages into the log facade
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
