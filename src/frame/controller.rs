// Frame lifecycle controller
//
// Owns per-image command buffers, fences and semaphores plus the
// swapchain-dependent resource set, and drives one frame per `render_frame`:
//
// ┌────────────────────────────────────────────────────────────────────────┐
// │ acquire ─> wait slot fence ─> record ─> reset fence ─> submit ─> present│
// │ (signals    (CPU blocks only   (caller   (fence goes    (waits on       │
// │  spare sem)  here)              callback) with submit)   render sem)    │
// └────────────────────────────────────────────────────────────────────────┘
//
// Resizes tear down the whole resource set while the device is idle and
// build it again through the rebuild callback. Nothing is resized piecemeal.

use std::sync::Arc;

use super::error::{FrameError, FrameStage, GpuError};
use super::gpu::{
    AcquireOutcome, Device, Extent2D, PresentOutcome, PresentationSurface, Submission,
};
use super::resources::{FrameContext, RebuildContext, SwapchainResources};

/// Fence timeout meaning "wait forever"
pub const INFINITE_TIMEOUT: u64 = u64::MAX;

/// Builds the swapchain-dependent resource set for a freshly configured swapchain
pub type RebuildFn<D, S, R> = Box<dyn FnMut(RebuildContext<'_, D, S>) -> anyhow::Result<R>>;

/// Startup parameters for the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerDesc {
    /// Requested swapchain image count, clamped by the surface to at least 2
    pub image_count: u32,
    /// Current surface extent; zero area starts the controller minimized
    pub extent: Extent2D,
    /// Per-slot fence wait bound in nanoseconds
    pub fence_timeout_ns: u64,
}

impl ControllerDesc {
    pub fn new(extent: Extent2D) -> Self {
        Self {
            image_count: 2,
            extent,
            fence_timeout_ns: INFINITE_TIMEOUT,
        }
    }

    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = image_count;
        self
    }

    pub fn with_fence_timeout(mut self, fence_timeout_ns: u64) -> Self {
        self.fence_timeout_ns = fence_timeout_ns;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Ready,
    /// Zero-area surface; `render_frame` is a no-op until resized
    Minimized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Minimized,
    OutOfDate,
}

/// What happened during one `render_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Submitted { slot: usize, present: PresentOutcome },
    Skipped(SkipReason),
}

impl FrameOutcome {
    pub fn rendered(&self) -> bool {
        matches!(self, FrameOutcome::Submitted { .. })
    }

    /// True if the swapchain no longer matches the surface and the owner
    /// should call `on_surface_resized` with the current window size
    pub fn wants_rebuild(&self) -> bool {
        match self {
            FrameOutcome::Submitted { present, .. } => present.wants_rebuild(),
            FrameOutcome::Skipped(reason) => *reason == SkipReason::OutOfDate,
        }
    }
}

/// Command buffer + fence + sync pair for one swapchain image index
struct SwapchainImageSlot<D: Device> {
    command_buffer: D::CommandBuffer,
    fence: D::Fence,
    image_acquired: D::Semaphore,
    render_completed: D::Semaphore,
}

impl<D: Device> SwapchainImageSlot<D> {
    fn new(device: &D) -> Result<Self, GpuError> {
        // Start signaled: "available"
        let fence = device.create_fence(true)?;

        let command_buffer = match device.allocate_command_buffer() {
            Ok(command_buffer) => command_buffer,
            Err(e) => {
                device.destroy_fence(fence);
                return Err(e);
            }
        };

        let semaphores = device.create_semaphore().and_then(|image_acquired| {
            match device.create_semaphore() {
                Ok(render_completed) => Ok((image_acquired, render_completed)),
                Err(e) => {
                    device.destroy_semaphore(image_acquired);
                    Err(e)
                }
            }
        });

        match semaphores {
            Ok((image_acquired, render_completed)) => Ok(Self {
                command_buffer,
                fence,
                image_acquired,
                render_completed,
            }),
            Err(e) => {
                device.free_command_buffer(command_buffer);
                device.destroy_fence(fence);
                Err(e)
            }
        }
    }

    fn destroy(self, device: &D) {
        device.destroy_semaphore(self.render_completed);
        device.destroy_semaphore(self.image_acquired);
        device.free_command_buffer(self.command_buffer);
        device.destroy_fence(self.fence);
    }
}

/// All slots of the current swapchain plus the one unassigned acquire semaphore
struct SlotRing<D: Device> {
    slots: Vec<SwapchainImageSlot<D>>,
    /// Signaled by the next acquire, then swapped into the acquired slot
    spare_acquire: D::Semaphore,
}

impl<D: Device> SlotRing<D> {
    fn new(device: &D, image_count: usize) -> Result<Self, GpuError> {
        let spare_acquire = device.create_semaphore()?;
        let mut ring = Self {
            slots: Vec::with_capacity(image_count),
            spare_acquire,
        };

        for _ in 0..image_count {
            match SwapchainImageSlot::new(device) {
                Ok(slot) => ring.slots.push(slot),
                Err(e) => {
                    ring.destroy(device);
                    return Err(e);
                }
            }
        }

        Ok(ring)
    }

    fn destroy(self, device: &D) {
        for slot in self.slots.into_iter().rev() {
            slot.destroy(device);
        }
        device.destroy_semaphore(self.spare_acquire);
    }
}

/// Drives acquire/record/submit/present and the swapchain rebuild protocol.
///
/// IMPORTANT: the resource set `R` is only ever replaced by
/// `on_surface_resized`, after `Device::wait_idle`, so no in-flight command
/// buffer can reference a destroyed resource.
pub struct FrameLifecycleController<D, S, R>
where
    D: Device,
    S: PresentationSurface<D>,
    R: SwapchainResources<D>,
{
    device: Arc<D>,
    surface: S,
    rebuild: RebuildFn<D, S, R>,

    ring: Option<SlotRing<D>>,
    resources: Option<R>,

    state: LifecycleState,
    extent: Extent2D,
    desired_image_count: u32,
    fence_timeout_ns: u64,

    frames_submitted: u64,
    resource_generation: u64,
    rebuild_pending: bool,
    released: bool,
}

impl<D, S, R> FrameLifecycleController<D, S, R>
where
    D: Device,
    S: PresentationSurface<D>,
    R: SwapchainResources<D>,
{
    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Configure the swapchain, allocate one slot per image and build the
    /// initial resource set through `rebuild`.
    ///
    /// A zero-area `desc.extent` is accepted: the controller starts minimized
    /// and builds everything on the first non-zero resize.
    pub fn initialize<F>(
        surface: S,
        device: Arc<D>,
        desc: ControllerDesc,
        rebuild: F,
    ) -> Result<Self, FrameError>
    where
        F: FnMut(RebuildContext<'_, D, S>) -> anyhow::Result<R> + 'static,
    {
        if !device.supports_presentation() {
            return Err(FrameError::Initialization {
                stage: FrameStage::Initialize,
                reason: "no presentation-capable queue".to_string(),
            });
        }

        let mut controller = Self {
            device,
            surface,
            rebuild: Box::new(rebuild),
            ring: None,
            resources: None,
            state: LifecycleState::Minimized,
            extent: desc.extent,
            desired_image_count: desc.image_count,
            fence_timeout_ns: desc.fence_timeout_ns,
            frames_submitted: 0,
            resource_generation: 0,
            rebuild_pending: false,
            released: false,
        };

        if desc.extent.is_zero_area() {
            log::info!("Surface is minimized at startup, deferring swapchain creation");
            return Ok(controller);
        }

        // On failure, Drop releases whatever was created
        controller.establish(desc.extent, FrameStage::Initialize)?;
        Ok(controller)
    }

    /// Configure the swapchain at `requested` and build slots + resource set.
    /// Expects nothing swapchain-dependent to be alive.
    fn establish(&mut self, requested: Extent2D, stage: FrameStage) -> Result<(), FrameError> {
        debug_assert!(
            self.ring.is_none() && self.resources.is_none(),
            "establish called over live swapchain resources"
        );

        let info = self
            .surface
            .configure(requested, self.desired_image_count)
            .map_err(|e| FrameError::from_gpu(stage, e))?;

        if info.image_count < 2 {
            return Err(FrameError::Initialization {
                stage,
                reason: format!(
                    "surface provides {} image(s), at least 2 are required",
                    info.image_count
                ),
            });
        }

        let ring = SlotRing::new(self.device.as_ref(), info.image_count)
            .map_err(|e| FrameError::from_gpu(stage, e))?;
        self.ring = Some(ring);

        // Out of memory or device loss inside the callback keeps its kind
        let resources = (self.rebuild)(RebuildContext {
            device: &self.device,
            surface: &self.surface,
            extent: info.extent,
            image_count: info.image_count,
        })
        .map_err(|source| match source.downcast::<GpuError>() {
            Ok(err @ (GpuError::OutOfMemory | GpuError::DeviceLost)) => {
                FrameError::from_gpu(stage, err)
            }
            Ok(err) => FrameError::Rebuild {
                extent: info.extent,
                source: err.into(),
            },
            Err(source) => FrameError::Rebuild {
                extent: info.extent,
                source: source.into(),
            },
        })?;

        debug_assert_eq!(
            resources.extent(),
            info.extent,
            "swapchain resources built at a stale extent"
        );

        self.resources = Some(resources);
        self.extent = info.extent;
        self.state = LifecycleState::Ready;
        self.rebuild_pending = false;
        self.resource_generation += 1;

        log::info!(
            "Swapchain ready: {} images at {} (generation {})",
            info.image_count,
            info.extent,
            self.resource_generation
        );
        Ok(())
    }

    /// Destroy the resource set, then the slots. Device must be idle.
    fn destroy_swapchain_dependents(&mut self) {
        if let Some(resources) = self.resources.take() {
            resources.destroy(&self.device);
        }
        if let Some(ring) = self.ring.take() {
            ring.destroy(&self.device);
        }
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render exactly one frame.
    ///
    /// `record` receives the slot's command buffer already recording; the
    /// controller ends it, submits it and presents. Minimized and
    /// out-of-date surfaces are reported as `FrameOutcome::Skipped`.
    pub fn render_frame<F>(&mut self, record: F) -> Result<FrameOutcome, FrameError>
    where
        F: FnOnce(FrameContext<'_, D, R>) -> anyhow::Result<()>,
    {
        if self.state == LifecycleState::Minimized {
            return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
        }

        // Only reachable after a failed rebuild; a successful resize recovers
        let (Some(ring), Some(resources)) = (self.ring.as_mut(), self.resources.as_ref()) else {
            return Err(FrameError::Initialization {
                stage: FrameStage::Acquire,
                reason: "swapchain resources are missing after a failed rebuild".to_string(),
            });
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Acquire next image (signals the spare semaphore)
        // ─────────────────────────────────────────────────────────────────────
        let acquired = self
            .surface
            .acquire_next_image(&ring.spare_acquire)
            .map_err(|e| FrameError::from_gpu(FrameStage::Acquire, e))?;

        let image_index = match acquired {
            AcquireOutcome::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    self.rebuild_pending = true;
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                // Nothing was signaled, the spare stays usable
                log::debug!("Swapchain out of date at acquire, skipping frame");
                self.rebuild_pending = true;
                return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
            }
        };

        let slot_index = image_index as usize;
        let slot_count = ring.slots.len();
        debug_assert!(slot_index < slot_count, "image index out of range");
        let Some(slot) = ring.slots.get_mut(slot_index) else {
            return Err(FrameError::SubmissionFailed {
                stage: FrameStage::Acquire,
                source: GpuError::Backend(format!(
                    "image index {} outside {} slots",
                    image_index, slot_count
                )),
            });
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Wait until the previous submission from this slot finished
        // ─────────────────────────────────────────────────────────────────────
        let timeout_ns = self.fence_timeout_ns;
        self.device
            .wait_for_fence(&slot.fence, timeout_ns)
            .map_err(|e| match e {
                GpuError::Timeout => FrameError::FenceTimeout {
                    slot: slot_index,
                    timeout_ns,
                },
                other => FrameError::from_gpu(FrameStage::Wait, other),
            })?;

        // The slot's old acquire semaphore was consumed by the submission the
        // fence just retired, so it is free to become the next spare.
        std::mem::swap(&mut slot.image_acquired, &mut ring.spare_acquire);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Record
        // ─────────────────────────────────────────────────────────────────────
        self.device
            .begin_commands(&slot.command_buffer)
            .map_err(|e| FrameError::from_gpu(FrameStage::Record, e))?;

        record(FrameContext {
            slot: slot_index,
            command_buffer: &slot.command_buffer,
            resources,
            extent: self.extent,
            frame_number: self.frames_submitted,
        })
        .map_err(|source| FrameError::Record {
            slot: slot_index,
            source: source.into(),
        })?;

        self.device
            .end_commands(&slot.command_buffer)
            .map_err(|e| FrameError::from_gpu(FrameStage::Record, e))?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Submit (fence is reset right before it is handed back out)
        // ─────────────────────────────────────────────────────────────────────
        self.device
            .reset_fence(&slot.fence)
            .map_err(|e| FrameError::from_gpu(FrameStage::Submit, e))?;

        self.device
            .submit(Submission {
                command_buffer: &slot.command_buffer,
                wait: &slot.image_acquired,
                signal: &slot.render_completed,
                fence: &slot.fence,
            })
            .map_err(|e| FrameError::from_gpu(FrameStage::Submit, e))?;

        self.frames_submitted += 1;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Present
        // ─────────────────────────────────────────────────────────────────────
        let present = self
            .surface
            .present(image_index, &slot.render_completed)
            .map_err(|e| FrameError::from_gpu(FrameStage::Present, e))?;

        if present.wants_rebuild() {
            log::debug!("Present reported {:?}, rebuild requested", present);
            self.rebuild_pending = true;
        }

        Ok(FrameOutcome::Submitted {
            slot: slot_index,
            present,
        })
    }

    // =========================================================================
    // RESIZE
    // =========================================================================

    /// React to a surface size change.
    ///
    /// Zero area enters `Minimized` and returns `false`. Anything else waits
    /// for the device to go idle, destroys the full resource set and slots,
    /// reconfigures the swapchain and rebuilds; returns `true`.
    pub fn on_surface_resized(&mut self, width: u32, height: u32) -> Result<bool, FrameError> {
        let extent = Extent2D::new(width, height);

        if extent.is_zero_area() {
            if self.state != LifecycleState::Minimized {
                log::info!("Surface minimized, rendering paused");
            }
            self.state = LifecycleState::Minimized;
            return Ok(false);
        }

        self.device
            .wait_idle()
            .map_err(|e| FrameError::from_gpu(FrameStage::Rebuild, e))?;

        log::info!("Rebuilding swapchain resources: {} -> {}", self.extent, extent);
        self.destroy_swapchain_dependents();
        if let Err(e) = self.establish(extent, FrameStage::Rebuild) {
            self.rebuild_pending = true;
            return Err(e);
        }
        Ok(true)
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Wait for the device, then release everything in reverse creation order:
    /// resource set, slots, spare semaphore, swapchain.
    pub fn shutdown(mut self) -> Result<(), FrameError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), FrameError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // Keep tearing down even if the device is gone
        let idle = self
            .device
            .wait_idle()
            .map_err(|e| FrameError::from_gpu(FrameStage::Shutdown, e));

        self.destroy_swapchain_dependents();
        self.surface.release();

        log::info!(
            "Frame lifecycle shut down after {} frames",
            self.frames_submitted
        );
        idle
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Extent of the current swapchain (last requested extent while minimized)
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.slots.len())
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Number of times the resource set has been built (1 after a normal start)
    pub fn resource_generation(&self) -> u64 {
        self.resource_generation
    }

    /// Set when acquire or present reported a suboptimal/out-of-date swapchain
    pub fn needs_rebuild(&self) -> bool {
        self.rebuild_pending
    }

    pub fn resources(&self) -> Option<&R> {
        self.resources.as_ref()
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

impl<D, S, R> Drop for FrameLifecycleController<D, S, R>
where
    D: Device,
    S: PresentationSurface<D>,
    R: SwapchainResources<D>,
{
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Frame lifecycle teardown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_out_of_date_wants_rebuild() {
        assert!(FrameOutcome::Skipped(SkipReason::OutOfDate).wants_rebuild());
        assert!(!FrameOutcome::Skipped(SkipReason::Minimized).wants_rebuild());
        assert!(!FrameOutcome::Skipped(SkipReason::Minimized).rendered());
    }

    #[test]
    fn submitted_outcome_follows_present() {
        let clean = FrameOutcome::Submitted {
            slot: 0,
            present: PresentOutcome::Presented,
        };
        assert!(clean.rendered());
        assert!(!clean.wants_rebuild());

        let stale = FrameOutcome::Submitted {
            slot: 1,
            present: PresentOutcome::OutOfDate,
        };
        assert!(stale.rendered());
        assert!(stale.wants_rebuild());
    }

    #[test]
    fn desc_defaults_to_infinite_wait() {
        let desc = ControllerDesc::new(Extent2D::new(800, 600)).with_image_count(3);
        assert_eq!(desc.image_count, 3);
        assert_eq!(desc.fence_timeout_ns, INFINITE_TIMEOUT);
    }
}
