// Mock device and surface for driving the frame controller without a GPU
//
// Every call is appended to a shared event log. Fences are real blocking
// primitives: a submission leaves its fence unsignaled until the test (or a
// helper thread) calls `complete_next`, unless auto-completion is on.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use frame_lifecycle::frame::{
    AcquireOutcome, ControllerDesc, Device, Extent2D, FrameError, FrameLifecycleController,
    FrameOutcome, GpuError, GpuResult, PresentOutcome, PresentationSurface, RebuildContext,
    Submission, SwapchainInfo, SwapchainResources,
};

pub type MockController = FrameLifecycleController<MockDevice, MockSurface, MockResources>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateFence { id: u64, signaled: bool },
    DestroyFence(u64),
    CreateSemaphore(u64),
    DestroySemaphore(u64),
    AllocateCommandBuffer(u64),
    FreeCommandBuffer(u64),
    WaitFence(u64),
    ResetFence(u64),
    Begin(u64),
    End(u64),
    Record { slot: usize, command_buffer: u64, frame_number: u64 },
    Submit { command_buffer: u64, wait: u64, signal: u64, fence: u64 },
    /// GPU finished the submission that signals this fence
    Complete(u64),
    WaitIdle,
    Configure { extent: Extent2D, image_count: usize },
    Acquire { signal: u64, result: AcquireOutcome },
    Present { image_index: u32, wait: u64 },
    ReleaseSwapchain,
    BuildResources { generation: u64, extent: Extent2D },
    DestroyResources { generation: u64 },
}

impl Event {
    /// True for anything that reaches the device or the presentation engine
    pub fn is_gpu_call(&self) -> bool {
        !matches!(
            self,
            Event::Record { .. } | Event::BuildResources { .. } | Event::DestroyResources { .. }
        )
    }
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn since(&self, mark: usize) -> Vec<Event> {
        self.0.lock()[mark..].to_vec()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.0.lock().iter().position(|e| pred(e))
    }

    pub fn rposition(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.0.lock().iter().rposition(|e| pred(e))
    }
}

// =============================================================================
// DEVICE
// =============================================================================

pub struct MockFence {
    pub id: u64,
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl MockFence {
    fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }
}

struct InFlight {
    command_buffer: u64,
    fence: Arc<MockFence>,
}

pub struct MockDevice {
    log: EventLog,
    next_id: AtomicU64,
    presentable: bool,
    auto_complete: AtomicBool,
    /// Submissions the "GPU" has not finished yet, oldest first
    pending: Mutex<VecDeque<InFlight>>,
    /// Command buffers begun while still pending
    reuse_violations: AtomicU64,
    fail_next_allocation: AtomicBool,
    lose_device_on_submit: AtomicBool,
}

impl MockDevice {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            next_id: AtomicU64::new(1),
            presentable: true,
            auto_complete: AtomicBool::new(true),
            pending: Mutex::new(VecDeque::new()),
            reuse_violations: AtomicU64::new(0),
            fail_next_allocation: AtomicBool::new(false),
            lose_device_on_submit: AtomicBool::new(false),
        }
    }

    pub fn without_presentation(log: EventLog) -> Self {
        Self {
            presentable: false,
            ..Self::new(log)
        }
    }

    /// Leave fences unsignaled after submit until `complete_next`
    pub fn set_manual_completion(&self, manual: bool) {
        self.auto_complete.store(!manual, Ordering::SeqCst);
    }

    /// Finish the oldest pending submission. Returns false if none is pending.
    pub fn complete_next(&self) -> bool {
        let Some(done) = self.pending.lock().pop_front() else {
            return false;
        };
        self.log.push(Event::Complete(done.fence.id));
        done.fence.signal();
        true
    }

    pub fn complete_all(&self) {
        while self.complete_next() {}
    }

    pub fn pending_submissions(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn reuse_violations(&self) -> u64 {
        self.reuse_violations.load(Ordering::SeqCst)
    }

    pub fn fail_next_allocation(&self) {
        self.fail_next_allocation.store(true, Ordering::SeqCst);
    }

    pub fn lose_device_on_submit(&self) {
        self.lose_device_on_submit.store(true, Ordering::SeqCst);
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Device for MockDevice {
    type Fence = Arc<MockFence>;
    type Semaphore = u64;
    type CommandBuffer = u64;

    fn supports_presentation(&self) -> bool {
        self.presentable
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<Arc<MockFence>> {
        let id = self.id();
        self.log.push(Event::CreateFence { id, signaled });
        Ok(Arc::new(MockFence {
            id,
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        }))
    }

    fn destroy_fence(&self, fence: Arc<MockFence>) {
        self.log.push(Event::DestroyFence(fence.id));
    }

    fn create_semaphore(&self) -> GpuResult<u64> {
        let id = self.id();
        self.log.push(Event::CreateSemaphore(id));
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: u64) {
        self.log.push(Event::DestroySemaphore(semaphore));
    }

    fn allocate_command_buffer(&self) -> GpuResult<u64> {
        if self.fail_next_allocation.swap(false, Ordering::SeqCst) {
            return Err(GpuError::OutOfMemory);
        }
        let id = self.id();
        self.log.push(Event::AllocateCommandBuffer(id));
        Ok(id)
    }

    fn free_command_buffer(&self, command_buffer: u64) {
        self.log.push(Event::FreeCommandBuffer(command_buffer));
    }

    fn wait_for_fence(&self, fence: &Arc<MockFence>, timeout_ns: u64) -> GpuResult<()> {
        self.log.push(Event::WaitFence(fence.id));

        let mut signaled = fence.signaled.lock();
        if timeout_ns == u64::MAX {
            while !*signaled {
                fence.cond.wait(&mut signaled);
            }
            return Ok(());
        }

        let deadline = Instant::now() + Duration::from_nanos(timeout_ns);
        while !*signaled {
            if fence.cond.wait_until(&mut signaled, deadline).timed_out() {
                return if *signaled {
                    Ok(())
                } else {
                    Err(GpuError::Timeout)
                };
            }
        }
        Ok(())
    }

    fn reset_fence(&self, fence: &Arc<MockFence>) -> GpuResult<()> {
        self.log.push(Event::ResetFence(fence.id));
        *fence.signaled.lock() = false;
        Ok(())
    }

    fn begin_commands(&self, command_buffer: &u64) -> GpuResult<()> {
        let busy = self
            .pending
            .lock()
            .iter()
            .any(|p| p.command_buffer == *command_buffer);
        if busy {
            self.reuse_violations.fetch_add(1, Ordering::SeqCst);
        }
        self.log.push(Event::Begin(*command_buffer));
        Ok(())
    }

    fn end_commands(&self, command_buffer: &u64) -> GpuResult<()> {
        self.log.push(Event::End(*command_buffer));
        Ok(())
    }

    fn submit(&self, submission: Submission<'_, Self>) -> GpuResult<()> {
        if self.lose_device_on_submit.load(Ordering::SeqCst) {
            return Err(GpuError::DeviceLost);
        }

        self.log.push(Event::Submit {
            command_buffer: *submission.command_buffer,
            wait: *submission.wait,
            signal: *submission.signal,
            fence: submission.fence.id,
        });

        self.pending.lock().push_back(InFlight {
            command_buffer: *submission.command_buffer,
            fence: Arc::clone(submission.fence),
        });

        if self.auto_complete.load(Ordering::SeqCst) {
            self.complete_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> GpuResult<()> {
        self.log.push(Event::WaitIdle);
        self.complete_all();
        Ok(())
    }
}

// =============================================================================
// SURFACE
// =============================================================================

struct SurfaceState {
    /// Most images the presentation engine will hand out
    max_images: usize,
    image_count: usize,
    next_image: u32,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    configured: bool,
}

pub struct MockSurface {
    log: EventLog,
    state: Mutex<SurfaceState>,
}

impl MockSurface {
    pub fn new(log: EventLog) -> Self {
        Self::with_max_images(log, 8)
    }

    pub fn with_max_images(log: EventLog, max_images: usize) -> Self {
        Self {
            log,
            state: Mutex::new(SurfaceState {
                max_images,
                image_count: 0,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                configured: false,
            }),
        }
    }

    /// Queue a result for an upcoming acquire; unscripted acquires round-robin
    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.lock().present_script.push_back(outcome);
    }

    /// Change what the next `configure` can hand out
    pub fn set_max_images(&self, max_images: usize) {
        self.state.lock().max_images = max_images;
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().configured
    }
}

impl PresentationSurface<MockDevice> for MockSurface {
    fn configure(&mut self, extent: Extent2D, desired_image_count: u32) -> GpuResult<SwapchainInfo> {
        let mut state = self.state.lock();
        let image_count = (desired_image_count as usize).max(2).min(state.max_images);
        state.image_count = image_count;
        state.next_image = 0;
        state.configured = true;
        self.log.push(Event::Configure {
            extent,
            image_count,
        });
        Ok(SwapchainInfo {
            extent,
            image_count,
        })
    }

    fn acquire_next_image(&mut self, signal: &u64) -> GpuResult<AcquireOutcome> {
        let mut state = self.state.lock();
        let result = match state.acquire_script.pop_front() {
            Some(scripted) => scripted,
            None => {
                let image_index = state.next_image;
                state.next_image = (image_index + 1) % state.image_count.max(1) as u32;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }
        };
        self.log.push(Event::Acquire {
            signal: *signal,
            result,
        });
        Ok(result)
    }

    fn present(&mut self, image_index: u32, wait: &u64) -> GpuResult<PresentOutcome> {
        self.log.push(Event::Present {
            image_index,
            wait: *wait,
        });
        Ok(self
            .state
            .lock()
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn release(&mut self) {
        self.state.lock().configured = false;
        self.log.push(Event::ReleaseSwapchain);
    }
}

// =============================================================================
// RESOURCES
// =============================================================================

/// Stands in for depth buffer + framebuffers; logs build and destroy
pub struct MockResources {
    pub generation: u64,
    pub extent: Extent2D,
    pub image_count: usize,
    log: EventLog,
}

impl SwapchainResources<MockDevice> for MockResources {
    fn extent(&self) -> Extent2D {
        self.extent
    }

    fn destroy(self, _device: &MockDevice) {
        self.log.push(Event::DestroyResources {
            generation: self.generation,
        });
    }
}

/// Rebuild callback producing numbered `MockResources`
pub fn rebuild_fn(
    log: EventLog,
) -> impl FnMut(RebuildContext<'_, MockDevice, MockSurface>) -> anyhow::Result<MockResources> + 'static {
    let mut generation = 0;
    move |ctx| {
        generation += 1;
        log.push(Event::BuildResources {
            generation,
            extent: ctx.extent,
        });
        Ok(MockResources {
            generation,
            extent: ctx.extent,
            image_count: ctx.image_count,
            log: log.clone(),
        })
    }
}

// =============================================================================
// HARNESS
// =============================================================================

pub struct Harness {
    pub log: EventLog,
    pub device: Arc<MockDevice>,
}

impl Harness {
    pub fn new() -> Self {
        let log = EventLog::default();
        let device = Arc::new(MockDevice::new(log.clone()));
        Self { log, device }
    }

    pub fn surface(&self) -> MockSurface {
        MockSurface::new(self.log.clone())
    }

    pub fn controller(&self, desc: ControllerDesc) -> Result<MockController, FrameError> {
        MockController::initialize(
            self.surface(),
            Arc::clone(&self.device),
            desc,
            rebuild_fn(self.log.clone()),
        )
    }
}

pub fn desc(width: u32, height: u32, image_count: u32) -> ControllerDesc {
    ControllerDesc::new(Extent2D::new(width, height)).with_image_count(image_count)
}

/// One `render_frame` with a record callback that only logs
pub fn render(controller: &mut MockController, log: &EventLog) -> Result<FrameOutcome, FrameError> {
    controller.render_frame(|frame| {
        log.push(Event::Record {
            slot: frame.slot,
            command_buffer: *frame.command_buffer,
            frame_number: frame.frame_number,
        });
        Ok(())
    })
}

pub fn is_submit(event: &Event) -> bool {
    matches!(event, Event::Submit { .. })
}

pub fn is_present(event: &Event) -> bool {
    matches!(event, Event::Present { .. })
}
