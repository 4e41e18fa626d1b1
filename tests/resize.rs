// Swapchain rebuild protocol: resize, minimize, restore

mod common;

use std::sync::Arc;

use frame_lifecycle::frame::{
    ControllerDesc, Extent2D, FrameError, FrameOutcome, FrameStage, GpuError, LifecycleState,
    SkipReason,
};

use common::{desc, render, Event, Harness, MockController, MockResources, MockSurface};

fn builds(events: &[Event]) -> Vec<(u64, Extent2D)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::BuildResources { generation, extent } => Some((*generation, *extent)),
            _ => None,
        })
        .collect()
}

fn destroyed(events: &[Event]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::DestroyResources { generation } => Some(*generation),
            _ => None,
        })
        .collect()
}

fn index_of(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().position(pred).unwrap()
}

fn count_of(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

#[test]
fn resize_replaces_the_whole_resource_set() {
    let h = Harness::new();
    let mut controller = h.controller(desc(640, 480, 2)).unwrap();
    render(&mut controller, &h.log).unwrap();
    let mark = h.log.len();

    assert!(controller.on_surface_resized(800, 600).unwrap());

    let events = h.log.since(mark);
    assert_eq!(destroyed(&events), [1]);
    assert_eq!(builds(&events), [(2, Extent2D::new(800, 600))]);

    let resources = controller.resources().unwrap();
    assert_eq!(resources.generation, 2);
    assert_eq!(resources.extent, Extent2D::new(800, 600));
    assert_eq!(controller.extent(), Extent2D::new(800, 600));
    assert_eq!(controller.resource_generation(), 2);
    assert_eq!(controller.state(), LifecycleState::Ready);
}

#[test]
fn resize_waits_idle_and_destroys_before_reconfiguring() {
    let h = Harness::new();
    h.device.set_manual_completion(true);
    let mut controller = h.controller(desc(640, 480, 2)).unwrap();
    render(&mut controller, &h.log).unwrap();
    render(&mut controller, &h.log).unwrap();
    let mark = h.log.len();

    controller.on_surface_resized(1024, 768).unwrap();

    let events = h.log.since(mark);
    let idle = index_of(&events, |e| *e == Event::WaitIdle);
    let last_complete = events
        .iter()
        .rposition(|e| matches!(e, Event::Complete(_)))
        .unwrap();
    let destroy_set = index_of(&events, |e| matches!(e, Event::DestroyResources { .. }));
    let destroy_slots = index_of(&events, |e| matches!(e, Event::DestroyFence(_)));
    let configure = index_of(&events, |e| matches!(e, Event::Configure { .. }));
    let create_slots = index_of(&events, |e| matches!(e, Event::CreateFence { .. }));
    let build = index_of(&events, |e| matches!(e, Event::BuildResources { .. }));

    assert_eq!(idle, 0);
    assert!(last_complete < destroy_set, "resources destroyed under in-flight work");
    assert!(destroy_set < destroy_slots);
    assert!(destroy_slots < configure);
    assert!(configure < create_slots);
    assert!(create_slots < build);
    assert_eq!(h.device.pending_submissions(), 0);
}

#[test]
fn sync_objects_are_recreated_with_the_slots() {
    let h = Harness::new();
    let mut controller = h.controller(desc(640, 480, 2)).unwrap();
    let mark = h.log.len();

    controller.on_surface_resized(640, 480).unwrap();
    let events = h.log.since(mark);

    assert_eq!(count_of(&events, |e| matches!(e, Event::DestroyFence(_))), 2);
    assert_eq!(count_of(&events, |e| matches!(e, Event::CreateFence { .. })), 2);
    assert_eq!(count_of(&events, |e| matches!(e, Event::DestroySemaphore(_))), 5);
    assert_eq!(count_of(&events, |e| matches!(e, Event::CreateSemaphore(_))), 5);
    assert_eq!(count_of(&events, |e| matches!(e, Event::FreeCommandBuffer(_))), 2);
    assert_eq!(count_of(&events, |e| matches!(e, Event::AllocateCommandBuffer(_))), 2);
}

#[test]
fn resize_to_same_extent_does_not_leak() {
    let h = Harness::new();
    let mut controller = h.controller(desc(640, 480, 2)).unwrap();

    assert!(controller.on_surface_resized(640, 480).unwrap());
    assert_eq!(destroyed(&h.log.events()), [1]);
    assert_eq!(controller.resources().unwrap().generation, 2);
    assert!(render(&mut controller, &h.log).unwrap().rendered());

    controller.shutdown().unwrap();

    let events = h.log.events();
    assert_eq!(builds(&events).len(), 2);
    assert_eq!(destroyed(&events), [1, 2]);
    assert_eq!(
        h.log.count(|e| matches!(e, Event::CreateFence { .. })),
        h.log.count(|e| matches!(e, Event::DestroyFence(_)))
    );
    assert_eq!(
        h.log.count(|e| matches!(e, Event::CreateSemaphore(_))),
        h.log.count(|e| matches!(e, Event::DestroySemaphore(_)))
    );
}

#[test]
fn minimized_controller_makes_no_gpu_calls() {
    let h = Harness::new();
    let mut controller = h.controller(desc(640, 480, 2)).unwrap();
    render(&mut controller, &h.log).unwrap();
    let mark = h.log.len();

    assert!(!controller.on_surface_resized(0, 480).unwrap());
    assert_eq!(controller.state(), LifecycleState::Minimized);

    for _ in 0..5 {
        let outcome = render(&mut controller, &h.log).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::Minimized));
        assert!(!outcome.wants_rebuild());
    }
    // Repeated zero-area resizes are no-ops too
    assert!(!controller.on_surface_resized(640, 0).unwrap());

    let events = h.log.since(mark);
    assert!(
        !events.iter().any(Event::is_gpu_call),
        "minimized controller touched the GPU: {events:?}"
    );
    assert!(events.is_empty());
    assert_eq!(controller.frames_submitted(), 1);
}

#[test]
fn minimize_then_restore_rebuilds_exactly_once() {
    let h = Harness::new();
    let mut controller = h.controller(desc(640, 480, 2)).unwrap();
    let mark = h.log.len();

    assert!(!controller.on_surface_resized(0, 480).unwrap());
    assert_eq!(controller.state(), LifecycleState::Minimized);
    assert!(builds(&h.log.since(mark)).is_empty());

    assert!(controller.on_surface_resized(640, 480).unwrap());
    assert_eq!(controller.state(), LifecycleState::Ready);

    let events = h.log.since(mark);
    assert_eq!(builds(&events), [(2, Extent2D::new(640, 480))]);
    assert_eq!(destroyed(&events), [1]);
    assert_eq!(events.iter().filter(|e| matches!(e, Event::Configure { .. })).count(), 1);

    assert!(render(&mut controller, &h.log).unwrap().rendered());
}

#[test]
fn out_of_date_recovers_through_resize() {
    let h = Harness::new();
    let mut controller = h.controller(desc(640, 480, 2)).unwrap();

    controller
        .surface()
        .script_acquire(frame_lifecycle::frame::AcquireOutcome::OutOfDate);
    let outcome = render(&mut controller, &h.log).unwrap();
    assert!(outcome.wants_rebuild());

    controller.on_surface_resized(700, 500).unwrap();
    assert!(!controller.needs_rebuild());

    let outcome = render(&mut controller, &h.log).unwrap();
    assert!(outcome.rendered());
    assert!(!outcome.wants_rebuild());
}

#[test]
fn allocation_failure_during_rebuild_is_resource_exhaustion() {
    let h = Harness::new();
    let mut controller = h.controller(desc(640, 480, 3)).unwrap();

    h.device.fail_next_allocation();
    let err = controller.on_surface_resized(800, 600).unwrap_err();

    assert!(matches!(
        err,
        FrameError::ResourceExhausted {
            stage: FrameStage::Rebuild,
            ..
        }
    ));
    assert_eq!(err.to_string(), "rebuild: resource exhausted");

    // Partially built slots are unwound
    drop(controller);
    assert_eq!(
        h.log.count(|e| matches!(e, Event::CreateFence { .. })),
        h.log.count(|e| matches!(e, Event::DestroyFence(_)))
    );
    assert_eq!(
        h.log.count(|e| matches!(e, Event::CreateSemaphore(_))),
        h.log.count(|e| matches!(e, Event::DestroySemaphore(_)))
    );
}

/// Controller whose rebuild callback fails with `failure()` above 4096 px wide
fn controller_failing_when_wide(h: &Harness, failure: fn() -> anyhow::Error) -> MockController {
    let mut fallback = common::rebuild_fn(h.log.clone());
    MockController::initialize(
        MockSurface::new(h.log.clone()),
        Arc::clone(&h.device),
        ControllerDesc::new(Extent2D::new(640, 480)),
        move |ctx| -> anyhow::Result<MockResources> {
            if ctx.extent.width > 4096 {
                return Err(failure());
            }
            fallback(ctx)
        },
    )
    .unwrap()
}

#[test]
fn failing_rebuild_callback_names_the_extent() {
    let h = Harness::new();
    let mut controller = controller_failing_when_wide(&h, || {
        anyhow::anyhow!("depth buffer larger than the device limit")
    });

    let err = controller.on_surface_resized(8192, 480).unwrap_err();
    assert!(matches!(err, FrameError::Rebuild { extent, .. } if extent == Extent2D::new(8192, 480)));
    assert_eq!(err.to_string(), "rebuild: swapchain resources at 8192x480 failed");
    let cause = std::error::Error::source(&err).unwrap().to_string();
    assert!(cause.contains("device limit"), "{cause}");
}

#[test]
fn out_of_memory_in_rebuild_callback_is_resource_exhaustion() {
    let h = Harness::new();
    let mut controller = controller_failing_when_wide(&h, || GpuError::OutOfMemory.into());

    let err = controller.on_surface_resized(8192, 480).unwrap_err();
    assert!(matches!(
        err,
        FrameError::ResourceExhausted {
            stage: FrameStage::Rebuild,
            source: GpuError::OutOfMemory,
        }
    ));
    assert!(!err.is_device_lost());
}

#[test]
fn device_loss_in_rebuild_callback_survives_context() {
    let h = Harness::new();
    let mut controller = controller_failing_when_wide(&h, || {
        anyhow::Error::new(GpuError::DeviceLost).context("Failed to create image 'clear.depth'")
    });

    let err = controller.on_surface_resized(8192, 480).unwrap_err();
    assert!(matches!(err, FrameError::DeviceLost { stage: FrameStage::Rebuild }));
    assert!(err.is_device_lost());
}

#[test]
fn render_after_failed_rebuild_errors_until_next_resize() {
    let h = Harness::new();
    let mut controller = controller_failing_when_wide(&h, || anyhow::anyhow!("too wide"));
    assert!(render(&mut controller, &h.log).unwrap().rendered());

    assert!(controller.on_surface_resized(8192, 480).is_err());
    assert!(controller.resources().is_none());
    assert!(controller.needs_rebuild());

    let mark = h.log.len();
    let err = render(&mut controller, &h.log).unwrap_err();
    assert!(matches!(err, FrameError::Initialization { stage: FrameStage::Acquire, .. }));
    assert!(h.log.since(mark).is_empty(), "no GPU work without a resource set");

    assert!(controller.on_surface_resized(640, 480).unwrap());
    assert!(!controller.needs_rebuild());
    assert!(render(&mut controller, &h.log).unwrap().rendered());

    controller.shutdown().unwrap();
    assert_eq!(
        h.log.count(|e| matches!(e, Event::CreateFence { .. })),
        h.log.count(|e| matches!(e, Event::DestroyFence(_)))
    );
    assert_eq!(
        h.log.count(|e| matches!(e, Event::BuildResources { .. })),
        h.log.count(|e| matches!(e, Event::DestroyResources { .. }))
    );
}

#[test]
fn single_image_swapchain_on_resize_reports_rebuild_stage() {
    let h = Harness::new();
    let mut controller = h.controller(desc(640, 480, 2)).unwrap();

    controller.surface().set_max_images(1);
    let err = controller.on_surface_resized(800, 600).unwrap_err();

    assert!(matches!(err, FrameError::Initialization { stage: FrameStage::Rebuild, .. }));
    assert_eq!(err.stage(), FrameStage::Rebuild);
    assert!(err.to_string().starts_with("rebuild:"), "{err}");
}
