// Error taxonomy for the frame lifecycle
//
// Transient conditions (minimized window, out-of-date swapchain) are not
// errors at all: they come back as `FrameOutcome::Skipped`. Everything here is
// fatal for the lifecycle and carries the stage that failed.

use std::fmt;

use thiserror::Error;

use super::gpu::Extent2D;

/// Errors reported by a `Device` or `PresentationSurface` implementation
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("out of host or device memory")]
    OutOfMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("timed out")]
    Timeout,
    #[error("presentation surface lost")]
    SurfaceLost,
    #[error("{0}")]
    Backend(String),
}

pub type GpuResult<T> = Result<T, GpuError>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where in the lifecycle a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStage {
    Initialize,
    Acquire,
    Wait,
    Record,
    Submit,
    Present,
    Rebuild,
    Shutdown,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::Initialize => "initialize",
            FrameStage::Acquire => "acquire",
            FrameStage::Wait => "wait",
            FrameStage::Record => "record",
            FrameStage::Submit => "submit",
            FrameStage::Present => "present",
            FrameStage::Rebuild => "rebuild",
            FrameStage::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Fatal lifecycle errors
#[derive(Error, Debug)]
pub enum FrameError {
    /// Surface or swapchain unusable for the controller
    #[error("{stage}: swapchain setup failed: {reason}")]
    Initialization { stage: FrameStage, reason: String },

    #[error("{stage}: resource exhausted")]
    ResourceExhausted {
        stage: FrameStage,
        #[source]
        source: GpuError,
    },

    #[error("{stage}: device lost")]
    DeviceLost { stage: FrameStage },

    #[error("wait: fence for slot {slot} not signaled within {timeout_ns} ns")]
    FenceTimeout { slot: usize, timeout_ns: u64 },

    #[error("{stage}: submission failed")]
    SubmissionFailed {
        stage: FrameStage,
        #[source]
        source: GpuError,
    },

    #[error("record: callback for slot {slot} failed")]
    Record {
        slot: usize,
        #[source]
        source: BoxError,
    },

    #[error("rebuild: swapchain resources at {extent} failed")]
    Rebuild {
        extent: Extent2D,
        #[source]
        source: BoxError,
    },
}

impl FrameError {
    /// Classify a backend error raised during `stage`
    pub fn from_gpu(stage: FrameStage, err: GpuError) -> Self {
        match err {
            GpuError::OutOfMemory => FrameError::ResourceExhausted { stage, source: err },
            GpuError::DeviceLost => FrameError::DeviceLost { stage },
            other => FrameError::SubmissionFailed { stage, source: other },
        }
    }

    pub fn stage(&self) -> FrameStage {
        match self {
            FrameError::Initialization { stage, .. }
            | FrameError::ResourceExhausted { stage, .. }
            | FrameError::DeviceLost { stage }
            | FrameError::SubmissionFailed { stage, .. } => *stage,
            FrameError::FenceTimeout { .. } => FrameStage::Wait,
            FrameError::Record { .. } => FrameStage::Record,
            FrameError::Rebuild { .. } => FrameStage::Rebuild,
        }
    }

    /// True if the device can no longer be used and must be recreated
    pub fn is_device_lost(&self) -> bool {
        matches!(self, FrameError::DeviceLost { .. } | FrameError::FenceTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_errors_are_classified() {
        let err = FrameError::from_gpu(FrameStage::Submit, GpuError::OutOfMemory);
        assert!(matches!(err, FrameError::ResourceExhausted { stage: FrameStage::Submit, .. }));

        let err = FrameError::from_gpu(FrameStage::Wait, GpuError::DeviceLost);
        assert!(err.is_device_lost());
        assert_eq!(err.stage(), FrameStage::Wait);

        let err = FrameError::from_gpu(FrameStage::Present, GpuError::SurfaceLost);
        assert!(matches!(err, FrameError::SubmissionFailed { stage: FrameStage::Present, .. }));
    }

    #[test]
    fn messages_name_the_stage() {
        let err = FrameError::DeviceLost { stage: FrameStage::Acquire };
        assert_eq!(err.to_string(), "acquire: device lost");

        let err = FrameError::FenceTimeout { slot: 1, timeout_ns: 5 };
        assert_eq!(err.stage(), FrameStage::Wait);
        assert!(err.to_string().starts_with("wait:"));

        let err = FrameError::Rebuild {
            extent: Extent2D::new(640, 480),
            source: "no memory".into(),
        };
        assert_eq!(err.to_string(), "rebuild: swapchain resources at 640x480 failed");

        let err = FrameError::Initialization {
            stage: FrameStage::Rebuild,
            reason: "surface provides 1 image(s)".to_string(),
        };
        assert_eq!(err.stage(), FrameStage::Rebuild);
        assert_eq!(err.to_string(), "rebuild: swapchain setup failed: surface provides 1 image(s)");
    }
}
