//! Exam Session Monitoring
//!
//! Runs one independent monitoring session per exam-taker:
//! - Pull mode: frames captured from a device on a fixed interval
//! - Push mode: frames submitted by the client
//! - Suspicious verdicts handed to the activity log and evidence sink

pub mod bootstrap;
pub mod intake;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod sink;

pub use bootstrap::load_detector;
pub use intake::FrameIntake;
pub use registry::{Session, SessionRegistry, SessionStatus};
pub use retry::RetryPolicy;
pub use scheduler::{CaptureScheduler, SchedulerConfig};
pub use sink::{ActivityLog, EvidenceSink, NoEvidence, SinkError, VerdictRecorder};

use camera_capture::CameraError;
use face_analysis::VisionError;
use thiserror::Error;

/// Monitoring error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Capture device unavailable for session {session_id}: {source}")]
    DeviceOpen {
        session_id: String,
        #[source]
        source: CameraError,
    },

    #[error("Frame capture failed: {0}")]
    Capture(#[from] CameraError),

    #[error("Frame analysis failed: {0}")]
    Analysis(#[from] VisionError),

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("Startup failed after {attempts} attempts: {reason}")]
    Startup { attempts: u32, reason: String },
}
