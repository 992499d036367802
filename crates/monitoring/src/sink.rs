//! Verdict consumers

use std::sync::Arc;

use camera_capture::VideoFrame;
use face_analysis::{ActivityCategory, ActivityVerdict};
use tracing::{info, warn};

/// Error returned by sink implementations
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Stores suspicious activity records
pub trait ActivityLog: Send + Sync {
    fn record(
        &self,
        session_id: &str,
        exam_id: &str,
        description: &str,
        evidence: Option<&str>,
    ) -> Result<(), SinkError>;
}

/// Persists the frame behind a suspicious verdict, returning a reference to it
pub trait EvidenceSink: Send + Sync {
    fn save(
        &self,
        session_id: &str,
        category: ActivityCategory,
        frame: &VideoFrame,
    ) -> Result<Option<String>, SinkError>;
}

/// Evidence sink that keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvidence;

impl EvidenceSink for NoEvidence {
    fn save(&self, _: &str, _: ActivityCategory, _: &VideoFrame) -> Result<Option<String>, SinkError> {
        Ok(None)
    }
}

/// Hands suspicious verdicts to the evidence sink, then the activity log.
///
/// Sink failures are logged and swallowed.
#[derive(Clone)]
pub struct VerdictRecorder {
    log: Arc<dyn ActivityLog>,
    evidence: Arc<dyn EvidenceSink>,
}

impl VerdictRecorder {
    pub fn new(log: Arc<dyn ActivityLog>, evidence: Arc<dyn EvidenceSink>) -> Self {
        Self { log, evidence }
    }

    /// Record `verdict` if it is suspicious
    pub fn report(&self, session_id: &str, exam_id: &str, frame: &VideoFrame, verdict: &ActivityVerdict) {
        if !verdict.is_suspicious {
            return;
        }

        let evidence = match self.evidence.save(session_id, verdict.category, frame) {
            Ok(path) => path,
            Err(e) => {
                warn!(session_id, category = %verdict.category, "Failed to save evidence: {}", e);
                None
            }
        };

        match self.log.record(session_id, exam_id, &verdict.description, evidence.as_deref()) {
            Ok(()) => info!(session_id, category = %verdict.category, "Suspicious activity: {}", verdict.description),
            Err(e) => warn!(session_id, "Failed to log suspicious activity: {}", e),
        }
    }
}
