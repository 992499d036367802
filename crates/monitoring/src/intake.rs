//! Push-mode frame intake
//!
//! Frames are submitted by the exam client. Starting a session only opens
//! it for submissions; each session gets a lane that serialises its
//! analyses so verdicts are logged in submission order.

use std::sync::Arc;

use camera_capture::decode_image;
use face_analysis::{ActivityVerdict, FrameAnalysisPipeline};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::registry::{Session, SessionRegistry};
use crate::sink::VerdictRecorder;
use crate::MonitorError;

type Lane = Arc<Mutex<()>>;

pub struct FrameIntake {
    registry: SessionRegistry<Lane>,
    pipeline: Arc<FrameAnalysisPipeline>,
    recorder: VerdictRecorder,
}

impl FrameIntake {
    pub fn new(pipeline: Arc<FrameAnalysisPipeline>, recorder: VerdictRecorder) -> Self {
        Self {
            registry: SessionRegistry::new(),
            pipeline,
            recorder,
        }
    }

    /// Accept frames for a session. Returns false if it was already accepting.
    pub fn start(&self, session_id: &str, exam_id: &str) -> bool {
        let started = self
            .registry
            .insert_if_absent(session_id, || Session::active(session_id, exam_id, Lane::default()));
        if started {
            info!(session_id, exam_id, "Accepting client frames");
        }
        started
    }

    /// Stop accepting frames. Returns false for unknown sessions.
    pub fn stop(&self, session_id: &str) -> bool {
        let stopped = self.registry.remove(session_id).is_some();
        if stopped {
            info!(session_id, "Stopped accepting client frames");
        }
        stopped
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.registry.contains(session_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.registry.session_ids()
    }

    /// Analyze an encoded frame; true when it was judged suspicious.
    ///
    /// Frames for inactive sessions are rejected without analysis, including
    /// frames still queued when the session stops. Decode and analysis
    /// failures count as not suspicious.
    pub async fn submit_frame(&self, session_id: &str, exam_id: &str, bytes: Vec<u8>) -> bool {
        let Some(lane) = self.registry.with_handles(session_id, Arc::clone) else {
            debug!(session_id, "Rejected frame for inactive session");
            return false;
        };
        let _turn = lane.lock_owned().await;
        if !self.is_active(session_id) {
            debug!(session_id, "Dropped frame queued before the session stopped");
            return false;
        }

        let pipeline = Arc::clone(&self.pipeline);
        let recorder = self.recorder.clone();
        let (session, exam) = (session_id.to_string(), exam_id.to_string());
        let result = tokio::task::spawn_blocking(move || -> Result<ActivityVerdict, MonitorError> {
            let frame = decode_image(&bytes)?;
            let analysis = pipeline.analyze(&frame)?;
            recorder.report(&session, &exam, &frame, &analysis.verdict);
            Ok(analysis.verdict)
        })
        .await;

        match result {
            Ok(Ok(verdict)) => verdict.is_suspicious,
            Ok(Err(e)) => {
                warn!(session_id, "Client frame analysis failed: {}", e);
                false
            }
            Err(e) => {
                error!(session_id, "Client frame analysis panicked: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tests::MemoryLog;
    use crate::sink::NoEvidence;
    use face_analysis::{Detector, Rect, VisionConfig, VisionError};
    use image::{GrayImage, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex as StdMutex;
    use std::time::{Duration, Instant};

    struct NoFaces;

    impl Detector for NoFaces {
        fn detect_faces(&self, _: &GrayImage) -> Result<Vec<Rect>, VisionError> {
            Ok(vec![])
        }

        fn detect_eyes(&self, _: &GrayImage) -> Result<Vec<Rect>, VisionError> {
            Ok(vec![])
        }
    }

    fn intake() -> (FrameIntake, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::default());
        let pipeline = FrameAnalysisPipeline::new(Arc::new(NoFaces), &VisionConfig::capture_pull());
        let intake = FrameIntake::new(
            Arc::new(pipeline),
            VerdictRecorder::new(log.clone(), Arc::new(NoEvidence)),
        );
        (intake, log)
    }

    fn jpeg() -> Vec<u8> {
        jpeg_of(120)
    }

    fn jpeg_of(level: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(64, 48, Rgb([level, level, level]))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_inactive_session_is_rejected() {
        let (intake, log) = intake();
        assert!(!intake.submit_frame("s1", "e1", jpeg()).await);
        assert!(log.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_suspicious_frame_is_logged() {
        let (intake, log) = intake();
        assert!(intake.start("s1", "e1"));

        assert!(intake.submit_frame("s1", "e1", jpeg()).await);
        let entries = log.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].description, "No face detected - student may be absent");
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_not_suspicious() {
        let (intake, log) = intake();
        intake.start("s1", "e1");
        assert!(!intake.submit_frame("s1", "e1", b"not an image".to_vec()).await);
        assert!(!intake.submit_frame("s1", "e1", Vec::new()).await);
        assert!(log.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_toggle() {
        let (intake, _) = intake();
        assert!(intake.start("s1", "e1"));
        assert!(!intake.start("s1", "e1"));
        assert!(intake.is_active("s1"));

        assert!(intake.stop("s1"));
        assert!(!intake.stop("s1"));
        assert!(!intake.submit_frame("s1", "e1", jpeg()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_all_counted() {
        let (intake, log) = intake();
        let intake = Arc::new(intake);
        intake.start("s1", "e1");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let intake = Arc::clone(&intake);
                tokio::spawn(async move { intake.submit_frame("s1", "e1", jpeg()).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(log.snapshot().len(), 8);
    }

    #[tokio::test]
    async fn test_frame_queued_before_stop_is_dropped() {
        let (intake, log) = intake();
        let intake = Arc::new(intake);
        intake.start("s1", "e1");

        let lane = intake.registry.with_handles("s1", Arc::clone).unwrap();
        let busy = lane.lock_owned().await;

        let queued = {
            let intake = Arc::clone(&intake);
            tokio::spawn(async move { intake.submit_frame("s1", "e1", jpeg()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(intake.stop("s1"));
        drop(busy);

        assert!(!queued.await.unwrap());
        assert!(log.snapshot().is_empty());
    }

    /// One analysis: which session it belonged to and when it ran
    struct Span {
        bright: bool,
        start: Instant,
        end: Instant,
    }

    /// Detector that takes a while and records when each call ran.
    /// Sessions are told apart by frame brightness.
    struct SlowDetector {
        spans: StdMutex<Vec<Span>>,
    }

    impl Detector for SlowDetector {
        fn detect_faces(&self, image: &GrayImage) -> Result<Vec<Rect>, VisionError> {
            let bright = image.get_pixel(0, 0)[0] > 128;
            let start = Instant::now();
            std::thread::sleep(Duration::from_millis(40));
            self.spans.lock().unwrap().push(Span {
                bright,
                start,
                end: Instant::now(),
            });
            Ok(vec![])
        }

        fn detect_eyes(&self, _: &GrayImage) -> Result<Vec<Rect>, VisionError> {
            Ok(vec![])
        }
    }

    fn overlaps(a: &Span, b: &Span) -> bool {
        a.start < b.end && b.start < a.end
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lanes_serialise_one_session_only() {
        let detector = Arc::new(SlowDetector {
            spans: StdMutex::new(Vec::new()),
        });
        let config = VisionConfig {
            equalize: false,
            ..VisionConfig::capture_pull()
        };
        let pipeline = FrameAnalysisPipeline::new(detector.clone(), &config);
        let log = Arc::new(MemoryLog::default());
        let intake = Arc::new(FrameIntake::new(
            Arc::new(pipeline),
            VerdictRecorder::new(log.clone(), Arc::new(NoEvidence)),
        ));
        intake.start("dark", "e1");
        intake.start("bright", "e1");

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let intake = Arc::clone(&intake);
                let (session, level) = if i % 2 == 0 { ("dark", 30) } else { ("bright", 220) };
                tokio::spawn(async move { intake.submit_frame(session, "e1", jpeg_of(level)).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(log.snapshot().len(), 8);

        let spans = detector.spans.lock().unwrap();
        assert_eq!(spans.len(), 8);
        for (i, a) in spans.iter().enumerate() {
            for b in &spans[i + 1..] {
                if a.bright == b.bright {
                    assert!(!overlaps(a, b), "analyses of one session overlapped");
                }
            }
        }
        let parallel = spans
            .iter()
            .any(|a| spans.iter().any(|b| a.bright != b.bright && overlaps(a, b)));
        assert!(parallel, "different sessions never ran in parallel");
    }
}
