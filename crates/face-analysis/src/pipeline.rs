//! Per-frame analysis pipeline

use std::sync::Arc;

use camera_capture::VideoFrame;
use image::imageops;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::{ActivityClassifier, ActivityVerdict, AnalysisMode};
use crate::config::VisionConfig;
use crate::detector::Detector;
use crate::geometry::{estimate_head_pose, EyeGaze, HeadPose, Rect};
use crate::locator::{FaceLocator, FaceObservation};
use crate::pupil::locate_pupil;
use crate::VisionError;

/// Everything computed for one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub face_count: usize,
    pub observations: Vec<FaceObservation>,
    pub head_pose: Option<HeadPose>,
    pub eye_gaze: Option<EyeGaze>,
    pub verdict: ActivityVerdict,
}

/// Locator, geometry and classifier for a single frame.
///
/// Holds no per-frame state, so one pipeline can be shared by every session.
pub struct FrameAnalysisPipeline {
    locator: FaceLocator,
    classifier: ActivityClassifier,
}

impl FrameAnalysisPipeline {
    pub fn new(detector: Arc<dyn Detector>, config: &VisionConfig) -> Self {
        Self {
            locator: FaceLocator::from_config(detector, config),
            classifier: ActivityClassifier::new(config.mode),
        }
    }

    pub fn mode(&self) -> AnalysisMode {
        self.classifier.mode()
    }

    /// Analyze one frame
    pub fn analyze(&self, frame: &VideoFrame) -> Result<FrameAnalysis, VisionError> {
        if frame.is_empty() {
            return Err(VisionError::EmptyFrame);
        }

        let gray = frame.to_grayscale();
        let observations = self.locator.locate_gray(&gray)?;

        let (head_pose, eye_gaze) = match (self.classifier.mode(), observations.as_slice()) {
            (AnalysisMode::PoseAware, [face]) if face.eyes.len() >= 2 => {
                let (pose, gaze) = Self::estimate(&gray, face)?;
                debug!("{} / {}", pose, gaze);
                (Some(pose), Some(gaze))
            }
            _ => (None, None),
        };

        let verdict = self.classifier.classify(
            &observations,
            frame.width,
            head_pose.as_ref(),
            eye_gaze.as_ref(),
        );

        Ok(FrameAnalysis {
            face_count: observations.len(),
            observations,
            head_pose,
            eye_gaze,
            verdict,
        })
    }

    fn estimate(gray: &GrayImage, face: &FaceObservation) -> Result<(HeadPose, EyeGaze), VisionError> {
        let eyes = face.eyes_in_frame();
        let (left, right) = (eyes[0], eyes[1]);

        let pose = estimate_head_pose(left.center(), right.center(), &face.face);

        let left_pupil = locate_pupil(&crop(gray, &left)?);
        let right_pupil = locate_pupil(&crop(gray, &right)?);
        let gaze = EyeGaze::from_pupils(left_pupil, &left, right_pupil, &right);

        Ok((pose, gaze))
    }
}

fn crop(gray: &GrayImage, region: &Rect) -> Result<GrayImage, VisionError> {
    if !region.fits_within(gray.width(), gray.height()) {
        return Err(VisionError::InvalidRegion(*region));
    }
    Ok(imageops::crop_imm(
        gray,
        region.x as u32,
        region.y as u32,
        region.width as u32,
        region.height as u32,
    )
    .to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ActivityCategory;
    use crate::locator::tests::StubDetector;
    use image::{Rgb, RgbImage};

    fn frame_with_pupils(pupils: &[(i32, i32)]) -> VideoFrame {
        let img = RgbImage::from_fn(640, 480, |x, y| {
            let dark = pupils.iter().any(|&(px, py)| {
                let dx = x as i32 - px;
                let dy = y as i32 - py;
                dx * dx + dy * dy <= 16
            });
            if dark {
                Rgb([10, 10, 10])
            } else {
                Rgb([200, 200, 200])
            }
        });
        VideoFrame::from_rgb_image(img, 0)
    }

    fn frontal_face_detector() -> Arc<StubDetector> {
        // eye centers at (280, 220) and (360, 220): symmetric, 40% down the face
        Arc::new(StubDetector::new(
            vec![Rect::new(220, 140, 200, 200)],
            vec![Rect::new(120, 65, 40, 30), Rect::new(40, 65, 40, 30)],
        ))
    }

    #[test]
    fn test_straight_head_with_diverted_eyes() {
        let pipeline = FrameAnalysisPipeline::new(frontal_face_detector(), &VisionConfig::pose_aware());
        // pupils three quarters across each eye
        let frame = frame_with_pupils(&[(290, 220), (370, 220)]);

        let analysis = pipeline.analyze(&frame).unwrap();
        let pose = analysis.head_pose.unwrap();
        assert!(pose.yaw.abs() < 1e-9);
        assert!(pose.pitch.abs() < 1e-9);

        let gaze = analysis.eye_gaze.unwrap();
        assert!((gaze.left.horizontal - 0.5).abs() < 0.1, "{}", gaze);
        assert!((gaze.right.horizontal - 0.5).abs() < 0.1, "{}", gaze);

        assert!(analysis.verdict.is_suspicious);
        assert_eq!(analysis.verdict.category, ActivityCategory::GazeAway);
    }

    #[test]
    fn test_centered_pupils_are_clear() {
        let pipeline = FrameAnalysisPipeline::new(frontal_face_detector(), &VisionConfig::pose_aware());
        let frame = frame_with_pupils(&[(280, 220), (360, 220)]);

        let analysis = pipeline.analyze(&frame).unwrap();
        assert_eq!(analysis.face_count, 1);
        assert!(!analysis.verdict.is_suspicious);
        assert_eq!(analysis.verdict.category, ActivityCategory::None);
    }

    #[test]
    fn test_capture_pull_skips_pose() {
        // detection runs at half scale, so the stub face is reported in half-size units
        let detector = Arc::new(StubDetector::new(
            vec![Rect::new(110, 70, 100, 100)],
            vec![Rect::new(40, 65, 40, 30), Rect::new(120, 65, 40, 30)],
        ));
        let pipeline = FrameAnalysisPipeline::new(detector, &VisionConfig::capture_pull());
        let analysis = pipeline.analyze(&frame_with_pupils(&[])).unwrap();
        assert_eq!(analysis.observations[0].face, Rect::new(220, 140, 200, 200));
        assert!(analysis.head_pose.is_none());
        assert!(analysis.eye_gaze.is_none());
        assert!(!analysis.verdict.is_suspicious);
    }

    #[test]
    fn test_no_face_every_frame() {
        let pipeline = FrameAnalysisPipeline::new(
            Arc::new(StubDetector::new(vec![], vec![])),
            &VisionConfig::capture_pull(),
        );
        let frame = frame_with_pupils(&[]);
        for _ in 0..3 {
            let analysis = pipeline.analyze(&frame).unwrap();
            assert_eq!(analysis.face_count, 0);
            assert_eq!(analysis.verdict.category, ActivityCategory::NoFace);
        }
    }

    #[test]
    fn test_empty_frame() {
        let pipeline = FrameAnalysisPipeline::new(frontal_face_detector(), &VisionConfig::pose_aware());
        let frame = VideoFrame::new(Vec::new(), 0, 0, 0, 0);
        assert!(matches!(pipeline.analyze(&frame), Err(VisionError::EmptyFrame)));
    }
}
