//! Face and eye detection capability

use image::GrayImage;
use tracing::info;

use crate::cascade::HaarCascade;
use crate::config::{DetectionParams, VisionConfig};
use crate::geometry::Rect;
use crate::VisionError;

/// Synchronous face/eye detector.
///
/// Returned rectangles are relative to the image passed in.
pub trait Detector: Send + Sync {
    /// Detect faces in a grayscale frame
    fn detect_faces(&self, image: &GrayImage) -> Result<Vec<Rect>, VisionError>;

    /// Detect eyes in a grayscale face crop
    fn detect_eyes(&self, face: &GrayImage) -> Result<Vec<Rect>, VisionError>;
}

/// Classical detector backed by a frontal-face and an eye cascade
#[derive(Debug, Clone)]
pub struct HaarDetector {
    face_cascade: HaarCascade,
    eye_cascade: HaarCascade,
    face_params: DetectionParams,
    eye_params: DetectionParams,
}

impl HaarDetector {
    pub fn new(
        face_cascade: HaarCascade,
        eye_cascade: HaarCascade,
        face_params: DetectionParams,
        eye_params: DetectionParams,
    ) -> Self {
        Self {
            face_cascade,
            eye_cascade,
            face_params,
            eye_params,
        }
    }

    /// Load both cascades named in the configuration
    pub fn load(config: &VisionConfig) -> Result<Self, VisionError> {
        config.validate()?;
        let face_cascade = HaarCascade::load(&config.face_cascade_path)?;
        let eye_cascade = HaarCascade::load(&config.eye_cascade_path)?;
        info!("Haar detector ready ({:?} mode)", config.mode);
        Ok(Self::new(
            face_cascade,
            eye_cascade,
            config.faces.clone(),
            config.eyes.clone(),
        ))
    }
}

impl Detector for HaarDetector {
    fn detect_faces(&self, image: &GrayImage) -> Result<Vec<Rect>, VisionError> {
        Ok(self.face_cascade.detect_multi_scale(image, &self.face_params))
    }

    fn detect_eyes(&self, face: &GrayImage) -> Result<Vec<Rect>, VisionError> {
        Ok(self.eye_cascade.detect_multi_scale(face, &self.eye_params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_cascade() {
        let config = VisionConfig {
            face_cascade_path: "/nonexistent/face.xml".into(),
            ..VisionConfig::default()
        };
        let err = HaarDetector::load(&config).unwrap_err();
        assert!(matches!(err, VisionError::Cascade(_)));
    }

    #[test]
    fn test_load_validates_config_first() {
        let mut config = VisionConfig::default();
        config.eyes.scale_factor = 0.5;
        assert!(matches!(HaarDetector::load(&config), Err(VisionError::Config(_))));
    }
}
