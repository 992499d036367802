//! Vision configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classifier::AnalysisMode;
use crate::VisionError;

/// Multi-scale detection parameters for one cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Pyramid step between scan scales (> 1.0)
    pub scale_factor: f64,

    /// Raw hits a grouped detection needs to be kept (strictly more than this)
    pub min_neighbors: u32,

    /// Smallest window side in pixels
    pub min_size: u32,

    /// Largest window side as a fraction of the searched image
    pub max_size_ratio: Option<f64>,
}

impl DetectionParams {
    /// Face detection for the periodic capture loop
    pub fn capture_pull_faces() -> Self {
        Self {
            scale_factor: 1.2,
            min_neighbors: 5,
            min_size: 30,
            max_size_ratio: None,
        }
    }

    /// Eye detection for the periodic capture loop
    pub fn capture_pull_eyes() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 15,
            max_size_ratio: None,
        }
    }

    /// Face detection for pose/gaze analysis
    pub fn pose_aware_faces() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 30,
            max_size_ratio: None,
        }
    }

    /// Eye detection for pose/gaze analysis, capped at half the face
    pub fn pose_aware_eyes() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 2,
            min_size: 10,
            max_size_ratio: Some(0.5),
        }
    }

    fn validate(&self, name: &str) -> Result<(), VisionError> {
        if !(self.scale_factor > 1.0) {
            return Err(VisionError::Config(format!(
                "{}.scale_factor must be greater than 1.0, got {}",
                name, self.scale_factor
            )));
        }
        if let Some(ratio) = self.max_size_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(VisionError::Config(format!(
                    "{}.max_size_ratio must be in (0, 1], got {}",
                    name, ratio
                )));
            }
        }
        Ok(())
    }
}

/// Frame analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Which rule set the classifier applies
    pub mode: AnalysisMode,

    /// Frontal face cascade (OpenCV XML)
    pub face_cascade_path: PathBuf,

    /// Eye cascade (OpenCV XML)
    pub eye_cascade_path: PathBuf,

    /// Face detection is run on a copy scaled by this factor
    pub detection_scale: f64,

    /// Histogram-equalize the grayscale copy before face detection
    pub equalize: bool,

    pub faces: DetectionParams,
    pub eyes: DetectionParams,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self::capture_pull()
    }
}

impl VisionConfig {
    /// Half-resolution detection and the off-center rule
    pub fn capture_pull() -> Self {
        Self {
            mode: AnalysisMode::CapturePull,
            face_cascade_path: PathBuf::from("haarcascades/haarcascade_frontalface_default.xml"),
            eye_cascade_path: PathBuf::from("haarcascades/haarcascade_eye.xml"),
            detection_scale: 0.5,
            equalize: true,
            faces: DetectionParams::capture_pull_faces(),
            eyes: DetectionParams::capture_pull_eyes(),
        }
    }

    /// Full-resolution detection with head pose and gaze
    pub fn pose_aware() -> Self {
        Self {
            mode: AnalysisMode::PoseAware,
            detection_scale: 1.0,
            faces: DetectionParams::pose_aware_faces(),
            eyes: DetectionParams::pose_aware_eyes(),
            ..Self::capture_pull()
        }
    }

    pub fn validate(&self) -> Result<(), VisionError> {
        if !(self.detection_scale > 0.0 && self.detection_scale <= 1.0) {
            return Err(VisionError::Config(format!(
                "detection_scale must be in (0, 1], got {}",
                self.detection_scale
            )));
        }
        self.faces.validate("faces")?;
        self.eyes.validate("eyes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        VisionConfig::capture_pull().validate().unwrap();
        VisionConfig::pose_aware().validate().unwrap();
        assert_eq!(VisionConfig::default().mode, AnalysisMode::CapturePull);
        assert_eq!(VisionConfig::pose_aware().eyes.max_size_ratio, Some(0.5));
    }

    #[test]
    fn test_rejects_bad_scale() {
        let config = VisionConfig {
            detection_scale: 0.0,
            ..VisionConfig::default()
        };
        assert!(matches!(config.validate(), Err(VisionError::Config(_))));

        let mut config = VisionConfig::default();
        config.faces.scale_factor = 1.0;
        assert!(matches!(config.validate(), Err(VisionError::Config(_))));
    }
}
