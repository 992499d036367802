//! Face localization on top of a pluggable detector

use std::sync::Arc;

use camera_capture::VideoFrame;
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::contrast::equalize_histogram;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VisionConfig;
use crate::detector::Detector;
use crate::geometry::Rect;
use crate::VisionError;

/// A detected face and the eyes found inside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    /// Face region in frame coordinates
    pub face: Rect,
    /// Up to two eye regions, relative to `face`, ordered left to right
    pub eyes: Vec<Rect>,
}

impl FaceObservation {
    /// Eye regions translated to frame coordinates
    pub fn eyes_in_frame(&self) -> Vec<Rect> {
        self.eyes
            .iter()
            .map(|eye| eye.translate(self.face.x, self.face.y))
            .collect()
    }
}

/// Finds faces, then eyes within each face
pub struct FaceLocator {
    detector: Arc<dyn Detector>,
    detection_scale: f64,
    equalize: bool,
}

impl FaceLocator {
    pub fn new(detector: Arc<dyn Detector>, detection_scale: f64, equalize: bool) -> Self {
        Self {
            detector,
            detection_scale,
            equalize,
        }
    }

    pub fn from_config(detector: Arc<dyn Detector>, config: &VisionConfig) -> Self {
        Self::new(detector, config.detection_scale, config.equalize)
    }

    /// Locate faces in a color frame
    pub fn locate(&self, frame: &VideoFrame) -> Result<Vec<FaceObservation>, VisionError> {
        if frame.is_empty() {
            return Err(VisionError::EmptyFrame);
        }
        self.locate_gray(&frame.to_grayscale())
    }

    /// Locate faces in an already converted grayscale frame.
    ///
    /// Faces whose region does not fit inside the frame are dropped.
    pub fn locate_gray(&self, gray: &GrayImage) -> Result<Vec<FaceObservation>, VisionError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::EmptyFrame);
        }

        let scaled = self.detection_scale < 1.0;
        let small = if scaled {
            let w = ((width as f64 * self.detection_scale).round() as u32).max(1);
            let h = ((height as f64 * self.detection_scale).round() as u32).max(1);
            imageops::resize(gray, w, h, FilterType::Triangle)
        } else {
            gray.clone()
        };
        let small = if self.equalize { equalize_histogram(&small) } else { small };

        // eyes are searched on the equalized copy only when faces were
        // detected at full resolution; a downscaled pass leaves them raw
        let eye_source = if self.equalize && !scaled { &small } else { gray };

        let mut observations = Vec::new();
        for detected in self.detector.detect_faces(&small)? {
            let face = if scaled {
                detected.scale(1.0 / self.detection_scale)
            } else {
                detected
            };

            if !face.fits_within(width, height) {
                debug!("Dropping face {:?} outside {}x{} frame", face, width, height);
                continue;
            }

            let roi = imageops::crop_imm(
                eye_source,
                face.x as u32,
                face.y as u32,
                face.width as u32,
                face.height as u32,
            )
            .to_image();

            let mut eyes: Vec<Rect> = self
                .detector
                .detect_eyes(&roi)?
                .into_iter()
                .filter(|eye| eye.fits_within(roi.width(), roi.height()))
                .collect();
            eyes.sort_by_key(|eye| eye.x);
            eyes.truncate(2);

            observations.push(FaceObservation { face, eyes });
        }

        Ok(observations)
    }
}
