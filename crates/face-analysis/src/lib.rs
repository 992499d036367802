//! Exam-Taker Frame Analysis
//!
//! Turns a single frame into a suspicion verdict:
//! - Face and eye localization (Haar cascades)
//! - Head pose estimation from eye geometry
//! - Pupil localization and gaze normalization
//! - Rule-based activity classification

pub mod cascade;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod geometry;
pub mod locator;
pub mod pipeline;
pub mod pupil;

pub use cascade::HaarCascade;
pub use classifier::{ActivityCategory, ActivityClassifier, ActivityVerdict, AnalysisMode};
pub use config::{DetectionParams, VisionConfig};
pub use detector::{Detector, HaarDetector};
pub use geometry::{EyeGaze, GazeOffset, HeadPose, Point, Rect};
pub use locator::{FaceLocator, FaceObservation};
pub use pipeline::{FrameAnalysis, FrameAnalysisPipeline};
pub use pupil::locate_pupil;

use thiserror::Error;

/// Cascade loading errors
#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("Failed to read cascade {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Invalid cascade: {0}")]
    Invalid(String),

    #[error("Unsupported cascade: {0}")]
    Unsupported(String),
}

/// Frame analysis error types
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Detector initialization failed: {0}")]
    Cascade(#[from] CascadeError),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Invalid region {0:?}")]
    InvalidRegion(Rect),

    #[error("Configuration error: {0}")]
    Config(String),
}
