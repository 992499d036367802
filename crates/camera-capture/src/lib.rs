//! Camera Capture Library for Exam Monitoring
//!
//! Provides frame acquisition for proctoring sessions.
//! Supports:
//! - JPEG buffers pushed by a browser client
//! - Image sequence replay from a directory (offline review, tests)
//! - Live webcam capture (feature `webcam`)

pub mod device;
pub mod frame;
#[cfg(feature = "webcam")]
pub mod webcam;

pub use device::{CaptureDevice, CaptureOpener, ImageSequenceDevice, ImageSequenceOpener};
pub use frame::{decode_image, VideoFrame};
#[cfg(feature = "webcam")]
pub use webcam::{WebcamDevice, WebcamOpener};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Empty frame captured")]
    EmptyFrame,

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Capture timeout")]
    Timeout,

    #[error("Camera not initialized")]
    NotInitialized,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Webcam index (0 is usually the built-in camera)
    pub device_index: u32,
    /// Requested capture width
    pub width: u32,
    /// Requested capture height
    pub height: u32,
    /// Frame read timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            read_timeout_ms: 2000,
        }
    }
}
