//! Storage Layer
//!
//! Keeps suspicious activity records in memory and writes evidence frames
//! to disk as JPEG files.

mod evidence;
mod repository;

pub use evidence::{EvidenceConfig, JpegEvidenceSink};
pub use repository::{ActivityRecord, ActivityRepository};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("Record not found")]
    NotFound,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image encoding error: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}
