//! Evidence image files

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use camera_capture::VideoFrame;
use chrono::Local;
use face_analysis::ActivityCategory;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use monitoring::{EvidenceSink, SinkError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::StorageError;

/// Evidence storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Directory the images are written to
    pub folder: PathBuf,
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Resize frames to (width, height) before saving; `None` keeps the
    /// submitted resolution
    pub resize_to: Option<(u32, u32)>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("evidence"),
            quality: 70,
            resize_to: None,
        }
    }
}

impl EvidenceConfig {
    /// Device captures are normalised to 640x480
    pub fn capture_pull() -> Self {
        Self {
            resize_to: Some((640, 480)),
            ..Self::default()
        }
    }
}

/// Writes evidence frames as JPEG files
#[derive(Debug, Clone)]
pub struct JpegEvidenceSink {
    config: EvidenceConfig,
}

impl JpegEvidenceSink {
    /// Create the sink, creating the evidence folder if needed
    pub fn new(config: EvidenceConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&config.folder)?;
        debug!("Evidence folder {}", config.folder.display());
        Ok(Self { config })
    }

    pub fn folder(&self) -> &Path {
        &self.config.folder
    }

    /// Save one frame, returning the written path
    pub fn write(&self, session_id: &str, category: ActivityCategory, frame: &VideoFrame) -> Result<PathBuf, StorageError> {
        let image = frame
            .to_rgb_image()
            .filter(|_| !frame.is_empty())
            .ok_or_else(|| StorageError::InvalidFrame(format!("{}x{} frame", frame.width, frame.height)))?;

        let image = match self.config.resize_to {
            Some((w, h)) if (w, h) != image.dimensions() => {
                image::imageops::resize(&image, w, h, FilterType::Triangle)
            }
            _ => image,
        };

        let name = format!(
            "evidence_{}_{}_{}.jpg",
            sanitize(session_id),
            category.as_str(),
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.config.folder.join(name);

        let mut writer = BufWriter::new(File::create(&path)?);
        JpegEncoder::new_with_quality(&mut writer, self.config.quality.clamp(1, 100)).encode_image(&image)?;

        debug!("Saved evidence {}", path.display());
        Ok(path)
    }
}

impl EvidenceSink for JpegEvidenceSink {
    fn save(&self, session_id: &str, category: ActivityCategory, frame: &VideoFrame) -> Result<Option<String>, SinkError> {
        let path = self.write(session_id, category, frame)?;
        Ok(Some(path.display().to_string()))
    }
}

/// Keep file names inside the evidence folder
fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
