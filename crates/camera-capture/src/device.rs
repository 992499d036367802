//! Capture device capability and the image-sequence replay device

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{CameraConfig, CameraError, VideoFrame};

/// A source of frames owned by exactly one monitoring session.
///
/// Reads are blocking and must run off the async executor.
pub trait CaptureDevice: Send {
    /// Read the next frame
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError>;

    /// Release the underlying device. Calling it more than once is a no-op.
    fn release(&mut self) -> Result<(), CameraError>;

    /// Whether the device is still usable
    fn is_open(&self) -> bool;
}

/// Opens a fresh capture device for a session
pub trait CaptureOpener: Send + Sync {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Replays the images of a directory in file-name order, wrapping around at the end
pub struct ImageSequenceDevice {
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u32,
    open: bool,
}

impl ImageSequenceDevice {
    /// Open a directory of images
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Open(format!("{}: {}", dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CameraError::Open(format!("no images in {}", dir.display())));
        }

        info!("Opened image sequence {} ({} frames)", dir.display(), files.len());
        Ok(Self {
            files,
            cursor: 0,
            sequence: 0,
            open: true,
        })
    }

    /// Number of images in the sequence
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl CaptureDevice for ImageSequenceDevice {
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if !self.open {
            return Err(CameraError::NotInitialized);
        }

        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();

        let img = image::open(path)
            .map_err(|e| CameraError::Decode(format!("{}: {}", path.display(), e)))?;
        let frame = VideoFrame::from_rgb_image(img.to_rgb8(), self.sequence);
        self.sequence = self.sequence.wrapping_add(1);

        if frame.is_empty() {
            return Err(CameraError::EmptyFrame);
        }
        debug!("Replayed frame {} from {}", frame.sequence, path.display());
        Ok(frame)
    }

    fn release(&mut self) -> Result<(), CameraError> {
        if self.open {
            self.open = false;
            debug!("Image sequence released");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for ImageSequenceDevice {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release image sequence: {}", e);
        }
    }
}

/// Opens an [`ImageSequenceDevice`] over a fixed directory for every session
#[derive(Debug, Clone)]
pub struct ImageSequenceOpener {
    dir: PathBuf,
}

impl ImageSequenceOpener {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CaptureOpener for ImageSequenceOpener {
    fn open(&self, _config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        Ok(Box::new(ImageSequenceDevice::open(&self.dir)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_image(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_replays_in_order_and_wraps() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "b.png", 200);
        write_image(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut device = ImageSequenceDevice::open(dir.path()).unwrap();
        assert_eq!(device.len(), 2);

        let first = device.read_frame().unwrap();
        let second = device.read_frame().unwrap();
        let third = device.read_frame().unwrap();
        assert_eq!(&first.data[..3], &[10, 10, 10]);
        assert_eq!(&second.data[..3], &[200, 200, 200]);
        assert_eq!(&third.data[..3], &[10, 10, 10]);
        assert_eq!(third.sequence, 2);
    }

    #[test]
    fn test_empty_directory_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceDevice::open(dir.path()),
            Err(CameraError::Open(_))
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", 10);

        let mut device = ImageSequenceDevice::open(dir.path()).unwrap();
        device.release().unwrap();
        device.release().unwrap();
        assert!(!device.is_open());
        assert!(matches!(device.read_frame(), Err(CameraError::NotInitialized)));
    }
}
