//! Video frame types and processing

use image::{imageops::FilterType, GrayImage, RgbImage};

use crate::CameraError;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the Unix epoch)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Wrap a decoded RGB image, stamping it with the current time
    pub fn from_rgb_image(image: RgbImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp_ns: now_ns(),
            sequence,
        }
    }

    /// A frame with no pixels cannot be analyzed
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.len() < self.expected_len()
    }

    fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> GrayImage {
        let mut gray = Vec::with_capacity((self.width * self.height) as usize);
        for pixel in self.data.chunks_exact(3) {
            // Luminance formula: 0.299*R + 0.587*G + 0.114*B
            let y = (pixel[0] as f32 * 0.299
                   + pixel[1] as f32 * 0.587
                   + pixel[2] as f32 * 0.114) as u8;
            gray.push(y);
        }
        gray.resize((self.width * self.height) as usize, 0);
        GrayImage::from_raw(self.width, self.height, gray).unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// Borrow the pixels as an `image` buffer
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Resize frame using bilinear interpolation
    pub fn resize(&self, new_width: u32, new_height: u32) -> VideoFrame {
        let resized = match self.to_rgb_image() {
            Some(img) => image::imageops::resize(&img, new_width, new_height, FilterType::Triangle),
            None => RgbImage::new(new_width, new_height),
        };

        VideoFrame {
            data: resized.into_raw(),
            width: new_width,
            height: new_height,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        }
    }
}

/// Decode an encoded image buffer (JPEG, PNG, ...) to an RGB frame
pub fn decode_image(bytes: &[u8]) -> Result<VideoFrame, CameraError> {
    if bytes.is_empty() {
        return Err(CameraError::Decode("empty buffer".into()));
    }

    let img = image::load_from_memory(bytes).map_err(|e| CameraError::Decode(e.to_string()))?;
    let frame = VideoFrame::from_rgb_image(img.to_rgb8(), 0);
    if frame.is_empty() {
        return Err(CameraError::EmptyFrame);
    }
    Ok(frame)
}

pub(crate) fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> VideoFrame {
        VideoFrame::new(rgb.repeat((width * height) as usize), width, height, 0, 0)
    }

    #[test]
    fn test_grayscale_weights() {
        let frame = solid(2, 2, [255, 0, 0]);
        let gray = frame.to_grayscale();
        assert_eq!(gray.dimensions(), (2, 2));
        assert_eq!(gray.get_pixel(0, 0)[0], 76);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image(&[]), Err(CameraError::Decode(_))));
        assert!(matches!(decode_image(b"not an image"), Err(CameraError::Decode(_))));
    }

    #[test]
    fn test_decode_jpeg() {
        let img = RgbImage::from_pixel(16, 12, Rgb([200, 100, 50]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg).unwrap();

        let frame = decode_image(&bytes).unwrap();
        assert_eq!((frame.width, frame.height), (16, 12));
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_resize() {
        let frame = solid(8, 6, [9, 9, 9]);
        let small = frame.resize(4, 3);
        assert_eq!(small.data.len(), 4 * 3 * 3);
        assert_eq!(&small.data[small.data.len() - 3..], &[9, 9, 9]);
    }

    proptest! {
        #[test]
        fn prop_grayscale_matches_frame_size(width in 1u32..12, height in 1u32..12, len in 0usize..500) {
            let frame = VideoFrame::new(vec![77; len], width, height, 0, 0);
            let gray = frame.to_grayscale();
            prop_assert_eq!(gray.dimensions(), (width, height));
            prop_assert_eq!(frame.is_empty(), len < (width * height * 3) as usize);
        }
    }
}
