//! Frame and image types shared by the gates and the silhouette extractor.
//!
//! The core operates on single-channel (grayscale) pixel data; color
//! conversion is the capture side's concern.

use chrono::{DateTime, Utc};

use super::detection::BoundingBox;
use crate::IdError;

/// Identifies one camera stream.
///
/// Raw per-camera track ids are not globally unique, so this id is half of
/// every [`super::TrackKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CameraId(String);

impl CameraId {
    /// Create a camera id from its configured name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the configured name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Row-major single-channel image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl GrayImage {
    /// Build an image, validating that the buffer matches the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, IdError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(IdError::InvalidInput(format!(
                "pixel buffer is {} bytes for a {}x{} image (expected {})",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        if expected == 0 {
            return Err(IdError::InvalidInput("empty image".into()));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Uniform fill, mainly for tests and synthetic inputs.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
        }
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw row-major pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel value at (x, y); callers must stay in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Overwrite the pixel at (x, y); callers must stay in bounds. Mainly
    /// for synthetic inputs.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: u8) {
        self.pixels[y as usize * self.width as usize + x as usize] = value;
    }

    /// Mean pixel intensity, 0..255.
    pub fn mean_brightness(&self) -> f32 {
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f32 / self.pixels.len() as f32
    }

    /// Copy out the region covered by `bbox`, clamped to the image bounds.
    ///
    /// Returns `InvalidInput` when the clamped region is empty (a malformed
    /// or fully out-of-frame box).
    pub fn crop(&self, bbox: &BoundingBox) -> Result<GrayImage, IdError> {
        let (x1, y1, x2, y2) = bbox.clamped(self.width, self.height).ok_or_else(|| {
            IdError::InvalidInput(format!(
                "box {} lies outside a {}x{} frame",
                bbox, self.width, self.height
            ))
        })?;

        let w = x2 - x1;
        let h = y2 - y1;
        let mut pixels = Vec::with_capacity(w as usize * h as usize);
        for y in y1..y2 {
            let row = y as usize * self.width as usize;
            pixels.extend_from_slice(&self.pixels[row + x1 as usize..row + x2 as usize]);
        }
        GrayImage::new(w, h, pixels)
    }
}

/// One captured frame from a camera, with its acquisition timestamp.
#[derive(Debug, Clone)]
pub struct Frame {
    camera_id: CameraId,
    image: GrayImage,
    timestamp: DateTime<Utc>,
}

impl Frame {
    /// Wrap an image captured by `camera_id` at `timestamp`.
    pub fn new(camera_id: CameraId, image: GrayImage, timestamp: DateTime<Utc>) -> Self {
        Self {
            camera_id,
            image,
            timestamp,
        }
    }

    /// Originating camera.
    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Pixel data.
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Acquisition timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_length_validated() {
        assert!(GrayImage::new(4, 4, vec![0; 15]).is_err());
        assert!(GrayImage::new(4, 4, vec![0; 16]).is_ok());
        assert!(GrayImage::new(0, 0, vec![]).is_err());
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let mut img = GrayImage::filled(8, 8, 10);
        img.set_pixel(7, 7, 200);

        let crop = img.crop(&BoundingBox::new(6, 6, 20, 20)).unwrap();
        assert_eq!(crop.width(), 2);
        assert_eq!(crop.height(), 2);
        assert_eq!(crop.pixel(1, 1), 200);
    }

    #[test]
    fn test_crop_rejects_out_of_frame_box() {
        let img = GrayImage::filled(8, 8, 10);
        assert!(img.crop(&BoundingBox::new(10, 10, 20, 20)).is_err());
        assert!(img.crop(&BoundingBox::new(5, 5, 5, 9)).is_err());
    }

    #[test]
    fn test_mean_brightness() {
        let img = GrayImage::filled(4, 4, 100);
        assert!((img.mean_brightness() - 100.0).abs() < f32::EPSILON);
    }
}
