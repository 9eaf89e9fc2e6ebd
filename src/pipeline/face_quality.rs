//! Face crop quality gating.
//!
//! The face encoder is the most expensive and the most threshold-sensitive
//! stage, so crops that cannot produce a trustworthy embedding are rejected
//! up front: too small, too blurry, too dark or blown out.

use crate::domain::GrayImage;

/// Quality thresholds for a face crop.
#[derive(Debug, Clone)]
pub struct FaceQualityGate {
    /// Minimum width and height in pixels.
    pub min_side: u32,
    /// Minimum Laplacian variance; lower means blur.
    pub min_sharpness: f32,
    /// Acceptable mean-brightness window, 0..255.
    pub min_brightness: f32,
    /// Upper bound of the brightness window.
    pub max_brightness: f32,
}

impl Default for FaceQualityGate {
    fn default() -> Self {
        Self {
            min_side: 64,
            min_sharpness: 100.0,
            min_brightness: 40.0,
            max_brightness: 220.0,
        }
    }
}

impl FaceQualityGate {
    /// True when the crop is worth sending to the face encoder.
    pub fn is_usable(&self, crop: &GrayImage) -> bool {
        if crop.width() < self.min_side || crop.height() < self.min_side {
            tracing::trace!(
                width = crop.width(),
                height = crop.height(),
                "face crop rejected: too small"
            );
            return false;
        }

        let brightness = crop.mean_brightness();
        if brightness < self.min_brightness || brightness > self.max_brightness {
            tracing::trace!(brightness, "face crop rejected: brightness out of range");
            return false;
        }

        let sharpness = laplacian_variance(crop);
        if sharpness < self.min_sharpness {
            tracing::trace!(sharpness, "face crop rejected: blurred");
            return false;
        }

        true
    }
}

/// Variance of the 4-neighbor Laplacian response over interior pixels.
///
/// A flat or defocused crop has responses clustered near zero; in-focus
/// facial detail produces a wide response distribution.
fn laplacian_variance(image: &GrayImage) -> f32 {
    if image.width() < 3 || image.height() < 3 {
        return 0.0;
    }

    let mut responses = Vec::with_capacity(
        (image.width() as usize - 2) * (image.height() as usize - 2),
    );
    for y in 1..image.height() - 1 {
        for x in 1..image.width() - 1 {
            let center = image.pixel(x, y) as f32;
            let response = image.pixel(x - 1, y) as f32
                + image.pixel(x + 1, y) as f32
                + image.pixel(x, y - 1) as f32
                + image.pixel(x, y + 1) as f32
                - 4.0 * center;
            responses.push(response);
        }
    }

    let n = responses.len() as f32;
    let mean = responses.iter().sum::<f32>() / n;
    responses.iter().map(|r| (r - mean) * (r - mean)).sum::<f32>() / n
}
