//! Binary silhouette extraction from a person crop.
//!
//! The gait encoder consumes fixed-size 64×64 binary silhouettes. Extraction
//! separates the subject from the background with Otsu's threshold on the
//! cropped region, then resamples to the fixed size.

use crate::domain::GrayImage;

/// Side length of the fixed silhouette frame.
pub const SILHOUETTE_SIZE: u32 = 64;

/// A 64×64 binary (0/255) silhouette frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Silhouette {
    image: GrayImage,
}

impl Silhouette {
    /// Extract a silhouette from a cropped person region.
    ///
    /// The region is binarized with Otsu's threshold, then resampled to
    /// 64×64 by nearest-neighbor.
    pub fn from_region(region: &GrayImage) -> Self {
        let threshold = otsu_threshold(region);

        let mut image = GrayImage::filled(SILHOUETTE_SIZE, SILHOUETTE_SIZE, 0);
        for y in 0..SILHOUETTE_SIZE {
            for x in 0..SILHOUETTE_SIZE {
                let src_x = (x as u64 * region.width() as u64 / SILHOUETTE_SIZE as u64) as u32;
                let src_y = (y as u64 * region.height() as u64 / SILHOUETTE_SIZE as u64) as u32;
                let value = if region.pixel(src_x, src_y) > threshold {
                    255
                } else {
                    0
                };
                image.set_pixel(x, y, value);
            }
        }
        Self { image }
    }

    /// Wrap an already-binary 64×64 image (synthetic inputs, tests).
    ///
    /// Returns `None` when the dimensions are wrong.
    pub fn from_binary(image: GrayImage) -> Option<Self> {
        if image.width() != SILHOUETTE_SIZE || image.height() != SILHOUETTE_SIZE {
            return None;
        }
        Some(Self { image })
    }

    /// The underlying 64×64 binary image.
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Fraction of foreground (non-zero) pixels, [0, 1].
    pub fn foreground_fraction(&self) -> f32 {
        let fg = self.image.pixels().iter().filter(|&&p| p > 0).count();
        fg as f32 / self.image.pixels().len() as f32
    }
}

/// Otsu's threshold: pick the gray level maximizing between-class variance.
fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for &p in image.pixels() {
        histogram[p as usize] += 1;
    }

    let total = image.pixels().len() as f64;
    let total_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &c)| v as f64 * c as f64)
        .sum();

    // A single-level image has no separable classes; 255 maps everything to
    // background.
    let mut best_threshold = 255u8;
    let mut best_variance = 0.0f64;
    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;

    for t in 0..256usize {
        weight_bg += histogram[t] as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }

        sum_bg += t as f64 * histogram[t] as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (total_sum - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg) * (mean_bg - mean_fg);

        if variance > best_variance {
            best_variance = variance;
            best_threshold = t as u8;
        }
    }

    best_threshold
}
