//! Per-camera motion gating.
//!
//! A frame only enters the identification chain when enough of it differs
//! from the camera's learned background. The background is a per-pixel
//! running average that adapts slowly, so a person who stops moving fades
//! into the background over seconds rather than frames.

use std::collections::HashMap;

use crate::domain::{CameraId, Frame, GrayImage};

/// Per-pixel intensity delta that counts a pixel as foreground.
const PIXEL_DELTA: f32 = 25.0;

/// Background adaptation rate per frame.
const ADAPT_RATE: f32 = 0.05;

#[derive(Debug)]
struct Background {
    width: u32,
    height: u32,
    mean: Vec<f32>,
}

/// Gates frames on foreground activity, one background model per camera.
#[derive(Debug)]
pub struct MotionGate {
    backgrounds: HashMap<CameraId, Background>,
    motion_threshold: f32,
}

impl MotionGate {
    /// Create a gate passing frames whose foreground fraction reaches
    /// `motion_threshold`.
    pub fn new(motion_threshold: f32) -> Self {
        Self {
            backgrounds: HashMap::new(),
            motion_threshold: motion_threshold.clamp(0.0, 1.0),
        }
    }

    /// Check a frame against its camera's background and fold the frame into
    /// the background.
    ///
    /// The first frame from a camera (or the first after a resolution change)
    /// initializes the model and reports no motion.
    pub fn has_motion(&mut self, frame: &Frame) -> bool {
        let image = frame.image();
        let known = matches!(
            self.backgrounds.get(frame.camera_id()),
            Some(bg) if bg.width == image.width() && bg.height == image.height()
        );
        if !known {
            tracing::debug!(
                camera = %frame.camera_id(),
                width = image.width(),
                height = image.height(),
                "motion background initialized"
            );
            self.backgrounds
                .insert(frame.camera_id().clone(), Background::from_image(image));
            return false;
        }
        let Some(background) = self.backgrounds.get_mut(frame.camera_id()) else {
            return false;
        };

        let mut foreground = 0usize;
        for (mean, &pixel) in background.mean.iter_mut().zip(image.pixels()) {
            let value = pixel as f32;
            if (value - *mean).abs() > PIXEL_DELTA {
                foreground += 1;
            }
            *mean += ADAPT_RATE * (value - *mean);
        }

        let fraction = foreground as f32 / image.pixels().len() as f32;
        fraction >= self.motion_threshold
    }

    /// Drop a camera's background model (camera session end).
    pub fn remove_camera(&mut self, camera: &CameraId) {
        self.backgrounds.remove(camera);
    }
}

impl Background {
    fn from_image(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            mean: image.pixels().iter().map(|&p| p as f32).collect(),
        }
    }
}
