//! Per-track silhouette sequence accumulation with idle eviction.
//!
//! Each tracked person owns exactly one buffer; buffers for different track
//! keys never observe each other. A buffer that reaches the sequence length
//! yields its frames once and restarts empty, so each full sequence produces
//! exactly one embedding extraction rather than a sliding window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::silhouette::Silhouette;
use crate::domain::{CameraId, TrackKey};

#[derive(Debug)]
struct GaitBuffer {
    frames: Vec<Silhouette>,
    last_update: Instant,
}

/// Manages one silhouette buffer per track key.
#[derive(Debug)]
pub struct GaitBufferManager {
    buffers: HashMap<TrackKey, GaitBuffer>,
    sequence_length: usize,
    timeout: Duration,
    max_buffers: usize,
}

impl GaitBufferManager {
    /// Create a manager.
    ///
    /// `max_buffers` caps simultaneous buffers; exceeding it evicts the
    /// least-recently-updated buffer so a flood of short-lived tracks cannot
    /// grow memory unbounded.
    pub fn new(sequence_length: usize, timeout: Duration, max_buffers: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            sequence_length: sequence_length.max(1),
            timeout,
            max_buffers: max_buffers.max(1),
        }
    }

    /// Append a silhouette to the track's buffer.
    ///
    /// Returns `true` exactly when the buffer reaches the sequence length;
    /// the caller then extracts via [`GaitBufferManager::take_sequence`].
    pub fn add_frame(&mut self, key: &TrackKey, silhouette: Silhouette, now: Instant) -> bool {
        if !self.buffers.contains_key(key) && self.buffers.len() >= self.max_buffers {
            self.evict_least_recent();
        }

        let buffer = self.buffers.entry(key.clone()).or_insert_with(|| GaitBuffer {
            frames: Vec::with_capacity(self.sequence_length),
            last_update: now,
        });
        buffer.frames.push(silhouette);
        buffer.last_update = now;

        buffer.frames.len() >= self.sequence_length
    }

    /// Take the completed sequence and reset the buffer to empty.
    ///
    /// Returns `None` while the buffer is not yet full.
    pub fn take_sequence(&mut self, key: &TrackKey) -> Option<Vec<Silhouette>> {
        let buffer = self.buffers.get_mut(key)?;
        if buffer.frames.len() < self.sequence_length {
            return None;
        }
        Some(std::mem::take(&mut buffer.frames))
    }

    /// Drop every buffer idle longer than the configured timeout.
    pub fn cleanup_stale(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.buffers.retain(|key, buffer| {
            let stale = now.duration_since(buffer.last_update) > timeout;
            if stale {
                tracing::debug!(track = %key, "stale gait buffer removed");
            }
            !stale
        });
    }

    /// Drop one track's buffer, discarding any partial sequence.
    pub fn remove(&mut self, key: &TrackKey) {
        self.buffers.remove(key);
    }

    /// Drop all buffers belonging to one camera (camera session end).
    pub fn remove_camera(&mut self, camera: &CameraId) {
        self.buffers.retain(|key, _| &key.camera != camera);
    }

    /// Current frame count for a track's buffer.
    pub fn len(&self, key: &TrackKey) -> usize {
        self.buffers.get(key).map(|b| b.frames.len()).unwrap_or(0)
    }

    /// True when no buffers exist.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    fn evict_least_recent(&mut self) {
        if let Some(key) = self
            .buffers
            .iter()
            .min_by_key(|(_, b)| b.last_update)
            .map(|(k, _)| k.clone())
        {
            tracing::warn!(track = %key, "gait buffer cap reached; evicting least-recent");
            self.buffers.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GrayImage;
    use crate::gait::SILHOUETTE_SIZE;

    fn silhouette(value: u8) -> Silhouette {
        Silhouette::from_binary(GrayImage::filled(SILHOUETTE_SIZE, SILHOUETTE_SIZE, value)).unwrap()
    }

    fn key(camera: &str, track_id: u64) -> TrackKey {
        TrackKey::new(CameraId::new(camera), track_id)
    }

    #[test]
    fn test_fills_at_sequence_length() {
        let mut mgr = GaitBufferManager::new(5, Duration::from_secs(5), 64);
        let k = key("cam1", 1);
        let now = Instant::now();

        for i in 0..4 {
            assert!(!mgr.add_frame(&k, silhouette(0), now), "full at frame {}", i);
        }
        assert!(mgr.add_frame(&k, silhouette(0), now));
    }

    #[test]
    fn test_take_resets_buffer_to_empty() {
        let mut mgr = GaitBufferManager::new(3, Duration::from_secs(5), 64);
        let k = key("cam1", 1);
        let now = Instant::now();

        for _ in 0..3 {
            mgr.add_frame(&k, silhouette(255), now);
        }
        let sequence = mgr.take_sequence(&k).unwrap();
        assert_eq!(sequence.len(), 3);
        assert_eq!(mgr.len(&k), 0);

        // Not full: nothing to take.
        assert!(mgr.take_sequence(&k).is_none());
    }

    #[test]
    fn test_thirty_five_frames_yield_one_extraction() {
        // 35 identical silhouettes: exactly one extraction at frame 30,
        // frames 31-35 populate a fresh 5-long buffer.
        let mut mgr = GaitBufferManager::new(30, Duration::from_secs(5), 64);
        let k = key("cam1", 42);
        let now = Instant::now();

        let mut extractions = 0;
        for _ in 0..35 {
            if mgr.add_frame(&k, silhouette(255), now) {
                let sequence = mgr.take_sequence(&k).unwrap();
                assert_eq!(sequence.len(), 30);
                extractions += 1;
            }
        }

        assert_eq!(extractions, 1);
        assert_eq!(mgr.len(&k), 5);
    }

    #[test]
    fn test_buffers_isolated_per_track_key() {
        let mut mgr = GaitBufferManager::new(30, Duration::from_secs(5), 64);
        let a = key("cam1", 1);
        let b = key("cam2", 1); // same raw id, different camera
        let now = Instant::now();

        for _ in 0..7 {
            mgr.add_frame(&a, silhouette(0), now);
        }
        mgr.add_frame(&b, silhouette(255), now);

        assert_eq!(mgr.len(&a), 7);
        assert_eq!(mgr.len(&b), 1);

        mgr.take_sequence(&b);
        assert_eq!(mgr.len(&a), 7);
    }

    #[test]
    fn test_stale_buffer_removed() {
        let mut mgr = GaitBufferManager::new(30, Duration::from_secs(5), 64);
        let k = key("cam1", 1);
        let start = Instant::now();

        mgr.add_frame(&k, silhouette(0), start);
        mgr.cleanup_stale(start + Duration::from_secs(5));
        assert_eq!(mgr.len(&k), 1, "exactly 5s idle is not yet stale");

        mgr.cleanup_stale(start + Duration::from_millis(5001));
        assert_eq!(mgr.len(&k), 0);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_cap_evicts_least_recently_updated() {
        let mut mgr = GaitBufferManager::new(30, Duration::from_secs(5), 2);
        let start = Instant::now();

        mgr.add_frame(&key("cam1", 1), silhouette(0), start);
        mgr.add_frame(&key("cam1", 2), silhouette(0), start + Duration::from_millis(10));
        mgr.add_frame(&key("cam1", 3), silhouette(0), start + Duration::from_millis(20));

        assert_eq!(mgr.buffer_count(), 2);
        assert_eq!(mgr.len(&key("cam1", 1)), 0, "oldest buffer evicted");
        assert_eq!(mgr.len(&key("cam1", 3)), 1);
    }

    #[test]
    fn test_remove_discards_partial_sequence() {
        let mut mgr = GaitBufferManager::new(30, Duration::from_secs(5), 64);
        let k = key("cam1", 1);
        let now = Instant::now();

        for _ in 0..7 {
            mgr.add_frame(&k, silhouette(0), now);
        }
        mgr.remove(&k);
        assert_eq!(mgr.len(&k), 0);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_remove_camera_drops_only_that_camera() {
        let mut mgr = GaitBufferManager::new(30, Duration::from_secs(5), 64);
        let now = Instant::now();
        mgr.add_frame(&key("cam1", 1), silhouette(0), now);
        mgr.add_frame(&key("cam2", 1), silhouette(0), now);

        mgr.remove_camera(&CameraId::new("cam1"));
        assert_eq!(mgr.len(&key("cam1", 1)), 0);
        assert_eq!(mgr.len(&key("cam2", 1)), 1);
    }
}
