//! Contracts for the external collaborators the core does not implement:
//! frame acquisition, object detection, and the per-modality neural encoders.
//! Also home of the per-camera bounded drop-oldest frame intake that
//! decouples capture from processing.
//!
//! Encoder outputs are raw feature vectors; the core validates dimensions and
//! L2-normalizes at [`crate::domain::Embedding`] construction, so encoder
//! implementations need no normalization of their own.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::{BoundingBox, CameraId, Frame, GrayImage, PersonBox};
use crate::gait::Silhouette;
use crate::IdError;

/// Produces frames from one camera.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Next captured frame, or `None` when the stream has ended.
    async fn next_frame(&mut self) -> Result<Option<Frame>, IdError>;
}

/// Detects and tracks people in a frame.
///
/// `track_id`s must be stable across consecutive frames for the same physical
/// subject on the same camera; the core never assumes uniqueness across
/// cameras.
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in the frame.
    fn detect(&self, frame: &Frame) -> Result<Vec<PersonBox>, IdError>;
}

/// Finds a face region within a person crop.
pub trait FaceLocator: Send + Sync {
    /// The face bounding box in the crop's coordinates, or `None` when no
    /// face is visible.
    fn locate(&self, person: &GrayImage) -> Result<Option<BoundingBox>, IdError>;
}

/// Produces a 512-dimensional facial feature vector.
pub trait FaceEncoder: Send + Sync {
    /// Embed a face crop.
    fn embed(&self, face: &GrayImage) -> Result<Vec<f32>, IdError>;
}

/// Produces a 1280-dimensional body-appearance feature vector.
pub trait BodyEncoder: Send + Sync {
    /// Embed a full-person crop.
    fn embed(&self, person: &GrayImage) -> Result<Vec<f32>, IdError>;
}

/// Produces a 256-dimensional gait feature vector from a silhouette sequence.
pub trait GaitEncoder: Send + Sync {
    /// Embed one completed silhouette sequence.
    fn embed_sequence(&self, sequence: &[Silhouette]) -> Result<Vec<f32>, IdError>;
}

/// The encoder collaborators bundled for the pipeline.
#[derive(Clone)]
pub struct EncoderSet {
    /// Face region locator.
    pub face_locator: Arc<dyn FaceLocator>,
    /// Face feature encoder.
    pub face: Arc<dyn FaceEncoder>,
    /// Body-appearance feature encoder.
    pub body: Arc<dyn BodyEncoder>,
    /// Gait sequence encoder.
    pub gait: Arc<dyn GaitEncoder>,
}

// ---------------------------------------------------------------------------
// Frame queue
// ---------------------------------------------------------------------------

/// Bounded frame intake between capture tasks and the processing loop.
///
/// Each camera gets its own bounded lane; overflow drops the **oldest**
/// frame of that camera only. A capture producer must never block, a burst
/// on one camera must never evict another camera's frames, and when
/// processing falls behind, recent frames are worth more than stale ones.
/// The consumer drains lanes round-robin.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<FrameQueueInner>,
}

struct FrameQueueInner {
    lanes: Mutex<CameraLanes>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

#[derive(Default)]
struct CameraLanes {
    queues: HashMap<CameraId, VecDeque<Frame>>,
    /// Round-robin rotation over the attached cameras.
    order: VecDeque<CameraId>,
}

impl CameraLanes {
    fn pop_round_robin(&mut self) -> Option<Frame> {
        for _ in 0..self.order.len() {
            let camera = self.order.pop_front()?;
            let frame = self.queues.get_mut(&camera).and_then(|q| q.pop_front());
            self.order.push_back(camera);
            if frame.is_some() {
                return frame;
            }
        }
        None
    }
}

impl FrameQueue {
    /// Create an intake holding at most `capacity` frames per camera.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FrameQueueInner {
                lanes: Mutex::new(CameraLanes::default()),
                notify: Notify::new(),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Push a frame onto its camera's lane, evicting that lane's oldest
    /// frame when full. Never blocks.
    pub fn push(&self, frame: Frame) {
        {
            let mut lanes = self.inner.lanes.lock();
            let camera = frame.camera_id().clone();
            let queue = match lanes.queues.get_mut(&camera) {
                Some(queue) => queue,
                None => {
                    lanes.order.push_back(camera.clone());
                    lanes
                        .queues
                        .entry(camera.clone())
                        .or_insert_with(|| VecDeque::with_capacity(self.inner.capacity))
                }
            };
            if queue.len() == self.inner.capacity {
                if queue.pop_front().is_some() {
                    let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::trace!(
                        camera = %camera,
                        total_dropped = dropped,
                        "camera lane full; oldest frame dropped"
                    );
                }
            }
            queue.push_back(frame);
        }
        self.inner.notify.notify_one();
    }

    /// Wait for the next frame, taken round-robin across camera lanes;
    /// `None` once the intake is closed and drained.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            // Arm the waiter before checking, so a push between the check
            // and the await still wakes us.
            let notified = self.inner.notify.notified();
            if let Some(frame) = self.inner.lanes.lock().pop_round_robin() {
                return Some(frame);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Drop one camera's lane and anything still queued on it.
    pub fn remove_camera(&self, camera: &CameraId) {
        let mut lanes = self.inner.lanes.lock();
        lanes.queues.remove(camera);
        lanes.order.retain(|c| c != camera);
    }

    /// Close the intake; waiting consumers drain what is left, then get
    /// `None`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Frames currently queued across all cameras.
    pub fn len(&self) -> usize {
        self.inner.lanes.lock().queues.values().map(|q| q.len()).sum()
    }

    /// Frames currently queued for one camera.
    pub fn camera_len(&self, camera: &CameraId) -> usize {
        self.inner
            .lanes
            .lock()
            .queues
            .get(camera)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(brightness: u8) -> Frame {
        camera_frame("cam1", brightness)
    }

    fn camera_frame(camera: &str, brightness: u8) -> Frame {
        Frame::new(
            CameraId::new(camera),
            GrayImage::filled(4, 4, brightness),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = FrameQueue::new(4);
        queue.push(frame(1));
        queue.push(frame(2));

        assert_eq!(queue.pop().await.unwrap().image().pixel(0, 0), 1);
        assert_eq!(queue.pop().await.unwrap().image().pixel(0, 0), 2);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1));
        queue.push(frame(2));
        queue.push(frame(3));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await.unwrap().image().pixel(0, 0), 2);
        assert_eq!(queue.pop().await.unwrap().image().pixel(0, 0), 3);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = FrameQueue::new(4);
        queue.push(frame(1));
        queue.close();

        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_burst_on_one_camera_keeps_other_cameras_frames() {
        let queue = FrameQueue::new(2);
        queue.push(camera_frame("cam2", 9));
        for i in 0..4 {
            queue.push(camera_frame("cam1", i));
        }

        // Only cam1 overflowed; cam2's lone frame must survive.
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.camera_len(&CameraId::new("cam2")), 1);

        let mut cameras = Vec::new();
        for _ in 0..3 {
            cameras.push(queue.pop().await.unwrap().camera_id().as_str().to_owned());
        }
        assert!(cameras.contains(&"cam2".to_owned()));
    }

    #[tokio::test]
    async fn test_pop_alternates_between_cameras() {
        let queue = FrameQueue::new(4);
        queue.push(camera_frame("cam1", 1));
        queue.push(camera_frame("cam1", 2));
        queue.push(camera_frame("cam2", 3));

        let first = queue.pop().await.unwrap();
        let second = queue.pop().await.unwrap();
        assert_ne!(first.camera_id(), second.camera_id());
    }

    #[tokio::test]
    async fn test_remove_camera_discards_its_backlog() {
        let queue = FrameQueue::new(4);
        queue.push(camera_frame("cam1", 1));
        queue.push(camera_frame("cam2", 2));
        queue.remove_camera(&CameraId::new("cam1"));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().await.unwrap().camera_id().as_str(), "cam2");
    }

    #[tokio::test]
    async fn test_push_wakes_waiting_consumer() {
        let queue = FrameQueue::new(4);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        // Let the consumer reach the await point.
        tokio::task::yield_now().await;
        queue.push(frame(7));

        let got = consumer.await.unwrap();
        assert_eq!(got.unwrap().image().pixel(0, 0), 7);
    }
}
