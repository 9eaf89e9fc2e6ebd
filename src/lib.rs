//! Multi-modal person identification core.
//!
//! Resolves who a tracked person is by chaining three biometric modalities in
//! reliability order (face recognition, body-appearance re-identification,
//! then gait recognition) with graceful fallback when the stronger signals
//! are unavailable. Matches made by the face stage passively enrich the
//! reference database for the weaker stages, so the system keeps recognizing
//! a subject after they turn away from the camera.
//!
//! The crate is the processing core only. Frame acquisition, the neural
//! detector and encoders, and the durable store are collaborators behind the
//! traits in [`integration`] and [`persistence`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trident_id::prelude::*;
//!
//! # async fn run(
//! #     detector: Arc<dyn ObjectDetector>,
//! #     encoders: EncoderSet,
//! #     durable: Arc<dyn DurableStore>,
//! #     camera: Box<dyn FrameSource>,
//! # ) -> trident_id::Result<()> {
//! let config = EngineConfig::builder().face_threshold(0.65).build()?;
//! let (mut engine, mut results) =
//!     IdentificationEngine::new(config, detector, encoders, durable).await?;
//!
//! engine.spawn_camera(camera);
//! tokio::spawn(async move {
//!     while let Some(result) = results.recv().await {
//!         println!("{}: {}", result.track, result.label);
//!     }
//! });
//!
//! engine.run().await;
//! engine.shutdown(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

pub mod domain;
pub mod gait;
pub mod integration;
pub mod matching;
pub mod persistence;
pub mod pipeline;

use domain::{CameraId, IdentificationResult};
use integration::{EncoderSet, FrameQueue, FrameSource, ObjectDetector};
use matching::EmbeddingStore;
use persistence::{DurableStore, PersistenceConfig, PersistenceHandle, PersistenceQueue};
use pipeline::{FaceQualityGate, IdentificationPipeline};

/// Unified error type for the identification core.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// Malformed input for one person or frame; the pipeline skips it and
    /// continues.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An encoder produced unusable output; treated as a non-match.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// A stored embedding blob failed to decode.
    #[error("embedding codec: {0}")]
    Codec(String),

    /// A durable-store operation failed; retried and eventually dropped on
    /// the worker, never surfaced to the processing path.
    #[error("persistence: {0}")]
    Persistence(String),

    /// Rejected configuration.
    #[error("configuration: {0}")]
    Config(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IdError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for the identification engine.
///
/// Defaults carry the operationally proven values; use
/// [`EngineConfig::builder`] to adjust them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum cosine similarity for a face match.
    pub face_threshold: f32,
    /// Minimum cosine similarity for a body-appearance match.
    pub reid_threshold: f32,
    /// Minimum cosine similarity for a gait match.
    pub gait_threshold: f32,
    /// Foreground fraction below which a frame is skipped entirely.
    pub motion_threshold: f32,
    /// Silhouette frames per gait sequence.
    pub sequence_length: usize,
    /// Idle time after which per-track state is dropped.
    pub gait_timeout: Duration,
    /// Stored embeddings retained per identity and modality.
    pub max_stored: usize,
    /// Minimum spacing between passive-enrollment samples per identity and
    /// modality.
    pub sample_interval: Duration,
    /// Lifetime passive-enrollment samples per identity and modality.
    pub max_samples: u32,
    /// Simultaneous gait buffers before least-recently-updated eviction.
    pub max_gait_buffers: usize,
    /// Frames buffered between capture and processing, per camera.
    pub frame_queue_capacity: usize,
    /// Face crop quality thresholds.
    pub face_quality: FaceQualityGate,
    /// Persistence worker tuning.
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            face_threshold: 0.60,
            reid_threshold: 0.75,
            gait_threshold: 0.70,
            motion_threshold: 0.25,
            sequence_length: 30,
            gait_timeout: Duration::from_secs(5),
            max_stored: 10,
            sample_interval: Duration::from_secs(2),
            max_samples: 50,
            max_gait_buffers: 256,
            frame_queue_capacity: 8,
            face_quality: FaceQualityGate::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`]; setters clamp into valid ranges.
#[derive(Debug, Default, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Face match threshold, clamped to [0, 1].
    pub fn face_threshold(mut self, threshold: f32) -> Self {
        self.config.face_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Body-appearance match threshold, clamped to [0, 1].
    pub fn reid_threshold(mut self, threshold: f32) -> Self {
        self.config.reid_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Gait match threshold, clamped to [0, 1].
    pub fn gait_threshold(mut self, threshold: f32) -> Self {
        self.config.gait_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Motion foreground-fraction threshold, clamped to [0, 1].
    pub fn motion_threshold(mut self, threshold: f32) -> Self {
        self.config.motion_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Silhouette frames per gait sequence, at least 1.
    pub fn sequence_length(mut self, frames: usize) -> Self {
        self.config.sequence_length = frames.max(1);
        self
    }

    /// Per-track idle timeout.
    pub fn gait_timeout(mut self, timeout: Duration) -> Self {
        self.config.gait_timeout = timeout;
        self
    }

    /// Retention cap per identity and modality, at least 1.
    pub fn max_stored(mut self, cap: usize) -> Self {
        self.config.max_stored = cap.max(1);
        self
    }

    /// Spacing between enrollment samples.
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    /// Lifetime enrollment sample cap, at least 1.
    pub fn max_samples(mut self, cap: u32) -> Self {
        self.config.max_samples = cap.max(1);
        self
    }

    /// Simultaneous gait buffer cap, at least 1.
    pub fn max_gait_buffers(mut self, cap: usize) -> Self {
        self.config.max_gait_buffers = cap.max(1);
        self
    }

    /// Per-camera frame queue capacity, at least 1.
    pub fn frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.frame_queue_capacity = capacity.max(1);
        self
    }

    /// Face crop quality thresholds.
    pub fn face_quality(mut self, gate: FaceQualityGate) -> Self {
        self.config.face_quality = gate;
        self
    }

    /// Persistence worker tuning.
    pub fn persistence(mut self, config: PersistenceConfig) -> Self {
        self.config.persistence = config;
        self
    }

    /// Finish, validating cross-field consistency.
    pub fn build(self) -> Result<EngineConfig> {
        let c = &self.config;
        for (name, value) in [
            ("face_threshold", c.face_threshold),
            ("reid_threshold", c.reid_threshold),
            ("gait_threshold", c.gait_threshold),
            ("motion_threshold", c.motion_threshold),
        ] {
            if !value.is_finite() {
                return Err(IdError::Config(format!("{} is not finite", name)));
            }
        }
        if c.gait_timeout.is_zero() {
            return Err(IdError::Config("gait_timeout must be positive".into()));
        }
        Ok(self.config)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owns the processing loop: frames in, identification results out.
///
/// Capture tasks push frames onto a bounded drop-oldest queue; `run` pops
/// them, runs detection and the identification chain, and forwards results to
/// the outbound channel. All pipeline state is single-mutator inside `run`.
pub struct IdentificationEngine {
    detector: Arc<dyn ObjectDetector>,
    pipeline: IdentificationPipeline,
    frames: FrameQueue,
    persistence: Option<PersistenceHandle>,
    results_tx: mpsc::UnboundedSender<IdentificationResult>,
}

impl IdentificationEngine {
    /// Build the engine: hydrate the reference store from the durable store,
    /// then spawn the persistence worker.
    ///
    /// Returns the engine and the receiver for identification results.
    pub async fn new(
        config: EngineConfig,
        detector: Arc<dyn ObjectDetector>,
        encoders: EncoderSet,
        durable: Arc<dyn DurableStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<IdentificationResult>)> {
        let snapshot = durable.load_all().await?;
        tracing::info!(rows = snapshot.len(), "reference snapshot loaded");

        let (queue, handle) = PersistenceQueue::spawn(durable, config.persistence.clone());
        let frames = FrameQueue::new(config.frame_queue_capacity);

        let mut pipeline = IdentificationPipeline::new(&config, encoders, queue);
        pipeline.hydrate(snapshot);

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                detector,
                pipeline,
                frames,
                persistence: Some(handle),
                results_tx,
            },
            results_rx,
        ))
    }

    /// Producer handle for pushing frames from outside the engine.
    pub fn frame_queue(&self) -> FrameQueue {
        self.frames.clone()
    }

    /// Spawn a capture task feeding `source` into the frame queue.
    ///
    /// The task ends when the source reports end-of-stream or errors; call
    /// [`IdentificationEngine::end_camera_session`] afterwards to release the
    /// camera's per-track state.
    pub fn spawn_camera(&self, mut source: Box<dyn FrameSource>) -> tokio::task::JoinHandle<()> {
        let frames = self.frames.clone();
        tokio::spawn(async move {
            loop {
                match source.next_frame().await {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "frame source failed; capture task ending");
                        break;
                    }
                }
            }
        })
    }

    /// Process frames until the queue is closed and drained.
    pub async fn run(&mut self) {
        while let Some(frame) = self.frames.pop().await {
            match self.detector.detect(&frame) {
                Ok(boxes) => {
                    for result in self.pipeline.process_frame(&frame, &boxes) {
                        // A closed receiver just means nobody is listening.
                        let _ = self.results_tx.send(result);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        camera = %frame.camera_id(),
                        error = %e,
                        "detector failed; frame skipped"
                    );
                }
            }
        }
        tracing::info!("frame intake closed; processing loop ended");
    }

    /// Process one frame directly, bypassing the queue. Mainly for embedders
    /// that drive their own loop.
    pub fn process_frame(&mut self, frame: &domain::Frame) -> Vec<IdentificationResult> {
        match self.detector.detect(frame) {
            Ok(boxes) => self.pipeline.process_frame(frame, &boxes),
            Err(e) => {
                tracing::warn!(camera = %frame.camera_id(), error = %e, "detector failed");
                Vec::new()
            }
        }
    }

    /// Release all state tied to one camera, including its intake lane.
    pub fn end_camera_session(&mut self, camera: &CameraId) {
        self.frames.remove_camera(camera);
        self.pipeline.end_camera_session(camera);
    }

    /// Drop state for tracks idle past the timeout.
    pub fn expire_stale(&mut self) {
        self.pipeline.expire_stale(Instant::now());
    }

    /// Stop accepting frames; `run` returns once the backlog is processed.
    pub fn stop_intake(&self) {
        self.frames.close();
    }

    /// The in-memory reference store.
    pub fn store(&self) -> &EmbeddingStore {
        self.pipeline.store()
    }

    /// Shut down: close intake, release the persistence producer, and wait up
    /// to `drain_timeout` for queued writes to land.
    pub async fn shutdown(self, drain_timeout: Duration) {
        let IdentificationEngine {
            detector: _,
            pipeline,
            frames,
            persistence,
            results_tx,
        } = self;

        frames.close();
        drop(results_tx);
        // The pipeline holds the only persistence producer; dropping it lets
        // the worker drain and exit.
        drop(pipeline);
        if let Some(handle) = persistence {
            handle.shutdown(drain_timeout).await;
        }
        tracing::info!("identification engine shut down");
    }
}

/// Common imports for embedding the engine.
pub mod prelude {
    pub use crate::domain::{
        BoundingBox, CameraId, Embedding, EmbeddingId, Frame, GrayImage, IdentificationResult,
        Identity, IdentityId, MatchMethod, Modality, ObjectClass, PersonBox, TrackKey,
    };
    pub use crate::integration::{
        BodyEncoder, EncoderSet, FaceEncoder, FaceLocator, FrameQueue, FrameSource, GaitEncoder,
        ObjectDetector,
    };
    pub use crate::matching::{EmbeddingStore, SimilarityService, StoredEmbedding};
    pub use crate::persistence::{DurableStore, PersistenceConfig, PersistenceTask};
    pub use crate::{EngineConfig, IdError, IdentificationEngine, Result};
}
