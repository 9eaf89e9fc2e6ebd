//! The per-frame identification chain.
//!
//! For every tracked person box the chain tries the modalities in reliability
//! order: face, then body appearance, then gait. The first stage to clear its
//! threshold resolves the frame; a face match additionally feeds passive
//! enrollment so the weaker modalities keep learning what the subject looks
//! like right now. A track that no stage resolves stays `Unknown` and is
//! retried on every subsequent frame.
//!
//! Everything here is single-mutator: the engine's processing loop is the
//! only caller, so no internal locking is needed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::{
    Embedding, Frame, GrayImage, IdentificationResult, IdentityId, MatchMethod, Modality,
    ObjectClass, PersonBox, TrackKey,
};
use crate::gait::{GaitBufferManager, Silhouette};
use crate::integration::EncoderSet;
use crate::matching::{EmbeddingStore, SimilarityMatch, SimilarityService, StoredEmbedding};
use crate::persistence::{PersistenceQueue, PersistenceTask};
use crate::pipeline::enrollment::PassiveEnrollmentController;
use crate::pipeline::face_quality::FaceQualityGate;
use crate::pipeline::motion::MotionGate;
use crate::{domain::CameraId, EngineConfig, IdError};

/// Resolution state of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// Seen, not yet attempted or resolved this frame.
    New,
    /// Resolved by face recognition.
    FaceMatched,
    /// Resolved by body-appearance re-identification.
    ReidMatched,
    /// Resolved by gait recognition.
    GaitMatched,
    /// All stages tried and missed; retried every frame.
    Unknown,
}

#[derive(Debug, Clone)]
struct CachedGait {
    identity: IdentityId,
    name: String,
    score: f32,
}

#[derive(Debug)]
struct TrackEntry {
    last_seen: Instant,
    status: TrackStatus,
    gait_match: Option<CachedGait>,
    /// Identity this track last enrolled under; a change flushes the
    /// track's enrollment gait buffer so silhouettes of two subjects never
    /// mix into one sequence.
    enrolled_as: Option<IdentityId>,
}

/// Face → body → gait fallback chain over tracked person boxes.
pub struct IdentificationPipeline {
    face_threshold: f32,
    reid_threshold: f32,
    gait_threshold: f32,
    track_timeout: Duration,

    motion: MotionGate,
    face_quality: FaceQualityGate,
    similarity: SimilarityService,
    store: EmbeddingStore,
    enrollment: PassiveEnrollmentController,
    /// Accumulates silhouettes for tracks still hunting for a gait match.
    recognition_buffers: GaitBufferManager,
    /// Accumulates silhouettes while face recognition vouches for the track;
    /// kept apart so an enrollment sequence is never half-consumed by the
    /// recognition side.
    enrollment_buffers: GaitBufferManager,
    tracks: HashMap<TrackKey, TrackEntry>,
    encoders: EncoderSet,
    queue: PersistenceQueue,
}

impl IdentificationPipeline {
    /// Build the pipeline from engine configuration.
    pub fn new(config: &EngineConfig, encoders: EncoderSet, queue: PersistenceQueue) -> Self {
        Self {
            face_threshold: config.face_threshold,
            reid_threshold: config.reid_threshold,
            gait_threshold: config.gait_threshold,
            track_timeout: config.gait_timeout,
            motion: MotionGate::new(config.motion_threshold),
            face_quality: config.face_quality.clone(),
            similarity: SimilarityService::new(),
            store: EmbeddingStore::new(config.max_stored),
            enrollment: PassiveEnrollmentController::new(
                config.sample_interval,
                config.max_samples,
            ),
            recognition_buffers: GaitBufferManager::new(
                config.sequence_length,
                config.gait_timeout,
                config.max_gait_buffers,
            ),
            enrollment_buffers: GaitBufferManager::new(
                config.sequence_length,
                config.gait_timeout,
                config.max_gait_buffers,
            ),
            tracks: HashMap::new(),
            encoders,
            queue,
        }
    }

    /// Replace the in-memory reference store from a startup snapshot.
    pub fn hydrate(&mut self, snapshot: Vec<StoredEmbedding>) {
        self.store.load(snapshot);
    }

    /// Run the chain over one frame's detections.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        boxes: &[PersonBox],
    ) -> Vec<IdentificationResult> {
        self.process_frame_at(frame, boxes, Instant::now())
    }

    /// [`IdentificationPipeline::process_frame`] with an explicit clock.
    pub fn process_frame_at(
        &mut self,
        frame: &Frame,
        boxes: &[PersonBox],
        now: Instant,
    ) -> Vec<IdentificationResult> {
        self.expire_stale(now);

        if !self.motion.has_motion(frame) {
            tracing::trace!(camera = %frame.camera_id(), "frame gated: no motion");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(boxes.len());
        for person in boxes {
            if person.class != ObjectClass::Person {
                continue;
            }
            let key = TrackKey::new(frame.camera_id().clone(), person.track_id);
            match self.identify_person(&key, frame, person, now) {
                Ok(result) => {
                    if result.is_known() {
                        self.queue.enqueue(PersistenceTask::InsertEvent {
                            result: result.clone(),
                        });
                    }
                    results.push(result);
                }
                // One malformed box never aborts the frame.
                Err(e) => {
                    tracing::warn!(track = %key, error = %e, "person box skipped");
                }
            }
        }
        results
    }

    /// Drop per-track state for tracks idle past the timeout.
    pub fn expire_stale(&mut self, now: Instant) {
        let timeout = self.track_timeout;
        self.tracks
            .retain(|_, entry| now.duration_since(entry.last_seen) <= timeout);
        self.recognition_buffers.cleanup_stale(now);
        self.enrollment_buffers.cleanup_stale(now);
    }

    /// Tear down all state tied to one camera.
    pub fn end_camera_session(&mut self, camera: &CameraId) {
        self.tracks.retain(|key, _| &key.camera != camera);
        self.recognition_buffers.remove_camera(camera);
        self.enrollment_buffers.remove_camera(camera);
        self.motion.remove_camera(camera);
        tracing::info!(camera = %camera, "camera session ended");
    }

    /// The in-memory reference store.
    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    /// Currently remembered tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Resolution status of one track, if it is remembered.
    pub fn track_status(&self, key: &TrackKey) -> Option<TrackStatus> {
        self.tracks.get(key).map(|t| t.status)
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    fn identify_person(
        &mut self,
        key: &TrackKey,
        frame: &Frame,
        person: &PersonBox,
        now: Instant,
    ) -> Result<IdentificationResult, IdError> {
        let crop = frame.image().crop(&person.bbox)?;
        let timestamp = frame.timestamp();
        self.touch(key, now);

        if let Some(m) = self.face_stage(&crop) {
            self.set_status(key, TrackStatus::FaceMatched);
            tracing::debug!(track = %key, identity = %m.identity, score = m.score, "face match");
            self.enroll(m.identity, &m.name, m.score, &crop, key, now, timestamp);
            return Ok(IdentificationResult::known(
                key.clone(),
                m.identity,
                &m.name,
                MatchMethod::Face,
                m.score,
                person.bbox,
                timestamp,
            ));
        }

        if let Some(m) = self.body_stage(&crop) {
            self.set_status(key, TrackStatus::ReidMatched);
            tracing::debug!(track = %key, identity = %m.identity, score = m.score, "re-id match");
            return Ok(IdentificationResult::known(
                key.clone(),
                m.identity,
                &m.name,
                MatchMethod::Reid,
                m.score,
                person.bbox,
                timestamp,
            ));
        }

        // A track the gait stage already resolved keeps its cached match;
        // re-buffering thirty frames per sighting would buy nothing.
        if let Some(cached) = self.tracks.get(key).and_then(|t| t.gait_match.clone()) {
            return Ok(IdentificationResult::known(
                key.clone(),
                cached.identity,
                &cached.name,
                MatchMethod::Gait,
                cached.score,
                person.bbox,
                timestamp,
            ));
        }

        if let Some(m) = self.gait_stage(key, &crop, now) {
            self.set_status(key, TrackStatus::GaitMatched);
            if let Some(entry) = self.tracks.get_mut(key) {
                entry.gait_match = Some(CachedGait {
                    identity: m.identity,
                    name: m.name.clone(),
                    score: m.score,
                });
            }
            tracing::debug!(track = %key, identity = %m.identity, score = m.score, "gait match");
            return Ok(IdentificationResult::known(
                key.clone(),
                m.identity,
                &m.name,
                MatchMethod::Gait,
                m.score,
                person.bbox,
                timestamp,
            ));
        }

        self.set_status(key, TrackStatus::Unknown);
        Ok(IdentificationResult::unknown(
            key.clone(),
            person.bbox,
            timestamp,
        ))
    }

    fn face_stage(&mut self, crop: &GrayImage) -> Option<SimilarityMatch> {
        let face_box = match self.encoders.face_locator.locate(crop) {
            Ok(Some(bbox)) => bbox,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "face locator failed; falling through");
                return None;
            }
        };
        let face = crop.crop(&face_box).ok()?;
        if !self.face_quality.is_usable(&face) {
            return None;
        }

        let vector = match self.encoders.face.embed(&face) {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "face encoder failed; falling through");
                return None;
            }
        };
        self.similarity
            .best_match(&vector, &self.store, Modality::Face, self.face_threshold)
    }

    fn body_stage(&mut self, crop: &GrayImage) -> Option<SimilarityMatch> {
        let vector = match self.encoders.body.embed(crop) {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "body encoder failed; falling through");
                return None;
            }
        };
        self.similarity
            .best_match(&vector, &self.store, Modality::Body, self.reid_threshold)
    }

    fn gait_stage(
        &mut self,
        key: &TrackKey,
        crop: &GrayImage,
        now: Instant,
    ) -> Option<SimilarityMatch> {
        let silhouette = Silhouette::from_region(crop);
        if !self.recognition_buffers.add_frame(key, silhouette, now) {
            return None;
        }
        let sequence = self.recognition_buffers.take_sequence(key)?;

        let vector = match self.encoders.gait.embed_sequence(&sequence) {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(track = %key, error = %e, "gait encoder failed");
                return None;
            }
        };
        self.similarity
            .best_match(&vector, &self.store, Modality::Gait, self.gait_threshold)
    }

    // -----------------------------------------------------------------------
    // Passive enrollment
    // -----------------------------------------------------------------------

    /// A face match makes this frame ground truth for the weaker modalities.
    ///
    /// The in-memory store is updated first and the durable tasks enqueued
    /// after; matching must see a new sample immediately even if the durable
    /// write lags or fails.
    #[allow(clippy::too_many_arguments)]
    fn enroll(
        &mut self,
        identity: IdentityId,
        name: &str,
        confidence: f32,
        crop: &GrayImage,
        key: &TrackKey,
        now: Instant,
        captured_at: chrono::DateTime<chrono::Utc>,
    ) {
        if let Some(entry) = self.tracks.get_mut(key) {
            let switched = matches!(entry.enrolled_as, Some(prev) if prev != identity);
            entry.enrolled_as = Some(identity);
            if switched {
                tracing::debug!(
                    track = %key,
                    identity = %identity,
                    "track re-resolved to a different identity; gait enrollment restarted"
                );
                self.enrollment_buffers.remove(key);
            }
        }

        if self.enrollment.should_sample(identity, Modality::Body, now) {
            match self.encoders.body.embed(crop) {
                Ok(raw) => match Embedding::from_raw(Modality::Body, raw, captured_at, confidence)
                {
                    Ok(embedding) => {
                        let tasks = self.store.add(identity, name, embedding);
                        self.queue.enqueue_all(tasks);
                        self.enrollment.record_sample(identity, Modality::Body, now);
                    }
                    Err(e) => {
                        tracing::debug!(identity = %identity, error = %e, "body sample rejected")
                    }
                },
                Err(e) => {
                    tracing::debug!(identity = %identity, error = %e, "body sample encode failed")
                }
            }
        }

        if self
            .enrollment_buffers
            .add_frame(key, Silhouette::from_region(crop), now)
        {
            if let Some(sequence) = self.enrollment_buffers.take_sequence(key) {
                if self.enrollment.should_sample(identity, Modality::Gait, now) {
                    match self.encoders.gait.embed_sequence(&sequence) {
                        Ok(raw) => {
                            match Embedding::from_raw(Modality::Gait, raw, captured_at, confidence)
                            {
                                Ok(embedding) => {
                                    let tasks = self.store.add(identity, name, embedding);
                                    self.queue.enqueue_all(tasks);
                                    self.enrollment.record_sample(identity, Modality::Gait, now);
                                }
                                Err(e) => tracing::debug!(
                                    identity = %identity,
                                    error = %e,
                                    "gait sample rejected"
                                ),
                            }
                        }
                        Err(e) => tracing::debug!(
                            identity = %identity,
                            error = %e,
                            "gait sample encode failed"
                        ),
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Track registry
    // -----------------------------------------------------------------------

    fn touch(&mut self, key: &TrackKey, now: Instant) {
        self.tracks
            .entry(key.clone())
            .and_modify(|entry| entry.last_seen = now)
            .or_insert(TrackEntry {
                last_seen: now,
                status: TrackStatus::New,
                gait_match: None,
                enrolled_as: None,
            });
    }

    fn set_status(&mut self, key: &TrackKey, status: TrackStatus) {
        if let Some(entry) = self.tracks.get_mut(key) {
            entry.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BoundingBox, EmbeddingId};
    use crate::integration::{BodyEncoder, FaceEncoder, FaceLocator, GaitEncoder};
    use crate::persistence::{DurableStore, PersistenceConfig, PersistenceHandle};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // -- encoder test doubles ------------------------------------------------

    #[derive(Default)]
    struct Counters {
        face_locate: AtomicUsize,
        face: AtomicUsize,
        body: AtomicUsize,
        gait: AtomicUsize,
    }

    struct FixedLocator {
        counters: Arc<Counters>,
        found: Option<BoundingBox>,
    }

    impl FaceLocator for FixedLocator {
        fn locate(&self, _person: &GrayImage) -> Result<Option<BoundingBox>, IdError> {
            self.counters.face_locate.fetch_add(1, Ordering::Relaxed);
            Ok(self.found)
        }
    }

    struct FixedFace {
        counters: Arc<Counters>,
        // Swappable mid-test to model a track re-resolving to someone else.
        vector: Mutex<Vec<f32>>,
    }

    impl FixedFace {
        fn set_vector(&self, vector: Vec<f32>) {
            *self.vector.lock() = vector;
        }
    }

    impl FaceEncoder for FixedFace {
        fn embed(&self, _face: &GrayImage) -> Result<Vec<f32>, IdError> {
            self.counters.face.fetch_add(1, Ordering::Relaxed);
            Ok(self.vector.lock().clone())
        }
    }

    struct FixedBody {
        counters: Arc<Counters>,
        vector: Vec<f32>,
    }

    impl BodyEncoder for FixedBody {
        fn embed(&self, _person: &GrayImage) -> Result<Vec<f32>, IdError> {
            self.counters.body.fetch_add(1, Ordering::Relaxed);
            Ok(self.vector.clone())
        }
    }

    struct FixedGait {
        counters: Arc<Counters>,
        vector: Vec<f32>,
    }

    impl GaitEncoder for FixedGait {
        fn embed_sequence(&self, _sequence: &[Silhouette]) -> Result<Vec<f32>, IdError> {
            self.counters.gait.fetch_add(1, Ordering::Relaxed);
            Ok(self.vector.clone())
        }
    }

    struct NullStore {
        applied: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DurableStore for NullStore {
        async fn load_all(&self) -> Result<Vec<StoredEmbedding>, IdError> {
            Ok(Vec::new())
        }

        async fn apply(&self, task: &PersistenceTask) -> Result<(), IdError> {
            self.applied.lock().push(task.kind().to_string());
            Ok(())
        }
    }

    // -- fixtures ------------------------------------------------------------

    fn unit_vector(modality: Modality, seed: f32) -> Vec<f32> {
        (0..modality.dim())
            .map(|i| ((i as f32 + seed) * 0.13).sin())
            .collect()
    }

    struct Fixture {
        pipeline: IdentificationPipeline,
        counters: Arc<Counters>,
        face_encoder: Arc<FixedFace>,
        durable: Arc<NullStore>,
        handle: PersistenceHandle,
    }

    /// Pipeline wired with fixed-output encoders. `face_vec`/`body_vec`/
    /// `gait_vec` are what the respective encoders emit for every call.
    fn fixture(
        config: EngineConfig,
        face_found: Option<BoundingBox>,
        face_vec: Vec<f32>,
        body_vec: Vec<f32>,
        gait_vec: Vec<f32>,
    ) -> Fixture {
        let counters = Arc::new(Counters::default());
        let face_encoder = Arc::new(FixedFace {
            counters: Arc::clone(&counters),
            vector: Mutex::new(face_vec),
        });
        let encoders = EncoderSet {
            face_locator: Arc::new(FixedLocator {
                counters: Arc::clone(&counters),
                found: face_found,
            }),
            face: face_encoder.clone(),
            body: Arc::new(FixedBody {
                counters: Arc::clone(&counters),
                vector: body_vec,
            }),
            gait: Arc::new(FixedGait {
                counters: Arc::clone(&counters),
                vector: gait_vec,
            }),
        };

        let durable = Arc::new(NullStore {
            applied: Mutex::new(Vec::new()),
        });
        let (queue, handle) = crate::persistence::PersistenceQueue::spawn(
            durable.clone(),
            PersistenceConfig::default(),
        );

        Fixture {
            pipeline: IdentificationPipeline::new(&config, encoders, queue),
            counters,
            face_encoder,
            durable,
            handle,
        }
    }

    /// A textured frame the face-quality gate accepts and the motion gate
    /// sees as active against a dark background.
    fn subject_frame(camera: &str) -> Frame {
        let mut image = GrayImage::filled(128, 128, 60);
        for y in 0..128 {
            for x in 0..128 {
                if (x / 8 + y / 8) % 2 == 0 {
                    image.set_pixel(x, y, 180);
                }
            }
        }
        Frame::new(CameraId::new(camera), image, Utc::now())
    }

    fn empty_frame(camera: &str) -> Frame {
        Frame::new(CameraId::new(camera), GrayImage::filled(128, 128, 20), Utc::now())
    }

    fn person(track_id: u64) -> PersonBox {
        PersonBox {
            bbox: BoundingBox::new(0, 0, 100, 128),
            track_id,
            confidence: 0.95,
            class: ObjectClass::Person,
        }
    }

    fn face_box() -> BoundingBox {
        BoundingBox::new(8, 8, 80, 80)
    }

    /// Seed the motion background with an empty scene so the subject frame
    /// passes the gate.
    fn prime(pipeline: &mut IdentificationPipeline, camera: &str, now: Instant) {
        pipeline.process_frame_at(&empty_frame(camera), &[], now);
    }

    fn seed_identity(
        pipeline: &mut IdentificationPipeline,
        name: &str,
        modality: Modality,
        vector: Vec<f32>,
    ) -> IdentityId {
        let id = IdentityId::new();
        let e = Embedding::from_raw(modality, vector, Utc::now(), 1.0).unwrap();
        pipeline.store.add(id, name, e);
        id
    }

    // -- scenarios -----------------------------------------------------------

    #[tokio::test]
    async fn test_gated_frame_calls_no_encoders() {
        let f_vec = unit_vector(Modality::Face, 1.0);
        let b_vec = unit_vector(Modality::Body, 2.0);
        let g_vec = unit_vector(Modality::Gait, 3.0);
        let mut fx = fixture(EngineConfig::default(), Some(face_box()), f_vec, b_vec, g_vec);

        // First frame only initializes the background; boxes are ignored.
        let results =
            fx.pipeline
                .process_frame_at(&subject_frame("cam1"), &[person(1)], Instant::now());

        assert!(results.is_empty());
        assert_eq!(fx.counters.face_locate.load(Ordering::Relaxed), 0);
        assert_eq!(fx.counters.face.load(Ordering::Relaxed), 0);
        assert_eq!(fx.counters.body.load(Ordering::Relaxed), 0);
        assert_eq!(fx.counters.gait.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_face_match_short_circuits_body_stage() {
        let face_vec = unit_vector(Modality::Face, 1.0);
        let body_vec = unit_vector(Modality::Body, 2.0);
        let mut fx = fixture(
            EngineConfig::default(),
            Some(face_box()),
            face_vec.clone(),
            body_vec.clone(),
            unit_vector(Modality::Gait, 3.0),
        );

        let ali = seed_identity(&mut fx.pipeline, "Ali", Modality::Face, face_vec);
        // A different identity whose body vector would also match.
        seed_identity(&mut fx.pipeline, "Vera", Modality::Body, body_vec);

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        let results = fx
            .pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].method, MatchMethod::Face);
        assert_eq!(results[0].identity, Some(ali));
        assert_eq!(results[0].label, "Ali");
        // The body encoder ran once for enrollment, never for matching.
        assert_eq!(fx.counters.body.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_body_fallback_when_no_face() {
        let body_vec = unit_vector(Modality::Body, 2.0);
        let mut fx = fixture(
            EngineConfig::default(),
            None, // no face visible
            unit_vector(Modality::Face, 1.0),
            body_vec.clone(),
            unit_vector(Modality::Gait, 3.0),
        );
        let vera = seed_identity(&mut fx.pipeline, "Vera", Modality::Body, body_vec);

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        let results = fx
            .pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);

        assert_eq!(results[0].method, MatchMethod::Reid);
        assert_eq!(results[0].identity, Some(vera));
        assert_eq!(results[0].label, "Vera (Re-ID)");
        assert_eq!(fx.counters.face.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_gait_fallback_then_cached() {
        let gait_vec = unit_vector(Modality::Gait, 3.0);
        let config = EngineConfig::builder().sequence_length(3).build().unwrap();
        let mut fx = fixture(
            config,
            None,
            unit_vector(Modality::Face, 1.0),
            Vec::new(), // body encoder yields nothing usable
            gait_vec.clone(),
        );
        let ali = seed_identity(&mut fx.pipeline, "Ali", Modality::Gait, gait_vec);

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);

        // Two frames only buffer; the third completes the sequence.
        for i in 0..2 {
            let results =
                fx.pipeline
                    .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
            assert_eq!(results[0].method, MatchMethod::Unknown, "frame {}", i);
        }
        let results = fx
            .pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        assert_eq!(results[0].method, MatchMethod::Gait);
        assert_eq!(results[0].identity, Some(ali));
        assert!(results[0].label.starts_with("Ali (Gait: "));
        assert_eq!(fx.counters.gait.load(Ordering::Relaxed), 1);

        // Fourth frame reuses the cached match without re-extracting.
        let results = fx
            .pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        assert_eq!(results[0].method, MatchMethod::Gait);
        assert_eq!(fx.counters.gait.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unknown_is_retried_every_frame() {
        let mut fx = fixture(
            EngineConfig::default(),
            Some(face_box()),
            unit_vector(Modality::Face, 1.0),
            unit_vector(Modality::Body, 2.0),
            unit_vector(Modality::Gait, 3.0),
        );
        // Empty store: nothing can match.

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        for _ in 0..3 {
            let results =
                fx.pipeline
                    .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
            assert_eq!(results[0].method, MatchMethod::Unknown);
            assert_eq!(results[0].label, "Unknown");
        }
        let key = TrackKey::new(CameraId::new("cam1"), 1);
        assert_eq!(fx.pipeline.track_status(&key), Some(TrackStatus::Unknown));
        // Face encoding was attempted on every frame, not just the first.
        assert_eq!(fx.counters.face.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_face_match_enrolls_body_sample() {
        let face_vec = unit_vector(Modality::Face, 1.0);
        let mut fx = fixture(
            EngineConfig::default(),
            Some(face_box()),
            face_vec.clone(),
            unit_vector(Modality::Body, 2.0),
            unit_vector(Modality::Gait, 3.0),
        );
        let ali = seed_identity(&mut fx.pipeline, "Ali", Modality::Face, face_vec);

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        fx.pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        assert_eq!(fx.pipeline.store().count(ali, Modality::Body), 1);

        // Within the sample interval: the match repeats, the sample does not.
        fx.pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        assert_eq!(fx.pipeline.store().count(ali, Modality::Body), 1);

        // Past the interval a second sample lands.
        fx.pipeline.process_frame_at(
            &subject_frame("cam1"),
            &[person(1)],
            now + Duration::from_secs(3),
        );
        assert_eq!(fx.pipeline.store().count(ali, Modality::Body), 2);
    }

    #[tokio::test]
    async fn test_identity_switch_restarts_gait_enrollment() {
        let ali_face = unit_vector(Modality::Face, 1.0);
        let ben_face = unit_vector(Modality::Face, 13.0);
        let config = EngineConfig::builder().sequence_length(3).build().unwrap();
        let mut fx = fixture(
            config,
            Some(face_box()),
            ali_face.clone(),
            unit_vector(Modality::Body, 2.0),
            unit_vector(Modality::Gait, 3.0),
        );
        let ali = seed_identity(&mut fx.pipeline, "Ali", Modality::Face, ali_face);
        let ben = seed_identity(&mut fx.pipeline, "Ben", Modality::Face, ben_face.clone());

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);

        // Two silhouettes accumulate while the track resolves as Ali.
        for _ in 0..2 {
            let results =
                fx.pipeline
                    .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
            assert_eq!(results[0].identity, Some(ali));
        }

        // The tracker hands the same track id to Ben; his first frame would
        // complete a sequence carrying Ali's silhouettes, so the buffer must
        // restart instead.
        fx.face_encoder.set_vector(ben_face);
        let results = fx
            .pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        assert_eq!(results[0].identity, Some(ben));
        assert_eq!(fx.pipeline.store().count(ali, Modality::Gait), 0);
        assert_eq!(fx.pipeline.store().count(ben, Modality::Gait), 0);

        // Two more frames of Ben complete a clean all-Ben sequence.
        for _ in 0..2 {
            fx.pipeline
                .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        }
        assert_eq!(fx.pipeline.store().count(ben, Modality::Gait), 1);
        assert_eq!(fx.pipeline.store().count(ali, Modality::Gait), 0);
    }

    #[tokio::test]
    async fn test_results_and_samples_reach_durable_store() {
        let face_vec = unit_vector(Modality::Face, 1.0);
        let mut fx = fixture(
            EngineConfig::default(),
            Some(face_box()),
            face_vec.clone(),
            unit_vector(Modality::Body, 2.0),
            unit_vector(Modality::Gait, 3.0),
        );
        seed_identity(&mut fx.pipeline, "Ali", Modality::Face, face_vec);

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        fx.pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);

        drop(fx.pipeline);
        fx.handle.shutdown(Duration::from_secs(1)).await;

        let applied = fx.durable.applied.lock().clone();
        assert!(applied.iter().any(|k| k == "insert_embedding"));
        assert!(applied.iter().any(|k| k == "insert_event"));
    }

    #[tokio::test]
    async fn test_malformed_box_skips_one_person_only() {
        let body_vec = unit_vector(Modality::Body, 2.0);
        let mut fx = fixture(
            EngineConfig::default(),
            None,
            unit_vector(Modality::Face, 1.0),
            body_vec.clone(),
            unit_vector(Modality::Gait, 3.0),
        );
        seed_identity(&mut fx.pipeline, "Vera", Modality::Body, body_vec);

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);

        let out_of_frame = PersonBox {
            bbox: BoundingBox::new(500, 500, 600, 600),
            track_id: 9,
            confidence: 0.9,
            class: ObjectClass::Person,
        };
        let results = fx.pipeline.process_frame_at(
            &subject_frame("cam1"),
            &[out_of_frame, person(1)],
            now,
        );

        // The bad box vanished; the good one still resolved.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].track.track_id, 1);
        assert_eq!(results[0].method, MatchMethod::Reid);
    }

    #[tokio::test]
    async fn test_non_person_boxes_ignored() {
        let mut fx = fixture(
            EngineConfig::default(),
            Some(face_box()),
            unit_vector(Modality::Face, 1.0),
            unit_vector(Modality::Body, 2.0),
            unit_vector(Modality::Gait, 3.0),
        );

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        let cart = PersonBox {
            class: ObjectClass::Other,
            ..person(4)
        };
        let results = fx
            .pipeline
            .process_frame_at(&subject_frame("cam1"), &[cart], now);

        assert!(results.is_empty());
        assert_eq!(fx.counters.face_locate.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_stale_tracks_expire() {
        let mut fx = fixture(
            EngineConfig::default(),
            Some(face_box()),
            unit_vector(Modality::Face, 1.0),
            unit_vector(Modality::Body, 2.0),
            unit_vector(Modality::Gait, 3.0),
        );

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        fx.pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        assert_eq!(fx.pipeline.track_count(), 1);

        fx.pipeline.expire_stale(now + Duration::from_secs(6));
        assert_eq!(fx.pipeline.track_count(), 0);
    }

    #[tokio::test]
    async fn test_end_camera_session_clears_state() {
        let mut fx = fixture(
            EngineConfig::default(),
            Some(face_box()),
            unit_vector(Modality::Face, 1.0),
            unit_vector(Modality::Body, 2.0),
            unit_vector(Modality::Gait, 3.0),
        );

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        prime(&mut fx.pipeline, "cam2", now);
        fx.pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        fx.pipeline
            .process_frame_at(&subject_frame("cam2"), &[person(1)], now);
        assert_eq!(fx.pipeline.track_count(), 2);

        fx.pipeline.end_camera_session(&CameraId::new("cam1"));
        assert_eq!(fx.pipeline.track_count(), 1);
        let survivor = TrackKey::new(CameraId::new("cam2"), 1);
        assert!(fx.pipeline.track_status(&survivor).is_some());
    }

    #[tokio::test]
    async fn test_hydrated_store_matches_immediately() {
        let body_vec = unit_vector(Modality::Body, 2.0);
        let mut fx = fixture(
            EngineConfig::default(),
            None,
            unit_vector(Modality::Face, 1.0),
            body_vec.clone(),
            unit_vector(Modality::Gait, 3.0),
        );

        let vera = IdentityId::new();
        let embedding = Embedding::from_stored(
            EmbeddingId::new(),
            Modality::Body,
            body_vec,
            Utc::now(),
            1.0,
        )
        .unwrap();
        fx.pipeline.hydrate(vec![StoredEmbedding {
            identity: vera,
            identity_name: "Vera".into(),
            embedding,
        }]);

        let now = Instant::now();
        prime(&mut fx.pipeline, "cam1", now);
        let results = fx
            .pipeline
            .process_frame_at(&subject_frame("cam1"), &[person(1)], now);
        assert_eq!(results[0].identity, Some(vera));
    }
}
