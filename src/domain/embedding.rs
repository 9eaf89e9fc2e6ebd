//! Reference embedding: a fixed-length, L2-normalized feature vector.
//!
//! Encoders are black boxes and their outputs are not assumed to be
//! normalized; normalization happens here, once, at construction. Stored
//! vectors are immutable afterwards, so downstream cosine similarity reduces
//! to a dot product.
//!
//! The binary codec is a fixed-width little-endian layout (version byte,
//! modality tag, u32 dimension, f32 values). Nothing in it can execute code
//! on load, unlike the generic object serialization it replaces.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::identity::Modality;
use crate::IdError;

/// Codec layout version.
const CODEC_VERSION: u8 = 1;
/// Version + modality tag + u32 dimension.
const CODEC_HEADER_LEN: usize = 6;

/// Unique identifier for a single stored embedding row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EmbeddingId(Uuid);

impl EmbeddingId {
    /// Allocate a new random embedding id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID (durable-store hydration).
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Borrow the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EmbeddingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EmbeddingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One modality sample: fixed-length float vector with ‖v‖₂ = 1.
#[derive(Debug, Clone)]
pub struct Embedding {
    id: EmbeddingId,
    modality: Modality,
    vector: Vec<f32>,
    captured_at: DateTime<Utc>,
    confidence: f32,
}

impl Embedding {
    /// Build an embedding from a raw encoder output.
    ///
    /// Validates the dimension against the modality's fixed width, rejects
    /// empty or zero-norm vectors, and L2-normalizes in place.
    pub fn from_raw(
        modality: Modality,
        raw: Vec<f32>,
        captured_at: DateTime<Utc>,
        confidence: f32,
    ) -> Result<Self, IdError> {
        Self::build(EmbeddingId::new(), modality, raw, captured_at, confidence)
    }

    /// Rebuild an embedding loaded from durable storage, keeping its row id.
    pub fn from_stored(
        id: EmbeddingId,
        modality: Modality,
        vector: Vec<f32>,
        captured_at: DateTime<Utc>,
        confidence: f32,
    ) -> Result<Self, IdError> {
        Self::build(id, modality, vector, captured_at, confidence)
    }

    fn build(
        id: EmbeddingId,
        modality: Modality,
        mut vector: Vec<f32>,
        captured_at: DateTime<Utc>,
        confidence: f32,
    ) -> Result<Self, IdError> {
        if vector.len() != modality.dim() {
            return Err(IdError::Encoding(format!(
                "{} encoder produced {} values, expected {}",
                modality,
                vector.len(),
                modality.dim()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(IdError::Encoding(format!(
                "{} encoder produced non-finite values",
                modality
            )));
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(IdError::Encoding(format!(
                "{} encoder produced a zero vector",
                modality
            )));
        }
        for v in &mut vector {
            *v /= norm;
        }

        Ok(Self {
            id,
            modality,
            vector,
            captured_at,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// Stable row id.
    pub fn id(&self) -> EmbeddingId {
        self.id
    }

    /// Modality tag.
    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Normalized vector.
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    /// Capture timestamp.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Encoder confidence at capture time, clamped to [0, 1].
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Serialize the vector for durable storage.
    ///
    /// Layout: `[version: u8][modality tag: u8][dim: u32 LE][dim × f32 LE]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CODEC_HEADER_LEN + self.vector.len() * 4);
        out.push(CODEC_VERSION);
        out.push(self.modality.tag());
        out.extend_from_slice(&(self.vector.len() as u32).to_le_bytes());
        for v in &self.vector {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode a stored vector blob, validating tag and exact length.
    pub fn vector_from_bytes(blob: &[u8]) -> Result<(Modality, Vec<f32>), IdError> {
        if blob.len() < CODEC_HEADER_LEN {
            return Err(IdError::Codec(format!(
                "blob too short: {} bytes",
                blob.len()
            )));
        }
        if blob[0] != CODEC_VERSION {
            return Err(IdError::Codec(format!("unknown codec version {}", blob[0])));
        }
        let modality = Modality::from_tag(blob[1])
            .ok_or_else(|| IdError::Codec(format!("unknown modality tag {}", blob[1])))?;

        let dim = u32::from_le_bytes([blob[2], blob[3], blob[4], blob[5]]) as usize;
        if dim != modality.dim() {
            return Err(IdError::Codec(format!(
                "dimension {} does not match {} (expected {})",
                dim,
                modality,
                modality.dim()
            )));
        }

        let expected = CODEC_HEADER_LEN + dim * 4;
        if blob.len() != expected {
            return Err(IdError::Codec(format!(
                "blob is {} bytes, expected {} for {}-dim {}",
                blob.len(),
                expected,
                dim,
                modality
            )));
        }

        let mut vector = Vec::with_capacity(dim);
        for chunk in blob[CODEC_HEADER_LEN..].chunks_exact(4) {
            vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok((modality, vector))
    }
}
