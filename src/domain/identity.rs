//! Identity entity: a known subject with reference embeddings per modality.

use uuid::Uuid;

use super::embedding::Embedding;

/// One biometric channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Modality {
    /// Facial features (primary, most reliable).
    Face,
    /// Whole-body appearance (clothing, build) for re-identification.
    Body,
    /// Walking pattern extracted from a silhouette sequence.
    Gait,
}

impl Modality {
    /// Fixed embedding width produced by this modality's encoder.
    pub fn dim(&self) -> usize {
        match self {
            Modality::Face => 512,
            Modality::Body => 1280,
            Modality::Gait => 256,
        }
    }

    /// Stable wire/storage tag for the binary embedding codec.
    pub fn tag(&self) -> u8 {
        match self {
            Modality::Face => 0,
            Modality::Body => 1,
            Modality::Gait => 2,
        }
    }

    /// Inverse of [`Modality::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Modality::Face),
            1 => Some(Modality::Body),
            2 => Some(Modality::Gait),
            _ => None,
        }
    }

    /// Lowercase name used in logs and storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Face => "face",
            Modality::Body => "body",
            Modality::Gait => "gait",
        }
    }

    /// All modalities, in fallback priority order.
    pub const ALL: [Modality; 3] = [Modality::Face, Modality::Body, Modality::Gait];
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a known subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IdentityId(Uuid);

impl IdentityId {
    /// Allocate a new random identity id.
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

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A known subject with stored reference vectors across modalities.
///
/// The per-modality lists are oldest-first; mutation goes exclusively through
/// [`crate::matching::EmbeddingStore`], which enforces the retention cap.
#[derive(Debug, Clone)]
pub struct Identity {
    id: IdentityId,
    name: String,
    face: Vec<Embedding>,
    body: Vec<Embedding>,
    gait: Vec<Embedding>,
}

impl Identity {
    /// Create an identity with no stored embeddings yet.
    pub fn new(id: IdentityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            face: Vec::new(),
            body: Vec::new(),
            gait: Vec::new(),
        }
    }

    /// Stable id.
    pub fn id(&self) -> IdentityId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored embeddings for one modality, oldest first.
    pub fn embeddings(&self, modality: Modality) -> &[Embedding] {
        match modality {
            Modality::Face => &self.face,
            Modality::Body => &self.body,
            Modality::Gait => &self.gait,
        }
    }

    pub(crate) fn embeddings_mut(&mut self, modality: Modality) -> &mut Vec<Embedding> {
        match modality {
            Modality::Face => &mut self.face,
            Modality::Body => &mut self.body,
            Modality::Gait => &mut self.gait,
        }
    }
}
