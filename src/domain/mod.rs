//! Domain types for the identification core.
//!
//! Everything here is plain data: identities and their reference embeddings,
//! frames and detections coming in from the capture side, and the
//! identification results flowing out to downstream consumers.

pub mod detection;
pub mod embedding;
pub mod frame;
pub mod identity;

pub use detection::{
    BoundingBox, IdentificationResult, MatchMethod, ObjectClass, PersonBox, TrackKey,
};
pub use embedding::{Embedding, EmbeddingId};
pub use frame::{CameraId, Frame, GrayImage};
pub use identity::{Identity, IdentityId, Modality};
