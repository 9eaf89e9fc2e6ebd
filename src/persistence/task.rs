//! Durable mutations generated by the processing pipeline.

use chrono::{DateTime, Utc};

use crate::domain::{Embedding, EmbeddingId, IdentificationResult, IdentityId, Modality};

/// One durable mutation, queued for asynchronous application.
///
/// Embedding vectors travel as their fixed-width binary encoding (see
/// [`Embedding::to_bytes`]); the durable store never needs to understand
/// float vectors.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum PersistenceTask {
    /// Store a newly captured reference embedding.
    InsertEmbedding {
        /// Owning identity.
        identity: IdentityId,
        /// Owning identity's display name.
        identity_name: String,
        /// Row id of the embedding.
        embedding_id: EmbeddingId,
        /// Modality tag.
        modality: Modality,
        /// Binary-encoded vector.
        blob: Vec<u8>,
        /// Capture timestamp.
        captured_at: DateTime<Utc>,
        /// Encoder confidence at capture time.
        confidence: f32,
    },
    /// Remove an embedding evicted by the in-memory retention cap.
    DeleteEmbedding {
        /// Row id of the evicted embedding.
        embedding_id: EmbeddingId,
        /// Owning identity.
        identity: IdentityId,
        /// Modality tag.
        modality: Modality,
    },
    /// Record an identification event for the audit trail.
    InsertEvent {
        /// The emitted result.
        result: IdentificationResult,
    },
}

impl PersistenceTask {
    /// Build an insert task for a freshly stored embedding.
    pub fn insert_embedding(
        identity: IdentityId,
        identity_name: &str,
        embedding: &Embedding,
    ) -> Self {
        PersistenceTask::InsertEmbedding {
            identity,
            identity_name: identity_name.to_string(),
            embedding_id: embedding.id(),
            modality: embedding.modality(),
            blob: embedding.to_bytes(),
            captured_at: embedding.captured_at(),
            confidence: embedding.confidence(),
        }
    }

    /// Short task-kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceTask::InsertEmbedding { .. } => "insert_embedding",
            PersistenceTask::DeleteEmbedding { .. } => "delete_embedding",
            PersistenceTask::InsertEvent { .. } => "insert_event",
        }
    }

    /// True for embedding inserts; the worker batches consecutive runs of
    /// these.
    pub fn is_insert_embedding(&self) -> bool {
        matches!(self, PersistenceTask::InsertEmbedding { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_task_carries_codec_blob() {
        let raw: Vec<f32> = (0..Modality::Gait.dim()).map(|i| i as f32 + 1.0).collect();
        let e = Embedding::from_raw(Modality::Gait, raw, Utc::now(), 0.8).unwrap();
        let task = PersistenceTask::insert_embedding(IdentityId::new(), "Ali", &e);

        match task {
            PersistenceTask::InsertEmbedding {
                modality, blob, embedding_id, ..
            } => {
                assert_eq!(modality, Modality::Gait);
                assert_eq!(embedding_id, e.id());
                let (decoded_modality, vector) = Embedding::vector_from_bytes(&blob).unwrap();
                assert_eq!(decoded_modality, Modality::Gait);
                assert_eq!(vector, e.vector());
            }
            other => panic!("unexpected task {:?}", other.kind()),
        }
    }
}
