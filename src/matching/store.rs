//! Bounded in-memory reference store, `identity × modality → oldest-first
//! list`.
//!
//! The store is the single authority on the per-identity retention cap: the
//! durable store persists whatever it is told to. All mutation happens on the
//! pipeline-processing context, so there is no internal locking.

use std::collections::HashMap;

use crate::domain::{Embedding, Identity, IdentityId, Modality};
use crate::persistence::PersistenceTask;

/// One hydration row from the durable store.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    /// Owning identity.
    pub identity: IdentityId,
    /// Owning identity's display name.
    pub identity_name: String,
    /// The stored sample, already validated and normalized.
    pub embedding: Embedding,
}

/// In-memory per-identity, per-modality reference vector collection.
#[derive(Debug)]
pub struct EmbeddingStore {
    identities: HashMap<IdentityId, Identity>,
    max_stored: usize,
}

impl EmbeddingStore {
    /// Create an empty store retaining at most `max_stored` embeddings per
    /// identity and modality.
    pub fn new(max_stored: usize) -> Self {
        Self {
            identities: HashMap::new(),
            max_stored: max_stored.max(1),
        }
    }

    /// Replace the entire in-memory state from a startup snapshot.
    ///
    /// Rows beyond the cap for any `identity × modality` are trimmed
    /// oldest-first; trimming a snapshot emits no delete tasks because the
    /// durable rows were never owned by this process run.
    pub fn load(&mut self, snapshot: Vec<StoredEmbedding>) {
        self.identities.clear();

        let mut rows = snapshot;
        rows.sort_by_key(|r| r.embedding.captured_at());

        for row in rows {
            let identity = self
                .identities
                .entry(row.identity)
                .or_insert_with(|| Identity::new(row.identity, row.identity_name.clone()));
            let modality = row.embedding.modality();
            let list = identity.embeddings_mut(modality);
            list.push(row.embedding);
            if list.len() > self.max_stored {
                list.remove(0);
            }
        }

        tracing::info!(
            identities = self.identities.len(),
            "embedding store hydrated"
        );
    }

    /// Append a new embedding for an identity, creating the identity record
    /// on first sight.
    ///
    /// When the list exceeds the cap the oldest entry is evicted (FIFO by
    /// recency) and its delete task is emitted **before** the insert task for
    /// the new row, so the durable store never exceeds the cap after applying
    /// tasks in order.
    pub fn add(
        &mut self,
        identity_id: IdentityId,
        name: &str,
        embedding: Embedding,
    ) -> Vec<PersistenceTask> {
        let identity = self
            .identities
            .entry(identity_id)
            .or_insert_with(|| Identity::new(identity_id, name));

        let modality = embedding.modality();
        let insert = PersistenceTask::insert_embedding(identity_id, name, &embedding);

        let list = identity.embeddings_mut(modality);
        list.push(embedding);

        let mut tasks = Vec::with_capacity(2);
        if list.len() > self.max_stored {
            let evicted = list.remove(0);
            tracing::debug!(
                identity = %identity_id,
                modality = %modality,
                evicted = %evicted.id(),
                "evicted oldest stored embedding"
            );
            tasks.push(PersistenceTask::DeleteEmbedding {
                embedding_id: evicted.id(),
                identity: identity_id,
                modality,
            });
        }
        tasks.push(insert);
        tasks
    }

    /// Iterate all known identities.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    /// Look up one identity.
    pub fn identity(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.get(&id)
    }

    /// Number of stored embeddings for `identity × modality`.
    pub fn count(&self, id: IdentityId, modality: Modality) -> usize {
        self.identities
            .get(&id)
            .map(|i| i.embeddings(modality).len())
            .unwrap_or(0)
    }

    /// Number of known identities.
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    /// Retention cap per identity and modality.
    pub fn max_stored(&self) -> usize {
        self.max_stored
    }
}
