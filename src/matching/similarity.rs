//! Cosine-similarity scoring over stored reference embeddings.
//!
//! Per identity the score is the **maximum** similarity over that identity's
//! stored samples, not the mean: one strong historical sample is enough to
//! re-identify, which maximizes recall per sample. All legacy distance-based
//! matchers are adapted to [0, 1] similarities at the encoder boundary, so a
//! single threshold convention holds across modalities.

use super::store::EmbeddingStore;
use crate::domain::{EmbeddingId, IdentityId, Modality};

/// Cosine similarity between two vectors, clamped to [0, 1].
///
/// Symmetric in its arguments. Mismatched lengths or zero-norm inputs score
/// 0 rather than erroring; a degenerate vector can never produce a match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

/// Best-matching identity for a query vector.
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    /// Matched identity.
    pub identity: IdentityId,
    /// Matched identity's display name.
    pub name: String,
    /// Similarity of the best-scoring stored sample, [0, 1].
    pub score: f32,
    /// Row id of the best-scoring stored sample.
    pub embedding_id: EmbeddingId,
}

/// Vector comparison utility shared by all three matching stages.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimilarityService;

impl SimilarityService {
    /// Create the service.
    pub fn new() -> Self {
        Self
    }

    /// Maximum cosine similarity between `query` and any candidate.
    ///
    /// Returns 0 for an empty candidate set.
    pub fn score<'a>(
        &self,
        query: &[f32],
        candidates: impl IntoIterator<Item = &'a [f32]>,
    ) -> f32 {
        candidates
            .into_iter()
            .map(|c| cosine_similarity(query, c))
            .fold(0.0, f32::max)
    }

    /// Find the best-matching identity for `query` among the stored
    /// embeddings of `modality`.
    ///
    /// Per identity the score is the max over its stored samples; the
    /// globally best identity is returned iff its score reaches `threshold`.
    /// Score ties break toward the identity whose best-scoring sample was
    /// captured most recently.
    pub fn best_match(
        &self,
        query: &[f32],
        store: &EmbeddingStore,
        modality: Modality,
        threshold: f32,
    ) -> Option<SimilarityMatch> {
        let mut best: Option<(SimilarityMatch, chrono::DateTime<chrono::Utc>)> = None;

        for identity in store.identities() {
            for embedding in identity.embeddings(modality) {
                let score = cosine_similarity(query, embedding.vector());
                let candidate_wins = match &best {
                    None => true,
                    Some((current, captured_at)) => {
                        score > current.score
                            || (score == current.score && embedding.captured_at() > *captured_at)
                    }
                };
                if candidate_wins {
                    best = Some((
                        SimilarityMatch {
                            identity: identity.id(),
                            name: identity.name().to_string(),
                            score,
                            embedding_id: embedding.id(),
                        },
                        embedding.captured_at(),
                    ));
                }
            }
        }

        match best {
            Some((m, _)) if m.score >= threshold => Some(m),
            _ => None,
        }
    }
}
