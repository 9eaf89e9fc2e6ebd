//! In-memory vector matching: cosine similarity scoring and the bounded
//! per-identity reference store.

pub mod similarity;
pub mod store;

pub use similarity::{cosine_similarity, SimilarityMatch, SimilarityService};
pub use store::{EmbeddingStore, StoredEmbedding};
