//! Gait recognition support: silhouette extraction and per-track sequence
//! accumulation.

pub mod buffer;
pub mod silhouette;

pub use buffer::GaitBufferManager;
pub use silhouette::{Silhouette, SILHOUETTE_SIZE};
