//! The frame-processing pipeline: motion gating, quality gating, the
//! face/body/gait fallback chain, and passive enrollment.

pub mod enrollment;
pub mod face_quality;
pub mod identification;
pub mod motion;

pub use enrollment::PassiveEnrollmentController;
pub use face_quality::FaceQualityGate;
pub use identification::{IdentificationPipeline, TrackStatus};
pub use motion::MotionGate;
