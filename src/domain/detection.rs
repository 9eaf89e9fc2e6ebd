//! Detections coming in from the object detector and the identification
//! results flowing out to downstream consumers.

use chrono::{DateTime, Utc};

use super::frame::CameraId;
use super::identity::IdentityId;

/// Axis-aligned bounding box in pixel coordinates, `x2`/`y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x1: i32,
    /// Top edge.
    pub y1: i32,
    /// Right edge (exclusive).
    pub x2: i32,
    /// Bottom edge (exclusive).
    pub y2: i32,
}

impl BoundingBox {
    /// Build a box from corner coordinates.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box width; zero or negative for degenerate boxes.
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    /// Box height; zero or negative for degenerate boxes.
    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Clamp to a `frame_w`×`frame_h` frame.
    ///
    /// Returns `(x1, y1, x2, y2)` as unsigned coordinates, or `None` when
    /// the intersection with the frame is empty.
    pub fn clamped(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.clamp(0, frame_w as i32) as u32;
        let y1 = self.y1.clamp(0, frame_h as i32) as u32;
        let x2 = self.x2.clamp(0, frame_w as i32) as u32;
        let y2 = self.y2.clamp(0, frame_h as i32) as u32;
        if x2 > x1 && y2 > y1 {
            Some((x1, y1, x2, y2))
        } else {
            None
        }
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{} {}x{}]", self.x1, self.y1, self.width(), self.height())
    }
}

/// Object class reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ObjectClass {
    /// A person; the only class the identification chain runs on.
    Person,
    /// Anything else the detector reports.
    Other,
}

/// One detected object in a frame, with the detector's per-camera track id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PersonBox {
    /// Detected region.
    pub bbox: BoundingBox,
    /// Per-camera track id; stable across consecutive frames for the same
    /// physical subject on the same camera.
    pub track_id: u64,
    /// Detector confidence, [0, 1].
    pub confidence: f32,
    /// Detected class.
    pub class: ObjectClass,
}

/// Composite track key: `(camera, track_id)`.
///
/// Per-camera track ids collide across cameras, so every per-track structure
/// in the core is keyed by this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TrackKey {
    /// Originating camera.
    pub camera: CameraId,
    /// Detector track id on that camera.
    pub track_id: u64,
}

impl TrackKey {
    /// Build a key.
    pub fn new(camera: CameraId, track_id: u64) -> Self {
        Self { camera, track_id }
    }
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.camera, self.track_id)
    }
}

/// Which stage of the fallback chain resolved the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MatchMethod {
    /// Face recognition.
    Face,
    /// Body-appearance re-identification.
    Reid,
    /// Gait recognition.
    Gait,
    /// No stage matched.
    Unknown,
}

impl MatchMethod {
    /// Lowercase name used in logs and event rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Face => "face",
            MatchMethod::Reid => "reid",
            MatchMethod::Gait => "gait",
            MatchMethod::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the identification chain for one person box on one frame.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IdentificationResult {
    /// Track this result belongs to.
    pub track: TrackKey,
    /// Matched identity, if any.
    pub identity: Option<IdentityId>,
    /// Display label; `"Unknown"` when no stage matched.
    pub label: String,
    /// Stage that produced the match.
    pub method: MatchMethod,
    /// Match confidence, [0, 1]; 0 for unknown.
    pub confidence: f32,
    /// Person bounding box in the frame.
    pub bbox: BoundingBox,
    /// Frame acquisition timestamp.
    pub timestamp: DateTime<Utc>,
}

impl IdentificationResult {
    /// Result for a resolved identity.
    ///
    /// The label depends on the resolving method: a bare name for face, the
    /// name suffixed with the method for the body and gait fallbacks (gait
    /// includes the rounded confidence percentage).
    pub fn known(
        track: TrackKey,
        identity: IdentityId,
        name: &str,
        method: MatchMethod,
        confidence: f32,
        bbox: BoundingBox,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let label = match method {
            MatchMethod::Face => name.to_string(),
            MatchMethod::Reid => format!("{} (Re-ID)", name),
            MatchMethod::Gait => {
                format!("{} (Gait: {}%)", name, (confidence * 100.0).round() as u32)
            }
            MatchMethod::Unknown => "Unknown".to_string(),
        };
        Self {
            track,
            identity: Some(identity),
            label,
            method,
            confidence,
            bbox,
            timestamp,
        }
    }

    /// Result for an unresolved detection; retried on the next frame.
    pub fn unknown(track: TrackKey, bbox: BoundingBox, timestamp: DateTime<Utc>) -> Self {
        Self {
            track,
            identity: None,
            label: "Unknown".to_string(),
            method: MatchMethod::Unknown,
            confidence: 0.0,
            bbox,
            timestamp,
        }
    }

    /// True when some stage resolved the identity.
    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }
}
