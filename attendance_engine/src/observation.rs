// Core observation types consumed by the decision engine.
//
// The identity matcher is an external collaborator: it hands the engine a
// subject identifier and a confidence score per frame, together with the
// blink flag and location reading for that frame. This module defines the
// identifier newtype and the per-frame observation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an enrolled subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    /// Creates a new SubjectId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        SubjectId(id.into())
    }

    /// Returns a reference to the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        SubjectId(s)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        SubjectId(s.to_string())
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geographic coordinate reported alongside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// An enrolled subject. Immutable after enrollment; the reference imagery
/// behind `enrollment_ref` is owned by the external matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub display_name: String,
    /// Opaque handle into the matcher's enrollment store.
    pub enrollment_ref: String,
}

impl Subject {
    pub fn new(
        id: impl Into<SubjectId>,
        display_name: impl Into<String>,
        enrollment_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            enrollment_ref: enrollment_ref.into(),
        }
    }
}

/// A single matched frame: identity confidence, blink flag and location.
///
/// Ephemeral: produced per frame by the external collaborators and consumed
/// immediately by the engine, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    pub subject_id: SubjectId,
    /// Identity-match confidence in [0.0, 1.0].
    pub confidence: f64,
    /// Whether a blink was detected in this frame.
    pub blink_detected: bool,
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
}
