// Attendance decision records.
//
// The engine emits exactly one AttendanceDecision per (subject, session
// window). The record is immutable once created and is the sole input to
// the dual-store recorder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observation::{Coordinate, SubjectId};

/// Final outcome of one observation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Identity, liveness and location all checked out.
    Present,
    /// Attendance still counts, flagged for review.
    PresentWithWarning,
    /// Evidence never reached a passing state.
    Rejected,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Present => "Present",
            Outcome::PresentWithWarning => "PresentWithWarning",
            Outcome::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Present" => Some(Outcome::Present),
            "PresentWithWarning" => Some(Outcome::PresentWithWarning),
            "Rejected" => Some(Outcome::Rejected),
            _ => None,
        }
    }
}

/// Why the outcome came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    /// Clean pass, no caveats.
    Confirmed,
    /// Too many frames below the match threshold.
    IdentityNotConfirmed,
    /// Liveness window elapsed before enough blinks.
    LivenessTimeout,
    /// Reported coordinate fell outside the registered boundary.
    OutsideGeofence,
    /// No boundary registered for the deployment site.
    BoundaryUnconfigured,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Confirmed => "Confirmed",
            ReasonCode::IdentityNotConfirmed => "IdentityNotConfirmed",
            ReasonCode::LivenessTimeout => "LivenessTimeout",
            ReasonCode::OutsideGeofence => "OutsideGeofence",
            ReasonCode::BoundaryUnconfigured => "BoundaryUnconfigured",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Confirmed" => Some(ReasonCode::Confirmed),
            "IdentityNotConfirmed" => Some(ReasonCode::IdentityNotConfirmed),
            "LivenessTimeout" => Some(ReasonCode::LivenessTimeout),
            "OutsideGeofence" => Some(ReasonCode::OutsideGeofence),
            "BoundaryUnconfigured" => Some(ReasonCode::BoundaryUnconfigured),
            _ => None,
        }
    }
}

/// One authoritative attendance record for a subject in a session window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceDecision {
    pub subject_id: SubjectId,
    pub outcome: Outcome,
    pub reason: ReasonCode,
    /// Session window this decision belongs to (one decision per key).
    pub session_window: String,
    pub timestamp: DateTime<Utc>,
    pub coordinate: Coordinate,
}

impl AttendanceDecision {
    /// Commit key guaranteeing one persisted row per (subject, window).
    pub fn commit_key(&self) -> (SubjectId, String) {
        (self.subject_id.clone(), self.session_window.clone())
    }

    /// One-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} {} ({}) in window {}",
            self.subject_id,
            self.outcome.as_str(),
            self.reason.as_str(),
            self.session_window
        )
    }
}
