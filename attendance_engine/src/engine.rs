// Attendance decision engine.
//
// Fuses three independent signals into one decision per (subject, session
// window):
// 1. Identity-match confidence from the external matcher
// 2. The blink-count liveness state machine
// 3. The geofence predicate for the deployment site
//
// Evaluation order per frame:
// 1. Below-threshold confidence discards the frame; too many such frames
//    reject the subject outright (IdentityNotConfirmed).
// 2. The blink flag feeds the liveness tracker; an expired window rejects
//    the subject (LivenessTimeout).
// 3. Once liveness passes, the geofence check decides between Present and
//    PresentWithWarning (OutsideGeofence / BoundaryUnconfigured). Outside
//    the fence is a warning, not a rejection: attendance still counts,
//    flagged for review.
//
// Exactly one decision is emitted per (subject, window); later frames for a
// decided subject are no-ops. Every Rejected or PresentWithWarning decision
// also appends a security event to the shared intrusion log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::decision::{AttendanceDecision, Outcome, ReasonCode};
use crate::geofence::{BoundaryRegistry, GeofenceStatus};
use crate::liveness::{LivenessConfig, LivenessStatus, LivenessTracker};
use crate::observation::{FrameObservation, SubjectId};
use crate::security_event::{SecurityEvent, SecurityEventType, SecurityLog};

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum identity-match confidence accepted as evidence.
    pub match_threshold: f64,

    /// Below-threshold frames tolerated before rejecting outright.
    pub max_unmatched_frames: u32,

    /// Site key whose boundary applies to this deployment.
    pub site: String,

    pub liveness: LivenessConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.6,
            max_unmatched_frames: 30,
            site: "default".to_string(),
            liveness: LivenessConfig::default(),
        }
    }
}

/// Per-subject progress toward a decision in the current window.
#[derive(Debug, Default)]
struct SubjectState {
    unmatched_frames: u32,
    decision: Option<AttendanceDecision>,
}

/// Orchestrates liveness, geofence and identity confidence into attendance
/// decisions. Methods take `&self`; per-subject state sits behind its own
/// mutex so concurrent subjects do not contend on each other.
pub struct AttendanceEngine {
    config: EngineConfig,
    boundaries: BoundaryRegistry,
    liveness: Mutex<LivenessTracker>,
    subjects: RwLock<HashMap<SubjectId, Arc<Mutex<SubjectState>>>>,
    window: RwLock<String>,
    intrusion_log: Arc<SecurityLog>,
}

impl AttendanceEngine {
    /// Creates an engine for the current UTC date as the initial window.
    pub fn new(
        config: EngineConfig,
        boundaries: BoundaryRegistry,
        intrusion_log: Arc<SecurityLog>,
    ) -> Self {
        let window = Utc::now().format("%Y-%m-%d").to_string();
        Self::with_window(config, boundaries, intrusion_log, window)
    }

    pub fn with_window(
        config: EngineConfig,
        boundaries: BoundaryRegistry,
        intrusion_log: Arc<SecurityLog>,
        window: impl Into<String>,
    ) -> Self {
        let liveness = LivenessTracker::new(config.liveness.clone());
        Self {
            config,
            boundaries,
            liveness: Mutex::new(liveness),
            subjects: RwLock::new(HashMap::new()),
            window: RwLock::new(window.into()),
            intrusion_log,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Identifier of the session window currently accepting decisions.
    pub fn current_window(&self) -> String {
        self.window.read().unwrap().clone()
    }

    /// Opens a new session window, clearing all per-subject state. Decisions
    /// from the previous window remain committed in the stores.
    pub fn begin_window(&self, id: impl Into<String>) {
        *self.window.write().unwrap() = id.into();
        self.subjects.write().unwrap().clear();
        *self.liveness.lock().unwrap() =
            LivenessTracker::new(self.config.liveness.clone());
    }

    /// The decision already emitted for a subject in the current window.
    pub fn decision_for(&self, subject: &SubjectId) -> Option<AttendanceDecision> {
        let state = {
            let map = self.subjects.read().unwrap();
            map.get(subject).cloned()
        }?;
        let state = state.lock().unwrap();
        state.decision.clone()
    }

    /// Consumes one frame observation.
    ///
    /// Returns `Some(decision)` only on the frame that settles the subject
    /// for the current window; every other frame returns `None`.
    pub fn decide(&self, observation: &FrameObservation) -> Option<AttendanceDecision> {
        let state_arc = self.subject_state(&observation.subject_id);
        let mut state = state_arc.lock().unwrap();

        // Idempotent: an already-decided subject is a no-op.
        if state.decision.is_some() {
            return None;
        }

        let window = self.current_window();

        if observation.confidence < self.config.match_threshold {
            state.unmatched_frames += 1;
            if state.unmatched_frames >= self.config.max_unmatched_frames {
                return Some(self.finalize(
                    &mut state,
                    observation,
                    Outcome::Rejected,
                    ReasonCode::IdentityNotConfirmed,
                    window,
                ));
            }
            // Insufficient evidence: frame discarded, no record yet.
            return None;
        }

        let liveness = self.liveness.lock().unwrap().update(
            &observation.subject_id,
            observation.blink_detected,
            observation.timestamp,
        );

        match liveness {
            LivenessStatus::Pending => None,
            LivenessStatus::Expired => Some(self.finalize(
                &mut state,
                observation,
                Outcome::Rejected,
                ReasonCode::LivenessTimeout,
                window,
            )),
            LivenessStatus::Passed => {
                let (outcome, reason) = match self
                    .boundaries
                    .check(&observation.coordinate, &self.config.site)
                {
                    GeofenceStatus::Inside => (Outcome::Present, ReasonCode::Confirmed),
                    GeofenceStatus::Outside => {
                        (Outcome::PresentWithWarning, ReasonCode::OutsideGeofence)
                    }
                    GeofenceStatus::Unknown => {
                        (Outcome::PresentWithWarning, ReasonCode::BoundaryUnconfigured)
                    }
                };
                Some(self.finalize(&mut state, observation, outcome, reason, window))
            }
        }
    }

    fn subject_state(&self, subject: &SubjectId) -> Arc<Mutex<SubjectState>> {
        {
            let map = self.subjects.read().unwrap();
            if let Some(state) = map.get(subject) {
                return Arc::clone(state);
            }
        }

        let mut map = self.subjects.write().unwrap();
        Arc::clone(map.entry(subject.clone()).or_default())
    }

    fn finalize(
        &self,
        state: &mut SubjectState,
        observation: &FrameObservation,
        outcome: Outcome,
        reason: ReasonCode,
        window: String,
    ) -> AttendanceDecision {
        let decision = AttendanceDecision {
            subject_id: observation.subject_id.clone(),
            outcome,
            reason,
            session_window: window,
            timestamp: observation.timestamp,
            coordinate: observation.coordinate,
        };

        self.record_security_event(&decision);
        state.decision = Some(decision.clone());
        decision
    }

    fn record_security_event(&self, decision: &AttendanceDecision) {
        let event_type = match decision.reason {
            ReasonCode::Confirmed => None,
            ReasonCode::LivenessTimeout => Some(SecurityEventType::LivenessTimeout),
            ReasonCode::IdentityNotConfirmed => Some(SecurityEventType::IdentityNotConfirmed),
            ReasonCode::OutsideGeofence | ReasonCode::BoundaryUnconfigured => {
                Some(SecurityEventType::GeofenceViolation)
            }
        };

        if let Some(event_type) = event_type {
            self.intrusion_log.append(SecurityEvent::new(
                event_type,
                decision.subject_id.as_str(),
                decision.timestamp,
                format!(
                    "{} in window {}",
                    decision.reason.as_str(),
                    decision.session_window
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::Boundary;
    use crate::observation::Coordinate;
    use chrono::{DateTime, Duration, TimeZone};

    const SITE: &str = "room-101";

    fn center() -> Coordinate {
        Coordinate::new(40.4168, -3.7038)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn engine_with(boundaries: BoundaryRegistry, log: Arc<SecurityLog>) -> AttendanceEngine {
        let config = EngineConfig {
            site: SITE.to_string(),
            liveness: LivenessConfig {
                window_secs: 5,
                blink_threshold: 3,
            },
            max_unmatched_frames: 4,
            ..EngineConfig::default()
        };
        AttendanceEngine::with_window(config, boundaries, log, "2025-03-01")
    }

    fn inside_boundaries() -> BoundaryRegistry {
        let mut registry = BoundaryRegistry::new();
        registry.register(SITE, Boundary::new(center(), 30.0));
        registry
    }

    fn frame(subject: &str, confidence: f64, blink: bool, secs: i64) -> FrameObservation {
        FrameObservation {
            subject_id: SubjectId::from(subject),
            confidence,
            blink_detected: blink,
            coordinate: center(),
            timestamp: at(secs),
        }
    }

    #[test]
    fn three_blinks_inside_boundary_mark_present() {
        let log = Arc::new(SecurityLog::in_memory());
        let engine = engine_with(inside_boundaries(), Arc::clone(&log));

        assert_eq!(engine.decide(&frame("S1", 0.9, true, 0)), None);
        assert_eq!(engine.decide(&frame("S1", 0.9, true, 1)), None);

        let decision = engine.decide(&frame("S1", 0.9, true, 2)).unwrap();
        assert_eq!(decision.outcome, Outcome::Present);
        assert_eq!(decision.reason, ReasonCode::Confirmed);
        assert_eq!(decision.session_window, "2025-03-01");

        // A clean pass leaves no security event behind.
        assert!(log.recent().is_empty());
    }

    #[test]
    fn decided_subject_is_a_no_op() {
        let log = Arc::new(SecurityLog::in_memory());
        let engine = engine_with(inside_boundaries(), Arc::clone(&log));

        for i in 0..3 {
            engine.decide(&frame("S1", 0.9, true, i));
        }
        assert!(engine.decision_for(&SubjectId::from("S1")).is_some());

        // Re-feeding identical observations produces no new decision.
        assert_eq!(engine.decide(&frame("S1", 0.9, true, 3)), None);
        assert_eq!(engine.decide(&frame("S1", 0.9, true, 4)), None);
    }

    #[test]
    fn low_confidence_frames_are_discarded_then_rejected() {
        let log = Arc::new(SecurityLog::in_memory());
        let engine = engine_with(inside_boundaries(), Arc::clone(&log));

        assert_eq!(engine.decide(&frame("S1", 0.3, true, 0)), None);
        assert_eq!(engine.decide(&frame("S1", 0.4, true, 1)), None);
        assert_eq!(engine.decide(&frame("S1", 0.5, true, 2)), None);

        let decision = engine.decide(&frame("S1", 0.2, true, 3)).unwrap();
        assert_eq!(decision.outcome, Outcome::Rejected);
        assert_eq!(decision.reason, ReasonCode::IdentityNotConfirmed);
        assert_eq!(log.count_of(SecurityEventType::IdentityNotConfirmed), 1);
    }

    #[test]
    fn liveness_timeout_rejects_and_logs() {
        let log = Arc::new(SecurityLog::in_memory());
        let engine = engine_with(inside_boundaries(), Arc::clone(&log));

        engine.decide(&frame("S1", 0.9, true, 0));
        engine.decide(&frame("S1", 0.9, true, 1));

        // Window is 5s; the next confident frame arrives too late.
        let decision = engine.decide(&frame("S1", 0.9, true, 7)).unwrap();
        assert_eq!(decision.outcome, Outcome::Rejected);
        assert_eq!(decision.reason, ReasonCode::LivenessTimeout);
        assert_eq!(log.count_of(SecurityEventType::LivenessTimeout), 1);
    }

    #[test]
    fn outside_boundary_warns_and_logs_violation() {
        let log = Arc::new(SecurityLog::in_memory());
        let engine = engine_with(inside_boundaries(), Arc::clone(&log));

        // ~80 m east of a 30 m boundary.
        let outside = Coordinate::new(40.4168, -3.70285);
        for i in 0..3 {
            let mut obs = frame("S2", 0.9, true, i);
            obs.coordinate = outside;
            if i < 2 {
                assert_eq!(engine.decide(&obs), None);
            } else {
                let decision = engine.decide(&obs).unwrap();
                assert_eq!(decision.outcome, Outcome::PresentWithWarning);
                assert_eq!(decision.reason, ReasonCode::OutsideGeofence);
            }
        }
        assert_eq!(log.count_of(SecurityEventType::GeofenceViolation), 1);
    }

    #[test]
    fn missing_boundary_warns_as_unconfigured() {
        let log = Arc::new(SecurityLog::in_memory());
        let engine = engine_with(BoundaryRegistry::new(), Arc::clone(&log));

        for i in 0..2 {
            engine.decide(&frame("S1", 0.9, true, i));
        }
        let decision = engine.decide(&frame("S1", 0.9, true, 2)).unwrap();
        assert_eq!(decision.outcome, Outcome::PresentWithWarning);
        assert_eq!(decision.reason, ReasonCode::BoundaryUnconfigured);
        assert_eq!(log.count_of(SecurityEventType::GeofenceViolation), 1);
    }

    #[test]
    fn new_window_accepts_a_fresh_decision() {
        let log = Arc::new(SecurityLog::in_memory());
        let engine = engine_with(inside_boundaries(), Arc::clone(&log));

        for i in 0..3 {
            engine.decide(&frame("S1", 0.9, true, i));
        }
        assert!(engine.decision_for(&SubjectId::from("S1")).is_some());

        engine.begin_window("2025-03-02");
        assert_eq!(engine.current_window(), "2025-03-02");
        assert!(engine.decision_for(&SubjectId::from("S1")).is_none());

        for i in 0..2 {
            assert_eq!(engine.decide(&frame("S1", 0.9, true, 100 + i)), None);
        }
        let decision = engine.decide(&frame("S1", 0.9, true, 102)).unwrap();
        assert_eq!(decision.session_window, "2025-03-02");
    }

    #[test]
    fn subjects_do_not_interfere() {
        let log = Arc::new(SecurityLog::in_memory());
        let engine = engine_with(inside_boundaries(), Arc::clone(&log));

        engine.decide(&frame("S1", 0.9, true, 0));
        engine.decide(&frame("S2", 0.9, true, 0));
        engine.decide(&frame("S1", 0.9, true, 1));

        // S1 reaches three blinks first; S2 is still pending.
        let decision = engine.decide(&frame("S1", 0.9, true, 2)).unwrap();
        assert_eq!(decision.subject_id, SubjectId::from("S1"));
        assert!(engine.decision_for(&SubjectId::from("S2")).is_none());
    }
}
