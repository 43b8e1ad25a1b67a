//! End-to-end observation pipeline.
//!
//! Thin wiring: each frame observation goes through the decision engine,
//! and any decision the engine settles on goes straight to the dual-store
//! recorder. The engine's own idempotence means the recorder sees each
//! (subject, window) at most once per process lifetime; the recorder's
//! pre-check covers restarts.

use log::{debug, info};

use attendance_engine::decision::AttendanceDecision;
use attendance_engine::observation::FrameObservation;
use attendance_engine::AttendanceEngine;

use crate::recorder::{CommitError, DualStoreRecorder};

/// Drives observations through decision and persistence.
pub struct ProcessingPipeline {
    engine: AttendanceEngine,
    recorder: DualStoreRecorder,
}

impl ProcessingPipeline {
    pub fn new(engine: AttendanceEngine, recorder: DualStoreRecorder) -> Self {
        Self { engine, recorder }
    }

    pub fn engine(&self) -> &AttendanceEngine {
        &self.engine
    }

    /// Feeds one observation. Returns the committed decision when this
    /// frame settled the subject, `None` while evidence is still
    /// accumulating.
    pub fn process(
        &self,
        observation: &FrameObservation,
    ) -> Result<Option<AttendanceDecision>, CommitError> {
        let Some(decision) = self.engine.decide(observation) else {
            debug!("no decision yet for {}", observation.subject_id);
            return Ok(None);
        };

        self.recorder.commit(&decision)?;
        info!("{}", decision.summary());
        Ok(Some(decision))
    }
}
