//! Dual-store commit protocol.
//!
//! Commit order is fixed: ledger first, relational second. The ledger line
//! lands and is flushed before the relational insert is attempted; the
//! relational write is retried under the configured policy, and when it
//! still fails the just-written ledger line is rolled back best-effort so
//! the two stores stay in step. Rollback is keyed by the append offset and
//! only fires while that line is still the tail; a concurrent commit that
//! appended after ours is never truncated. A refused or failed rollback
//! leaves the ledger authoritative and the divergence reported in the
//! error.

use std::sync::Arc;

use log::{error, info, warn};
use thiserror::Error;

use attendance_engine::decision::AttendanceDecision;
use attendance_engine::observation::SubjectId;
use attendance_engine::RetryPolicy;

use crate::error::StoreError;
use crate::ledger::TabularLedger;
use crate::relational::AttendanceDb;

/// Relational half of the commit, behind a trait so tests can inject
/// failures.
pub trait RelationalSink: Send + Sync {
    fn insert_decision(&self, decision: &AttendanceDecision) -> Result<bool, StoreError>;

    fn has_decision(&self, subject: &SubjectId, window: &str) -> Result<bool, StoreError>;
}

impl RelationalSink for AttendanceDb {
    fn insert_decision(&self, decision: &AttendanceDecision) -> Result<bool, StoreError> {
        AttendanceDb::insert_decision(self, decision)
    }

    fn has_decision(&self, subject: &SubjectId, window: &str) -> Result<bool, StoreError> {
        AttendanceDb::has_decision(self, subject, window)
    }
}

/// Commit failure.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The idempotence pre-check could not be evaluated; nothing was written.
    #[error("commit pre-check failed: {0}")]
    Precheck(#[source] StoreError),

    /// The ledger append failed; nothing was written.
    #[error("ledger append failed: {0}")]
    Ledger(#[source] StoreError),

    /// The ledger line landed but the relational write never did, even
    /// after retries. `rolled_back` reports whether the ledger line was
    /// successfully truncated away again.
    #[error(
        "partial write for {subject_id} in window {session_window} \
         (ledger rolled back: {rolled_back}): {source}"
    )]
    PartialWrite {
        subject_id: SubjectId,
        session_window: String,
        rolled_back: bool,
        #[source]
        source: StoreError,
    },
}

/// Commits decisions to both stores.
pub struct DualStoreRecorder {
    ledger: Arc<TabularLedger>,
    relational: Arc<dyn RelationalSink>,
    retry: RetryPolicy,
}

impl DualStoreRecorder {
    pub fn new(
        ledger: Arc<TabularLedger>,
        relational: Arc<dyn RelationalSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            relational,
            retry,
        }
    }

    /// Commits one decision. Idempotent by (subject, window): a decision
    /// already present in either store is reported as already committed and
    /// nothing is written.
    ///
    /// Returns `true` when this call performed the writes, `false` when the
    /// decision was already on record.
    pub fn commit(&self, decision: &AttendanceDecision) -> Result<bool, CommitError> {
        let (subject, window) = decision.commit_key();

        let in_relational = self
            .relational
            .has_decision(&subject, &window)
            .map_err(CommitError::Precheck)?;
        let in_ledger = self
            .ledger
            .contains(subject.as_str(), &window)
            .map_err(CommitError::Precheck)?;

        if in_relational && in_ledger {
            info!("decision already committed: {}", decision.summary());
            return Ok(false);
        }

        // Ledger first. A half-committed key (crash between the two writes
        // on a previous run) is healed by skipping the half that exists.
        // The returned offset is this commit's rollback handle.
        let appended = if in_ledger {
            None
        } else {
            Some(self.ledger.append(decision).map_err(CommitError::Ledger)?)
        };

        let insert = self.retry.run(|| self.relational.insert_decision(decision));
        match insert {
            Ok(_) => {
                info!("committed decision: {}", decision.summary());
                Ok(true)
            }
            Err(source) => {
                warn!(
                    "relational insert failed after {} attempts for {}",
                    self.retry.max_attempts(),
                    decision.summary()
                );
                let rolled_back = match appended {
                    // Pre-existing line is not ours to truncate.
                    None => false,
                    Some(offset) => match self.ledger.rollback_entry(offset) {
                        Ok(done) => {
                            if !done {
                                warn!(
                                    "ledger tail moved past {}; line left for a later re-commit",
                                    decision.summary()
                                );
                            }
                            done
                        }
                        Err(e) => {
                            error!("ledger rollback failed, stores diverged: {e}");
                            false
                        }
                    },
                };
                Err(CommitError::PartialWrite {
                    subject_id: subject,
                    session_window: window,
                    rolled_back,
                    source,
                })
            }
        }
    }
}
