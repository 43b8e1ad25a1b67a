//! # Attendance Store Library
//!
//! Dual-store persistence and pipeline wiring for the attendance decision
//! engine: an append-only tabular ledger as the authoritative record, a
//! SQLite relational store for queries, and the commit protocol that keeps
//! the two in step.

// Core modules
pub mod console;
pub mod error;
pub mod intrusion;
pub mod ledger;
pub mod pipeline;
pub mod recorder;
pub mod relational;

// Re-export commonly used types
pub use console::{ConsoleAccess, ConsoleError, DEFAULT_OPERATOR};
pub use error::StoreError;
pub use intrusion::open_intrusion_log;
pub use ledger::{TabularLedger, LEDGER_HEADER};
pub use pipeline::ProcessingPipeline;
pub use recorder::{CommitError, DualStoreRecorder, RelationalSink};
pub use relational::{AttendanceDb, StorageConfig};
