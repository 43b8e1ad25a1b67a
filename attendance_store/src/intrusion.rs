//! File-backed intrusion log.
//!
//! The engine crate's `SecurityLog` takes any writer as its sink; this
//! module supplies the append-mode file variant used in deployments so the
//! event trail survives restarts.

use std::fs::OpenOptions;
use std::path::Path;

use attendance_engine::security_event::SecurityLog;

use crate::error::StoreError;

/// Opens (or creates) an append-only intrusion log backed by `path`.
pub fn open_intrusion_log(path: impl AsRef<Path>) -> Result<SecurityLog, StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(SecurityLog::with_sink(Box::new(file)))
}
