//! Append-only tabular ledger.
//!
//! The ledger is the authoritative record: one header line followed by one
//! comma-separated line per committed decision, appended and flushed before
//! the relational store is touched. `append` returns the file offset the
//! line went in at; `rollback_entry` truncates that line again, but only
//! while it is still the tail. Once another commit has appended past it the
//! rollback is refused, so a failing commit can never truncate a line that
//! belongs to someone else.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use attendance_engine::decision::AttendanceDecision;

use crate::error::StoreError;

pub const LEDGER_HEADER: &str =
    "subject_id,outcome,reason,session_window,timestamp,latitude,longitude";

struct LedgerInner {
    file: File,
    /// Offset the most recent append started at, while it is still
    /// eligible for rollback.
    last_entry_offset: Option<u64>,
}

/// File-backed append-only decision ledger.
pub struct TabularLedger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

impl TabularLedger {
    /// Opens (or creates) the ledger file, writing the header if the file
    /// is empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        if file.metadata()?.len() == 0 {
            writeln!(file, "{LEDGER_HEADER}")?;
            file.flush()?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(LedgerInner {
                file,
                last_entry_offset: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one decision line, flushes it to disk and returns the offset
    /// it was written at. The offset is the handle for `rollback_entry`.
    pub fn append(&self, decision: &AttendanceDecision) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();

        let offset = inner.file.seek(SeekFrom::End(0))?;
        writeln!(inner.file, "{}", decision_line(decision))?;
        inner.file.flush()?;
        inner.last_entry_offset = Some(offset);
        Ok(offset)
    }

    /// Truncates the entry appended at `offset`, provided it is still the
    /// tail of the file. Returns `false` without touching the file when a
    /// later append has moved the tail past it.
    pub fn rollback_entry(&self, offset: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.last_entry_offset != Some(offset) {
            return Ok(false);
        }
        inner.file.set_len(offset)?;
        inner.file.seek(SeekFrom::End(0))?;
        inner.last_entry_offset = None;
        Ok(true)
    }

    /// Every data line currently in the ledger (header excluded).
    pub fn lines(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let reader = BufReader::new(File::open(&self.path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line == LEDGER_HEADER || line.is_empty() {
                continue;
            }
            out.push(line);
        }
        drop(inner);
        Ok(out)
    }

    /// Whether a line for (subject, window) already exists. Matches by
    /// column, not substring: a window named like an outcome never
    /// false-positives.
    pub fn contains(&self, subject_id: &str, window: &str) -> Result<bool, StoreError> {
        Ok(self.lines()?.iter().any(|line| {
            let fields = split_line(line);
            fields.first().map(String::as_str) == Some(subject_id)
                && fields.get(3).map(String::as_str) == Some(window)
        }))
    }

    pub fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.lines()?.len())
    }
}

fn decision_line(decision: &AttendanceDecision) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        quote_field(decision.subject_id.as_str()),
        decision.outcome.as_str(),
        decision.reason.as_str(),
        quote_field(&decision.session_window),
        decision.timestamp.to_rfc3339(),
        decision.coordinate.latitude,
        decision.coordinate.longitude,
    )
}

/// Quotes a free-text field when it would otherwise break the line format.
fn quote_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Splits one ledger line into fields, honoring quoted fields.
fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if field.is_empty() => quoted = true,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_engine::decision::{Outcome, ReasonCode};
    use attendance_engine::observation::{Coordinate, SubjectId};
    use chrono::{TimeZone, Utc};

    fn decision(subject: &str, window: &str) -> AttendanceDecision {
        AttendanceDecision {
            subject_id: SubjectId::from(subject),
            outcome: Outcome::Present,
            reason: ReasonCode::Confirmed,
            session_window: window.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap(),
            coordinate: Coordinate::new(40.4168, -3.7038),
        }
    }

    fn ledger_in(dir: &tempfile::TempDir) -> TabularLedger {
        TabularLedger::open(dir.path().join("attendance.csv")).unwrap()
    }

    #[test]
    fn open_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");

        {
            let ledger = TabularLedger::open(&path).unwrap();
            ledger.append(&decision("S1", "2025-03-01")).unwrap();
        }
        // Reopening never duplicates the header.
        let _ = TabularLedger::open(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches(LEDGER_HEADER).count(), 1);
    }

    #[test]
    fn append_records_one_line_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        ledger.append(&decision("S1", "2025-03-01")).unwrap();
        ledger.append(&decision("S2", "2025-03-01")).unwrap();

        let lines = ledger.lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("S1,Present,Confirmed,2025-03-01,"));
        assert!(ledger.contains("S1", "2025-03-01").unwrap());
        assert!(!ledger.contains("S1", "2025-03-02").unwrap());
    }

    #[test]
    fn rollback_removes_the_entry_at_its_offset() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        ledger.append(&decision("S1", "2025-03-01")).unwrap();
        let offset = ledger.append(&decision("S2", "2025-03-01")).unwrap();

        assert!(ledger.rollback_entry(offset).unwrap());
        assert_eq!(ledger.lines().unwrap().len(), 1);
        assert!(ledger.contains("S1", "2025-03-01").unwrap());

        // The slot was consumed; a second rollback does nothing.
        assert!(!ledger.rollback_entry(offset).unwrap());
        assert_eq!(ledger.lines().unwrap().len(), 1);
    }

    #[test]
    fn rollback_is_refused_once_the_tail_has_moved() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        let first = ledger.append(&decision("S1", "2025-03-01")).unwrap();
        ledger.append(&decision("S2", "2025-03-01")).unwrap();

        // S2's line landed after S1's; truncating at S1's offset would take
        // S2's line with it, so the rollback must refuse.
        assert!(!ledger.rollback_entry(first).unwrap());
        assert_eq!(ledger.lines().unwrap().len(), 2);
        assert!(ledger.contains("S2", "2025-03-01").unwrap());
    }

    #[test]
    fn append_after_rollback_reuses_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        let offset = ledger.append(&decision("S1", "2025-03-01")).unwrap();
        ledger.rollback_entry(offset).unwrap();
        ledger.append(&decision("S2", "2025-03-01")).unwrap();

        let lines = ledger.lines().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("S2,"));
    }

    #[test]
    fn existing_ledger_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");

        {
            let ledger = TabularLedger::open(&path).unwrap();
            ledger.append(&decision("S1", "2025-03-01")).unwrap();
        }
        let ledger = TabularLedger::open(&path).unwrap();
        ledger.append(&decision("S2", "2025-03-02")).unwrap();

        assert_eq!(ledger.entry_count().unwrap(), 2);
    }

    #[test]
    fn contains_matches_whole_columns_not_substrings() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        ledger.append(&decision("S1", "2025-03-01")).unwrap();

        // "Present" sits in the outcome column; a window by that name must
        // not match it.
        assert!(!ledger.contains("S1", "Present").unwrap());
        // Nor does a prefix of the real subject id count.
        assert!(!ledger.contains("S", "2025-03-01").unwrap());
    }

    #[test]
    fn comma_bearing_fields_survive_the_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        ledger.append(&decision("Doe, Jane", "2025-03-01")).unwrap();

        assert_eq!(ledger.entry_count().unwrap(), 1);
        assert!(ledger.contains("Doe, Jane", "2025-03-01").unwrap());
        assert!(!ledger.contains("Doe", "2025-03-01").unwrap());
    }
}
