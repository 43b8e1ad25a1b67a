//! SQLite-backed relational store.
//!
//! Holds the queryable copy of every committed decision plus the operator
//! credential and session tables. The attendance table's composite primary
//! key (subject_id, session_window) is what makes re-commits of the same
//! decision a no-op at the storage layer.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use attendance_engine::decision::{AttendanceDecision, Outcome, ReasonCode};
use attendance_engine::observation::{Coordinate, SubjectId};

use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    subject_id      TEXT NOT NULL,
    outcome         TEXT NOT NULL,
    reason          TEXT NOT NULL,
    session_window  TEXT NOT NULL,
    timestamp       TEXT NOT NULL,
    latitude        REAL NOT NULL,
    longitude       REAL NOT NULL,
    PRIMARY KEY (subject_id, session_window)
);

CREATE INDEX IF NOT EXISTS idx_attendance_subject_time
    ON attendance (subject_id, timestamp);

CREATE TABLE IF NOT EXISTS users (
    username        TEXT PRIMARY KEY,
    password_digest TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token           TEXT PRIMARY KEY,
    username        TEXT NOT NULL,
    issued_at       TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);
";

/// Storage locations.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "./var/data/attendance.db".to_string(),
        }
    }
}

/// Connection wrapper for the relational store.
///
/// rusqlite connections are not Sync, so the connection sits behind a
/// parking_lot mutex and every call takes the lock for its full statement.
pub struct AttendanceDb {
    db: Mutex<Connection>,
}

impl AttendanceDb {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Inserts a decision. Returns `false` when a row for the same
    /// (subject, window) already exists, leaving that row untouched.
    pub fn insert_decision(&self, decision: &AttendanceDecision) -> Result<bool, StoreError> {
        let db = self.db.lock();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO attendance
             (subject_id, outcome, reason, session_window, timestamp, latitude, longitude)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                decision.subject_id.as_str(),
                decision.outcome.as_str(),
                decision.reason.as_str(),
                decision.session_window,
                decision.timestamp.to_rfc3339(),
                decision.coordinate.latitude,
                decision.coordinate.longitude,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn has_decision(&self, subject: &SubjectId, window: &str) -> Result<bool, StoreError> {
        let db = self.db.lock();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM attendance WHERE subject_id = ?1 AND session_window = ?2",
            params![subject.as_str(), window],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Every decision on record for a subject, oldest first.
    pub fn decisions_for_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<AttendanceDecision>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT subject_id, outcome, reason, session_window, timestamp, latitude, longitude
             FROM attendance WHERE subject_id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![subject.as_str()], row_to_parts)?;
        collect_decisions(rows)
    }

    /// Every decision on record, oldest first.
    pub fn all_decisions(&self) -> Result<Vec<AttendanceDecision>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT subject_id, outcome, reason, session_window, timestamp, latitude, longitude
             FROM attendance ORDER BY timestamp",
        )?;
        let rows = stmt.query_map([], row_to_parts)?;
        collect_decisions(rows)
    }

    /// Every decision committed in one session window.
    pub fn decisions_in_window(&self, window: &str) -> Result<Vec<AttendanceDecision>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT subject_id, outcome, reason, session_window, timestamp, latitude, longitude
             FROM attendance WHERE session_window = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![window], row_to_parts)?;
        collect_decisions(rows)
    }

    /// Inserts a credential row unless the username already exists. Used to
    /// seed the default operator account on first start.
    pub fn ensure_user(&self, username: &str, password_digest: &str) -> Result<bool, StoreError> {
        let db = self.db.lock();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO users (username, password_digest) VALUES (?1, ?2)",
            params![username, password_digest],
        )?;
        Ok(inserted > 0)
    }

    /// All stored credentials as (username, digest) pairs.
    pub fn load_credentials(&self) -> Result<Vec<(String, String)>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT username, password_digest FROM users")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn record_session(&self, session: &attendance_engine::Session) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute(
            "INSERT OR REPLACE INTO sessions (token, username, issued_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.token,
                session.username,
                session.issued_at.to_rfc3339(),
                session.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, token: &str) -> Result<bool, StoreError> {
        let db = self.db.lock();
        let deleted = db.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(deleted > 0)
    }

    pub fn session_username(&self, token: &str) -> Result<Option<String>, StoreError> {
        let db = self.db.lock();
        let username = db
            .query_row(
                "SELECT username FROM sessions WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(username)
    }
}

type RowParts = (String, String, String, String, String, f64, f64);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn collect_decisions(
    rows: impl Iterator<Item = rusqlite::Result<RowParts>>,
) -> Result<Vec<AttendanceDecision>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(parts_to_decision(row?)?);
    }
    Ok(out)
}

fn parts_to_decision(parts: RowParts) -> Result<AttendanceDecision, StoreError> {
    let (subject_id, outcome, reason, session_window, timestamp, latitude, longitude) = parts;

    let outcome = Outcome::parse(&outcome)
        .ok_or_else(|| StoreError::Malformed(format!("unknown outcome '{outcome}'")))?;
    let reason = ReasonCode::parse(&reason)
        .ok_or_else(|| StoreError::Malformed(format!("unknown reason '{reason}'")))?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| StoreError::Malformed(format!("bad timestamp '{timestamp}': {e}")))?
        .with_timezone(&Utc);

    Ok(AttendanceDecision {
        subject_id: SubjectId::from(subject_id),
        outcome,
        reason,
        session_window,
        timestamp,
        coordinate: Coordinate::new(latitude, longitude),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

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

    #[test]
    fn insert_then_query_round_trips() {
        let db = AttendanceDb::open_in_memory().unwrap();
        assert!(db.insert_decision(&decision("S1", "2025-03-01")).unwrap());

        let stored = db.decisions_for_subject(&SubjectId::from("S1")).unwrap();
        assert_eq!(stored, vec![decision("S1", "2025-03-01")]);
        assert!(db.has_decision(&SubjectId::from("S1"), "2025-03-01").unwrap());
    }

    #[test]
    fn duplicate_key_is_ignored() {
        let db = AttendanceDb::open_in_memory().unwrap();
        assert!(db.insert_decision(&decision("S1", "2025-03-01")).unwrap());

        let mut dup = decision("S1", "2025-03-01");
        dup.outcome = Outcome::Rejected;
        dup.reason = ReasonCode::LivenessTimeout;
        assert!(!db.insert_decision(&dup).unwrap());

        // First write wins.
        let stored = db.decisions_for_subject(&SubjectId::from("S1")).unwrap();
        assert_eq!(stored[0].outcome, Outcome::Present);
    }

    #[test]
    fn same_subject_across_windows_gets_separate_rows() {
        let db = AttendanceDb::open_in_memory().unwrap();
        assert!(db.insert_decision(&decision("S1", "2025-03-01")).unwrap());
        assert!(db.insert_decision(&decision("S1", "2025-03-02")).unwrap());

        assert_eq!(db.decisions_for_subject(&SubjectId::from("S1")).unwrap().len(), 2);
        assert_eq!(db.decisions_in_window("2025-03-02").unwrap().len(), 1);
    }

    #[test]
    fn ensure_user_seeds_once() {
        let db = AttendanceDb::open_in_memory().unwrap();
        assert!(db.ensure_user("admin", "digest-a").unwrap());
        assert!(!db.ensure_user("admin", "digest-b").unwrap());

        let creds = db.load_credentials().unwrap();
        assert_eq!(creds, vec![("admin".to_string(), "digest-a".to_string())]);
    }

    #[test]
    fn sessions_round_trip_and_delete() {
        let db = AttendanceDb::open_in_memory().unwrap();
        let session = attendance_engine::Session {
            token: "tok-1".to_string(),
            username: "admin".to_string(),
            issued_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
            expires_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        };

        db.record_session(&session).unwrap();
        assert_eq!(db.session_username("tok-1").unwrap(), Some("admin".to_string()));

        assert!(db.delete_session("tok-1").unwrap());
        assert_eq!(db.session_username("tok-1").unwrap(), None);
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");

        {
            let db = AttendanceDb::new(&path).unwrap();
            db.insert_decision(&decision("S1", "2025-03-01")).unwrap();
        }

        let db = AttendanceDb::new(&path).unwrap();
        assert!(db.has_decision(&SubjectId::from("S1"), "2025-03-01").unwrap());
    }
}
