//! Store-backed operator access.
//!
//! Composes the access gate with the relational store: seeds the default
//! operator credential on first start, loads every stored credential into
//! the gate, and keeps the sessions table in step with logins and logouts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;
use thiserror::Error;

use attendance_engine::access_gate::{hash_password, AccessGate, AuthError, GateConfig, Session};
use attendance_engine::security_event::SecurityLog;

use crate::error::StoreError;
use crate::relational::AttendanceDb;

pub const DEFAULT_OPERATOR: &str = "admin";
pub const DEFAULT_OPERATOR_PASSWORD: &str = "admin";

/// Console operation failure: the credential check itself, or the store
/// write around it.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Operator access gate wired to the relational store.
pub struct ConsoleAccess {
    gate: AccessGate,
    db: Arc<AttendanceDb>,
}

impl ConsoleAccess {
    /// Seeds the default operator credential if absent, then loads every
    /// stored credential into the gate.
    pub fn open(
        config: GateConfig,
        db: Arc<AttendanceDb>,
        log: Arc<SecurityLog>,
    ) -> Result<Self, StoreError> {
        if db.ensure_user(DEFAULT_OPERATOR, &hash_password(DEFAULT_OPERATOR_PASSWORD))? {
            info!("seeded default operator credential");
        }

        let gate = AccessGate::new(config, log);
        for (username, digest) in db.load_credentials()? {
            gate.register_user_digest(username, digest);
        }
        Ok(Self { gate, db })
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Verifies credentials and persists the issued session. A session that
    /// the store refuses to record is not issued.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, ConsoleError> {
        let session = self.gate.login(username, password, now)?;
        if let Err(e) = self.db.record_session(&session) {
            self.gate.logout(&session.token);
            return Err(e.into());
        }
        Ok(session)
    }

    /// Invalidates a token in both the gate and the sessions table.
    pub fn logout(&self, token: &str) -> Result<(), StoreError> {
        self.gate.logout(token);
        self.db.delete_session(token)?;
        Ok(())
    }

    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        self.gate.validate(token, now)
    }

    /// Registers and persists a new operator credential. Returns `false`
    /// when the username is already taken, leaving the stored one in place.
    pub fn add_operator(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let digest = hash_password(password);
        let inserted = self.db.ensure_user(username, &digest)?;
        if inserted {
            self.gate.register_user_digest(username, digest);
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn console() -> (ConsoleAccess, Arc<AttendanceDb>) {
        let db = Arc::new(AttendanceDb::open_in_memory().unwrap());
        let log = Arc::new(SecurityLog::in_memory());
        let console = ConsoleAccess::open(GateConfig::default(), Arc::clone(&db), log).unwrap();
        (console, db)
    }

    #[test]
    fn default_operator_is_seeded_once() {
        let (console, db) = console();

        let session = console
            .login(DEFAULT_OPERATOR, DEFAULT_OPERATOR_PASSWORD, at(0))
            .unwrap();
        assert_eq!(session.username, DEFAULT_OPERATOR);

        // A second open over the same store must not overwrite the row.
        let log = Arc::new(SecurityLog::in_memory());
        let _ = ConsoleAccess::open(GateConfig::default(), Arc::clone(&db), log).unwrap();
        assert_eq!(db.load_credentials().unwrap().len(), 1);
    }

    #[test]
    fn login_persists_the_session_row() {
        let (console, db) = console();

        let session = console.login("admin", "admin", at(0)).unwrap();
        assert_eq!(
            db.session_username(&session.token).unwrap(),
            Some("admin".to_string())
        );
    }

    #[test]
    fn failed_login_leaves_no_session_row() {
        let (console, db) = console();

        let err = console.login("admin", "wrong", at(0)).unwrap_err();
        assert!(matches!(err, ConsoleError::Auth(AuthError::InvalidCredentials)));
        assert_eq!(db.load_credentials().unwrap().len(), 1);
        assert_eq!(db.session_username("").unwrap(), None);
    }

    #[test]
    fn logout_clears_gate_and_table() {
        let (console, db) = console();

        let session = console.login("admin", "admin", at(0)).unwrap();
        console.logout(&session.token).unwrap();

        assert!(console.validate(&session.token, at(1)).is_none());
        assert_eq!(db.session_username(&session.token).unwrap(), None);
    }

    #[test]
    fn added_operators_survive_a_reopen() {
        let (console, db) = console();
        assert!(console.add_operator("ops", "s3cret").unwrap());
        assert!(!console.add_operator("ops", "other").unwrap());
        assert!(console.login("ops", "s3cret", at(0)).is_ok());

        let log = Arc::new(SecurityLog::in_memory());
        let reopened = ConsoleAccess::open(GateConfig::default(), db, log).unwrap();
        assert!(reopened.login("ops", "s3cret", at(10)).is_ok());
    }
}
