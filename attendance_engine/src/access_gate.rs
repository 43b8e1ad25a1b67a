// Credential verification and session issuance for the operator console.
//
// Passwords are never stored: only SHA-256 hex digests are kept, compared
// in constant time against the digest of the presented password. Failed
// attempts accumulate in a rolling window; once the cap is hit the account
// locks for the remainder of the window, and the gate refuses even a
// correct password while locked. Every failure and every lockout refusal
// lands in the shared security log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::security_event::{SecurityEvent, SecurityEventType, SecurityLog};

/// Authentication failure.
///
/// `InvalidCredentials` is deliberately uniform: a caller cannot tell an
/// unknown username from a wrong password.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked out")]
    LockedOut,
}

/// An issued operator session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Gate tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Failures tolerated inside one rolling window before lockout.
    pub max_failures: u32,

    /// Length of the rolling failure window in seconds.
    pub lockout_window_secs: i64,

    /// Session lifetime in seconds.
    pub session_ttl_secs: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            lockout_window_secs: 300,
            session_ttl_secs: 3600,
        }
    }
}

/// SHA-256 hex digest of a password.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

// Stand-in digest compared on the unknown-username path so that path does
// the same amount of work as a real comparison.
const DUMMY_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn digests_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Debug, Default)]
struct GateInner {
    /// username -> password digest
    users: HashMap<String, String>,
    /// username -> failure timestamps inside the rolling window
    failures: HashMap<String, Vec<DateTime<Utc>>>,
    /// token -> session
    sessions: HashMap<String, Session>,
}

/// Verifies operator credentials and issues session tokens.
pub struct AccessGate {
    config: GateConfig,
    inner: Mutex<GateInner>,
    log: Arc<SecurityLog>,
}

impl AccessGate {
    pub fn new(config: GateConfig, log: Arc<SecurityLog>) -> Self {
        Self {
            config,
            inner: Mutex::new(GateInner::default()),
            log,
        }
    }

    /// Registers a user from a plaintext password.
    pub fn register_user(&self, username: impl Into<String>, password: &str) {
        self.register_user_digest(username, hash_password(password));
    }

    /// Registers a user from an already-computed digest, as loaded from the
    /// credential store.
    pub fn register_user_digest(&self, username: impl Into<String>, digest: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(username.into(), digest.into());
    }

    /// Attempts a login at `now`.
    ///
    /// A locked account is refused before the password is even looked at,
    /// so a correct password during lockout still fails with `LockedOut`.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let mut inner = self.inner.lock().unwrap();
        let window = Duration::seconds(self.config.lockout_window_secs);

        // Counting never allocates state; only an actual failure does.
        let recent_failures = match inner.failures.get_mut(username) {
            Some(failures) => {
                failures.retain(|t| now - *t < window);
                failures.len() as u32
            }
            None => 0,
        };
        if recent_failures == 0 {
            inner.failures.remove(username);
        }

        if recent_failures >= self.config.max_failures {
            drop(inner);
            self.log.append(SecurityEvent::new(
                SecurityEventType::Lockout,
                username,
                now,
                "login refused during lockout",
            ));
            return Err(AuthError::LockedOut);
        }

        let presented = hash_password(password);
        let stored = inner.users.get(username).cloned();
        let ok = match &stored {
            Some(digest) => digests_match(digest, &presented),
            None => {
                // Burn a comparison anyway.
                digests_match(DUMMY_DIGEST, &presented);
                false
            }
        };

        if !ok {
            inner
                .failures
                .entry(username.to_string())
                .or_default()
                .push(now);
            drop(inner);
            self.log.append(SecurityEvent::new(
                SecurityEventType::LoginFailure,
                username,
                now,
                "invalid credentials",
            ));
            return Err(AuthError::InvalidCredentials);
        }

        inner.failures.remove(username);

        let session = Session {
            token: new_token(),
            username: username.to_string(),
            issued_at: now,
            expires_at: now + Duration::seconds(self.config.session_ttl_secs),
        };
        inner
            .sessions
            .insert(session.token.clone(), session.clone());
        drop(inner);

        self.log.append(SecurityEvent::new(
            SecurityEventType::LoginSuccess,
            username,
            now,
            "session issued",
        ));
        Ok(session)
    }

    /// Resolves a token to its session if it exists and has not expired.
    /// Expired tokens are evicted on sight.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get(token) {
            Some(session) if !session.is_expired(now) => Some(session.clone()),
            Some(_) => {
                inner.sessions.remove(token);
                None
            }
            None => None,
        }
    }

    /// Invalidates a token. Unknown tokens are a no-op.
    pub fn logout(&self, token: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.remove(token);
    }

    /// Evicts every expired session plus all failure history with no
    /// timestamp left inside the rolling window. Returns how many sessions
    /// were dropped.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let window = Duration::seconds(self.config.lockout_window_secs);
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| !s.is_expired(now));
        inner.failures.retain(|_, f| f.iter().any(|t| now - *t < window));
        before - inner.sessions.len()
    }

    /// Failures currently on record for a username inside the window.
    pub fn failure_count(&self, username: &str, now: DateTime<Utc>) -> u32 {
        let inner = self.inner.lock().unwrap();
        let window = Duration::seconds(self.config.lockout_window_secs);
        inner
            .failures
            .get(username)
            .map(|f| f.iter().filter(|t| now - **t < window).count() as u32)
            .unwrap_or(0)
    }
}

fn new_token() -> String {
    let mut extra = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut extra);
    let mut token = Uuid::new_v4().simple().to_string();
    for byte in extra {
        token.push_str(&format!("{:02x}", byte));
    }
    token
}
