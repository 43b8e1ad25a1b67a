// Append-only security event trail shared by the access gate and the
// decision engine.
//
// Events are never mutated or deleted. The log keeps a bounded in-memory
// tail for inspection and can stream each event as a text line to an
// injected writer (the store crate supplies the file-backed variant).
// Appends are serialized behind a mutex so both producers can share one
// instance.

use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a security-relevant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    LoginFailure,
    LoginSuccess,
    /// Escalation: attempts rejected while a username is locked out.
    Lockout,
    GeofenceViolation,
    LivenessTimeout,
    IdentityNotConfirmed,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::LoginFailure => "LoginFailure",
            SecurityEventType::LoginSuccess => "LoginSuccess",
            SecurityEventType::Lockout => "Lockout",
            SecurityEventType::GeofenceViolation => "GeofenceViolation",
            SecurityEventType::LivenessTimeout => "LivenessTimeout",
            SecurityEventType::IdentityNotConfirmed => "IdentityNotConfirmed",
        }
    }
}

/// A single append-only security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    /// Acting identity, or "unknown" when none was established.
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        actor: impl Into<String>,
        timestamp: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            actor: actor.into(),
            timestamp,
            detail: detail.into(),
        }
    }

    /// Line form persisted by file-backed sinks:
    /// `timestamp,event_type,actor,detail`.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{}",
            self.timestamp.to_rfc3339(),
            self.event_type.as_str(),
            self.actor,
            self.detail
        )
    }
}

struct LogInner {
    recent: Vec<SecurityEvent>,
    max_in_memory: usize,
    sink: Option<Box<dyn Write + Send>>,
}

/// Append-only intrusion log.
pub struct SecurityLog {
    inner: Mutex<LogInner>,
}

impl SecurityLog {
    pub const DEFAULT_MAX_IN_MEMORY: usize = 1024;

    /// Log with no external sink; events live only in the bounded tail.
    pub fn in_memory() -> Self {
        Self::build(None, Self::DEFAULT_MAX_IN_MEMORY)
    }

    /// Log streaming each event as one line to `sink`.
    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self::build(Some(sink), Self::DEFAULT_MAX_IN_MEMORY)
    }

    fn build(sink: Option<Box<dyn Write + Send>>, max_in_memory: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                recent: Vec::new(),
                max_in_memory,
                sink,
            }),
        }
    }

    /// Appends one event. A failed sink write must not take the attendance
    /// path down, so sink errors are swallowed here.
    pub fn append(&self, event: SecurityEvent) {
        let mut inner = self.inner.lock().unwrap();

        if let Some(sink) = inner.sink.as_mut() {
            let _ = writeln!(sink, "{}", event.to_line());
            let _ = sink.flush();
        }

        inner.recent.push(event);
        if inner.recent.len() > inner.max_in_memory {
            let excess = inner.recent.len() - inner.max_in_memory;
            inner.recent.drain(0..excess);
        }
    }

    /// Snapshot of the in-memory tail, oldest first.
    pub fn recent(&self) -> Vec<SecurityEvent> {
        self.inner.lock().unwrap().recent.clone()
    }

    pub fn count_of(&self, event_type: SecurityEventType) -> usize {
        self.inner
            .lock()
            .unwrap()
            .recent
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}
