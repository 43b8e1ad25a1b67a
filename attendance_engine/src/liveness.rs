// Blink-count liveness state machine.
//
// Accumulates blink evidence per subject inside a rolling window and reports
// one of three verdicts per update:
// 1. Pending - still collecting evidence inside the current window
// 2. Passed - blink threshold reached within the window
// 3. Expired - window ran out before the threshold was reached
//
// Unknown subjects are initialized implicitly on first call. Within a window
// the blink count only grows; it resets atomically with the window.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::observation::SubjectId;

/// Verdict for a single liveness update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivenessStatus {
    /// Still collecting blink evidence.
    Pending,
    /// Threshold reached inside the window.
    Passed,
    /// Window elapsed without reaching the threshold; state was reset.
    Expired,
}

/// Configuration for the liveness evidence window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Length of the evidence window in seconds.
    pub window_secs: i64,

    /// Blinks required inside one window before liveness passes.
    pub blink_threshold: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window_secs: 10,
            blink_threshold: 3,
        }
    }
}

/// Per-subject window state.
#[derive(Debug, Clone)]
struct BlinkWindow {
    window_start: DateTime<Utc>,
    count: u32,
    passed: bool,
}

impl BlinkWindow {
    fn open(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
            passed: false,
        }
    }
}

/// Tracks blink evidence per subject.
///
/// Not internally synchronized; the engine serializes access per its own
/// locking discipline.
#[derive(Debug)]
pub struct LivenessTracker {
    config: LivenessConfig,
    windows: HashMap<SubjectId, BlinkWindow>,
}

impl LivenessTracker {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Feeds one frame's blink flag for a subject and returns the verdict.
    ///
    /// `Passed` is sticky for the remainder of the window: later calls keep
    /// returning it without further counting.
    pub fn update(
        &mut self,
        subject: &SubjectId,
        blink_detected: bool,
        now: DateTime<Utc>,
    ) -> LivenessStatus {
        let window = Duration::seconds(self.config.window_secs);

        if let Some(state) = self.windows.get_mut(subject) {
            if now > state.window_start + window {
                if state.passed {
                    // A passed window that ran out starts a fresh one.
                    *state = BlinkWindow::open(now);
                } else {
                    self.windows.remove(subject);
                    return LivenessStatus::Expired;
                }
            }
        }

        let threshold = self.config.blink_threshold;
        let state = self
            .windows
            .entry(subject.clone())
            .or_insert_with(|| BlinkWindow::open(now));

        if state.passed {
            return LivenessStatus::Passed;
        }

        if blink_detected {
            state.count += 1;
        }

        if state.count >= threshold {
            state.passed = true;
            LivenessStatus::Passed
        } else {
            LivenessStatus::Pending
        }
    }

    /// Current blink count for a subject (0 for unknown subjects).
    pub fn blink_count(&self, subject: &SubjectId) -> u32 {
        self.windows.get(subject).map(|w| w.count).unwrap_or(0)
    }

    /// Drops the subject's window so the next update starts fresh.
    pub fn reset(&mut self, subject: &SubjectId) {
        self.windows.remove(subject);
    }

    /// Evicts every window whose deadline lies before `now`.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let window = Duration::seconds(self.config.window_secs);
        let before = self.windows.len();
        self.windows.retain(|_, w| now <= w.window_start + window);
        before - self.windows.len()
    }

    pub fn tracked_subjects(&self) -> usize {
        self.windows.len()
    }
}
