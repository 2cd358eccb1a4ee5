//! Rolling crash counters.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of folding one fault into the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashAssessment {
    /// Crashes in the current window, this one included.
    pub crash_count: u32,
    /// Times this signature has been seen, this one included.
    pub recurrence: u32,
    /// The window count is at or above the warning threshold.
    pub elevated: bool,
    /// The signature count is at or above the warning threshold.
    pub recurring: bool,
}

/// Time-windowed crash counter plus per-signature recurrence counter.
///
/// The window is anchored at the previous crash: a crash more than
/// `window` after the last one restarts the count at 1.
#[derive(Debug)]
pub struct CrashMetrics {
    window: Duration,
    warning_threshold: u32,
    restart_threshold: u32,
    crash_count: u32,
    last_crash: Option<Instant>,
    patterns: HashMap<String, u32>,
}

impl CrashMetrics {
    pub fn new(window: Duration, warning_threshold: u32, restart_threshold: u32) -> Self {
        Self {
            window,
            warning_threshold,
            restart_threshold,
            crash_count: 0,
            last_crash: None,
            patterns: HashMap::new(),
        }
    }

    pub fn record(&mut self, signature: &str, now: Instant) -> CrashAssessment {
        let expired = self
            .last_crash
            .is_none_or(|last| now.saturating_duration_since(last) > self.window);
        self.crash_count = if expired { 1 } else { self.crash_count + 1 };
        self.last_crash = Some(now);

        let recurrence = self.patterns.entry(signature.to_string()).or_insert(0);
        *recurrence += 1;

        CrashAssessment {
            crash_count: self.crash_count,
            recurrence: *recurrence,
            elevated: self.crash_count >= self.warning_threshold,
            recurring: *recurrence >= self.warning_threshold,
        }
    }

    /// Whether the window count has reached the restart threshold.
    pub fn restart_due(&self) -> bool {
        self.crash_count >= self.restart_threshold
    }

    pub fn crash_count(&self) -> u32 {
        self.crash_count
    }

    pub fn recurrence(&self, signature: &str) -> u32 {
        self.patterns.get(signature).copied().unwrap_or(0)
    }
}
