//! Fixed-window cooldown per (operation, subject) pair. In-memory only;
//! state does not survive restarts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { remaining: Duration },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Enforces a minimum interval between attempts of the same operation on the
/// same subject (e.g. one sync per device per cooldown window).
pub struct RateLimiter {
    cooldown: Duration,
    attempts: Mutex<HashMap<(String, String), Instant>>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Check without recording. Attempts are recorded only when the guarded
    /// operation actually proceeds, so rejected calls never extend the window.
    pub fn check(&self, operation: &str, subject: &str) -> RateDecision {
        self.check_at(operation, subject, Instant::now())
    }

    /// Record that the guarded operation proceeded now.
    pub fn record(&self, operation: &str, subject: &str) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
        attempts.insert((operation.to_string(), subject.to_string()), Instant::now());
    }

    fn check_at(&self, operation: &str, subject: &str, now: Instant) -> RateDecision {
        let attempts = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
        let key = (operation.to_string(), subject.to_string());
        match attempts.get(&key) {
            Some(&last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed >= self.cooldown {
                    RateDecision::Allowed
                } else {
                    RateDecision::Limited {
                        remaining: self.cooldown - elapsed,
                    }
                }
            }
            None => RateDecision::Allowed,
        }
    }
}
