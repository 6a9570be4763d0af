use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_COOLDOWN_SECS: u64 = 5;

/// Per-region report gate.
///
/// A report for a region may be attempted only when no attempt was made for
/// that region within the last `cooldown`. Suppressed reports are dropped.
#[derive(Clone, Debug)]
pub struct ReportThrottle {
    cooldown: Duration,
    last_sent: HashMap<u32, DateTime<Utc>>,
}

impl ReportThrottle {
    pub fn new(cooldown: std::time::Duration) -> Self {
        let cooldown = Duration::from_std(cooldown).unwrap_or(Duration::MAX);
        Self {
            cooldown,
            last_sent: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Returns true and records `now` when the region's window is open.
    pub fn try_acquire(&mut self, seat_number: u32, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_sent.get(&seat_number) {
            if now.signed_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        self.last_sent.insert(seat_number, now);
        true
    }

    pub fn last_sent(&self, seat_number: u32) -> Option<DateTime<Utc>> {
        self.last_sent.get(&seat_number).copied()
    }
}

impl Default for ReportThrottle {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(DEFAULT_COOLDOWN_SECS))
    }
}
