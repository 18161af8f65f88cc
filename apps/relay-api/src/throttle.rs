//! Per-session emission throttle applied by the transports before an event
//! reaches the hub. Clicks and scrolls are sampled; other kinds pass through.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::Config;
use crate::models::event::EventKind;

/// Thread-safe, DashMap-backed last-accepted timestamps.
pub struct EmissionThrottle {
    click_interval: Duration,
    scroll_interval: Duration,
    last_accepted: DashMap<(String, EventKind), Instant>,
}

impl EmissionThrottle {
    pub fn new(click_interval: Duration, scroll_interval: Duration) -> Self {
        Self {
            click_interval,
            scroll_interval,
            last_accepted: DashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::from_millis(config.click_throttle_ms),
            Duration::from_millis(config.scroll_throttle_ms),
        )
    }

    /// A throttle that admits everything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn interval(&self, kind: &EventKind) -> Option<Duration> {
        let interval = match kind {
            EventKind::Click => self.click_interval,
            EventKind::Scroll => self.scroll_interval,
            _ => return None,
        };
        (!interval.is_zero()).then_some(interval)
    }

    /// Whether an event of `kind` from `session_id` may be accepted now.
    /// Accepting records the time; rejected events do not extend the window.
    pub fn admit(&self, session_id: &str, kind: &EventKind) -> bool {
        self.admit_at(session_id, kind, Instant::now())
    }

    fn admit_at(&self, session_id: &str, kind: &EventKind, now: Instant) -> bool {
        let Some(interval) = self.interval(kind) else {
            return true;
        };
        match self.last_accepted.entry((session_id.to_string(), kind.clone())) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) < interval {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Forget sessions idle for longer than `idle`. Returns how many entries
    /// were removed.
    pub fn sweep(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.last_accepted.len();
        self.last_accepted
            .retain(|_, at| now.saturating_duration_since(*at) < idle);
        before - self.last_accepted.len()
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.last_accepted.len()
    }
}
