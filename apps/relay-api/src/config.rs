use std::str::FromStr;
use std::time::Duration;

use crate::hub::log::DEFAULT_MAX_LOGS;

/// Relay configuration, loaded from environment variables.
///
/// Every variable is optional; missing or unparseable values fall back to the
/// defaults below.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to (`PORT`, default 3000).
    pub port: u16,
    /// How many events the log keeps (`MAX_LOGS`, default 500).
    pub max_logs: usize,
    /// Per-subscriber outbound queue length (`SUBSCRIBER_QUEUE`, default 256).
    /// A subscriber whose queue fills up is dropped.
    pub subscriber_queue: usize,
    /// Upper bound on a single WebSocket write (`SEND_TIMEOUT_MS`, default 5000).
    pub send_timeout_ms: u64,
    /// Minimum gap between accepted clicks per session (`CLICK_THROTTLE_MS`,
    /// default 500, 0 disables).
    pub click_throttle_ms: u64,
    /// Minimum gap between accepted scrolls per session (`SCROLL_THROTTLE_MS`,
    /// default 2000, 0 disables).
    pub scroll_throttle_ms: u64,
    /// Take the source address from `X-Forwarded-For` / `X-Real-IP`
    /// (`TRUST_FORWARDED_FOR`, default true).
    pub trust_forwarded_for: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            max_logs: DEFAULT_MAX_LOGS,
            subscriber_queue: 256,
            send_timeout_ms: 5000,
            click_throttle_ms: 500,
            scroll_throttle_ms: 2000,
            trust_forwarded_for: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "PORT", defaults.port),
            max_logs: parsed(&lookup, "MAX_LOGS", defaults.max_logs),
            subscriber_queue: parsed(&lookup, "SUBSCRIBER_QUEUE", defaults.subscriber_queue),
            send_timeout_ms: parsed(&lookup, "SEND_TIMEOUT_MS", defaults.send_timeout_ms),
            click_throttle_ms: parsed(&lookup, "CLICK_THROTTLE_MS", defaults.click_throttle_ms),
            scroll_throttle_ms: parsed(&lookup, "SCROLL_THROTTLE_MS", defaults.scroll_throttle_ms),
            trust_forwarded_for: lookup("TRUST_FORWARDED_FOR")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.trust_forwarded_for),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(%name, value = %raw, "ignoring unparseable config value");
            default
        }),
        None => default,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
