//! Channel key, poll cadence, and the terminal broken flag.

use std::time::Duration;

use crate::config::{clamp_poll_rate, ClientConfig, MAX_POLL_RATE_MS, MIN_POLL_RATE_MS};

/// State of the channel to the batch endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    key: Option<String>,
    poll_rate: Duration,
    broken: bool,
}

impl ConnectionState {
    /// Start without a key, at the configured poll rate.
    pub fn new(config: &ClientConfig) -> Self {
        let initial = config.initial_poll_rate.clamp(
            Duration::from_millis(MIN_POLL_RATE_MS),
            Duration::from_millis(MAX_POLL_RATE_MS),
        );
        Self {
            key: None,
            poll_rate: initial,
            broken: false,
        }
    }

    /// Current channel key.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Current poll interval.
    pub fn poll_rate(&self) -> Duration {
        self.poll_rate
    }

    /// Whether the channel failed terminally.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// A key is set and the channel is usable.
    pub fn is_connected(&self) -> bool {
        self.key.is_some() && !self.broken
    }

    /// Install a new key (already normalized) and clear `broken`.
    pub fn set_key(&mut self, key: Option<String>) {
        self.key = key;
        self.broken = false;
    }

    /// Mark the channel broken; with `forget_key`, also drop the key.
    pub fn mark_broken(&mut self, forget_key: bool) {
        self.broken = true;
        if forget_key {
            self.key = None;
        }
    }

    /// Adopt a server-suggested interval, clamped into range.
    ///
    /// Returns `true` if the poll rate changed.
    pub fn adopt_interval(&mut self, raw_ms: f64) -> bool {
        match clamp_poll_rate(raw_ms) {
            Some(rate) if rate != self.poll_rate => {
                tracing::info!(
                    "poll rate changed from {:?} to {:?} (server suggested {}ms)",
                    self.poll_rate,
                    rate,
                    raw_ms
                );
                self.poll_rate = rate;
                true
            }
            _ => false,
        }
    }
}

/// Trim a caller-supplied key; empty or whitespace-only means "no channel".
pub fn normalize_key(key: Option<&str>) -> Option<String> {
    key.map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(Some("  abc ")), Some("abc".to_string()));
        assert_eq!(normalize_key(Some("   ")), None);
        assert_eq!(normalize_key(Some("")), None);
        assert_eq!(normalize_key(None), None);
    }

    #[test]
    fn test_adopt_interval_clamps() {
        let mut state = ConnectionState::new(&ClientConfig::default());
        for (raw, expected) in [(0.0, 500), (-10.0, 500), (50_000.0, 10_000), (1_234.0, 1_234)] {
            state.adopt_interval(raw);
            assert_eq!(state.poll_rate(), Duration::from_millis(expected));
        }
    }

    #[test]
    fn test_broken_and_key_lifecycle() {
        let mut state = ConnectionState::new(&ClientConfig::default());
        assert!(!state.is_connected());

        state.set_key(Some("abc".to_string()));
        assert!(state.is_connected());

        state.mark_broken(false);
        assert!(!state.is_connected());
        assert_eq!(state.key(), Some("abc"));

        state.set_key(Some("abc".to_string()));
        assert!(state.is_connected());

        state.mark_broken(true);
        assert_eq!(state.key(), None);
        assert!(state.is_broken());
    }
}
