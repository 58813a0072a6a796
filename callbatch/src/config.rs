//! Configuration for the batch client.

use std::time::Duration;

/// Lower bound for any poll interval, in milliseconds.
pub const MIN_POLL_RATE_MS: u64 = 500;

/// Upper bound for any poll interval, in milliseconds.
pub const MAX_POLL_RATE_MS: u64 = 10_000;

/// Configuration for the batch client's endpoint, cadence, and timeouts.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// URL that both init and batch messages are POSTed to.
    pub endpoint: String,

    /// Poll interval used until the server suggests another one.
    pub initial_poll_rate: Duration,

    /// Timeout for the initialization round-trip performed by `set_key`.
    pub init_timeout: Duration,

    /// Batch requests time out after `batch_timeout_factor × poll rate`.
    pub batch_timeout_factor: u32,

    /// Upper bound for the delay before retrying after a transient failure.
    ///
    /// The actual delay is `min(max_retry_delay, poll rate)`.
    pub max_retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            initial_poll_rate: Duration::from_millis(2_000),
            init_timeout: Duration::from_millis(5_000),
            batch_timeout_factor: 2,
            max_retry_delay: Duration::from_millis(2_000),
        }
    }
}

impl ClientConfig {
    /// Create a configuration targeting `endpoint` with default timings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Override the poll interval used before the server sends a hint.
    ///
    /// The value is clamped into the allowed poll range.
    pub fn with_initial_poll_rate(mut self, rate: Duration) -> Self {
        self.initial_poll_rate = clamp_duration(rate);
        self
    }

    /// Override the initialization timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Override the transient-failure retry cap.
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Configuration tuned for a server on the same host or LAN.
    pub fn local_network(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            initial_poll_rate: Duration::from_millis(MIN_POLL_RATE_MS),
            init_timeout: Duration::from_millis(1_000),
            batch_timeout_factor: 2,
            max_retry_delay: Duration::from_millis(1_000),
        }
    }

    /// Timeout applied to one batch round at the given poll rate.
    pub fn batch_timeout(&self, poll_rate: Duration) -> Duration {
        poll_rate * self.batch_timeout_factor.max(1)
    }

    /// Delay before retrying after a transient failure at the given poll rate.
    pub fn retry_delay(&self, poll_rate: Duration) -> Duration {
        self.max_retry_delay.min(poll_rate)
    }
}

/// Clamp a server-supplied interval (milliseconds) into the poll range.
///
/// Returns `None` for non-finite values, which are ignored rather than
/// clamped.
pub fn clamp_poll_rate(raw_ms: f64) -> Option<Duration> {
    if !raw_ms.is_finite() {
        return None;
    }
    let clamped = raw_ms.clamp(MIN_POLL_RATE_MS as f64, MAX_POLL_RATE_MS as f64);
    Some(Duration::from_millis(clamped.round() as u64))
}

fn clamp_duration(rate: Duration) -> Duration {
    rate.clamp(
        Duration::from_millis(MIN_POLL_RATE_MS),
        Duration::from_millis(MAX_POLL_RATE_MS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_poll_rate_bounds() {
        assert_eq!(clamp_poll_rate(0.0), Some(Duration::from_millis(500)));
        assert_eq!(clamp_poll_rate(-250.0), Some(Duration::from_millis(500)));
        assert_eq!(clamp_poll_rate(50_000.0), Some(Duration::from_millis(10_000)));
        assert_eq!(clamp_poll_rate(1_000.0), Some(Duration::from_millis(1_000)));
        assert_eq!(clamp_poll_rate(f64::NAN), None);
        assert_eq!(clamp_poll_rate(f64::INFINITY), None);
    }

    #[test]
    fn test_derived_timings() {
        let config = ClientConfig::new("http://localhost/batch");
        assert_eq!(
            config.batch_timeout(Duration::from_millis(1_500)),
            Duration::from_millis(3_000)
        );
        assert_eq!(
            config.retry_delay(Duration::from_millis(800)),
            Duration::from_millis(800)
        );
        assert_eq!(
            config.retry_delay(Duration::from_millis(9_000)),
            Duration::from_millis(2_000)
        );
    }

    #[test]
    fn test_initial_poll_rate_is_clamped() {
        let config = ClientConfig::default().with_initial_poll_rate(Duration::from_millis(10));
        assert_eq!(config.initial_poll_rate, Duration::from_millis(500));
    }
}
