use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

/// State of an external link (serial port or broker connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    /// Get the string representation used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exponential backoff with jitter for reconnect and restart delays.
///
/// Delays double on each call to [`next_delay`](Backoff::next_delay) up to
/// the configured cap. The jitter fraction spreads delays by up to
/// `±jitter * delay` so restart storms from several relays do not align.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            current: base,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    /// The next delay to sleep before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);

        if self.jitter == 0.0 {
            return delay;
        }
        let factor = 1.0 + self.jitter * rand::rng().random_range(-1.0..=1.0);
        delay.mul_f64(factor.max(0.0))
    }

    /// Reset to the base delay after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
