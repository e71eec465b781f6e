//! Error types for the serial bridge.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while the bridge is running.
///
/// Frame-level faults ([`ParseError`]) are absorbed and counted where they
/// happen; errors of this type propagate to the supervisor, which restarts
/// the failed component. Only [`BridgeError::Startup`] is fatal.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The serial link died (device unplugged, I/O fault, stream closed).
    #[error("serial link lost: {0}")]
    LinkLost(#[source] std::io::Error),

    /// The broker link failed beyond what the publisher absorbs itself.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A required resource could not be acquired at launch.
    #[error("startup failure: {0}")]
    Startup(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Errors from the broker link.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection to the broker is down.
    #[error("broker disconnected: {0}")]
    Disconnected(String),

    /// The broker did not acknowledge within the configured window.
    #[error("no broker acknowledgment within {0:?}")]
    AckTimeout(Duration),
}

/// A frame that could not be turned into a telemetry record.
///
/// Malformed frames are dropped and counted, never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed frame: not a JSON object")]
    Malformed,
}
