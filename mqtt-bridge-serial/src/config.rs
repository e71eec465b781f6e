//! Bridge configuration.
//!
//! Identity (serial port, device id, broker address) comes from the CLI;
//! tuning knobs (queue, retry, timeouts, logging) come from an optional
//! JSON5 file with sensible defaults.

use serde::Deserialize;

use serelay_common::{
    BrokerConfig, LoggingConfig, QueueConfig, RetryConfig, SerialConfig, load_config,
};

use crate::args::BridgeArgs;
use crate::error::{BridgeError, Result};

/// Characters that would corrupt the MQTT topic if they appeared in a
/// device id.
const TOPIC_RESERVED: [char; 3] = ['/', '+', '#'];

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub broker: BrokerConfig,
    pub device_id: String,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    pub shutdown_timeout_secs: u64,
}

/// Tuning knobs loadable from the optional JSON5 file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bound on each serial read in seconds.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// MQTT keepalive interval in seconds.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Broker acknowledgment window in seconds.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,

    /// How long shutdown waits for in-flight work in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_read_timeout_secs() -> u64 {
    1
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_ack_timeout_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            read_timeout_secs: default_read_timeout_secs(),
            keepalive_secs: default_keepalive_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl BridgeConfig {
    /// Assemble the configuration from CLI args plus the optional file.
    pub fn from_args(args: &BridgeArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => load_config::<FileConfig>(path)
                .map_err(|e| BridgeError::config(e.to_string()))?,
            None => FileConfig::default(),
        };

        let mut logging = file.logging;
        if let Some(level) = &args.log_level {
            logging.level = level.clone();
        }

        let config = Self {
            serial: SerialConfig {
                port: args.serial_port.clone(),
                baud: args.baudrate,
                read_timeout_secs: file.read_timeout_secs,
            },
            broker: BrokerConfig {
                host: args.host.clone(),
                port: args.port,
                keepalive_secs: file.keepalive_secs,
                ack_timeout_secs: file.ack_timeout_secs,
            },
            device_id: args.device_id.clone(),
            queue: file.queue,
            retry: file.retry,
            logging,
            shutdown_timeout_secs: file.shutdown_timeout_secs,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial.baud == 0 {
            return Err(BridgeError::config("baudrate must be non-zero"));
        }
        if self.queue.capacity == 0 {
            return Err(BridgeError::config("queue capacity must be non-zero"));
        }
        if self.device_id.is_empty() {
            return Err(BridgeError::config("device id must not be empty"));
        }
        if self.device_id.contains(TOPIC_RESERVED) {
            return Err(BridgeError::config(format!(
                "device id '{}' contains MQTT topic characters",
                self.device_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serelay_common::OverflowPolicy;

    fn args(extra: &[&str]) -> BridgeArgs {
        let mut argv = vec!["mqtt-bridge-serial", "/dev/ttyUSB0", "115200", "esp32-01"];
        argv.extend_from_slice(extra);
        BridgeArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = BridgeConfig::from_args(&args(&[])).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud, 115200);
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.keepalive_secs, 60);
        assert_eq!(config.queue.capacity, 1024);
        assert_eq!(config.queue.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.shutdown_timeout_secs, 5);
    }

    #[test]
    fn test_log_level_override() {
        let config = BridgeConfig::from_args(&args(&["--log-level", "debug"])).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_file_config_parsing() {
        let json5 = r#"
        {
            queue: { capacity: 32, overflow: "block" },
            retry: { base_delay_ms: 100 },
            keepalive_secs: 30,
        }
        "#;
        let file: FileConfig = serelay_common::parse_config(json5).unwrap();
        assert_eq!(file.queue.capacity, 32);
        assert_eq!(file.queue.overflow, OverflowPolicy::Block);
        assert_eq!(file.retry.base_delay_ms, 100);
        assert_eq!(file.retry.max_delay_ms, 30_000);
        assert_eq!(file.keepalive_secs, 30);
        assert_eq!(file.read_timeout_secs, 1);
    }

    #[test]
    fn test_reserved_device_id_rejected() {
        for device_id in ["a/b", "a+b", "a#b", ""] {
            let argv = ["mqtt-bridge-serial", "/dev/ttyUSB0", "115200", device_id];
            let parsed = BridgeArgs::try_parse_from(argv).unwrap();
            assert!(
                BridgeConfig::from_args(&parsed).is_err(),
                "device id {:?} should be rejected",
                device_id
            );
        }
    }

    #[test]
    fn test_zero_baud_rejected() {
        let argv = ["mqtt-bridge-serial", "/dev/ttyUSB0", "0", "esp32-01"];
        let parsed = BridgeArgs::try_parse_from(argv).unwrap();
        assert!(BridgeConfig::from_args(&parsed).is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let config = BridgeConfig::from_args(&args(&["--config", "/nonexistent/bridge.json5"]));
        assert!(matches!(config, Err(BridgeError::Config(_))));
    }
}
