//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Serial to MQTT telemetry bridge.
#[derive(Parser, Debug, Clone)]
#[command(name = "mqtt-bridge-serial", version)]
pub struct BridgeArgs {
    /// Serial port, e.g. /dev/ttyUSB0 or COM3.
    pub serial_port: String,

    /// Serial baudrate, e.g. 115200.
    pub baudrate: u32,

    /// Device ID used to build the MQTT topic.
    pub device_id: String,

    /// MQTT broker host.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// MQTT broker port.
    #[arg(long, default_value_t = 1883)]
    pub port: u16,

    /// Optional JSON5 config file for queue, retry, and logging settings.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
