//! MQTT bridge for line-oriented serial telemetry.
//!
//! Reads newline-delimited JSON frames from a serial device, normalizes the
//! `ts` timestamp field, and forwards each record to an MQTT broker.
//!
//! # Pipeline
//!
//! ```text
//! serial port → FrameReader → normalizer → DeliveryQueue → Publisher → broker
//! ```
//!
//! The reader and publisher are supervised independently: a flapping serial
//! link does not disturb the broker connection and a broker outage does not
//! stop serial reads. Records buffer in the bounded delivery queue and the
//! overflow policy decides what happens when it fills.
//!
//! # Topic Format
//!
//! Records are published to:
//! ```text
//! health/{device_id}/telemetry
//! ```

pub mod args;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod publisher;
pub mod queue;
pub mod reader;
pub mod stats;
pub mod supervisor;
