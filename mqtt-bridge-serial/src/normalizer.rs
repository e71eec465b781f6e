//! Frame normalization.
//!
//! Turns raw frames into [`TelemetryRecord`]s and repairs the `ts` field.
//! Malformed frames are counted and dropped here; they never reach the
//! delivery queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use serelay_common::{Clock, TelemetryRecord, format_timestamp, ts_is_plausible};

use crate::error::ParseError;
use crate::queue::DeliveryQueue;
use crate::reader::RawFrame;
use crate::stats::BridgeStats;

/// Parse a frame as a JSON object and ensure a plausible `ts`.
///
/// A `ts` that is absent, not a string, shorter than 4 characters, or whose
/// leading year is unparseable or pre-2020 is replaced with the injected
/// clock's current time. A plausible `ts` is left untouched byte-for-byte.
pub fn normalize(frame: &str, clock: &dyn Clock) -> Result<TelemetryRecord, ParseError> {
    let value: serde_json::Value =
        serde_json::from_str(frame).map_err(|_| ParseError::Malformed)?;
    let serde_json::Value::Object(fields) = value else {
        return Err(ParseError::Malformed);
    };

    let mut record = TelemetryRecord::from_object(fields);
    let plausible = record.ts().map(ts_is_plausible).unwrap_or(false);
    if !plausible {
        record.set_ts(format_timestamp(clock.now()));
    }
    Ok(record)
}

/// Normalizer task: drains the reader channel into the delivery queue.
///
/// Exits when the channel closes, the queue shuts down, or cancellation is
/// requested. Never fails: malformed frames are absorbed and counted.
pub async fn run_normalizer(
    mut frames: mpsc::Receiver<RawFrame>,
    queue: Arc<DeliveryQueue>,
    clock: Arc<dyn Clock>,
    stats: Arc<BridgeStats>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match normalize(&frame, clock.as_ref()) {
            Ok(record) => {
                if !queue.push(record).await {
                    break;
                }
            }
            Err(ParseError::Malformed) => {
                stats.record_malformed();
                tracing::debug!(frame = %frame, "dropping malformed frame");
            }
        }
    }
}
