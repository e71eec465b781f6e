use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Earliest year a device-supplied timestamp is believed.
///
/// Devices without a battery-backed clock boot with epoch-era dates; anything
/// before this year is treated as garbage and replaced at normalization.
pub const MIN_PLAUSIBLE_YEAR: i32 = 2020;

/// A normalized telemetry record forwarded to the message bus.
///
/// Wraps the JSON object received on the serial link. After normalization the
/// `ts` field is always present and holds an ISO-8601 UTC timestamp with
/// millisecond precision (`YYYY-MM-DDTHH:MM:SS.mmmZ`). Records are not
/// modified once they enter the delivery queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryRecord {
    fields: Map<String, Value>,
}

impl TelemetryRecord {
    /// Wrap a parsed JSON object.
    pub fn from_object(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// The `ts` field, if present and a string.
    pub fn ts(&self) -> Option<&str> {
        self.fields.get("ts").and_then(Value::as_str)
    }

    /// Overwrite the `ts` field.
    pub fn set_ts(&mut self, ts: impl Into<String>) {
        self.fields.insert("ts".to_string(), Value::String(ts.into()));
    }

    /// Look up an arbitrary field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Number of fields in the record.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize the record to the wire payload (a UTF-8 JSON object).
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.fields)
    }
}

/// Check whether a device-supplied `ts` string is plausible enough to keep.
///
/// Plausible means: at least 4 characters, and the first 4 parse as an
/// integer year `>= MIN_PLAUSIBLE_YEAR`. Anything else gets replaced with the
/// relay's own wall-clock time.
pub fn ts_is_plausible(ts: &str) -> bool {
    ts.get(..4)
        .and_then(|prefix| prefix.parse::<i32>().ok())
        .is_some_and(|year| year >= MIN_PLAUSIBLE_YEAR)
}
