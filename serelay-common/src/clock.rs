use chrono::{DateTime, Utc};

/// Wall-clock abstraction.
///
/// The normalizer stamps records with "now" when a device timestamp is
/// missing or implausible; injecting the clock keeps that path testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Format a timestamp as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Always 3 fractional digits and a literal `Z` suffix, matching the wire
/// format devices are expected to emit.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(format_timestamp(ts), "2024-05-01T12:00:00.000Z");
    }

    #[test]
    fn test_format_timestamp_millis() {
        let ts = Utc
            .with_ymd_and_hms(2024, 12, 31, 23, 59, 59)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(7))
            .unwrap();
        assert_eq!(format_timestamp(ts), "2024-12-31T23:59:59.007Z");
    }

    #[test]
    fn test_format_truncates_sub_millisecond() {
        let ts = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(1_500))
            .unwrap();
        assert_eq!(format_timestamp(ts), "2024-01-01T00:00:00.001Z");
    }

    #[test]
    fn test_system_clock_is_current() {
        let clock = SystemClock;
        let now = clock.now();
        assert!(now.timestamp() > 1_500_000_000);
    }
}
