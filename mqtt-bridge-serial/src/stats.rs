//! Bridge counters.
//!
//! Shared atomic counters updated by the reader, normalizer, queue, and
//! publisher. No frame or disconnect is ever silently swallowed: every drop
//! path increments one of these.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared across the bridge tasks.
#[derive(Debug, Default)]
pub struct BridgeStats {
    frames_read: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    reconnects: AtomicU64,
}

impl BridgeStats {
    pub fn record_frame(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Consistent-enough snapshot for logging.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the bridge counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub malformed: u64,
    pub dropped: u64,
    pub published: u64,
    pub reconnects: u64,
}
