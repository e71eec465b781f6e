//! Bounded delivery queue between the normalizer and the publisher.
//!
//! The queue is the only shared mutable state in the pipeline. It decouples
//! the serial read rate from the publish rate: while the broker is down,
//! records pile up here up to the configured capacity, then the overflow
//! policy decides who pays.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use serelay_common::{OverflowPolicy, QueueConfig, TelemetryRecord};

use crate::stats::BridgeStats;

struct Inner {
    items: VecDeque<TelemetryRecord>,
    shutdown: bool,
}

/// Thread-safe bounded FIFO of [`TelemetryRecord`].
///
/// `push` applies the overflow policy when full; `pop` suspends until a
/// record is available or the queue is shut down and drained. FIFO order is
/// preserved; drop-oldest eviction removes the front but keeps the relative
/// order of the survivors.
pub struct DeliveryQueue {
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    stats: Arc<BridgeStats>,
}

impl DeliveryQueue {
    pub fn new(config: &QueueConfig, stats: Arc<BridgeStats>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(config.capacity),
                shutdown: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity: config.capacity,
            policy: config.overflow,
            stats,
        })
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("delivery queue lock poisoned")
    }

    /// Insert a record at the back.
    ///
    /// Returns `false` once the queue has been shut down; the record is not
    /// accepted in that case. Under the blocking policy this suspends the
    /// caller until the publisher makes room or shutdown is signaled.
    pub async fn push(&self, record: TelemetryRecord) -> bool {
        match self.policy {
            OverflowPolicy::DropOldest => {
                {
                    let mut inner = self.locked();
                    if inner.shutdown {
                        return false;
                    }
                    if inner.items.len() == self.capacity {
                        inner.items.pop_front();
                        self.stats.record_dropped();
                        tracing::debug!(capacity = self.capacity, "queue full, evicted oldest record");
                    }
                    inner.items.push_back(record);
                }
                self.not_empty.notify_one();
                true
            }
            OverflowPolicy::Block => {
                let mut record = Some(record);
                loop {
                    // Register interest before re-checking so a wakeup
                    // between the check and the await is not lost.
                    let space = self.not_full.notified();
                    {
                        let mut inner = self.locked();
                        if inner.shutdown {
                            return false;
                        }
                        if inner.items.len() < self.capacity {
                            inner.items.push_back(record.take().expect("record consumed twice"));
                            drop(inner);
                            self.not_empty.notify_one();
                            return true;
                        }
                    }
                    space.await;
                }
            }
        }
    }

    /// Remove the front record, waiting for one if the queue is empty.
    ///
    /// After [`shutdown`](Self::shutdown), remaining records are still
    /// handed out in order; `None` is returned once the queue is drained.
    pub async fn pop(&self) -> Option<TelemetryRecord> {
        loop {
            let available = self.not_empty.notified();
            {
                let mut inner = self.locked();
                if let Some(record) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(record);
                }
                if inner.shutdown {
                    return None;
                }
            }
            available.await;
        }
    }

    /// Signal shutdown and wake all waiters. Idempotent.
    pub fn shutdown(&self) {
        self.locked().shutdown = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Number of records currently buffered.
    pub fn len(&self) -> usize {
        self.locked().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
