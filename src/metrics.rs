//! Drop counters - degraded-fidelity accounting
//!
//! No single event can stop the agent; instead every drop site increments a
//! counter here. The counters are logged periodically and once more at
//! shutdown so operators can see how much telemetry fidelity was lost.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for every place an event can be dropped
///
/// Relaxed ordering is fine: the counters are monotonic and only read for
/// reporting.
#[derive(Debug, Default)]
pub struct DropCounters {
    /// Dropped by pre-decode predicates (own pid, system idle pid)
    pub prefilter: AtomicU64,
    /// Dropped by post-decode predicates (user pattern, own binary, self-directed access)
    pub postfilter: AtomicU64,
    /// Raw records that failed to decode
    pub decode: AtomicU64,
    /// Actor events arriving for pids the forest does not track
    pub not_tracked: AtomicU64,
    /// Oldest-item drops from the exporter queue under back-pressure
    pub exporter_queue: AtomicU64,
    /// Mutations attempted against stopped nodes (producer-side races)
    pub lifecycle: AtomicU64,
}

impl DropCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_prefilter(&self) {
        self.prefilter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_postfilter(&self) {
        self.postfilter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decode(&self) {
        self.decode.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_not_tracked(&self) {
        self.not_tracked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_exporter_queue(&self) {
        self.exporter_queue.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lifecycle(&self) {
        self.lifecycle.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy for reporting
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            events_dropped_prefilter: self.prefilter.load(Ordering::Relaxed),
            events_dropped_postfilter: self.postfilter.load(Ordering::Relaxed),
            events_dropped_decode: self.decode.load(Ordering::Relaxed),
            events_dropped_not_tracked: self.not_tracked.load(Ordering::Relaxed),
            exporter_queue_drops: self.exporter_queue.load(Ordering::Relaxed),
            lifecycle_drops: self.lifecycle.load(Ordering::Relaxed),
        }
    }

    /// Emit the summary line operators grep for
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            events_dropped_prefilter = s.events_dropped_prefilter,
            events_dropped_postfilter = s.events_dropped_postfilter,
            events_dropped_decode = s.events_dropped_decode,
            events_dropped_not_tracked = s.events_dropped_not_tracked,
            exporter_queue_drops = s.exporter_queue_drops,
            lifecycle_drops = s.lifecycle_drops,
            total = s.total(),
            "Drop counter summary"
        );
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub events_dropped_prefilter: u64,
    pub events_dropped_postfilter: u64,
    pub events_dropped_decode: u64,
    pub events_dropped_not_tracked: u64,
    pub exporter_queue_drops: u64,
    pub lifecycle_drops: u64,
}

impl CounterSnapshot {
    pub fn total(&self) -> u64 {
        self.events_dropped_prefilter
            + self.events_dropped_postfilter
            + self.events_dropped_decode
            + self.events_dropped_not_tracked
            + self.exporter_queue_drops
            + self.lifecycle_drops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let c = DropCounters::new();
        c.inc_prefilter();
        c.inc_prefilter();
        c.inc_decode();
        let s = c.snapshot();
        assert_eq!(s.events_dropped_prefilter, 2);
        assert_eq!(s.events_dropped_decode, 1);
        assert_eq!(s.events_dropped_postfilter, 0);
        assert_eq!(s.total(), 3);
    }
}
