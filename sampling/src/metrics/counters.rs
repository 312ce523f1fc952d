use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility. Clones share the same cells.
#[derive(Clone, Default)]
pub struct Counters {
    pub points_accepted: Arc<AtomicU64>,
    pub points_rejected: Arc<AtomicU64>,
    pub points_duplicated: Arc<AtomicU64>,

    pub marks_emitted: Arc<AtomicU64>,
    pub cycles_skipped: Arc<AtomicU64>,

    pub metric_cycles: Arc<AtomicU64>,
    pub shifts_fired: Arc<AtomicU64>,

    // write-behind
    pub sink_events: Arc<AtomicU64>,
    pub sink_dropped: Arc<AtomicU64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub points_accepted: u64,
    pub points_rejected: u64,
    pub points_duplicated: u64,
    pub marks_emitted: u64,
    pub cycles_skipped: u64,
    pub metric_cycles: u64,
    pub shifts_fired: u64,
    pub sink_events: u64,
    pub sink_dropped: u64,
}

impl Counters {
    pub fn incr(cell: &AtomicU64) {
        cell.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(cell: &AtomicU64, n: u64) {
        if n > 0 {
            cell.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            points_accepted: load(&self.points_accepted),
            points_rejected: load(&self.points_rejected),
            points_duplicated: load(&self.points_duplicated),
            marks_emitted: load(&self.marks_emitted),
            cycles_skipped: load(&self.cycles_skipped),
            metric_cycles: load(&self.metric_cycles),
            shifts_fired: load(&self.shifts_fired),
            sink_events: load(&self.sink_events),
            sink_dropped: load(&self.sink_dropped),
        }
    }
}
