//! Point ingestion, cycle marks and multi-window retention.
//!
//! Guarantees:
//! - Points of one symbol are accepted in non-decreasing timestamp order;
//!   anything older is refused, never reordered into history.
//! - A cycle closes the moment a point lands in a later cycle (or on an
//!   explicit flush) and always yields a mark, however sparse.
//! - Every window holds at most `capacity` marks, oldest evicted first.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bucket::{Bounds, Bucket, CycleGrid};
use crate::config::{ValidatedConfig, WindowPolicy};
use crate::error::IngestError;
use crate::ring::RingBuffer;
use crate::types::{Mark, MarkHealth, Point, QualityFlag, Symbol};

/// Lifetime ingestion counters of one symbol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub marks_emitted: u64,
    pub skipped_cycles: u64,
}

/// Marks retained under one window policy.
#[derive(Clone, Debug)]
pub struct MarkWindow {
    pub policy: WindowPolicy,
    marks: RingBuffer<Arc<Mark>>,
}

impl MarkWindow {
    fn new(policy: WindowPolicy) -> Self {
        Self {
            marks: RingBuffer::new(policy.capacity),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Oldest first.
    pub fn marks(&self) -> Vec<Arc<Mark>> {
        self.marks.to_vec()
    }

    /// Points of every retained mark, oldest first.
    pub fn points(&self) -> Vec<Point> {
        self.marks
            .iter()
            .flat_map(|m| m.points.iter().cloned())
            .collect()
    }

    pub fn points_len(&self) -> usize {
        self.marks.iter().map(|m| m.points.len()).sum()
    }
}

struct OpenCycle {
    bounds: Bounds,
    current: Option<Bucket>,
    points: Vec<Point>,
    duplicates: usize,
    rejected: usize,
    skipped_before: u64,
}

impl OpenCycle {
    fn seal_current(&mut self) {
        if let Some(bucket) = self.current.take() {
            self.duplicates += bucket.duplicates();
            self.points.extend(bucket.into_latest());
        }
    }
}

/// Sampling state of a single symbol. Callers serialize access per symbol.
pub struct SymbolSampler {
    grid: CycleGrid,
    windows: Vec<MarkWindow>,
    open: Option<OpenCycle>,
    last_ts_ms: Option<u64>,
    last_mark_start_ms: Option<u64>,
    /// Rejections seen while no cycle was open; charged to the next one.
    pending_rejected: usize,
    stats: IngestStats,
}

impl SymbolSampler {
    pub fn new(cfg: &ValidatedConfig) -> Self {
        Self {
            grid: cfg.grid,
            windows: cfg.windows.iter().cloned().map(MarkWindow::new).collect(),
            open: None,
            last_ts_ms: None,
            last_mark_start_ms: None,
            pending_rejected: 0,
            stats: IngestStats::default(),
        }
    }

    /// Files `point` under its bucket. Returns the mark of the previous cycle
    /// when this point is the first one past its end.
    pub fn collect(&mut self, point: Point) -> Result<Option<Arc<Mark>>, IngestError> {
        let ts_ms = point.ts_ms;

        if let Err(e) = self.admit(&point) {
            self.stats.rejected += 1;
            match self.open.as_mut() {
                Some(open) => open.rejected += 1,
                None => self.pending_rejected += 1,
            }
            warn!(ts_ms, error = %e, "point rejected");
            return Err(e);
        }
        self.last_ts_ms = Some(ts_ms);
        self.stats.accepted += 1;

        let cycle = self.grid.cycle_of(ts_ms);
        let bucket = self.grid.bucket_of(ts_ms);

        let rolls_over = self.open.as_ref().is_some_and(|o| o.bounds != cycle);
        let emitted = if rolls_over { self.close_open() } else { None };

        let open = self.open.get_or_insert_with(|| {
            let skipped_before = self
                .last_mark_start_ms
                .map_or(0, |prev| self.grid.cycles_between(prev, cycle.start_ms));
            OpenCycle {
                bounds: cycle,
                current: None,
                points: Vec::with_capacity(self.grid.expected_points()),
                duplicates: 0,
                rejected: std::mem::take(&mut self.pending_rejected),
                skipped_before,
            }
        });

        let point = point.filed_under(bucket);
        match open.current.as_mut() {
            Some(current) if current.bounds == bucket => {
                current.push(point);
                self.stats.duplicates += 1;
                debug!(ts_ms, bucket_start = bucket.start_ms, "duplicate point in open bucket");
            }
            _ => {
                open.seal_current();
                open.current = Some(Bucket::open(bucket, point));
            }
        }

        Ok(emitted)
    }

    /// Closes the open cycle if its end is at or before `now_ms`.
    pub fn flush(&mut self, now_ms: u64) -> Option<Arc<Mark>> {
        let due = self.open.as_ref().is_some_and(|o| o.bounds.end_ms <= now_ms);
        if due { self.close_open() } else { None }
    }

    fn admit(&self, point: &Point) -> Result<(), IngestError> {
        let ts_ms = point.ts_ms;

        if !point.mid.is_finite() {
            return Err(IngestError::NonFinitePrice { ts_ms });
        }
        if let Some(last_ts_ms) = self.last_ts_ms {
            if ts_ms < last_ts_ms {
                return Err(IngestError::OutOfOrder { ts_ms, last_ts_ms });
            }
        }
        if let Some(start) = self.last_mark_start_ms {
            let sealed_until_ms = start.saturating_add(self.grid.cycle_duration_ms());
            if ts_ms < sealed_until_ms {
                return Err(IngestError::SealedCycle {
                    ts_ms,
                    sealed_until_ms,
                });
            }
        }
        Ok(())
    }

    fn close_open(&mut self) -> Option<Arc<Mark>> {
        let mut open = self.open.take()?;
        open.seal_current();

        let expected_points = self.grid.expected_points();
        let points_count = open.points.len();
        let missing_buckets = expected_points.saturating_sub(points_count);

        let mut quality_flags = Vec::new();
        if missing_buckets > 0 {
            quality_flags.push(QualityFlag::Gaps);
        }
        if open.duplicates > 0 {
            quality_flags.push(QualityFlag::Duplicates);
        }
        if open.rejected > 0 {
            quality_flags.push(QualityFlag::Rejected);
        }
        if open.skipped_before > 0 {
            quality_flags.push(QualityFlag::AfterSkip);
        }

        let mark = Arc::new(Mark {
            started_at_ms: open.bounds.start_ms,
            ended_at_ms: open.bounds.end_ms,
            points_count,
            points: open.points,
            health: MarkHealth {
                expected_points,
                points_count,
                missing_buckets,
                gap_ratio: missing_buckets as f64 / expected_points as f64,
                duplicates: open.duplicates,
                rejected: open.rejected,
                skipped_cycles: open.skipped_before,
                quality_flags,
            },
        });

        for window in &mut self.windows {
            if let Some(evicted) = window.marks.push(Arc::clone(&mark)) {
                debug!(
                    window = %window.policy.name,
                    evicted_started_at_ms = evicted.started_at_ms,
                    "window full; evicted oldest mark"
                );
            }
        }

        self.last_mark_start_ms = Some(mark.started_at_ms);
        self.stats.marks_emitted += 1;
        self.stats.skipped_cycles += open.skipped_before;

        info!(
            started_at_ms = mark.started_at_ms,
            points_count,
            expected_points,
            healthy = mark.health.is_healthy(),
            "mark emitted"
        );

        Some(mark)
    }

    pub fn window(&self, name: &str) -> Option<&MarkWindow> {
        self.windows.iter().find(|w| w.policy.name == name)
    }

    pub fn windows(&self) -> &[MarkWindow] {
        &self.windows
    }

    /// Bounds of the cycle currently accumulating, if any.
    pub fn open_cycle(&self) -> Option<Bounds> {
        self.open.as_ref().map(|o| o.bounds)
    }

    pub fn last_ts_ms(&self) -> Option<u64> {
        self.last_ts_ms
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }
}

/// Single-owner store over many symbols.
///
/// For shared, concurrent use wrap symbols individually instead, as
/// [`crate::engine::MarketCore`] does.
pub struct SamplingStore {
    cfg: Arc<ValidatedConfig>,
    symbols: HashMap<Symbol, SymbolSampler>,
}

impl SamplingStore {
    pub fn new(cfg: Arc<ValidatedConfig>) -> Self {
        Self {
            cfg,
            symbols: HashMap::new(),
        }
    }

    pub fn collect(&mut self, symbol: &Symbol, point: Point) -> Result<Option<Arc<Mark>>, IngestError> {
        let cfg = &self.cfg;
        self.symbols
            .entry(symbol.clone())
            .or_insert_with(|| SymbolSampler::new(cfg))
            .collect(point)
    }

    /// Force-closes the symbol's open cycle once `now_ms` has reached its end.
    pub fn flush(&mut self, symbol: &Symbol, now_ms: u64) -> Option<Arc<Mark>> {
        self.symbols.get_mut(symbol)?.flush(now_ms)
    }

    /// Retained marks, oldest first. Empty for unknown symbols or windows.
    pub fn get_marks(&self, symbol: &Symbol, window: &str) -> Vec<Arc<Mark>> {
        self.window(symbol, window).map(MarkWindow::marks).unwrap_or_default()
    }

    /// Flattened point history of the window, oldest first.
    pub fn get_points(&self, symbol: &Symbol, window: &str) -> Vec<Point> {
        self.window(symbol, window).map(MarkWindow::points).unwrap_or_default()
    }

    pub fn sampler(&self, symbol: &Symbol) -> Option<&SymbolSampler> {
        self.symbols.get(symbol)
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.cfg
    }

    fn window(&self, symbol: &Symbol, window: &str) -> Option<&MarkWindow> {
        self.symbols.get(symbol)?.window(window)
    }
}
