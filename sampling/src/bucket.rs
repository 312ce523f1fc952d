//! Epoch-aligned bucket and cycle arithmetic.
//!
//! A bucket is one point-interval slice; a cycle is `expected_points`
//! consecutive buckets. Both are half-open `[start, end)`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Point;

/// Half-open time range in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Bounds {
    pub fn contains(&self, ts_ms: u64) -> bool {
        ts_ms >= self.start_ms && ts_ms < self.end_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Rounds `ts_ms` down to a multiple of `step_ms`.
#[inline]
pub fn align_down(ts_ms: u64, step_ms: u64) -> u64 {
    ts_ms - ts_ms % step_ms
}

/// Bucket/cycle geometry for one sampling configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleGrid {
    point_interval_ms: u64,
    cycle_duration_ms: u64,
}

impl CycleGrid {
    pub fn new(point_interval_ms: u64, cycle_duration_ms: u64) -> Result<Self, ConfigError> {
        if point_interval_ms == 0 {
            return Err(ConfigError::ZeroPointInterval);
        }
        if cycle_duration_ms == 0 || cycle_duration_ms % point_interval_ms != 0 {
            return Err(ConfigError::CycleNotMultiple {
                cycle_ms: cycle_duration_ms,
                interval_ms: point_interval_ms,
            });
        }

        Ok(Self {
            point_interval_ms,
            cycle_duration_ms,
        })
    }

    pub fn point_interval_ms(&self) -> u64 {
        self.point_interval_ms
    }

    pub fn cycle_duration_ms(&self) -> u64 {
        self.cycle_duration_ms
    }

    /// Buckets per cycle.
    pub fn expected_points(&self) -> usize {
        (self.cycle_duration_ms / self.point_interval_ms) as usize
    }

    pub fn bucket_of(&self, ts_ms: u64) -> Bounds {
        let start_ms = align_down(ts_ms, self.point_interval_ms);
        Bounds {
            start_ms,
            end_ms: start_ms.saturating_add(self.point_interval_ms),
        }
    }

    pub fn cycle_of(&self, ts_ms: u64) -> Bounds {
        let start_ms = align_down(ts_ms, self.cycle_duration_ms);
        Bounds {
            start_ms,
            end_ms: start_ms.saturating_add(self.cycle_duration_ms),
        }
    }

    /// Index of the bucket holding `ts_ms` within its cycle, `0..expected_points`.
    pub fn bucket_slot(&self, ts_ms: u64) -> usize {
        ((ts_ms % self.cycle_duration_ms) / self.point_interval_ms) as usize
    }

    /// Whole cycles strictly between the cycle starting at `earlier_start_ms`
    /// and the one starting at `later_start_ms`.
    pub fn cycles_between(&self, earlier_start_ms: u64, later_start_ms: u64) -> u64 {
        if later_start_ms <= earlier_start_ms {
            return 0;
        }
        (later_start_ms - earlier_start_ms) / self.cycle_duration_ms - 1
    }
}

/// Accumulation slot for one point interval of one symbol.
///
/// Normally holds a single point; retries inside the same slice are kept so the
/// duplicate count can be reported, but only the latest one feeds the mark.
#[derive(Clone, Debug)]
pub struct Bucket {
    pub bounds: Bounds,
    points: Vec<Point>,
}

impl Bucket {
    pub fn open(bounds: Bounds, first: Point) -> Self {
        Self {
            bounds,
            points: vec![first],
        }
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Points beyond the first that landed in this slice.
    pub fn duplicates(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    /// Closes the bucket, keeping the latest observation.
    pub fn into_latest(mut self) -> Option<Point> {
        self.points.pop()
    }
}
