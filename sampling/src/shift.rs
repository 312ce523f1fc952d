//! Debounced shift detection.
//!
//! Every cycle a metric is compared with its reference. A shift fires once
//! the relative delta has stayed at or above `epsilon_pct` for `window_size`
//! consecutive cycles; the streak then starts over, so a sustained divergence
//! fires once per `window_size` cycles.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ring::RingBuffer;
use crate::streams::{Stamp, StreamsState};

/// Slack applied to the threshold comparison so a delta that is equal to
/// `epsilon_pct` up to float rounding still qualifies.
const THRESHOLD_SLACK: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftConfig {
    pub epsilon_pct: f64,
    pub window_size: usize,
    pub max_stamps: usize,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            epsilon_pct: 0.35,
            window_size: 5,
            max_stamps: 64,
        }
    }
}

/// `(current / reference - 1) * 100`, or `None` when either side is unusable.
pub fn delta_pct(current: f64, reference: f64) -> Option<f64> {
    if !reference.is_finite() || reference <= 0.0 {
        return None;
    }
    if !current.is_finite() || current < 0.0 {
        return None;
    }
    let d = (current / reference - 1.0) * 100.0;
    d.is_finite().then_some(d)
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftWindowState {
    /// Exceeded-threshold flags of the most recent cycles, diagnostics only.
    pub flags: RingBuffer<bool>,
    pub streak: usize,
    pub last_delta_pct: Option<f64>,
    pub shifts: u64,
    pub total_cycles: u64,
}

impl ShiftWindowState {
    fn new(window_size: usize) -> Self {
        Self {
            flags: RingBuffer::new(window_size),
            streak: 0,
            last_delta_pct: None,
            shifts: 0,
            total_cycles: 0,
        }
    }
}

/// Result of one fed cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShiftUpdate {
    pub ts_ms: u64,
    pub delta_pct: Option<f64>,
    pub exceeded: bool,
    pub streak: usize,
    /// Set when this cycle completed a run and fired a shift.
    pub stamp: Option<Stamp>,
}

pub struct ShiftDetector {
    cfg: ShiftConfig,
    window: ShiftWindowState,
    streams: StreamsState,
}

impl ShiftDetector {
    pub fn new(cfg: ShiftConfig) -> Self {
        Self {
            window: ShiftWindowState::new(cfg.window_size),
            streams: StreamsState::new(cfg.max_stamps),
            cfg,
        }
    }

    /// Feeds one cycle's metric against its reference.
    pub fn feed(&mut self, ts_ms: u64, current: f64, reference: f64, price: f64) -> ShiftUpdate {
        self.observe(ts_ms, delta_pct(current, reference), current, price)
    }

    /// Feeds an already computed delta. `None` counts as not exceeded.
    pub fn observe(
        &mut self,
        ts_ms: u64,
        delta_pct: Option<f64>,
        metric: f64,
        price: f64,
    ) -> ShiftUpdate {
        let w = &mut self.window;
        w.total_cycles += 1;
        w.last_delta_pct = delta_pct;

        let exceeded = delta_pct.is_some_and(|d| d + THRESHOLD_SLACK >= self.cfg.epsilon_pct);
        w.flags.push(exceeded);
        w.streak = if exceeded { w.streak + 1 } else { 0 };

        let mut stamp = None;
        if w.streak >= self.cfg.window_size {
            w.shifts += 1;
            w.streak = 0;

            let s = Stamp {
                ts_ms,
                price: price.is_finite().then_some(price),
                metric,
                delta_pct: delta_pct.unwrap_or_default(),
            };
            self.streams.record_shift(s);
            stamp = Some(s);

            info!(
                ts_ms,
                delta_pct = s.delta_pct,
                shifts = self.window.shifts,
                "shift detected"
            );
        } else {
            debug!(ts_ms, ?delta_pct, exceeded, streak = w.streak, "shift cycle observed");
        }

        ShiftUpdate {
            ts_ms,
            delta_pct,
            exceeded,
            streak: self.window.streak,
            stamp,
        }
    }

    pub fn window_state(&self) -> &ShiftWindowState {
        &self.window
    }

    pub fn streams(&self) -> &StreamsState {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut StreamsState {
        &mut self.streams
    }

    pub fn config(&self) -> &ShiftConfig {
        &self.cfg
    }
}
