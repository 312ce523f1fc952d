use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ring::RingBuffer;

/// One recorded shift.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    pub ts_ms: u64,
    /// `None` when the caller had no usable price for the cycle.
    pub price: Option<f64>,
    pub metric: f64,
    pub delta_pct: f64,
}

/// Previous / current / greatest-seen values of one named metric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub prev: Option<f64>,
    pub cur: Option<f64>,
    pub greatest: Option<f64>,
}

impl Tracker {
    /// Non-finite values are ignored.
    pub fn observe(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.prev = self.cur;
        self.cur = Some(value);
        self.greatest = Some(self.greatest.map_or(value, |g| g.max(value)));
    }
}

/// Bounded log of recent shifts for one symbol.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamsState {
    stamps: RingBuffer<Stamp>,
    pub last_shift_ts_ms: Option<u64>,
    pub last_shift_price: Option<f64>,
    pub last_shift_metric: Option<f64>,
    trackers: BTreeMap<String, Tracker>,
}

impl StreamsState {
    pub fn new(max_stamps: usize) -> Self {
        Self {
            stamps: RingBuffer::new(max_stamps),
            last_shift_ts_ms: None,
            last_shift_price: None,
            last_shift_metric: None,
            trackers: BTreeMap::new(),
        }
    }

    /// Appends a stamp, returning the one evicted past `max_stamps`.
    pub fn record_shift(&mut self, stamp: Stamp) -> Option<Stamp> {
        self.last_shift_ts_ms = Some(stamp.ts_ms);
        self.last_shift_price = stamp.price;
        self.last_shift_metric = Some(stamp.metric);

        if let Some(price) = stamp.price {
            self.track("price", price);
        }
        self.track("metric", stamp.metric);
        self.track("deltaPct", stamp.delta_pct);

        self.stamps.push(stamp)
    }

    pub fn track(&mut self, name: &str, value: f64) {
        self.trackers.entry(name.to_string()).or_default().observe(value);
    }

    pub fn tracker(&self, name: &str) -> Option<&Tracker> {
        self.trackers.get(name)
    }

    /// Oldest first.
    pub fn stamps(&self) -> impl ExactSizeIterator<Item = &Stamp> {
        self.stamps.iter()
    }

    pub fn max_stamps(&self) -> usize {
        self.stamps.capacity()
    }

    pub fn last_stamp(&self) -> Option<&Stamp> {
        self.stamps.latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(ts_ms: u64) -> Stamp {
        Stamp {
            ts_ms,
            price: Some(100.0 + ts_ms as f64),
            metric: 1.0,
            delta_pct: 0.5,
        }
    }

    #[test]
    fn stamps_are_bounded_fifo() {
        let mut s = StreamsState::new(2);

        assert_eq!(s.record_shift(stamp(1)), None);
        assert_eq!(s.record_shift(stamp(2)), None);
        assert_eq!(s.record_shift(stamp(3)), Some(stamp(1)));

        let ts: Vec<u64> = s.stamps().map(|st| st.ts_ms).collect();
        assert_eq!(ts, vec![2, 3]);
        assert_eq!(s.last_shift_ts_ms, Some(3));
        assert_eq!(s.last_shift_price, Some(103.0));
    }

    #[test]
    fn trackers_keep_prev_cur_and_greatest() {
        let mut s = StreamsState::new(4);
        s.track("ratio", 1.0);
        s.track("ratio", 3.0);
        s.track("ratio", 2.0);
        s.track("ratio", f64::NAN);

        let t = s.tracker("ratio").unwrap();
        assert_eq!(t.prev, Some(3.0));
        assert_eq!(t.cur, Some(2.0));
        assert_eq!(t.greatest, Some(3.0));
        assert!(s.tracker("missing").is_none());
    }

    #[test]
    fn shift_without_price_keeps_price_tracker_untouched() {
        let mut s = StreamsState::new(4);
        s.record_shift(Stamp {
            price: None,
            ..stamp(7)
        });

        assert_eq!(s.last_shift_price, None);
        assert!(s.tracker("price").is_none());
        assert_eq!(s.tracker("metric").and_then(|t| t.cur), Some(1.0));
    }
}
