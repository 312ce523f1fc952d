use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bucket::Bounds;

/// Instrument identifier, e.g. `BTCUSDT`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One price level of an order book.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

/// Top-N levels per side, best first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// One normalized observation of a symbol at one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub ts_ms: u64,
    pub mid: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// Bucket the point was filed under; assigned by the store on ingestion.
    pub bucket: Bounds,
    pub book: BookSnapshot,
}

impl Point {
    /// Mid-only observation (bid == ask == mid, no volume, empty book).
    pub fn new(ts_ms: u64, mid: f64) -> Self {
        Self {
            ts_ms,
            mid,
            best_bid: mid,
            best_ask: mid,
            spread: 0.0,
            bid_volume: 0.0,
            ask_volume: 0.0,
            bucket: Bounds {
                start_ms: ts_ms,
                end_ms: ts_ms,
            },
            book: BookSnapshot::default(),
        }
    }

    /// Observation derived from a book. Mid and spread come from the top of book.
    pub fn from_book(ts_ms: u64, book: BookSnapshot) -> Self {
        let best_bid = book.bids.first().map_or(f64::NAN, |l| l.price);
        let best_ask = book.asks.first().map_or(f64::NAN, |l| l.price);
        let bid_volume = book.bids.iter().map(|l| l.qty).sum();
        let ask_volume = book.asks.iter().map(|l| l.qty).sum();

        Self {
            mid: (best_bid + best_ask) / 2.0,
            best_bid,
            best_ask,
            spread: best_ask - best_bid,
            bid_volume,
            ask_volume,
            book,
            ..Self::new(ts_ms, f64::NAN)
        }
    }

    pub fn with_volumes(mut self, bid_volume: f64, ask_volume: f64) -> Self {
        self.bid_volume = bid_volume;
        self.ask_volume = ask_volume;
        self
    }

    pub(crate) fn filed_under(mut self, bucket: Bounds) -> Self {
        self.bucket = bucket;
        self
    }

    /// Volume on both sides of the book, if usable as a weight.
    pub fn traded_volume(&self) -> Option<f64> {
        let v = self.bid_volume + self.ask_volume;
        (v.is_finite() && v > 0.0).then_some(v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    /// Some buckets of the cycle received no point.
    Gaps,
    /// At least one bucket received more than one point.
    Duplicates,
    /// Points were refused (out of order or non-finite) during the cycle.
    Rejected,
    /// Whole cycles went by without any point before this one.
    AfterSkip,
}

/// Feed quality of one cycle, compared against the static expectation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkHealth {
    pub expected_points: usize,
    pub points_count: usize,
    pub missing_buckets: usize,
    pub gap_ratio: f64,
    pub duplicates: usize,
    pub rejected: usize,
    pub skipped_cycles: u64,
    pub quality_flags: Vec<QualityFlag>,
}

impl MarkHealth {
    pub fn is_healthy(&self) -> bool {
        self.quality_flags.is_empty()
    }
}

/// Immutable summary of one closed cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    /// Chronological, at most one per bucket.
    pub points: Vec<Point>,
    pub points_count: usize,
    pub health: MarkHealth,
}

impl Mark {
    pub fn first_mid(&self) -> Option<f64> {
        self.points.first().map(|p| p.mid)
    }

    pub fn last_mid(&self) -> Option<f64> {
        self.points.last().map(|p| p.mid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_from_book_uses_top_of_book() {
        let book = BookSnapshot {
            bids: vec![
                BookLevel { price: 99.0, qty: 2.0 },
                BookLevel { price: 98.0, qty: 3.0 },
            ],
            asks: vec![BookLevel { price: 101.0, qty: 1.5 }],
        };

        let p = Point::from_book(1_000, book);
        assert_eq!(p.mid, 100.0);
        assert_eq!(p.spread, 2.0);
        assert_eq!(p.bid_volume, 5.0);
        assert_eq!(p.ask_volume, 1.5);
        assert_eq!(p.traded_volume(), Some(6.5));
    }

    #[test]
    fn empty_book_yields_non_finite_mid() {
        let p = Point::from_book(1_000, BookSnapshot::default());
        assert!(!p.mid.is_finite());
        assert_eq!(p.traded_volume(), None);
    }

    #[test]
    fn quality_flags_serialize_screaming() {
        let s = serde_json::to_string(&QualityFlag::AfterSkip).unwrap();
        assert_eq!(s, "\"AFTER_SKIP\"");
    }
}
