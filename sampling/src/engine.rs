//! Shared entry point for feed and metric collaborators.
//!
//! Each symbol lives behind its own mutex; the symbol map lock is only held
//! long enough to find or create that entry, so unrelated symbols never wait
//! on each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::config::ValidatedConfig;
use crate::error::IngestError;
use crate::idhr::{self, IdhrOutcome, RangeMode};
use crate::metrics::Counters;
use crate::session::SessionDoc;
use crate::shift::{ShiftDetector, ShiftUpdate, ShiftWindowState};
use crate::sink::{CoreEvent, Persistence};
use crate::store::{IngestStats, SymbolSampler};
use crate::streams::StreamsState;
use crate::time::Clock;
use crate::types::{Mark, Point, Symbol};

/// Everything owned by one symbol.
pub struct SymbolCore {
    sampler: SymbolSampler,
    shift: ShiftDetector,
    session: Option<SessionDoc>,
}

impl SymbolCore {
    fn new(cfg: &ValidatedConfig) -> Self {
        Self {
            sampler: SymbolSampler::new(cfg),
            shift: ShiftDetector::new(cfg.shift),
            session: None,
        }
    }
}

pub struct MarketCore {
    cfg: Arc<ValidatedConfig>,
    clock: Arc<dyn Clock>,
    counters: Counters,
    persistence: Persistence,
    symbols: RwLock<HashMap<Symbol, Arc<Mutex<SymbolCore>>>>,
}

impl MarketCore {
    pub fn new(cfg: ValidatedConfig, clock: Arc<dyn Clock>, persistence: Persistence) -> Self {
        info!(
            windows = cfg.windows.len(),
            expected_points = cfg.expected_points(),
            persistence = ?persistence,
            "market core initialized"
        );

        Self {
            cfg: Arc::new(cfg),
            clock,
            counters: Counters::default(),
            persistence,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, symbol: &Symbol) -> Arc<Mutex<SymbolCore>> {
        if let Some(core) = self.symbols.read().get(symbol) {
            return Arc::clone(core);
        }

        let mut map = self.symbols.write();
        let core = map.entry(symbol.clone()).or_insert_with(|| {
            debug!(symbol = %symbol, "tracking new symbol");
            Arc::new(Mutex::new(SymbolCore::new(&self.cfg)))
        });
        Arc::clone(core)
    }

    fn existing(&self, symbol: &Symbol) -> Option<Arc<Mutex<SymbolCore>>> {
        self.symbols.read().get(symbol).cloned()
    }

    /// Runs `f` under the symbol's lock, if the symbol is tracked.
    fn read<T>(&self, symbol: &Symbol, f: impl FnOnce(&SymbolCore) -> T) -> Option<T> {
        let core = self.existing(symbol)?;
        let guard = core.lock();
        Some(f(&*guard))
    }

    /// Ingests one point. A returned mark has already been retained in every
    /// window and handed to the persistence sink.
    ///
    /// Events are published under the symbol's lock, so the sink sees one
    /// symbol's marks in emission order whatever the number of writers.
    #[instrument(skip(self, symbol, point), fields(symbol = %symbol, ts_ms = point.ts_ms))]
    pub fn collect(&self, symbol: &Symbol, point: Point) -> Result<Option<Arc<Mark>>, IngestError> {
        let core = self.entry(symbol);
        let mut core = core.lock();

        let before = core.sampler.stats().duplicates;
        let result = core.sampler.collect(point);
        Counters::add(
            &self.counters.points_duplicated,
            core.sampler.stats().duplicates - before,
        );

        match &result {
            Ok(mark) => {
                Counters::incr(&self.counters.points_accepted);
                if let Some(mark) = mark {
                    self.publish_mark(symbol, mark);
                }
            }
            Err(_) => Counters::incr(&self.counters.points_rejected),
        }

        result
    }

    /// Closes the symbol's open cycle if the clock has passed its end.
    pub fn flush_due(&self, symbol: &Symbol) -> Option<Arc<Mark>> {
        let core = self.existing(symbol)?;
        let now_ms = self.clock.now_ms();

        let mut core = core.lock();
        let mark = core.sampler.flush(now_ms)?;
        self.publish_mark(symbol, &mark);
        Some(mark)
    }

    /// [`MarketCore::flush_due`] over every tracked symbol.
    pub fn flush_all_due(&self) -> Vec<(Symbol, Arc<Mark>)> {
        self.symbols()
            .into_iter()
            .filter_map(|s| self.flush_due(&s).map(|m| (s, m)))
            .collect()
    }

    fn publish_mark(&self, symbol: &Symbol, mark: &Arc<Mark>) {
        Counters::incr(&self.counters.marks_emitted);
        Counters::add(&self.counters.cycles_skipped, mark.health.skipped_cycles);

        self.persistence.publish(
            CoreEvent::Mark {
                symbol: symbol.clone(),
                mark: Arc::clone(mark),
            },
            &self.counters,
        );
    }

    /// Drives the shift detector with this cycle's metric.
    #[instrument(skip(self, symbol), fields(symbol = %symbol))]
    pub fn feed_metric(
        &self,
        symbol: &Symbol,
        cycle_ts_ms: u64,
        current: f64,
        reference: f64,
        price: f64,
    ) -> ShiftUpdate {
        let core = self.entry(symbol);
        let mut core = core.lock();
        let update = core.shift.feed(cycle_ts_ms, current, reference, price);

        Counters::incr(&self.counters.metric_cycles);
        if let Some(stamp) = update.stamp {
            Counters::incr(&self.counters.shifts_fired);
            self.persistence.publish(
                CoreEvent::Shift {
                    symbol: symbol.clone(),
                    stamp,
                },
                &self.counters,
            );
        }

        update
    }

    /// Records an auxiliary metric in the symbol's prev/cur/greatest trackers.
    pub fn track_metric(&self, symbol: &Symbol, name: &str, value: f64) {
        self.entry(symbol).lock().shift.streams_mut().track(name, value);
    }

    /// Sets the opening reference used to anchor the symbol's IDHR range.
    pub fn set_session(&self, doc: SessionDoc) {
        let symbol = doc.symbol.clone();
        info!(
            symbol = %symbol,
            reference = doc.opening_reference.price,
            "session opening reference set"
        );
        self.entry(&symbol).lock().session = Some(doc);
    }

    pub fn get_marks(&self, symbol: &Symbol, window: &str) -> Vec<Arc<Mark>> {
        self.read(symbol, |core| core.sampler.window(window).map(|w| w.marks()))
            .flatten()
            .unwrap_or_default()
    }

    pub fn get_points(&self, symbol: &Symbol, window: &str) -> Vec<Point> {
        self.read(symbol, |core| core.sampler.window(window).map(|w| w.points()))
            .flatten()
            .unwrap_or_default()
    }

    /// IDHR nuclei over the configured window's point history.
    ///
    /// The range is anchored on the session's opening reference when one is set.
    pub fn get_nuclei(&self, symbol: &Symbol) -> IdhrOutcome {
        let snapshot = self.read(symbol, |core| {
            let points = core
                .sampler
                .window(&self.cfg.idhr_window)
                .map(|w| w.points())
                .unwrap_or_default();
            (points, core.session.as_ref().map(|s| s.opening_reference.price))
        });
        let Some((points, reference)) = snapshot else {
            return IdhrOutcome::NoData;
        };

        let mode = match reference {
            Some(reference) => RangeMode::Anchored {
                reference,
                band_pct: self.cfg.idhr_band_pct,
            },
            None => RangeMode::Observed,
        };

        idhr::build(&points, mode, &self.cfg.idhr)
    }

    pub fn get_streams(&self, symbol: &Symbol) -> Option<StreamsState> {
        self.read(symbol, |core| core.shift.streams().clone())
    }

    pub fn get_shift_window_state(&self, symbol: &Symbol) -> Option<ShiftWindowState> {
        self.read(symbol, |core| core.shift.window_state().clone())
    }

    pub fn ingest_stats(&self, symbol: &Symbol) -> Option<IngestStats> {
        self.read(symbol, |core| core.sampler.stats())
    }

    /// Tracked symbols, sorted.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = self.symbols.read().keys().cloned().collect();
        out.sort();
        out
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplingConfig;
    use crate::idhr::PriceRange;
    use crate::sink::ChannelSink;
    use crate::time::ManualClock;

    const CYCLE: u64 = 40_000;

    fn core_with(clock: ManualClock, persistence: Persistence) -> MarketCore {
        let cfg = SamplingConfig::default().validate().unwrap();
        MarketCore::new(cfg, Arc::new(clock), persistence)
    }

    fn core() -> MarketCore {
        core_with(ManualClock::new(0), Persistence::Disabled)
    }

    #[test]
    fn unknown_symbols_read_as_empty() {
        let core = core();
        let sym = Symbol::from("BTCUSDT");

        assert!(core.get_marks(&sym, "30m").is_empty());
        assert!(core.get_points(&sym, "30m").is_empty());
        assert_eq!(core.get_nuclei(&sym), IdhrOutcome::NoData);
        assert!(core.get_streams(&sym).is_none());
        assert!(core.get_shift_window_state(&sym).is_none());
        assert!(core.flush_due(&sym).is_none());
        assert!(core.symbols().is_empty());
    }

    #[test]
    fn flush_due_follows_the_injected_clock() {
        let clock = ManualClock::new(0);
        let core = core_with(clock.clone(), Persistence::Disabled);
        let sym = Symbol::from("BTCUSDT");

        core.collect(&sym, Point::new(1_000, 100.0)).unwrap();
        clock.set(CYCLE - 1);
        assert!(core.flush_all_due().is_empty());

        clock.set(CYCLE);
        let flushed = core.flush_all_due();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, sym);
        assert_eq!(core.get_marks(&sym, "3h").len(), 1);
        assert_eq!(core.counters().snapshot().marks_emitted, 1);
    }

    #[test]
    fn nuclei_anchor_on_session_reference() {
        let core = core();
        let sym = Symbol::from("BTCUSDT");

        for i in 0..8u64 {
            core.collect(&sym, Point::new(i * 5_000, 100.0 + i as f64 * 0.1)).unwrap();
        }
        core.collect(&sym, Point::new(CYCLE, 100.0)).unwrap();

        let observed = core.get_nuclei(&sym);
        let bins = observed.bins().unwrap();
        assert!((bins.range.min - 100.0).abs() < 1e-9);
        assert!((bins.range.max - 100.7).abs() < 1e-9);

        core.set_session(SessionDoc::new(sym.clone(), 100.0, 0).unwrap());
        let anchored = core.get_nuclei(&sym);
        assert_eq!(anchored.bins().unwrap().range, PriceRange { min: 95.0, max: 105.0 });
    }

    #[test]
    fn anchored_nuclei_follow_price_away_from_the_open() {
        let core = core();
        let sym = Symbol::from("BTCUSDT");
        core.set_session(SessionDoc::new(sym.clone(), 100.0, 0).unwrap());

        for i in 0..24u64 {
            core.collect(&sym, Point::new(i * 5_000, 110.0 + i as f64 * 0.15)).unwrap();
        }
        core.collect(&sym, Point::new(3 * CYCLE, 113.5)).unwrap();

        let outcome = core.get_nuclei(&sym);
        let bins = outcome.bins().unwrap();
        assert_eq!(bins.points_used, 24);
        assert_eq!(bins.clamped, 0);
        assert_eq!(bins.range.min, 95.0);
        assert!(bins.range.max > 113.0);
        assert!(bins.primary_mass.iter().filter(|&&m| m > 0.0).count() > 1);
    }

    #[test]
    fn counters_track_ingestion_outcomes() {
        let core = core();
        let sym = Symbol::from("ETHUSDT");

        core.collect(&sym, Point::new(5_000, 1.0)).unwrap();
        core.collect(&sym, Point::new(5_000, 1.0)).unwrap();
        assert!(core.collect(&sym, Point::new(1_000, 1.0)).is_err());

        let snap = core.counters().snapshot();
        assert_eq!(snap.points_accepted, 2);
        assert_eq!(snap.points_duplicated, 1);
        assert_eq!(snap.points_rejected, 1);
        assert_eq!(core.ingest_stats(&sym).unwrap().rejected, 1);
    }

    #[tokio::test]
    async fn every_mark_and_shift_is_published_once() {
        let (sink, mut rx) = ChannelSink::new(64);
        let core = core_with(ManualClock::new(0), Persistence::Enabled(Arc::new(sink)));
        let sym = Symbol::from("BTCUSDT");

        for c in 0..3u64 {
            core.collect(&sym, Point::new(c * CYCLE, 100.0)).unwrap();
        }
        for c in 0..5u64 {
            core.feed_metric(&sym, c * CYCLE, 100.4, 100.0, 100.0);
        }

        let mut marks = 0;
        let mut shifts = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                CoreEvent::Mark { .. } => marks += 1,
                CoreEvent::Shift { stamp, .. } => {
                    shifts += 1;
                    assert_eq!(stamp.ts_ms, 4 * CYCLE);
                }
            }
        }

        assert_eq!(marks, 2);
        assert_eq!(shifts, 1);
        assert_eq!(core.counters().snapshot().sink_events, 3);
    }

    #[test]
    fn tracked_metrics_show_up_in_streams() {
        let core = core();
        let sym = Symbol::from("BTCUSDT");

        core.track_metric(&sym, "momentum", 1.2);
        core.track_metric(&sym, "momentum", 0.8);

        let streams = core.get_streams(&sym).unwrap();
        let t = streams.tracker("momentum").unwrap();
        assert_eq!(t.cur, Some(0.8));
        assert_eq!(t.greatest, Some(1.2));
    }
}
