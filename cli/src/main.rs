pub mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};

use cli::*;
use common::logger::{TraceId, annotate_span, child_span, init_logger, root_span};
use sampling::{
    bucket::align_down,
    engine::MarketCore,
    session::SessionDoc,
    sink::{ChannelSink, CoreEvent, Persistence},
    symbol_cache::{SymbolInfo, SymbolInfoCache},
    time::{ManualClock, SystemClock, now_ms},
    types::{Mark, Symbol},
};

const SINK_CAPACITY: usize = 4_096;
const SYMBOL_INFO_TTL_MS: u64 = 60_000;
const DEFAULT_TICK: f64 = 0.01;

#[derive(Debug, Default)]
struct Persisted {
    marks: u64,
    shifts: u64,
}

/// Stand-in for a storage writer: drains the write-behind channel.
fn spawn_drain(mut rx: mpsc::Receiver<CoreEvent>) -> tokio::task::JoinHandle<Persisted> {
    tokio::spawn(
        async move {
            let mut persisted = Persisted::default();
            while let Some(event) = rx.recv().await {
                match &event {
                    CoreEvent::Mark { symbol, mark } => {
                        persisted.marks += 1;
                        debug!(symbol = %symbol, started_at_ms = mark.started_at_ms, "mark persisted");
                    }
                    CoreEvent::Shift { symbol, stamp } => {
                        persisted.shifts += 1;
                        info!(symbol = %symbol, delta_pct = stamp.delta_pct, "shift persisted");
                    }
                }
            }
            persisted
        }
        .instrument(child_span("drain")),
    )
}

/// Momentum of the latest mark against the oldest one still in the shortest window.
fn feed_momentum(core: &MarketCore, symbol: &Symbol, mark: &Mark) {
    let shortest = &core.config().windows[0].name;
    let reference = core
        .get_marks(symbol, shortest)
        .first()
        .and_then(|m| m.first_mid());

    let (Some(current), Some(reference)) = (mark.last_mid(), reference) else {
        return;
    };
    core.track_metric(symbol, "momentum", current / reference);
    core.feed_metric(symbol, mark.started_at_ms, current, reference, current);
}

fn summarize(core: &MarketCore) -> Value {
    let symbols: Vec<Value> = core
        .symbols()
        .iter()
        .map(|symbol| {
            let windows: serde_json::Map<String, Value> = core
                .config()
                .windows
                .iter()
                .map(|w| {
                    let marks = core.get_marks(symbol, &w.name);
                    let health = marks.last().map(|m| m.health.clone());
                    (
                        w.name.clone(),
                        json!({
                            "marks": marks.len(),
                            "capacity": w.capacity,
                            "points": core.get_points(symbol, &w.name).len(),
                            "lastHealth": health,
                        }),
                    )
                })
                .collect();

            json!({
                "symbol": symbol,
                "windows": windows,
                "ingest": core.ingest_stats(symbol),
                "nuclei": core.get_nuclei(symbol),
                "streams": core.get_streams(symbol),
                "shiftWindow": core.get_shift_window_state(symbol),
            })
        })
        .collect();

    json!({
        "symbols": symbols,
        "counters": core.counters().snapshot(),
    })
}

async fn run(cli: Cli) -> anyhow::Result<Value> {
    let cfg = load_config(&cli)?.validate()?;
    let grid = cfg.grid;
    let start_ms = align_down(now_ms(), grid.cycle_duration_ms());

    let (sink, rx) = ChannelSink::new(SINK_CAPACITY);
    let drain = spawn_drain(rx);

    let clock = ManualClock::new(start_ms);
    let core = MarketCore::new(
        cfg,
        Arc::new(clock.clone()),
        Persistence::Enabled(Arc::new(sink)),
    );

    let mut infos = SymbolInfoCache::new(SystemClock, SYMBOL_INFO_TTL_MS);
    let mut feeds = Vec::new();
    for code in &cli.symbols {
        let symbol = Symbol::from(code.as_str());
        match infos.get_or_load(&symbol, |s| SymbolInfo::from_code(s.as_str(), DEFAULT_TICK)) {
            Some(info) => feeds.push((symbol, info.clone())),
            None => warn!(symbol = %symbol, "unrecognized symbol code; skipped"),
        }
    }
    anyhow::ensure!(!feeds.is_empty(), "no usable symbols");

    for (symbol, _) in &feeds {
        core.set_session(SessionDoc::new(symbol.clone(), cli.base_price, start_ms)?);
    }

    info!(symbols = feeds.len(), cycles = cli.cycles, "replay started");

    for c in 0..cli.cycles {
        let cycle_start = start_ms + c * grid.cycle_duration_ms();
        clock.set(cycle_start);

        for (salt, (symbol, info)) in feeds.iter().enumerate() {
            for point in synthetic_cycle(&grid, info, salt, cycle_start, c, &cli) {
                match core.collect(symbol, point) {
                    Ok(Some(mark)) => feed_momentum(&core, symbol, &mark),
                    Ok(None) => {}
                    Err(e) => warn!(symbol = %symbol, error = %e, "synthetic point rejected"),
                }
            }
        }
    }

    clock.set(start_ms + cli.cycles * grid.cycle_duration_ms());
    for (symbol, mark) in core.flush_all_due() {
        let span = child_span("final_flush");
        let _g = span.enter();
        annotate_span(symbol.as_str());
        feed_momentum(&core, &symbol, &mark);
    }

    let mut summary = summarize(&core);

    // Closes the channel so the drain task finishes.
    drop(core);
    let persisted = drain.await.context("drain task failed")?;
    summary["persisted"] = json!({ "marks": persisted.marks, "shifts": persisted.shifts });

    info!(marks = persisted.marks, shifts = persisted.shifts, "replay finished");
    Ok(summary)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger("sampler", cli.json_logs);

    let trace_id = TraceId::new();
    let summary = run(cli).instrument(root_span("replay", &trace_id)).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
