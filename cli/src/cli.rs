use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use sampling::{
    bucket::CycleGrid,
    config::SamplingConfig,
    symbol_cache::SymbolInfo,
    types::{BookLevel, BookSnapshot, Point},
};

#[derive(Debug, Parser)]
#[clap(name = "sampler", version)]
pub struct Cli {
    /// Symbols to replay (comma-separated)
    #[clap(long, value_delimiter = ',', default_values_t = ["BTCUSDT".to_string()])]
    pub symbols: Vec<String>,

    /// Number of cycles to generate per symbol
    #[clap(long, default_value = "300")]
    pub cycles: u64,

    /// JSON config file; falls back to SAMPLER_* environment variables
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[clap(long)]
    pub json_logs: bool,

    /// Override the shift threshold (percent)
    #[clap(long)]
    pub epsilon_pct: Option<f64>,

    /// Starting mid price of the synthetic feed
    #[clap(long, default_value = "64000.0")]
    pub base_price: f64,

    /// Trend applied per cycle (percent)
    #[clap(long, default_value = "0.05")]
    pub drift_pct: f64,
}

pub(crate) fn load_config(cli: &Cli) -> anyhow::Result<SamplingConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let doc = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            SamplingConfig::from_json_str(&doc)?
        }
        None => SamplingConfig::from_env()?,
    };

    if let Some(eps) = cli.epsilon_pct {
        cfg.epsilon_pct = eps;
    }
    Ok(cfg)
}

/// Deterministic book-derived points for one cycle.
///
/// Mids trend by `drift_pct` per cycle with a small per-symbol wobble; every
/// 97th tick is dropped so gap accounting shows up in the output.
pub(crate) fn synthetic_cycle(
    grid: &CycleGrid,
    info: &SymbolInfo,
    salt: usize,
    cycle_start_ms: u64,
    cycle_index: u64,
    cli: &Cli,
) -> Vec<Point> {
    let n = grid.expected_points() as u64;

    (0..n)
        .filter(|i| (cycle_index * n + i + salt as u64) % 97 != 0)
        .map(|i| {
            let t = cycle_index as f64 + i as f64 / n as f64;
            let trend = 1.0 + cli.drift_pct / 100.0 * t;
            let wobble = 0.0008 * (t * 0.7 + salt as f64).sin();
            let mid = cli.base_price * (trend + wobble);

            let half = (mid * 0.00005).max(info.tick_size);
            let book = BookSnapshot {
                bids: vec![BookLevel {
                    price: info.round_to_tick(mid - half),
                    qty: 1.0 + (i % 3) as f64,
                }],
                asks: vec![BookLevel {
                    price: info.round_to_tick(mid + half),
                    qty: 1.5 + (i % 2) as f64,
                }],
            };
            Point::from_book(cycle_start_ms + i * grid.point_interval_ms(), book)
        })
        .collect()
}
