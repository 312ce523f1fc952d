//! In-memory market sampling core.
//!
//! Points are bucketed per symbol, rolled into fixed-duration cycle marks and
//! retained in several bounded windows. On top of that history the crate
//! derives IDHR density nuclei and runs a debounced shift detector.

pub mod bucket;
pub mod config;
pub mod engine;
pub mod error;
pub mod idhr;
pub mod metrics;
pub mod ring;
pub mod session;
pub mod shift;
pub mod sink;
pub mod store;
pub mod streams;
pub mod symbol_cache;
pub mod time;
pub mod types;
