use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::time::Clock;
use crate::types::Symbol;

const QUOTE_ASSETS: [&str; 5] = ["USDT", "USDC", "FDUSD", "BTC", "ETH"];

/// Static trading metadata of a symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: Symbol,
    pub base: String,
    pub quote: String,
    pub tick_size: f64,
}

impl SymbolInfo {
    /// Splits an exchange code such as `BTCUSDT` on a known quote asset suffix.
    pub fn from_code(code: &str, tick_size: f64) -> Option<Self> {
        let quote = QUOTE_ASSETS
            .iter()
            .find(|q| code.len() > q.len() && code.ends_with(*q))?;
        Some(Self {
            symbol: Symbol::from(code),
            base: code[..code.len() - quote.len()].to_string(),
            quote: (*quote).to_string(),
            tick_size,
        })
    }

    /// Rounds `price` to the nearest tick.
    pub fn round_to_tick(&self, price: f64) -> f64 {
        if self.tick_size > 0.0 && self.tick_size.is_finite() {
            (price / self.tick_size).round() * self.tick_size
        } else {
            price
        }
    }
}

struct Entry {
    info: SymbolInfo,
    inserted_ms: u64,
}

/// TTL cache of [`SymbolInfo`], owned by the caller and driven by an injected clock.
pub struct SymbolInfoCache<C: Clock> {
    clock: C,
    ttl_ms: u64,
    entries: HashMap<Symbol, Entry>,
}

impl<C: Clock> SymbolInfoCache<C> {
    pub fn new(clock: C, ttl_ms: u64) -> Self {
        Self {
            clock,
            ttl_ms,
            entries: HashMap::new(),
        }
    }

    /// Fresh entry for `symbol`; expired entries read as missing.
    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolInfo> {
        let now = self.clock.now_ms();
        self.entries
            .get(symbol)
            .filter(|e| !self.is_expired(e, now))
            .map(|e| &e.info)
    }

    pub fn insert(&mut self, info: SymbolInfo) {
        let inserted_ms = self.clock.now_ms();
        self.entries.insert(info.symbol.clone(), Entry { info, inserted_ms });
    }

    /// Returns the cached entry or loads, stores and returns a fresh one.
    pub fn get_or_load<F>(&mut self, symbol: &Symbol, load: F) -> Option<&SymbolInfo>
    where
        F: FnOnce(&Symbol) -> Option<SymbolInfo>,
    {
        if self.get(symbol).is_none() {
            let info = load(symbol)?;
            debug!(symbol = %symbol, "symbol info loaded");
            self.insert(info);
        }
        self.get(symbol)
    }

    /// Drops expired entries, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        let ttl_ms = self.ttl_ms;
        self.entries
            .retain(|_, e| now.saturating_sub(e.inserted_ms) < ttl_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, e: &Entry, now_ms: u64) -> bool {
        now_ms.saturating_sub(e.inserted_ms) >= self.ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn btc() -> SymbolInfo {
        SymbolInfo::from_code("BTCUSDT", 0.1).unwrap()
    }

    #[test]
    fn splits_known_quote_assets() {
        let info = btc();
        assert_eq!(info.base, "BTC");
        assert_eq!(info.quote, "USDT");

        let eth_btc = SymbolInfo::from_code("ETHBTC", 0.00001).unwrap();
        assert_eq!((eth_btc.base.as_str(), eth_btc.quote.as_str()), ("ETH", "BTC"));

        assert!(SymbolInfo::from_code("USDT", 0.1).is_none());
        assert!(SymbolInfo::from_code("FOOBAR", 0.1).is_none());
    }

    #[test]
    fn rounds_to_tick() {
        let info = btc();
        assert!((info.round_to_tick(64_000.07) - 64_000.1).abs() < 1e-9);
    }

    #[test]
    fn entries_expire_with_the_injected_clock() {
        let clock = ManualClock::new(0);
        let mut cache = SymbolInfoCache::new(clock.clone(), 1_000);
        let sym = Symbol::from("BTCUSDT");

        cache.insert(btc());
        clock.advance(999);
        assert!(cache.get(&sym).is_some());

        clock.advance(1);
        assert!(cache.get(&sym).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn get_or_load_reloads_after_expiry() {
        let clock = ManualClock::new(0);
        let mut cache = SymbolInfoCache::new(clock.clone(), 100);
        let sym = Symbol::from("BTCUSDT");
        let mut loads = 0;

        for _ in 0..3 {
            cache.get_or_load(&sym, |s| {
                loads += 1;
                SymbolInfo::from_code(s.as_str(), 0.1)
            });
        }
        assert_eq!(loads, 1);

        clock.advance(100);
        cache.get_or_load(&sym, |s| {
            loads += 1;
            SymbolInfo::from_code(s.as_str(), 0.1)
        });
        assert_eq!(loads, 2);

        assert!(cache.get_or_load(&Symbol::from("NOPE"), |_| None).is_none());
    }
}
