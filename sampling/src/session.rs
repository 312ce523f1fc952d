//! Session documents carrying a symbol's opening reference price.
//!
//! Producers emit the current schema; older shapes are upgraded by
//! [`migrate`] instead of being probed for at read time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionDocError;
use crate::types::Symbol;

pub const CURRENT_VERSION: u64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningReference {
    pub price: f64,
    pub ts_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDoc {
    pub version: u64,
    pub symbol: Symbol,
    pub opening_reference: OpeningReference,
}

/// v1: flat `{ symbol, open, openTs }`, no version field.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDocV1 {
    symbol: Symbol,
    open: f64,
    #[serde(default)]
    open_ts: u64,
}

impl SessionDoc {
    pub fn new(symbol: Symbol, price: f64, ts_ms: u64) -> Result<Self, SessionDocError> {
        let doc = Self {
            version: CURRENT_VERSION,
            symbol,
            opening_reference: OpeningReference { price, ts_ms },
        };
        doc.check()?;
        Ok(doc)
    }

    pub fn parse(raw: &str) -> Result<Self, SessionDocError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| SessionDocError::Decode(e.to_string()))?;
        migrate(value)
    }

    fn check(&self) -> Result<(), SessionDocError> {
        let price = self.opening_reference.price;
        if !price.is_finite() || price <= 0.0 {
            return Err(SessionDocError::InvalidReference(price));
        }
        if self.symbol.as_str().is_empty() {
            return Err(SessionDocError::Field("symbol"));
        }
        Ok(())
    }
}

/// Upgrades any known document shape to the current schema.
pub fn migrate(raw: Value) -> Result<SessionDoc, SessionDocError> {
    let obj = raw.as_object().ok_or(SessionDocError::NotAnObject)?;
    let version = match obj.get("version") {
        None => 1,
        Some(v) => v.as_u64().ok_or(SessionDocError::Field("version"))?,
    };

    let decode = |e: serde_json::Error| SessionDocError::Decode(e.to_string());
    let doc = match version {
        1 => {
            let v1: SessionDocV1 = serde_json::from_value(raw).map_err(decode)?;
            SessionDoc {
                version: CURRENT_VERSION,
                symbol: v1.symbol,
                opening_reference: OpeningReference {
                    price: v1.open,
                    ts_ms: v1.open_ts,
                },
            }
        }
        CURRENT_VERSION => serde_json::from_value(raw).map_err(decode)?,
        other => return Err(SessionDocError::UnsupportedVersion(other)),
    };

    doc.check()?;
    Ok(doc)
}
