//! REST response types for the futures market-data endpoints.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{FeedError, Result};

/// Response from GET /fapi/v1/depth
///
/// Price and quantity arrive as strings to preserve precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    /// Snapshot sequence number; diffs bridge against this
    pub last_update_id: u64,

    /// Bid levels [price, quantity], best first
    pub bids: Vec<(String, String)>,

    /// Ask levels [price, quantity], best first
    pub asks: Vec<(String, String)>,
}

/// One-minute candle reduced to the fields the volatility estimator reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    /// Parse one kline entry from the raw heterogeneous array the endpoint
    /// returns. Indices: 2 = high, 3 = low, 4 = close, all decimal strings.
    pub fn from_kline_row(row: &[serde_json::Value]) -> Result<Self> {
        let field = |idx: usize| -> Result<Decimal> {
            let raw = row
                .get(idx)
                .and_then(|v| v.as_str())
                .ok_or_else(|| FeedError::Parse(format!("kline field {} missing", idx)))?;
            Decimal::from_str(raw)
                .map_err(|e| FeedError::Parse(format!("kline field {}: {}", idx, e)))
        };

        Ok(Self {
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
        })
    }
}
