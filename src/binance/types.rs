use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// 24h rolling window stats as delivered by `/fapi/v1/ticker/24hr`.
/// Numeric fields arrive as strings on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker24hRaw {
    pub symbol: String,
    #[serde(rename = "priceChangePercent")]
    pub price_change_percent: String,
    #[serde(rename = "lastPrice")]
    pub last_price: String,
    #[serde(rename = "quoteVolume")]
    pub quote_volume: String,
}

/// Parsed 24h stats consumed by the scanner.
#[derive(Debug, Clone, Serialize)]
pub struct Ticker24h {
    pub symbol: String,
    /// 24h change in percent.
    pub price_change: f64,
    pub last_price: f64,
    /// Quote-asset (USDT) volume.
    pub quote_volume: f64,
}

impl From<Ticker24hRaw> for Ticker24h {
    fn from(raw: Ticker24hRaw) -> Self {
        Self {
            symbol: raw.symbol,
            price_change: raw.price_change_percent.parse().unwrap_or(0.0),
            last_price: raw.last_price.parse().unwrap_or(0.0),
            quote_volume: raw.quote_volume.parse().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Kline {
    /// Parse one row of the klines response. The endpoint returns
    /// heterogenous arrays: `[openTime, "open", "high", "low", "close",
    /// "volume", ...]`.
    pub fn from_row(row: &serde_json::Value) -> Result<Self> {
        let arr = row
            .as_array()
            .ok_or_else(|| anyhow!("kline row is not an array"))?;
        if arr.len() < 6 {
            return Err(anyhow!("kline row too short: {} fields", arr.len()));
        }

        let num = |idx: usize| -> Result<f64> {
            arr[idx]
                .as_str()
                .ok_or_else(|| anyhow!("kline field {} is not a string", idx))?
                .parse::<f64>()
                .map_err(|e| anyhow!("kline field {}: {}", idx, e))
        };

        Ok(Self {
            open_time: arr[0]
                .as_i64()
                .ok_or_else(|| anyhow!("kline open time is not an integer"))?,
            open: num(1)?,
            high: num(2)?,
            low: num(3)?,
            close: num(4)?,
            volume: num(5)?,
        })
    }
}

/// One open position as reported by `/fapi/v2/positionRisk`, with wire
/// strings already parsed. `position_amt` keeps its sign: negative = short.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePosition {
    pub symbol: String,
    pub position_amt: f64,
    pub entry_price: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}
