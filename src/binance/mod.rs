pub mod auth;
pub mod client;
pub mod types;

pub use auth::BinanceAuth;
pub use client::BinanceClient;
pub use types::{ExchangePosition, Kline, OrderSide, Ticker24h};

use anyhow::Result;

/// Capability surface the engine needs from the exchange. Everything here
/// may fail with a transport error; callers confine failures to the
/// current tick. A mock implementation drives the engine in tests.
#[allow(async_fn_in_trait)]
pub trait ExchangeClient {
    async fn server_time(&self) -> Result<i64>;

    async fn price(&self, symbol: &str) -> Result<f64>;

    /// 24h rolling stats for every symbol on the exchange.
    async fn ticker_24h(&self) -> Result<Vec<Ticker24h>>;

    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Kline>>;

    /// All positions with non-zero size. The exchange's view is the source
    /// of truth for reconciliation.
    async fn open_positions(&self) -> Result<Vec<ExchangePosition>>;

    /// Market order; returns the average fill price, or 0.0 when the
    /// exchange does not report one in the immediate response.
    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: f64)
        -> Result<f64>;

    /// STOP_MARKET close-position order at `stop_price`.
    async fn place_stop_market(&self, symbol: &str, side: OrderSide, stop_price: f64)
        -> Result<()>;

    /// TAKE_PROFIT_MARKET close-position order at `stop_price`.
    async fn place_take_profit(&self, symbol: &str, side: OrderSide, stop_price: f64)
        -> Result<()>;
}
