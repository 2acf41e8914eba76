use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::binance::Ticker24h;
use crate::config::ScanningConfig;

/// A symbol that passed the pump filters, ranked for entry evaluation.
/// Transient: rebuilt from the ticker snapshot every tick, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub symbol: String,
    pub price: f64,
    /// 24h change in percent.
    pub change_24h: f64,
    /// 24h quote volume in USDT.
    pub volume_24h: f64,
}

/// Stateless ranking of a 24h ticker snapshot into short candidates.
pub struct Scanner {
    cfg: ScanningConfig,
}

impl Scanner {
    pub fn new(cfg: ScanningConfig) -> Self {
        Self { cfg }
    }

    /// Filter and rank: quote-asset suffix, blacklist, minimum volume,
    /// then biggest 24h pumps first, truncated to the configured top-N.
    pub fn scan(&self, tickers: &[Ticker24h]) -> Vec<Opportunity> {
        let mut candidates: Vec<Opportunity> = tickers
            .iter()
            .filter(|t| t.symbol.len() > self.cfg.quote_asset.len())
            .filter(|t| t.symbol.ends_with(&self.cfg.quote_asset))
            .filter(|t| !self.is_blacklisted(&t.symbol))
            .filter(|t| t.quote_volume >= self.cfg.min_volume_usdt)
            .map(|t| Opportunity {
                symbol: t.symbol.clone(),
                price: t.last_price,
                change_24h: t.price_change,
                volume_24h: t.quote_volume,
            })
            .collect();

        candidates.sort_by_key(|c| std::cmp::Reverse(OrderedFloat(c.change_24h)));
        candidates.truncate(self.cfg.top_pairs);
        candidates
    }

    fn is_blacklisted(&self, symbol: &str) -> bool {
        self.cfg.blacklist.iter().any(|b| b == symbol)
    }
}
