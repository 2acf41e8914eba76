use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::analysis::{self, Candle};
use crate::binance::{ExchangeClient, OrderSide};
use crate::config::Config;
use crate::ledger::{Position, PositionLedger, Side};
use crate::scanner::{Opportunity, Scanner};
use crate::strategy::{dynamic_target_price, MartingaleStrategy, StepDecision};
use crate::telegram::TelegramNotifier;

/// Quantity drift below this is ignored during reconciliation.
const QUANTITY_EPSILON: f64 = 0.0001;

/// Orchestrates one evaluation cycle per interval: reconcile the ledger
/// against the exchange, display state, manage open sequences, then scan
/// for a new entry. Ticks never overlap; a tick-level timeout keeps a hung
/// network call from wedging the loop.
pub struct BotEngine<C> {
    cfg: Arc<Config>,
    client: C,
    scanner: Scanner,
    strategy: MartingaleStrategy,
    ledger: PositionLedger,
    notifier: Option<TelegramNotifier>,
    tick_count: u64,
}

impl<C: ExchangeClient> BotEngine<C> {
    pub fn new(
        cfg: Arc<Config>,
        client: C,
        ledger: PositionLedger,
        notifier: Option<TelegramNotifier>,
    ) -> Self {
        let scanner = Scanner::new(cfg.scanning.clone());
        let strategy = MartingaleStrategy::new(cfg.martingale.clone(), cfg.safety.clone());

        Self {
            cfg,
            client,
            scanner,
            strategy,
            ledger,
            notifier,
            tick_count: 0,
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Main loop. Runs one tick per interval until the shutdown signal
    /// flips; the current tick always completes before the loop exits, so
    /// a stop can never land mid-write.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.scanning.interval_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let tick_budget = Duration::from_secs(self.cfg.system.tick_timeout_seconds);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    info!("Shutdown signal received, stopping");
                    break;
                }
            }

            // Ledger writes are synchronous and contain no await point, so
            // abandoning the future here cannot tear the state file.
            if tokio::time::timeout(tick_budget, self.tick()).await.is_err() {
                warn!("⏱️  Tick exceeded {}s budget, abandoning cycle", tick_budget.as_secs());
            }

            if *shutdown.borrow() {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    /// One evaluation cycle. Reconciliation strictly precedes every
    /// decision so nothing acts on stale adopted or removed positions.
    pub async fn tick(&mut self) {
        self.tick_count += 1;
        info!(
            "📊 Scan #{} | {} tracked positions",
            self.tick_count,
            self.ledger.len()
        );

        if let Err(e) = self.reconcile().await {
            error!("Failed to sync positions with exchange: {}", e);
        }

        self.display_positions().await;
        self.manage_positions().await;
        self.scan_and_enter().await;
    }

    /// Align the ledger with the exchange's authoritative open-position
    /// list: adopt unknown positions, sync drifted fields, prune symbols
    /// the exchange no longer reports. The exchange owns "open and how
    /// big"; the ledger owns the step interpretation.
    pub async fn reconcile(&self) -> Result<()> {
        let exchange_positions = self.client.open_positions().await?;

        let mut active: HashSet<String> = HashSet::new();
        for p in &exchange_positions {
            active.insert(p.symbol.clone());

            let leverage = if p.leverage < 1.0 { 1.0 } else { p.leverage };
            let quantity = p.position_amt.abs();
            // Presumed margin: notional over leverage
            let margin = quantity * p.entry_price / leverage;
            let inferred_step = self.strategy.infer_step_from_margin(margin);

            match self.ledger.get(&p.symbol) {
                Some(mut local) => {
                    if local.entry_price != p.entry_price {
                        local.entry_price = p.entry_price;
                        self.store(local.clone());
                    }

                    if local.step != inferred_step {
                        info!(
                            "🔄 Correcting step for {}: {} -> {} (margin ${:.2})",
                            p.symbol, local.step, inferred_step, margin
                        );
                        local.step = inferred_step;
                        self.store(local.clone());
                    }

                    if (local.quantity - quantity).abs() > QUANTITY_EPSILON {
                        local.quantity = quantity;
                        self.store(local.clone());
                    }
                }
                None => {
                    let side = if p.position_amt <= 0.0 { Side::Short } else { Side::Long };
                    let adopted = Position {
                        symbol: p.symbol.clone(),
                        side,
                        step: inferred_step,
                        entry_price: p.entry_price,
                        quantity,
                        total_margin: margin,
                        next_step_price: None,
                        stop_loss: None,
                        take_profit: None,
                        last_add_time: Utc::now(),
                    };
                    self.store(adopted);
                    info!(
                        "🆕 Adopted active position from exchange: {} (step {})",
                        p.symbol, inferred_step
                    );
                    if let Some(notifier) = &self.notifier {
                        let _ = notifier.notify_position_adopted(&p.symbol, inferred_step).await;
                    }
                }
            }
        }

        // Closed on exchange but still tracked locally: remove
        for pos in self.ledger.snapshot() {
            if !active.contains(&pos.symbol) {
                info!("✅ {} closed on exchange, dropping from ledger", pos.symbol);
                if let Err(e) = self.ledger.remove(&pos.symbol) {
                    error!("Failed to remove {}: {}", pos.symbol, e);
                }
                if let Some(notifier) = &self.notifier {
                    let _ = notifier.notify_position_closed(&pos.symbol).await;
                }
            }
        }

        Ok(())
    }

    async fn display_positions(&self) {
        let positions = self.ledger.snapshot();
        if positions.is_empty() {
            return;
        }

        info!("📈 Open positions ({}):", positions.len());
        for pos in &positions {
            match self.client.price(&pos.symbol).await {
                Ok(price) => {
                    let pnl = pos.unrealized_pnl(price);
                    let pnl_percent = if pos.total_margin > 0.0 {
                        pnl / pos.total_margin * 100.0
                    } else {
                        0.0
                    };
                    info!(
                        "   {}: Step {}/{} | Margin: ${:.2} | PnL: ${:.2} ({:+.2}%)",
                        pos.symbol,
                        pos.step,
                        self.strategy.max_steps(),
                        pos.total_margin,
                        pnl,
                        pnl_percent
                    );
                }
                Err(e) => {
                    warn!("   {}: Step {}/{} | price unavailable: {}",
                        pos.symbol, pos.step, self.strategy.max_steps(), e);
                }
            }
        }
    }

    /// Evaluate every open sequence for its next rung. Failures are
    /// per-symbol: one broken feed never blocks the others.
    async fn manage_positions(&self) {
        for pos in self.ledger.snapshot() {
            if let Err(e) = self.manage_position(&pos).await {
                warn!("⚠️  {}: step management skipped: {}", pos.symbol, e);
            }
        }
    }

    async fn manage_position(&self, pos: &Position) -> Result<()> {
        let price = self.client.price(&pos.symbol).await?;
        let klines = self
            .client
            .klines(
                &pos.symbol,
                &self.cfg.analysis.kline_interval,
                self.cfg.analysis.kline_limit,
            )
            .await?;

        let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
        let rsi = analysis::rsi(&closes, self.cfg.analysis.rsi_period);
        let volatility = analysis::realized_volatility(&closes);

        match self.strategy.evaluate_step(pos, price, volatility, rsi, Utc::now()) {
            StepDecision::Hold { reason } => {
                debug!("{}: holding ({})", pos.symbol, reason);
                Ok(())
            }
            StepDecision::Add { reason } => {
                info!("📐 {} step trigger: {}", pos.symbol, reason);
                self.add_step(pos, price).await
            }
        }
    }

    async fn add_step(&self, pos: &Position, price: f64) -> Result<()> {
        // 0-based index of the rung about to be filled
        let rung = pos.step as usize;
        let margin = self.strategy.step_size(rung);
        let quantity = self.strategy.add_quantity(rung, price);

        let order_side = match pos.side {
            Side::Short => OrderSide::Sell,
            Side::Long => OrderSide::Buy,
        };

        let fill = self
            .client
            .place_market_order(&pos.symbol, order_side, quantity)
            .await?;
        let fill = if fill == 0.0 { price } else { fill };

        let mut updated = pos.clone();
        updated.apply_fill(fill, quantity, margin, Utc::now());
        updated.next_step_price = self.strategy.next_step_price(&updated);
        updated.take_profit = Some(dynamic_target_price(
            updated.entry_price,
            updated.step,
            self.cfg.martingale.take_profit_percent,
            updated.side,
        ));
        self.store(updated.clone());

        info!(
            "➕ {} added step {}/{} | avg entry {:.4} | total margin ${:.2}",
            updated.symbol,
            updated.step,
            self.strategy.max_steps(),
            updated.entry_price,
            updated.total_margin
        );

        self.refresh_take_profit(&updated).await;

        if let Some(notifier) = &self.notifier {
            let _ = notifier
                .notify_step_added(
                    &updated.symbol,
                    updated.step,
                    self.strategy.max_steps(),
                    updated.entry_price,
                    updated.total_margin,
                )
                .await;
        }

        Ok(())
    }

    /// Refresh the resting close-position take-profit at the dynamic
    /// target. Best effort: the target stays advisory when the order is
    /// rejected.
    async fn refresh_take_profit(&self, pos: &Position) {
        let Some(target) = pos.take_profit else { return };

        let close_side = match pos.side {
            Side::Short => OrderSide::Buy,
            Side::Long => OrderSide::Sell,
        };

        if let Err(e) = self
            .client
            .place_take_profit(&pos.symbol, close_side, target)
            .await
        {
            warn!("Failed to place take-profit for {}: {}", pos.symbol, e);
        }
    }

    /// Scan the market and, capacity permitting, open a new sequence on
    /// the best remaining candidate.
    async fn scan_and_enter(&self) {
        if self.ledger.len() >= self.cfg.martingale.max_positions {
            debug!("Max positions reached, skipping scan");
            return;
        }

        info!("🔍 Scanning for pumped coins...");
        let tickers = match self.client.ticker_24h().await {
            Ok(tickers) => tickers,
            Err(e) => {
                warn!("Scan failed: {}", e);
                return;
            }
        };

        let opportunities = self.scanner.scan(&tickers);
        let Some(best) = opportunities
            .iter()
            .find(|o| !self.ledger.contains(&o.symbol))
        else {
            return;
        };

        info!(
            "🚀 Top pump: {} ({:+.2}%) vol ${:.0}",
            best.symbol, best.change_24h, best.volume_24h
        );

        if best.change_24h < self.cfg.martingale.min_pump_percent {
            debug!(
                "{} change {:.2}% below entry threshold {:.2}%",
                best.symbol, best.change_24h, self.cfg.martingale.min_pump_percent
            );
            return;
        }

        if let Err(e) = self.try_enter(best).await {
            warn!("Entry aborted for {}: {}", best.symbol, e);
        }
    }

    async fn try_enter(&self, opp: &Opportunity) -> Result<()> {
        let price = self.client.price(&opp.symbol).await?;
        let klines = self
            .client
            .klines(
                &opp.symbol,
                &self.cfg.analysis.kline_interval,
                self.cfg.analysis.kline_limit,
            )
            .await?;

        let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
        let rsi = analysis::rsi(&closes, self.cfg.analysis.rsi_period);
        if rsi < self.cfg.martingale.min_rsi_entry {
            info!(
                "{}: RSI {:.1} below entry floor {:.1}, not shorting",
                opp.symbol, rsi, self.cfg.martingale.min_rsi_entry
            );
            return Ok(());
        }

        let candles: Vec<Candle> = klines
            .iter()
            .map(|k| Candle {
                open: k.open,
                high: k.high,
                low: k.low,
                close: k.close,
                volume: k.volume,
            })
            .collect();
        if let Some(pattern) = analysis::detect_bearish_reversal(&candles) {
            info!(
                "🦅 {} reversal pattern: {} (strength {}/5)",
                opp.symbol, pattern.name, pattern.strength
            );
        }

        let quantity = self.strategy.entry_quantity(price);
        info!("🔴 SELL signal: {} | price {:.4} | qty {:.4}", opp.symbol, price, quantity);

        let fill = self
            .client
            .place_market_order(&opp.symbol, OrderSide::Sell, quantity)
            .await?;
        let entry_price = if fill == 0.0 {
            warn!(
                "API returned 0 fill price for {}, using ticker price {:.4}",
                opp.symbol, price
            );
            price
        } else {
            fill
        };

        let mut pos = Position {
            symbol: opp.symbol.clone(),
            side: Side::Short,
            step: 1,
            entry_price,
            quantity,
            total_margin: self.strategy.step_size(0),
            next_step_price: None,
            stop_loss: None,
            take_profit: None,
            last_add_time: Utc::now(),
        };
        pos.next_step_price = self.strategy.next_step_price(&pos);
        pos.take_profit = Some(dynamic_target_price(
            entry_price,
            pos.step,
            self.cfg.martingale.take_profit_percent,
            pos.side,
        ));
        self.store(pos.clone());
        info!("Position opened: {} (step 1)", pos.symbol);

        self.refresh_take_profit(&pos).await;

        if let Some(notifier) = &self.notifier {
            let _ = notifier
                .notify_position_opened(&pos.symbol, entry_price, quantity, pos.total_margin)
                .await;
        }

        Ok(())
    }

    /// Write-through upsert; persistence failures are logged, never
    /// propagated into the tick (the next reconciliation pass re-syncs).
    fn store(&self, pos: Position) {
        if let Err(e) = self.ledger.upsert(pos) {
            error!("Failed to persist position state: {}", e);
        }
    }
}
