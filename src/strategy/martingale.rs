use chrono::{DateTime, Duration, Utc};

use crate::config::{MartingaleConfig, SafetyConfig};
use crate::ledger::{Position, Side};

use super::safety;

/// Outcome of one step-add evaluation. A refusal is a normal result, not
/// an error; the reason string is operator-facing.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDecision {
    Add { reason: String },
    Hold { reason: String },
}

impl StepDecision {
    pub fn should_add(&self) -> bool {
        matches!(self, StepDecision::Add { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            StepDecision::Add { reason } | StepDecision::Hold { reason } => reason,
        }
    }
}

/// Decision logic for entering and laddering Martingale positions. Holds
/// the immutable config tables; all state lives in the ledger.
pub struct MartingaleStrategy {
    martingale: MartingaleConfig,
    safety: SafetyConfig,
}

impl MartingaleStrategy {
    pub fn new(martingale: MartingaleConfig, safety: SafetyConfig) -> Self {
        Self { martingale, safety }
    }

    pub fn max_steps(&self) -> u32 {
        self.martingale.max_steps()
    }

    /// Margin amount for a rung (0-based index into the step table).
    pub fn step_size(&self, step_index: usize) -> f64 {
        self.martingale.steps.get(step_index).copied().unwrap_or(0.0)
    }

    /// Base-asset quantity for a fresh step-1 entry at `price`.
    pub fn entry_quantity(&self, price: f64) -> f64 {
        let leverage = self.martingale.leverage.max(1) as f64;
        self.step_size(0) * leverage / price
    }

    /// Quantity for the next rung of an existing position at `price`.
    pub fn add_quantity(&self, step_index: usize, price: f64) -> f64 {
        let leverage = self.martingale.leverage.max(1) as f64;
        self.step_size(step_index) * leverage / price
    }

    /// Decide whether `pos` should take its next rung. Conditions are
    /// evaluated in order and short-circuit on the first refusal:
    /// max steps, cooldown, RSI circuit breaker (step 4+), price trigger.
    pub fn evaluate_step(
        &self,
        pos: &Position,
        current_price: f64,
        volatility: f64,
        rsi: f64,
        now: DateTime<Utc>,
    ) -> StepDecision {
        // 1. Max steps
        if pos.step >= self.max_steps() {
            return StepDecision::Hold {
                reason: "Max steps reached".to_string(),
            };
        }

        // 2. Cooldown for the upcoming rung
        let wait = Duration::minutes(self.martingale.step_wait_times[pos.step as usize] as i64);
        let elapsed = now - pos.last_add_time;
        if elapsed < wait {
            let remaining = wait - elapsed;
            return StepDecision::Hold {
                reason: format!("Waiting for cooldown ({}s remaining)", remaining.num_seconds()),
            };
        }

        // 3. Circuit breaker (deep rungs only)
        if let Some(veto) = safety::circuit_breaker_veto(rsi, pos.step, &self.safety) {
            return StepDecision::Hold { reason: veto };
        }

        // 4. Price-distance trigger, widened by recent volatility
        let base_distance = self.martingale.step_distances[pos.step as usize];
        let multiplier = self.volatility_multiplier(volatility);
        let required_move = base_distance * multiplier;

        let triggered = match pos.side {
            // A short adds when price has risen against it
            Side::Short => current_price >= pos.entry_price * (1.0 + required_move / 100.0),
            Side::Long => current_price <= pos.entry_price * (1.0 - required_move / 100.0),
        };

        if triggered {
            StepDecision::Add {
                reason: format!(
                    "Price target hit (dist {:.2}%, vol mult {:.1}x)",
                    required_move, multiplier
                ),
            }
        } else {
            StepDecision::Hold {
                reason: "Price target not reached".to_string(),
            }
        }
    }

    /// Spacing multiplier: high recent volatility widens the gap before
    /// the next rung. Identity when volatility is zero or unknown.
    pub fn volatility_multiplier(&self, volatility: f64) -> f64 {
        if volatility > 0.0 {
            (1.0 + volatility * 0.5).min(self.safety.max_vol_multiplier)
        } else {
            1.0
        }
    }

    /// Advisory trigger price for the next rung, cached on the position
    /// for display. Identity volatility; the live check applies the
    /// current multiplier.
    pub fn next_step_price(&self, pos: &Position) -> Option<f64> {
        if pos.step >= self.max_steps() {
            return None;
        }
        let distance = self.martingale.step_distances[pos.step as usize];
        Some(match pos.side {
            Side::Short => pos.entry_price * (1.0 + distance / 100.0),
            Side::Long => pos.entry_price * (1.0 - distance / 100.0),
        })
    }

    /// Best-effort mapping from externally observed margin back to a rung
    /// number. Walks the cumulative step table with a 5% tolerance for
    /// fees and price drift; margin beyond the whole table maps to the
    /// deepest rung. Never authoritative: the ledger's step only changes
    /// when this disagrees with it.
    pub fn infer_step_from_margin(&self, margin: f64) -> u32 {
        let tolerance = 0.95;
        let mut cumulative = 0.0;

        for (i, step_size) in self.martingale.steps.iter().enumerate() {
            cumulative += step_size;
            if margin <= cumulative / tolerance {
                return i as u32 + 1;
            }
        }

        self.max_steps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(steps: Vec<f64>) -> MartingaleConfig {
        let n = steps.len();
        MartingaleConfig {
            leverage: 3,
            steps,
            step_distances: vec![2.0; n],
            step_wait_times: vec![5; n],
            max_positions: 5,
            min_pump_percent: 30.0,
            min_rsi_entry: 70.0,
            take_profit_percent: 1.5,
        }
    }

    fn safety() -> SafetyConfig {
        SafetyConfig {
            rsi_circuit_breaker: 90.0,
            max_vol_multiplier: 2.0,
        }
    }

    fn strategy() -> MartingaleStrategy {
        MartingaleStrategy::new(config(vec![10.0; 9]), safety())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    /// Cooldown long expired, benign RSI, price well past every trigger.
    fn ready_position(step: u32) -> Position {
        Position {
            symbol: "XYZUSDT".to_string(),
            side: Side::Short,
            step,
            entry_price: 100.0,
            quantity: 1.0,
            total_margin: 10.0 * step as f64,
            next_step_price: None,
            stop_loss: None,
            take_profit: None,
            last_add_time: now() - Duration::hours(1),
        }
    }

    #[test]
    fn refuses_at_max_steps() {
        let decision = strategy().evaluate_step(&ready_position(9), 200.0, 0.0, 50.0, now());
        assert!(!decision.should_add());
        assert!(decision.reason().contains("Max steps"));
    }

    #[test]
    fn refuses_during_cooldown() {
        let mut pos = ready_position(2);
        pos.last_add_time = now() - Duration::minutes(1);

        let decision = strategy().evaluate_step(&pos, 200.0, 0.0, 50.0, now());
        assert!(!decision.should_add());
        assert!(decision.reason().contains("cooldown"));
    }

    #[test]
    fn circuit_breaker_vetoes_deep_steps() {
        let decision = strategy().evaluate_step(&ready_position(4), 200.0, 0.0, 95.0, now());
        assert!(!decision.should_add());
        assert!(decision.reason().contains("circuit breaker"));
    }

    #[test]
    fn circuit_breaker_ignores_shallow_steps() {
        // Same hot RSI at step 3: price trigger decides instead
        let decision = strategy().evaluate_step(&ready_position(3), 200.0, 0.0, 95.0, now());
        assert!(decision.should_add());
    }

    #[test]
    fn refuses_when_price_target_unmet() {
        // 2% required; price only 1% adverse
        let decision = strategy().evaluate_step(&ready_position(2), 101.0, 0.0, 50.0, now());
        assert!(!decision.should_add());
        assert!(decision.reason().contains("not reached"));
    }

    #[test]
    fn adds_when_price_target_hit() {
        let decision = strategy().evaluate_step(&ready_position(2), 102.0, 0.0, 50.0, now());
        assert!(decision.should_add());
    }

    #[test]
    fn volatility_widens_the_trigger() {
        let strat = strategy();
        // 2% base distance; volatility 1.0 -> multiplier 1.5 -> 3% required
        let decision = strat.evaluate_step(&ready_position(2), 102.0, 1.0, 50.0, now());
        assert!(!decision.should_add());

        let decision = strat.evaluate_step(&ready_position(2), 103.0, 1.0, 50.0, now());
        assert!(decision.should_add());
    }

    #[test]
    fn volatility_multiplier_identity_and_cap() {
        let strat = strategy();
        assert!((strat.volatility_multiplier(0.0) - 1.0).abs() < 1e-9);
        assert!((strat.volatility_multiplier(1.0) - 1.5).abs() < 1e-9);
        // Capped by safety.max_vol_multiplier
        assert!((strat.volatility_multiplier(10.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn infer_step_walks_cumulative_sizes() {
        let strat = MartingaleStrategy::new(config(vec![10.0, 10.0, 20.0]), safety());

        assert_eq!(strat.infer_step_from_margin(9.0), 1);
        // Within 5% tolerance of the first rung's cumulative 10
        assert_eq!(strat.infer_step_from_margin(10.5), 1);
        assert_eq!(strat.infer_step_from_margin(21.0), 2);
        // Beyond every cumulative size: deepest rung
        assert_eq!(strat.infer_step_from_margin(50.0), 3);
    }

    #[test]
    fn entry_quantity_uses_first_rung_and_leverage() {
        let strat = MartingaleStrategy::new(config(vec![10.0, 20.0]), safety());
        // 10 USDT margin x3 leverage at price 5 -> 6 units
        assert!((strat.entry_quantity(5.0) - 6.0).abs() < 1e-9);
        assert!((strat.add_quantity(1, 5.0) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn next_step_price_is_above_entry_for_shorts() {
        let strat = strategy();
        let pos = ready_position(1);
        let trigger = strat.next_step_price(&pos).unwrap();
        assert!((trigger - 102.0).abs() < 1e-9);

        assert_eq!(strat.next_step_price(&ready_position(9)), None);
    }
}
