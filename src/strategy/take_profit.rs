use crate::ledger::Side;

/// Take-profit percentage for a given rung. Heavy bags demand a larger
/// reward to justify the accumulated risk:
/// steps 1-3 base, steps 4-7 1.2x, steps 8+ 1.5x.
pub fn dynamic_target_percent(base_take_profit: f64, step: u32) -> f64 {
    let multiplier = if step >= 8 {
        1.5
    } else if step >= 4 {
        1.2
    } else {
        1.0
    };

    base_take_profit * multiplier
}

/// Exit price for the dynamic target. Advisory: recomputed on demand and
/// only becomes binding when the engine places a resting order at it.
pub fn dynamic_target_price(avg_entry: f64, step: u32, base_take_profit: f64, side: Side) -> f64 {
    let target_percent = dynamic_target_percent(base_take_profit, step);

    match side {
        Side::Short => avg_entry * (1.0 - target_percent / 100.0),
        Side::Long => avg_entry * (1.0 + target_percent / 100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_percent_escalates_with_step() {
        assert!((dynamic_target_percent(1.5, 1) - 1.5).abs() < 1e-9);
        assert!((dynamic_target_percent(1.5, 3) - 1.5).abs() < 1e-9);
        assert!((dynamic_target_percent(1.5, 4) - 1.8).abs() < 1e-9);
        assert!((dynamic_target_percent(1.5, 5) - 1.8).abs() < 1e-9);
        assert!((dynamic_target_percent(1.5, 7) - 1.8).abs() < 1e-9);
        assert!((dynamic_target_percent(1.5, 8) - 2.25).abs() < 1e-9);
        assert!((dynamic_target_percent(1.5, 9) - 2.25).abs() < 1e-9);
    }

    #[test]
    fn short_target_sits_below_entry() {
        let price = dynamic_target_price(100.0, 9, 1.5, Side::Short);
        assert!((price - 97.75).abs() < 1e-9);

        let shallow = dynamic_target_price(100.0, 1, 1.5, Side::Short);
        assert!((shallow - 98.5).abs() < 1e-9);
    }

    #[test]
    fn long_target_sits_above_entry() {
        let price = dynamic_target_price(100.0, 1, 1.5, Side::Long);
        assert!((price - 101.5).abs() < 1e-9);
    }
}
