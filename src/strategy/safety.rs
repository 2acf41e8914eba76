use crate::config::SafetyConfig;

/// Rung number from which the RSI circuit breaker becomes active. Early
/// rungs are allowed to add into strength; deep rungs are not.
const CIRCUIT_BREAKER_MIN_STEP: u32 = 4;

/// Hard veto against adding into a still-accelerating move. Returns the
/// refusal reason when the breaker trips, `None` when the add may proceed.
///
/// Deep in the sequence (step 4+) an RSI still above the configured limit
/// means the pump is parabolic; adding more margin there only feeds the
/// drawdown. Shallower steps are not gated.
pub fn circuit_breaker_veto(rsi: f64, step: u32, cfg: &SafetyConfig) -> Option<String> {
    if step >= CIRCUIT_BREAKER_MIN_STEP && rsi > cfg.rsi_circuit_breaker {
        return Some(format!(
            "RSI circuit breaker: {:.1} > {:.1}, waiting for cool-off",
            rsi, cfg.rsi_circuit_breaker
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SafetyConfig {
        SafetyConfig {
            rsi_circuit_breaker: 90.0,
            max_vol_multiplier: 2.0,
        }
    }

    #[test]
    fn breaker_trips_at_deep_steps_only() {
        assert!(circuit_breaker_veto(95.0, 4, &cfg()).is_some());
        assert!(circuit_breaker_veto(95.0, 8, &cfg()).is_some());
        // Same RSI, shallow step: no veto
        assert!(circuit_breaker_veto(95.0, 3, &cfg()).is_none());
        assert!(circuit_breaker_veto(95.0, 1, &cfg()).is_none());
    }

    #[test]
    fn breaker_respects_threshold() {
        assert!(circuit_breaker_veto(90.0, 5, &cfg()).is_none());
        assert!(circuit_breaker_veto(90.1, 5, &cfg()).is_some());
    }
}
