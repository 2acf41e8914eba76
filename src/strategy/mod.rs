pub mod martingale;
pub mod safety;
pub mod take_profit;

pub use martingale::{MartingaleStrategy, StepDecision};
pub use safety::circuit_breaker_veto;
pub use take_profit::{dynamic_target_percent, dynamic_target_price};
