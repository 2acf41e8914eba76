pub mod indicators;
pub mod patterns;
pub mod pivot;

pub use indicators::{ema, realized_volatility, rsi};
pub use patterns::{detect_bearish_reversal, Candle, PatternMatch};
pub use pivot::{fib_levels, pivot_points, SupportResistance, Trend};
