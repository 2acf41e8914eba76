/// Standard floor-trader pivot levels for one period's high/low/close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportResistance {
    pub pivot: f64,
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

pub fn pivot_points(high: f64, low: f64, close: f64) -> SupportResistance {
    let p = (high + low + close) / 3.0;

    SupportResistance {
        pivot: p,
        r1: 2.0 * p - low,
        r2: p + (high - low),
        r3: high + 2.0 * (p - low),
        s1: 2.0 * p - high,
        s2: p - (high - low),
        s3: low - 2.0 * (high - p),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
}

/// Fibonacci retracement levels across a swing range, ordered from the
/// extreme the trend is retracing from.
pub fn fib_levels(high: f64, low: f64, trend: Trend) -> [f64; 6] {
    let diff = high - low;
    match trend {
        Trend::Up => [
            high,
            high - diff * 0.236,
            high - diff * 0.382,
            high - diff * 0.5,
            high - diff * 0.618,
            low,
        ],
        Trend::Down => [
            low,
            low + diff * 0.236,
            low + diff * 0.382,
            low + diff * 0.5,
            low + diff * 0.618,
            high,
        ],
    }
}
