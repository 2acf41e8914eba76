/// A single price bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub name: &'static str,
    /// 1..=5, higher means stronger reversal evidence.
    pub strength: u8,
}

/// Scan the tail of a candle series for bearish reversal shapes. These are
/// confirmation signals for shorting into a pump, not entry triggers on
/// their own.
pub fn detect_bearish_reversal(candles: &[Candle]) -> Option<PatternMatch> {
    if candles.len() < 3 {
        return None;
    }

    let last = candles[candles.len() - 1];

    let body = (last.close - last.open).abs();
    let upper_wick = last.high - last.close.max(last.open);
    let total_range = last.high - last.low;

    // Shooting star / pin bar: long upper wick (>2x body) dominating the range
    if upper_wick > body * 2.0 && upper_wick > total_range * 0.5 {
        return Some(PatternMatch {
            name: "Shooting Star",
            strength: 4,
        });
    }

    // Bearish engulfing: red candle swallowing the prior green body
    let prev = candles[candles.len() - 2];
    let prev_green = prev.close > prev.open;
    let last_red = last.close < last.open;

    if prev_green && last_red && last.open > prev.close && last.close < prev.open {
        return Some(PatternMatch {
            name: "Bearish Engulfing",
            strength: 5,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn too_few_candles_is_no_match() {
        let candles = vec![candle(1.0, 1.1, 0.9, 1.05)];
        assert_eq!(detect_bearish_reversal(&candles), None);
    }

    #[test]
    fn detects_shooting_star() {
        let candles = vec![
            candle(100.0, 101.0, 99.5, 100.5),
            candle(100.5, 101.5, 100.0, 101.0),
            // Small body near the low, tall upper wick
            candle(101.0, 106.0, 100.8, 101.3),
        ];
        let m = detect_bearish_reversal(&candles).expect("pattern");
        assert_eq!(m.name, "Shooting Star");
        assert_eq!(m.strength, 4);
    }

    #[test]
    fn detects_bearish_engulfing() {
        let candles = vec![
            candle(100.0, 101.0, 99.5, 100.5),
            // Green candle
            candle(100.0, 102.2, 99.8, 102.0),
            // Red candle engulfing the prior body, modest wick
            candle(102.5, 102.8, 99.0, 99.5),
        ];
        let m = detect_bearish_reversal(&candles).expect("pattern");
        assert_eq!(m.name, "Bearish Engulfing");
        assert_eq!(m.strength, 5);
    }

    #[test]
    fn plain_continuation_is_no_match() {
        let candles = vec![
            candle(100.0, 101.0, 99.5, 100.8),
            candle(100.8, 101.8, 100.5, 101.5),
            candle(101.5, 102.5, 101.2, 102.3),
        ];
        assert_eq!(detect_bearish_reversal(&candles), None);
    }
}
