// =============================================================================
// On-Balance Volume (OBV)
// =============================================================================
//
// Running total of volume signed by the bar's close-to-close direction:
// volume is added on up-bars, subtracted on down-bars, ignored when the
// close is unchanged. Used by the divergence cross-check alongside RSI and
// the cumulative volume delta.

use crate::types::Candle;

/// Compute the OBV series, one value per candle starting with the second bar.
///
/// Non-finite volumes count as zero so a single bad print does not poison
/// the whole series.
pub fn calculate_obv(candles: &[Candle]) -> Vec<f64> {
    if candles.len() < 2 {
        return Vec::new();
    }

    let mut obv = 0.0_f64;
    let mut result = Vec::with_capacity(candles.len() - 1);

    for w in candles.windows(2) {
        let volume = if w[1].volume.is_finite() { w[1].volume } else { 0.0 };
        if w[1].close > w[0].close {
            obv += volume;
        } else if w[1].close < w[0].close {
            obv -= volume;
        }
        result.push(obv);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle::new(0, close, close + 1.0, close - 1.0, close, volume)
    }

    #[test]
    fn obv_too_short() {
        assert!(calculate_obv(&[candle(100.0, 10.0)]).is_empty());
    }

    #[test]
    fn obv_accumulates_up_bars() {
        let candles = vec![candle(100.0, 5.0), candle(101.0, 10.0), candle(102.0, 20.0)];
        let series = calculate_obv(&candles);
        assert_eq!(series, vec![10.0, 30.0]);
    }

    #[test]
    fn obv_subtracts_down_bars() {
        let candles = vec![candle(100.0, 5.0), candle(99.0, 10.0), candle(98.0, 20.0)];
        let series = calculate_obv(&candles);
        assert_eq!(series, vec![-10.0, -30.0]);
    }

    #[test]
    fn obv_flat_bar_does_not_move() {
        let candles = vec![candle(100.0, 5.0), candle(100.0, 10.0)];
        let series = calculate_obv(&candles);
        assert_eq!(series, vec![0.0]);
    }

    #[test]
    fn obv_nan_volume_counts_as_zero() {
        let candles = vec![candle(100.0, 5.0), candle(101.0, f64::NAN), candle(102.0, 7.0)];
        let series = calculate_obv(&candles);
        assert_eq!(series, vec![0.0, 7.0]);
    }
}
