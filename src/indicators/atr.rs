// =============================================================================
// Average True Range (ATR)
// =============================================================================
//
// Volatility as the smoothed width of each bar, where "width" accounts for
// gaps against the prior close: a bar's true range is its wick span or the
// distance either extreme sits from the previous close, whichever is
// largest. Smoothing is Wilder-style: the running average moves toward each
// new range by 1/period.

use crate::types::Candle;

/// True range of `bar` given the close of the bar before it.
fn true_range(prev_close: f64, bar: &Candle) -> f64 {
    let wick_span = bar.high - bar.low;
    let gap_up = (bar.high - prev_close).abs();
    let gap_down = (bar.low - prev_close).abs();
    wick_span.max(gap_up).max(gap_down)
}

/// Most recent ATR over `candles` (oldest first).
///
/// The first `period` true ranges seed the average; every later range
/// nudges it by `1/period`. Needs `period + 1` candles since each true
/// range consumes the preceding close.
///
/// Returns `None` for a zero period, insufficient history, or any
/// non-finite arithmetic along the way (a NaN anywhere poisons the fold
/// and is caught at the end).
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() <= period {
        return None;
    }
    // A NaN extreme would slip through f64::max, so reject bad bars up
    // front via the candle's own finiteness check.
    if candles.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(w[0].close, &w[1]))
        .collect();

    let (seed_window, rest) = ranges.split_at(period);
    let seed = seed_window.iter().sum::<f64>() / period as f64;

    let step = 1.0 / period as f64;
    let atr = rest.iter().fold(seed, |acc, &tr| acc + (tr - acc) * step);

    atr.is_finite().then_some(atr)
}

/// ATR expressed as a percentage of the latest close, for comparing
/// volatility across assets at different price scales.
pub fn calculate_atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let atr = calculate_atr(candles, period)?;
    let reference = candles.last()?.close;
    if reference == 0.0 {
        return None;
    }
    Some(atr / reference * 100.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, (high + low) / 2.0, high, low, close, 50.0)
    }

    #[test]
    fn atr_rejects_degenerate_inputs() {
        let bars: Vec<Candle> = (0..5).map(|_| bar(21.0, 19.0, 20.0)).collect();
        assert!(calculate_atr(&bars, 0).is_none());
        // Five bars yield four true ranges: not enough for period 5.
        assert!(calculate_atr(&bars, 5).is_none());
        assert!(calculate_atr(&[], 3).is_none());
    }

    #[test]
    fn atr_uniform_bars_equal_their_range() {
        // Every bar spans 4.0 around a slow drift; no gap ever exceeds the
        // wick, so the average settles at exactly 4.0.
        let bars: Vec<Candle> = (0..40)
            .map(|i| {
                let mid = 50.0 + i as f64 * 0.1;
                bar(mid + 2.0, mid - 2.0, mid)
            })
            .collect();
        let atr = calculate_atr(&bars, 14).unwrap();
        assert!((atr - 4.0).abs() < 1e-9, "expected 4.0, got {atr}");
    }

    #[test]
    fn atr_hand_computed_small_window() {
        // Ranges: bar1 max(2,2,0)=2, bar2 max(3,3,0)=3, bar3 max(1,0,1)=1.
        // Seed over period 2: (2+3)/2 = 2.5; one smoothing step toward 1:
        // 2.5 + (1 - 2.5)/2 = 1.75.
        let bars = vec![
            bar(11.0, 9.0, 10.0),
            bar(12.0, 10.0, 11.0),
            bar(14.0, 11.0, 13.0),
            bar(13.0, 12.0, 12.5),
        ];
        let atr = calculate_atr(&bars, 2).unwrap();
        assert!((atr - 1.75).abs() < 1e-12, "expected 1.75, got {atr}");
    }

    #[test]
    fn atr_gap_dominates_wick() {
        // The second bar opens far above the prior close: its true range is
        // the 6.0 gap leg (26 - 20), not its own 1.0 wick.
        let bars = vec![
            bar(20.5, 19.5, 20.0),
            bar(26.0, 25.0, 25.5),
            bar(26.2, 25.2, 25.7),
            bar(26.0, 25.0, 25.4),
        ];
        let atr = calculate_atr(&bars, 3).unwrap();
        assert!(atr > 2.0, "gap should lift ATR well above the 1.0 wicks, got {atr}");
    }

    #[test]
    fn atr_non_finite_input_is_rejected() {
        let mut bars: Vec<Candle> = (0..10).map(|_| bar(31.0, 29.0, 30.0)).collect();
        bars[4].high = f64::INFINITY;
        assert!(calculate_atr(&bars, 5).is_none());

        let mut bars: Vec<Candle> = (0..10).map(|_| bar(31.0, 29.0, 30.0)).collect();
        bars[8].close = f64::NAN;
        assert!(calculate_atr(&bars, 5).is_none());
    }

    #[test]
    fn atr_pct_relates_atr_to_last_close() {
        let bars: Vec<Candle> = (0..40)
            .map(|i| {
                let mid = 50.0 + i as f64 * 0.1;
                bar(mid + 2.0, mid - 2.0, mid)
            })
            .collect();
        let atr = calculate_atr(&bars, 14).unwrap();
        let pct = calculate_atr_pct(&bars, 14).unwrap();
        let last_close = bars.last().unwrap().close;
        assert!((pct - atr / last_close * 100.0).abs() < 1e-12);
    }

    #[test]
    fn atr_pct_zero_close_is_rejected() {
        let mut bars: Vec<Candle> = (0..10).map(|_| bar(1.0, -1.0, 0.5)).collect();
        bars.last_mut().unwrap().close = 0.0;
        assert!(calculate_atr_pct(&bars, 5).is_none());
    }
}
