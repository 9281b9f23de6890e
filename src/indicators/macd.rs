// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line   = EMA(fast) - EMA(slow)            (12, 26 by default)
// Signal line = EMA(MACD line, signal_period)    (9 by default)
// Histogram   = MACD line - signal line
//
// A positive histogram with the MACD line above the signal line reads
// bullish; the mirror reads bearish.

use crate::indicators::ema::calculate_ema;

/// Latest MACD reading.
#[derive(Debug, Clone, Copy)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the latest MACD(fast, slow, signal) values.
///
/// Returns `None` when there is not enough history to seed the slow EMA plus
/// the signal EMA over the MACD line.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return None;
    }
    if closes.len() < slow + signal_period {
        return None;
    }

    let fast_series = calculate_ema(closes, fast);
    let slow_series = calculate_ema(closes, slow);
    if fast_series.is_empty() || slow_series.is_empty() {
        return None;
    }

    // Align the two series on their shared (most recent) suffix. The fast
    // series starts earlier, so trim its head.
    let offset = fast_series.len().checked_sub(slow_series.len())?;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .zip(&fast_series[offset..])
        .map(|(s, f)| f - s)
        .collect();

    let signal_series = calculate_ema(&macd_line, signal_period);
    let signal = *signal_series.last()?;
    let macd = *macd_line.last()?;
    let histogram = macd - signal;

    if macd.is_finite() && signal.is_finite() {
        Some(MacdResult {
            macd,
            signal,
            histogram,
        })
    } else {
        None
    }
}

/// Standard MACD(12, 26, 9).
pub fn standard_macd(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd(closes, 12, 26, 9)
}
