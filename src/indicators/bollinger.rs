// =============================================================================
// Bollinger Bands
// =============================================================================
//
// A volatility envelope around the trailing mean: upper and lower bands sit
// `k` population standard deviations either side of the window average.
// The normalized band width, (upper - lower) / middle * 100, is what the
// volatility layer consumes.

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

impl BollingerResult {
    /// %B — where `price` sits inside the band: 0 at the lower band, 1 at
    /// the upper. Values outside [0, 1] mean price has escaped the band.
    pub fn percent_b(&self, price: f64) -> f64 {
        let span = self.upper - self.lower;
        if span <= 0.0 {
            return 0.5;
        }
        (price - self.lower) / span
    }
}

/// Bands over the trailing `period` closes at `num_std` deviations.
///
/// Mean and variance come from one pass over the window (sum and sum of
/// squares); the variance is floored at zero to absorb rounding on nearly
/// flat tapes. `None` when the window is short, the mean is zero, or the
/// width comes out non-finite.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let tail = &closes[closes.len() - period..];
    let n = period as f64;

    let (sum, sum_sq) = tail
        .iter()
        .fold((0.0_f64, 0.0_f64), |(s, q), &x| (s + x, q + x * x));

    let mean = sum / n;
    if mean == 0.0 {
        return None;
    }

    let variance = (sum_sq / n - mean * mean).max(0.0);
    let band = num_std * variance.sqrt();

    let result = BollingerResult {
        upper: mean + band,
        middle: mean,
        lower: mean - band,
        width: 2.0 * band / mean * 100.0,
    };

    result.width.is_finite().then_some(result)
}
