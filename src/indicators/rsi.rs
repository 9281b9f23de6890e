// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// Splits each close-to-close move into its up and down components, keeps a
// Wilder-smoothed average of both, and reads the index as the share of
// upward movement:
//
//   RSI = 100 * avg_up / (avg_up + avg_down)
//
// (the familiar 100 - 100/(1+RS) rearranged, which sidesteps the RS ratio
// and its division-by-zero case entirely). The two averages are seeded
// with the plain mean of the first `period` moves and afterwards nudged
// toward each new move by 1/period.

/// RSI series over `closes`, one value per close from index `period` on.
///
/// # Edge behavior
/// - zero period or fewer than `period + 1` closes: empty series
/// - a tape with no movement at all reads 50 (neither side dominates)
/// - only upward movement pins the index to 100, only downward to 0
/// - a non-finite intermediate truncates the series at that point
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    // Seed: total up / down movement across the first `period` steps.
    let mut up = 0.0_f64;
    let mut down = 0.0_f64;
    for w in closes[..=period].windows(2) {
        let step = w[1] - w[0];
        if step >= 0.0 {
            up += step;
        } else {
            down -= step;
        }
    }

    let reach = period as f64;
    let mut avg_up = up / reach;
    let mut avg_down = down / reach;

    let mut series = Vec::with_capacity(closes.len() - period);
    match strength_index(avg_up, avg_down) {
        Some(v) => series.push(v),
        None => return series,
    }

    for w in closes[period..].windows(2) {
        let step = w[1] - w[0];
        avg_up += (step.max(0.0) - avg_up) / reach;
        avg_down += ((-step).max(0.0) - avg_down) / reach;

        match strength_index(avg_up, avg_down) {
            Some(v) => series.push(v),
            None => break,
        }
    }

    series
}

/// Most recent RSI value, if the series can be computed.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    calculate_rsi(closes, period).last().copied()
}

/// The index itself: upward share of total smoothed movement, in [0, 100].
/// A dead tape (no movement either way) reads 50. `None` on non-finite
/// input or output.
fn strength_index(avg_up: f64, avg_down: f64) -> Option<f64> {
    let total = avg_up + avg_down;
    let value = if total <= 0.0 {
        50.0
    } else {
        100.0 * avg_up / total
    };
    value.is_finite().then_some(value)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_guards() {
        assert!(calculate_rsi(&[], 14).is_empty());
        assert!(calculate_rsi(&[5.0, 6.0, 7.0], 0).is_empty());
        // Ten closes give nine steps: one short of period 10.
        let closes: Vec<f64> = (0..10).map(|i| 20.0 + i as f64).collect();
        assert!(calculate_rsi(&closes, 10).is_empty());
    }

    #[test]
    fn rsi_pure_ascent_pins_to_100() {
        let closes: Vec<f64> = (0..25).map(|i| 50.0 + 2.5 * i as f64).collect();
        let series = calculate_rsi(&closes, 14);
        assert_eq!(series.len(), closes.len() - 14);
        for &v in &series {
            assert!((v - 100.0).abs() < 1e-9, "expected 100, got {v}");
        }
    }

    #[test]
    fn rsi_pure_descent_pins_to_0() {
        let closes: Vec<f64> = (0..25).map(|i| 90.0 - 1.25 * i as f64).collect();
        let series = calculate_rsi(&closes, 14);
        assert!(!series.is_empty());
        for &v in &series {
            assert!(v.abs() < 1e-9, "expected 0, got {v}");
        }
    }

    #[test]
    fn rsi_constant_tape_reads_50() {
        let series = calculate_rsi(&vec![75.25; 40], 14);
        assert!(!series.is_empty());
        for &v in &series {
            assert!((v - 50.0).abs() < 1e-9, "expected 50, got {v}");
        }
    }

    #[test]
    fn rsi_hand_computed_short_series() {
        // Steps: +1, -0.5, +1, +0.5 with period 3.
        // Seed over the first three: avg_up = 2/3, avg_down = 1/6,
        //   first value = 100 * (2/3) / (2/3 + 1/6) = 80.
        // One smoothing step with +0.5:
        //   avg_up = 2/3 + (0.5 - 2/3)/3 = 11/18, avg_down = 1/6 - (1/6)/3 = 1/9,
        //   second value = 100 * (11/18) / (11/18 + 2/18) = 1100/13.
        let closes = [10.0, 11.0, 10.5, 11.5, 12.0];
        let series = calculate_rsi(&closes, 3);
        assert_eq!(series.len(), 2);
        assert!((series[0] - 80.0).abs() < 1e-9, "got {}", series[0]);
        assert!((series[1] - 1100.0 / 13.0).abs() < 1e-9, "got {}", series[1]);
    }

    #[test]
    fn rsi_stays_in_bounds_on_choppy_tape() {
        let closes = [
            7.80, 8.05, 7.95, 8.40, 8.10, 8.55, 8.35, 8.90, 8.60, 9.05,
            8.75, 9.20, 9.00, 9.45, 9.15, 9.60, 9.40,
        ];
        let series = calculate_rsi(&closes, 9);
        assert!(!series.is_empty());
        for &v in &series {
            assert!((0.0..=100.0).contains(&v), "value {v} escaped [0, 100]");
        }
    }

    #[test]
    fn latest_rsi_is_series_tail() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 30.0 + (i as f64 * 0.45).cos() * 4.0)
            .collect();
        let series = calculate_rsi(&closes, 14);
        assert_eq!(latest_rsi(&closes, 14), series.last().copied());
    }

    #[test]
    fn latest_rsi_none_when_short() {
        assert!(latest_rsi(&[1.0, 2.0], 14).is_none());
    }
}
