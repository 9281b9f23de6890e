// =============================================================================
// Market Structure Engine — swings, trend state, break of structure
// =============================================================================
//
// A swing high is a bar whose high is strictly greater than the highs of the
// k bars on each side (default k = 5); swing lows mirror. The trend state is
// read from the most recent six swings:
//
//   higher-high + higher-low  => bullish impulse
//   lower-high  + lower-low   => bearish impulse
//   only higher-low           => bullish correction
//   only lower-high           => bearish correction
//   otherwise                 => consolidation
//
// A Break of Structure (BOS) is a swing level taken out by a subsequent
// close beyond it. Score: base 50, +10 per impulse confirmation, +5 per
// respected structure level, capped at 95.

use serde::Serialize;

use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::types::{Candle, Lean};

/// Default k-lookback for swing confirmation.
pub const SWING_LOOKBACK: usize = 5;

/// How many of the most recent swings feed the trend read.
const TREND_WINDOW: usize = 6;

/// Intraday tolerance for a "respected" structure level: price wicks beyond
/// the level but closes back on the original side.
const SCORE_BASE: f64 = 50.0;
const SCORE_CAP: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingKind {
    High,
    Low,
}

/// Confirmation quality of a swing, by prominence over its neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingStrength {
    Weak,
    Moderate,
    Strong,
}

/// A confirmed swing point.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SwingPoint {
    pub kind: SwingKind,
    pub price: f64,
    pub time: i64,
    /// Index into the candle slice the swing was found in.
    pub index: usize,
    pub strength: SwingStrength,
}

/// Trend classification over the recent swing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendState {
    BullishImpulse,
    BearishImpulse,
    BullishCorrection,
    BearishCorrection,
    Consolidation,
}

impl TrendState {
    pub fn lean(self) -> Lean {
        match self {
            Self::BullishImpulse | Self::BullishCorrection => Lean::Bullish,
            Self::BearishImpulse | Self::BearishCorrection => Lean::Bearish,
            Self::Consolidation => Lean::Neutral,
        }
    }

    pub fn is_impulse(self) -> bool {
        matches!(self, Self::BullishImpulse | Self::BearishImpulse)
    }
}

impl std::fmt::Display for TrendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BullishImpulse => "bullish impulse",
            Self::BearishImpulse => "bearish impulse",
            Self::BullishCorrection => "bullish correction",
            Self::BearishCorrection => "bearish correction",
            Self::Consolidation => "consolidation",
        };
        write!(f, "{s}")
    }
}

/// The most recent break of structure.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BreakOfStructure {
    /// Bullish when a swing high was closed above, bearish for a swing low.
    pub direction: Lean,
    /// The broken swing level.
    pub price: f64,
    /// Close time (ms) of the breaking bar.
    pub time: i64,
}

/// Full market-structure payload.
#[derive(Debug, Clone, Serialize)]
pub struct StructureAnalysis {
    pub trend: TrendState,
    pub swing_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_bos: Option<BreakOfStructure>,
    pub impulse_confirmations: usize,
    pub respected_levels: usize,
}

impl StructureAnalysis {
    pub fn evidence(&self) -> String {
        match &self.last_bos {
            Some(bos) => format!(
                "{} across {} swings, last BOS {} through {:.4}",
                self.trend, self.swing_count, bos.direction, bos.price
            ),
            None => format!("{} across {} swings, no recent BOS", self.trend, self.swing_count),
        }
    }
}

// =============================================================================
// Swing detection (shared with the Fibonacci engine)
// =============================================================================

/// Detect swing points with a k-bar lookback on each side.
///
/// A point qualifies as a swing high iff its high is strictly greater than
/// the highs of all `k` bars on both sides; swing lows mirror with strictly
/// smaller lows. Returned in chronological order.
pub fn detect_swings(candles: &[Candle], k: usize) -> Vec<SwingPoint> {
    if k == 0 || candles.len() < 2 * k + 1 {
        return Vec::new();
    }

    let mut swings = Vec::new();

    for i in k..candles.len() - k {
        let c = &candles[i];
        if !c.is_finite() {
            continue;
        }

        let neighbors = candles[i - k..i].iter().chain(&candles[i + 1..=i + k]);

        let mut is_high = true;
        let mut is_low = true;
        let mut max_other_high = f64::MIN;
        let mut min_other_low = f64::MAX;

        for n in neighbors {
            if n.high >= c.high {
                is_high = false;
            }
            if n.low <= c.low {
                is_low = false;
            }
            max_other_high = max_other_high.max(n.high);
            min_other_low = min_other_low.min(n.low);
        }

        if is_high {
            let margin = if c.high > 0.0 {
                (c.high - max_other_high) / c.high
            } else {
                0.0
            };
            swings.push(SwingPoint {
                kind: SwingKind::High,
                price: c.high,
                time: c.open_time,
                index: i,
                strength: strength_from_margin(margin),
            });
        } else if is_low {
            let margin = if c.low > 0.0 {
                (min_other_low - c.low) / c.low
            } else {
                0.0
            };
            swings.push(SwingPoint {
                kind: SwingKind::Low,
                price: c.low,
                time: c.open_time,
                index: i,
                strength: strength_from_margin(margin),
            });
        }
    }

    swings
}

fn strength_from_margin(margin: f64) -> SwingStrength {
    if margin > 0.005 {
        SwingStrength::Strong
    } else if margin > 0.001 {
        SwingStrength::Moderate
    } else {
        SwingStrength::Weak
    }
}

// =============================================================================
// Trend classification
// =============================================================================

fn classify_trend(swings: &[SwingPoint]) -> TrendState {
    let window = if swings.len() > TREND_WINDOW {
        &swings[swings.len() - TREND_WINDOW..]
    } else {
        swings
    };

    let highs: Vec<f64> = window
        .iter()
        .filter(|s| s.kind == SwingKind::High)
        .map(|s| s.price)
        .collect();
    let lows: Vec<f64> = window
        .iter()
        .filter(|s| s.kind == SwingKind::Low)
        .map(|s| s.price)
        .collect();

    if highs.len() < 2 || lows.len() < 2 {
        return TrendState::Consolidation;
    }

    let hh = highs[highs.len() - 1] > highs[highs.len() - 2];
    let lh = highs[highs.len() - 1] < highs[highs.len() - 2];
    let hl = lows[lows.len() - 1] > lows[lows.len() - 2];
    let ll = lows[lows.len() - 1] < lows[lows.len() - 2];

    if hh && hl {
        TrendState::BullishImpulse
    } else if lh && ll {
        TrendState::BearishImpulse
    } else if hl && lh {
        // Contracting range: both sides converging.
        TrendState::Consolidation
    } else if hl {
        TrendState::BullishCorrection
    } else if lh {
        TrendState::BearishCorrection
    } else {
        TrendState::Consolidation
    }
}

/// Count trend-confirming consecutive swing pairs inside the window.
fn count_impulse_confirmations(swings: &[SwingPoint], trend: TrendState) -> usize {
    if !trend.is_impulse() {
        return 0;
    }
    let bullish = trend == TrendState::BullishImpulse;

    let window = if swings.len() > TREND_WINDOW {
        &swings[swings.len() - TREND_WINDOW..]
    } else {
        swings
    };

    let mut confirmations = 0;
    for kind in [SwingKind::High, SwingKind::Low] {
        let series: Vec<f64> = window
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.price)
            .collect();
        for pair in series.windows(2) {
            let confirming = if bullish {
                pair[1] > pair[0]
            } else {
                pair[1] < pair[0]
            };
            if confirming {
                confirmations += 1;
            }
        }
    }
    confirmations
}

// =============================================================================
// Break of structure & respected levels
// =============================================================================

fn find_last_bos(candles: &[Candle], swings: &[SwingPoint], k: usize) -> Option<BreakOfStructure> {
    let mut best: Option<BreakOfStructure> = None;

    for swing in swings {
        // A swing is only confirmed k bars after its extreme; a close can
        // break it no earlier than that.
        let confirm_idx = swing.index + k;
        if confirm_idx + 1 > candles.len() {
            continue;
        }

        for c in &candles[confirm_idx..] {
            let broke = match swing.kind {
                SwingKind::High => c.close > swing.price,
                SwingKind::Low => c.close < swing.price,
            };
            if broke {
                let bos = BreakOfStructure {
                    direction: match swing.kind {
                        SwingKind::High => Lean::Bullish,
                        SwingKind::Low => Lean::Bearish,
                    },
                    price: swing.price,
                    time: c.open_time,
                };
                if best.map_or(true, |b| bos.time >= b.time) {
                    best = Some(bos);
                }
                break;
            }
        }
    }

    best
}

/// A level is respected when price later wicks into it but closes back on
/// the original side — the level held as support or resistance.
fn count_respected_levels(candles: &[Candle], swings: &[SwingPoint], k: usize) -> usize {
    let mut respected = 0;

    for swing in swings {
        let confirm_idx = swing.index + k;
        if confirm_idx >= candles.len() {
            continue;
        }

        let held = candles[confirm_idx..].iter().any(|c| match swing.kind {
            SwingKind::High => c.high >= swing.price && c.close < swing.price,
            SwingKind::Low => c.low <= swing.price && c.close > swing.price,
        });
        let broken = candles[confirm_idx..].iter().any(|c| match swing.kind {
            SwingKind::High => c.close > swing.price,
            SwingKind::Low => c.close < swing.price,
        });

        if held && !broken {
            respected += 1;
        }
    }

    respected
}

// =============================================================================
// Engine entry point
// =============================================================================

/// Analyze market structure over a chronological candle sequence.
pub fn analyze(candles: &[Candle]) -> EngineReport {
    let kind = EngineKind::MarketStructure;

    if candles.len() < 2 * SWING_LOOKBACK + 1 {
        return EngineReport::unavailable(
            kind,
            format!("{} candles, need {}", candles.len(), 2 * SWING_LOOKBACK + 1),
        );
    }

    let swings = detect_swings(candles, SWING_LOOKBACK);
    if swings.is_empty() {
        return EngineReport::unavailable(kind, "no confirmed swing points");
    }

    let trend = classify_trend(&swings);
    let confirmations = count_impulse_confirmations(&swings, trend);
    let respected = count_respected_levels(candles, &swings, SWING_LOOKBACK);
    let last_bos = find_last_bos(candles, &swings, SWING_LOOKBACK);

    let score = (SCORE_BASE + 10.0 * confirmations as f64 + 5.0 * respected as f64)
        .min(SCORE_CAP);

    let analysis = StructureAnalysis {
        trend,
        swing_count: swings.len(),
        last_bos,
        impulse_confirmations: confirmations,
        respected_levels: respected,
    };

    EngineReport::new(kind, score, trend.lean(), EngineDetail::Structure(analysis))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(i * 60_000, open, high, low, close, 100.0)
    }

    /// Flat tape with one sharp peak in the middle.
    fn tape_with_peak(peak_at: usize, n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                if i == peak_at {
                    candle(i as i64, 100.0, 110.0, 99.0, 101.0)
                } else {
                    candle(i as i64, 100.0, 101.0 + (i % 3) as f64 * 0.1, 99.0, 100.0)
                }
            })
            .collect()
    }

    /// Zig-zag uptrend: rising waves produce higher highs and higher lows.
    fn uptrend_tape(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                let wave = (i as f64 * 0.55).sin() * 3.0;
                let mid = base + wave;
                candle(i as i64, mid - 0.2, mid + 1.0, mid - 1.0, mid + 0.2)
            })
            .collect()
    }

    fn downtrend_tape(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 200.0 - i as f64 * 0.5;
                let wave = (i as f64 * 0.55).sin() * 3.0;
                let mid = base + wave;
                candle(i as i64, mid + 0.2, mid + 1.0, mid - 1.0, mid - 0.2)
            })
            .collect()
    }

    #[test]
    fn too_few_candles_is_unavailable() {
        let candles = tape_with_peak(3, 8);
        let report = analyze(&candles);
        assert!(!report.is_available());
    }

    #[test]
    fn detects_isolated_swing_high() {
        let candles = tape_with_peak(15, 31);
        let swings = detect_swings(&candles, 5);
        assert!(swings
            .iter()
            .any(|s| s.kind == SwingKind::High && (s.price - 110.0).abs() < 1e-9));
    }

    #[test]
    fn peak_swing_is_strong() {
        let candles = tape_with_peak(15, 31);
        let swings = detect_swings(&candles, 5);
        let peak = swings
            .iter()
            .find(|s| s.kind == SwingKind::High && (s.price - 110.0).abs() < 1e-9)
            .unwrap();
        assert_eq!(peak.strength, SwingStrength::Strong);
    }

    #[test]
    fn no_swings_on_perfectly_flat_tape() {
        // Equal highs everywhere — strict comparison admits nothing.
        let candles: Vec<Candle> = (0..30)
            .map(|i| candle(i, 100.0, 101.0, 99.0, 100.0))
            .collect();
        assert!(detect_swings(&candles, 5).is_empty());
    }

    #[test]
    fn uptrend_classifies_bullish() {
        let candles = uptrend_tape(80);
        let report = analyze(&candles);
        assert!(report.is_available());
        assert_eq!(report.lean, Lean::Bullish);
        if let EngineDetail::Structure(a) = &report.detail {
            assert!(matches!(
                a.trend,
                TrendState::BullishImpulse | TrendState::BullishCorrection
            ));
        } else {
            panic!("wrong detail variant");
        }
    }

    #[test]
    fn downtrend_classifies_bearish() {
        let candles = downtrend_tape(80);
        let report = analyze(&candles);
        assert_eq!(report.lean, Lean::Bearish);
    }

    #[test]
    fn score_stays_within_bounds() {
        for tape in [uptrend_tape(120), downtrend_tape(120), tape_with_peak(30, 90)] {
            let report = analyze(&tape);
            assert!(report.score >= 0.0 && report.score <= 95.0, "score {}", report.score);
        }
    }

    #[test]
    fn bos_detected_when_swing_high_closed_above() {
        // Peak at 110, then a late bar closes above it.
        let mut candles = tape_with_peak(10, 26);
        candles.push(candle(26, 100.0, 112.0, 99.0, 111.0));
        // Pad so the closing bar is inside the scan range.
        for i in 27..33 {
            candles.push(candle(i, 111.0, 111.5, 110.5, 111.0));
        }
        let swings = detect_swings(&candles, 5);
        let bos = find_last_bos(&candles, &swings, 5);
        let bos = bos.expect("expected a BOS");
        assert_eq!(bos.direction, Lean::Bullish);
        assert!((bos.price - 110.0).abs() < 1e-9);
    }

    #[test]
    fn respected_level_requires_wick_and_hold() {
        // Peak at 110; later a bar wicks to 110.5 but closes at 109 — respected.
        let mut candles = tape_with_peak(10, 26);
        candles.push(candle(26, 100.0, 110.5, 99.0, 109.0));
        for i in 27..33 {
            candles.push(candle(i, 100.0, 101.0, 99.0, 100.0));
        }
        let swings = detect_swings(&candles, 5);
        let respected = count_respected_levels(&candles, &swings, 5);
        assert!(respected >= 1);
    }
}
