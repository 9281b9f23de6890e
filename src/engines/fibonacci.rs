// =============================================================================
// Fibonacci Engine — retracement grids from confirmed swing legs
// =============================================================================
//
// Builds the retracement / extension grid from the two most recent confirmed
// swing points of at least moderate strength. A level is "respected" when,
// within the last 20 candles, price touched it (within 0.5%) and at least
// 60% of those touches subsequently closed away by 0.5% or more.
//
// The golden zone is the [0.618, 0.786] retracement band. Signals:
//   bounce-support    — price within 2% above a respected support
//   break-resistance  — price within 1% of the level overhead
//   extension-target  — price within 5% of an extension, trend-aligned

use serde::Serialize;

use crate::engines::market_structure::{detect_swings, SwingKind, SwingStrength, SWING_LOOKBACK};
use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::types::{Candle, Lean};

/// Retracement ratios of the grid.
const RETRACEMENTS: [f64; 7] = [0.0, 0.236, 0.382, 0.5, 0.618, 0.786, 1.0];

/// Extension ratios of the grid.
const EXTENSIONS: [f64; 3] = [1.272, 1.618, 2.618];

/// Structural analysis needs at least this much history.
const MIN_CANDLES: usize = 20;

/// Candles inspected by the respect test.
const RESPECT_WINDOW: usize = 20;

/// Touch tolerance and close-away distance, as fractions of the level.
const TOUCH_TOLERANCE: f64 = 0.005;
const CLOSE_AWAY: f64 = 0.005;

/// Share of touches that must qualify before a level counts as respected.
const RESPECT_SHARE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FibLevelKind {
    Retracement,
    Extension,
}

/// One grid level with its respect bookkeeping.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FibLevel {
    pub ratio: f64,
    pub price: f64,
    pub kind: FibLevelKind,
    pub touches: usize,
    pub qualifying_touches: usize,
    pub respected: bool,
}

/// Signal derived from the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FibSignal {
    BounceSupport,
    BreakResistance,
    ExtensionTarget,
}

impl std::fmt::Display for FibSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BounceSupport => "bounce off support",
            Self::BreakResistance => "break of resistance",
            Self::ExtensionTarget => "extension target",
        };
        write!(f, "{s}")
    }
}

/// Full Fibonacci payload.
#[derive(Debug, Clone, Serialize)]
pub struct FibAnalysis {
    /// True when the measured leg runs from a swing low up to a swing high.
    pub leg_up: bool,
    pub swing_high: f64,
    pub swing_low: f64,
    pub levels: Vec<FibLevel>,
    /// Price bounds of the golden zone (lower, upper).
    pub golden_zone: (f64, f64),
    pub in_golden_zone: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<FibSignal>,
}

impl FibAnalysis {
    pub fn evidence(&self) -> String {
        let respected = self.levels.iter().filter(|l| l.respected).count();
        match self.signal {
            Some(s) => format!(
                "{} near {:.4}-{:.4} leg, {} respected level(s)",
                s, self.swing_low, self.swing_high, respected
            ),
            None => format!(
                "no level signal on {:.4}-{:.4} leg, {} respected level(s)",
                self.swing_low, self.swing_high, respected
            ),
        }
    }
}

// =============================================================================
// Grid construction
// =============================================================================

/// Price of a grid ratio for the measured leg.
///
/// For an up leg, ratio 0 sits at the swing high and 1.0 back at the swing
/// low; retracements are supports below price. Extensions project beyond
/// the high. Down legs mirror.
fn level_price(leg_up: bool, high: f64, low: f64, ratio: f64) -> f64 {
    let span = high - low;
    if ratio <= 1.0 {
        if leg_up {
            high - span * ratio
        } else {
            low + span * ratio
        }
    } else if leg_up {
        high + span * (ratio - 1.0)
    } else {
        low - span * (ratio - 1.0)
    }
}

/// Count touches of `level` within the respect window and how many of them
/// subsequently closed away.
fn respect_stats(candles: &[Candle], level: f64) -> (usize, usize) {
    if level <= 0.0 {
        return (0, 0);
    }
    let window = &candles[candles.len().saturating_sub(RESPECT_WINDOW)..];

    let mut touches = 0;
    let mut qualifying = 0;

    for (i, c) in window.iter().enumerate() {
        // Distance from the level to the candle's range.
        let dist = if level < c.low {
            (c.low - level) / level
        } else if level > c.high {
            (level - c.high) / level
        } else {
            0.0
        };
        if dist > TOUCH_TOLERANCE {
            continue;
        }
        touches += 1;

        // Did a later close leave the level by at least 0.5%?
        let closed_away = window[i + 1..]
            .iter()
            .any(|later| (later.close - level).abs() / level >= CLOSE_AWAY);
        if closed_away {
            qualifying += 1;
        }
    }

    (touches, qualifying)
}

// =============================================================================
// Engine entry point
// =============================================================================

/// Analyze the Fibonacci grid for a chronological candle sequence.
pub fn analyze(candles: &[Candle]) -> EngineReport {
    let kind = EngineKind::Fibonacci;

    if candles.len() < MIN_CANDLES {
        return EngineReport::unavailable(
            kind,
            format!("{} candles, need {MIN_CANDLES}", candles.len()),
        );
    }

    // Confirmed swings of at least moderate strength anchor the leg.
    let swings: Vec<_> = detect_swings(candles, SWING_LOOKBACK)
        .into_iter()
        .filter(|s| s.strength >= SwingStrength::Moderate)
        .collect();

    let last_high = swings.iter().rev().find(|s| s.kind == SwingKind::High);
    let last_low = swings.iter().rev().find(|s| s.kind == SwingKind::Low);

    let (high, low) = match (last_high, last_low) {
        (Some(h), Some(l)) if h.price > l.price => (*h, *l),
        _ => return EngineReport::unavailable(kind, "no qualifying swing leg"),
    };

    let leg_up = high.index > low.index;

    let price = match candles.last() {
        Some(c) if c.close.is_finite() && c.close > 0.0 => c.close,
        _ => return EngineReport::unavailable(kind, "no finite close price"),
    };

    let mut levels = Vec::with_capacity(RETRACEMENTS.len() + EXTENSIONS.len());
    for (ratios, level_kind) in [
        (&RETRACEMENTS[..], FibLevelKind::Retracement),
        (&EXTENSIONS[..], FibLevelKind::Extension),
    ] {
        for &ratio in ratios {
            let level = level_price(leg_up, high.price, low.price, ratio);
            let (touches, qualifying) = respect_stats(candles, level);
            let respected = touches > 0
                && (qualifying as f64 / touches as f64) >= RESPECT_SHARE;
            levels.push(FibLevel {
                ratio,
                price: level,
                kind: level_kind,
                touches,
                qualifying_touches: qualifying,
                respected,
            });
        }
    }

    // Golden zone bounds, normalized low-to-high.
    let gz_a = level_price(leg_up, high.price, low.price, 0.618);
    let gz_b = level_price(leg_up, high.price, low.price, 0.786);
    let golden_zone = (gz_a.min(gz_b), gz_a.max(gz_b));
    let in_golden_zone = price >= golden_zone.0 && price <= golden_zone.1;

    // Signal scan, strongest first.
    let leg_lean = if leg_up { Lean::Bullish } else { Lean::Bearish };

    let bounce = levels.iter().any(|l| {
        l.respected
            && l.kind == FibLevelKind::Retracement
            && l.price < price
            && (price - l.price) / l.price <= 0.02
    });
    let brk = levels.iter().any(|l| {
        l.kind == FibLevelKind::Retracement
            && l.price > price
            && (l.price - price) / price <= 0.01
    });
    let extension = levels.iter().any(|l| {
        l.kind == FibLevelKind::Extension && (l.price - price).abs() / price <= 0.05
    });

    let (signal, lean) = if bounce {
        (Some(FibSignal::BounceSupport), Lean::Bullish)
    } else if brk {
        (Some(FibSignal::BreakResistance), leg_lean)
    } else if extension {
        (Some(FibSignal::ExtensionTarget), leg_lean)
    } else {
        (None, Lean::Neutral)
    };

    let respected_count = levels.iter().filter(|l| l.respected).count();
    let mut score = 50.0 + 5.0 * respected_count as f64;
    if signal.is_some() {
        score += 10.0;
    }
    if in_golden_zone {
        score += 5.0;
    }

    let analysis = FibAnalysis {
        leg_up,
        swing_high: high.price,
        swing_low: low.price,
        levels,
        golden_zone,
        in_golden_zone,
        signal,
    };

    EngineReport::new(kind, score.min(95.0), lean, EngineDetail::Fibonacci(analysis))
}
