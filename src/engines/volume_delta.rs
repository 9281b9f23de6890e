// =============================================================================
// Cumulative Volume Delta Engine — taker flow segmentation and divergence
// =============================================================================
//
// Builds per-bar buy/sell volume buckets, preferring real trade tape and
// falling back to a candle body-position estimate when no trades are
// available:
//
//   buy_ratio = clamp((close - low) / max(high - low, eps), 0.1, 0.9)
//
// The cumulative delta is the running sum of (buy - sell). Divergences are
// read over the last 20 bars: a price lower-low with a CVD higher-low is a
// regular bullish divergence (bearish mirrors); hidden variants are the
// continuation forms.

use serde::Serialize;

use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::pairs::Timeframe;
use crate::types::{Candle, Lean, Trade, TradeSide};

/// Bars inspected for divergence.
const DIVERGENCE_WINDOW: usize = 20;

const BODY_RATIO_EPS: f64 = 1e-9;

/// Which side is in control of recent flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DominantSide {
    Buyers,
    Sellers,
    Neutral,
}

impl DominantSide {
    fn lean(self) -> Lean {
        match self {
            Self::Buyers => Lean::Bullish,
            Self::Sellers => Lean::Bearish,
            Self::Neutral => Lean::Neutral,
        }
    }
}

impl std::fmt::Display for DominantSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Buyers => "buyers",
            Self::Sellers => "sellers",
            Self::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

/// Price/CVD divergence classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    RegularBullish,
    RegularBearish,
    HiddenBullish,
    HiddenBearish,
}

impl DivergenceKind {
    pub fn lean(self) -> Lean {
        match self {
            Self::RegularBullish | Self::HiddenBullish => Lean::Bullish,
            Self::RegularBearish | Self::HiddenBearish => Lean::Bearish,
        }
    }
}

impl std::fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RegularBullish => "regular bullish",
            Self::RegularBearish => "regular bearish",
            Self::HiddenBullish => "hidden bullish",
            Self::HiddenBearish => "hidden bearish",
        };
        write!(f, "{s}")
    }
}

/// One timeframe bucket of segmented flow.
#[derive(Debug, Clone, Copy)]
struct DeltaBar {
    close: f64,
    buy_volume: f64,
    sell_volume: f64,
}

/// Full CVD payload.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeDeltaAnalysis {
    /// Final cumulative delta over the analyzed window.
    pub cumulative_delta: f64,
    pub dominant_side: DominantSide,
    /// Intensity of one-sided flow in [0, 1].
    pub aggression_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence: Option<DivergenceKind>,
    /// True when flow was estimated from candle bodies instead of trades.
    pub estimated: bool,
}

impl VolumeDeltaAnalysis {
    pub fn evidence(&self) -> String {
        let source = if self.estimated { "estimated" } else { "tape" };
        match self.divergence {
            Some(d) => format!(
                "{} in control ({} flow, aggression {:.2}), {} divergence",
                self.dominant_side, source, self.aggression_ratio, d
            ),
            None => format!(
                "{} in control ({} flow, aggression {:.2})",
                self.dominant_side, source, self.aggression_ratio
            ),
        }
    }
}

// =============================================================================
// Flow segmentation
// =============================================================================

/// Estimated taker-buy share of a bar from its body position.
fn body_buy_ratio(candle: &Candle) -> f64 {
    let range = (candle.high - candle.low).max(BODY_RATIO_EPS);
    ((candle.close - candle.low) / range).clamp(0.1, 0.9)
}

/// Build per-bar flow buckets. Bars covered by the trade tape use real
/// taker volumes; the rest are estimated from the candle body.
fn build_delta_bars(candles: &[Candle], trades: Option<&[Trade]>, tf: Timeframe) -> (Vec<DeltaBar>, bool) {
    let interval = tf.interval_ms();
    let mut estimated_any = false;

    let bars = candles
        .iter()
        .map(|c| {
            let bucket = trades.and_then(|ts| {
                let mut buy = 0.0;
                let mut sell = 0.0;
                let mut hits = 0u32;
                for t in ts {
                    if t.time >= c.open_time && t.time < c.open_time + interval {
                        match t.side {
                            TradeSide::Buy => buy += t.price * t.size,
                            TradeSide::Sell => sell += t.price * t.size,
                        }
                        hits += 1;
                    }
                }
                if hits > 0 {
                    Some((buy, sell))
                } else {
                    None
                }
            });

            match bucket {
                Some((buy_volume, sell_volume)) => DeltaBar {
                    close: c.close,
                    buy_volume,
                    sell_volume,
                },
                None => {
                    estimated_any = true;
                    let ratio = body_buy_ratio(c);
                    let volume = if c.volume.is_finite() { c.volume } else { 0.0 };
                    DeltaBar {
                        close: c.close,
                        buy_volume: volume * ratio,
                        sell_volume: volume * (1.0 - ratio),
                    }
                }
            }
        })
        .collect();

    (bars, estimated_any)
}

// =============================================================================
// Divergence
// =============================================================================

/// Compare extremes of the older and newer halves of the window.
fn detect_divergence(bars: &[DeltaBar]) -> Option<DivergenceKind> {
    let window = if bars.len() > DIVERGENCE_WINDOW {
        &bars[bars.len() - DIVERGENCE_WINDOW..]
    } else {
        bars
    };
    if window.len() < 6 {
        return None;
    }

    // Cumulative delta series over the window.
    let mut cvd = Vec::with_capacity(window.len());
    let mut running = 0.0;
    for bar in window {
        running += bar.buy_volume - bar.sell_volume;
        cvd.push(running);
    }

    let mid = window.len() / 2;
    let (older, newer) = window.split_at(mid);
    let (cvd_older, cvd_newer) = cvd.split_at(mid);

    let argmin = |bars: &[DeltaBar]| {
        bars.iter()
            .enumerate()
            .min_by(|a, b| a.1.close.total_cmp(&b.1.close))
            .map(|(i, _)| i)
    };
    let argmax = |bars: &[DeltaBar]| {
        bars.iter()
            .enumerate()
            .max_by(|a, b| a.1.close.total_cmp(&b.1.close))
            .map(|(i, _)| i)
    };

    let (lo_old, lo_new) = (argmin(older)?, argmin(newer)?);
    let (hi_old, hi_new) = (argmax(older)?, argmax(newer)?);

    let price_ll = newer[lo_new].close < older[lo_old].close;
    let price_hl = newer[lo_new].close > older[lo_old].close;
    let price_hh = newer[hi_new].close > older[hi_old].close;
    let price_lh = newer[hi_new].close < older[hi_old].close;

    let cvd_hl = cvd_newer[lo_new] > cvd_older[lo_old];
    let cvd_ll = cvd_newer[lo_new] < cvd_older[lo_old];
    let cvd_lh = cvd_newer[hi_new] < cvd_older[hi_old];
    let cvd_hh = cvd_newer[hi_new] > cvd_older[hi_old];

    // Regular divergences outrank hidden (continuation) forms.
    if price_ll && cvd_hl {
        Some(DivergenceKind::RegularBullish)
    } else if price_hh && cvd_lh {
        Some(DivergenceKind::RegularBearish)
    } else if price_hl && cvd_ll {
        Some(DivergenceKind::HiddenBullish)
    } else if price_lh && cvd_hh {
        Some(DivergenceKind::HiddenBearish)
    } else {
        None
    }
}

// =============================================================================
// Engine entry point
// =============================================================================

/// Analyze taker flow over a chronological candle sequence, optionally
/// refined by a recent trade tape.
pub fn analyze(candles: &[Candle], trades: Option<&[Trade]>, tf: Timeframe) -> EngineReport {
    let kind = EngineKind::VolumeDelta;

    if candles.is_empty() {
        return EngineReport::unavailable(kind, "no candles");
    }

    let (bars, estimated) = build_delta_bars(candles, trades, tf);

    let cumulative_delta: f64 = bars.iter().map(|b| b.buy_volume - b.sell_volume).sum();

    // Dominance over the divergence window, not the whole history, so a
    // stale trend cannot mask a fresh flip.
    let recent = if bars.len() > DIVERGENCE_WINDOW {
        &bars[bars.len() - DIVERGENCE_WINDOW..]
    } else {
        &bars[..]
    };
    let buy: f64 = recent.iter().map(|b| b.buy_volume).sum();
    let sell: f64 = recent.iter().map(|b| b.sell_volume).sum();
    let total = buy + sell;

    let (dominant_side, aggression_ratio) = if total <= 0.0 {
        (DominantSide::Neutral, 0.0)
    } else {
        let ratio = ((buy - sell) / total).abs().clamp(0.0, 1.0);
        let side = if (buy - sell) / total > 0.05 {
            DominantSide::Buyers
        } else if (sell - buy) / total > 0.05 {
            DominantSide::Sellers
        } else {
            DominantSide::Neutral
        };
        (side, ratio)
    };

    let divergence = detect_divergence(&bars);

    // Divergence direction outranks raw dominance.
    let lean = divergence.map(DivergenceKind::lean).unwrap_or_else(|| dominant_side.lean());

    let mut score = 50.0 + 30.0 * aggression_ratio;
    if let Some(d) = divergence {
        if d.lean() == lean {
            score += 15.0;
        }
    }

    let analysis = VolumeDeltaAnalysis {
        cumulative_delta,
        dominant_side,
        aggression_ratio,
        divergence,
        estimated,
    };

    EngineReport::new(kind, score.min(95.0), lean, EngineDetail::VolumeDelta(analysis))
}
