// =============================================================================
// Order Flow Engine — absorption, icebergs, institutional flow trend
// =============================================================================
//
// Works from the order book snapshot and the recent trade tape:
//
//   Absorption — a bar with outsized volume (> 2x the recent average) but a
//   compressed range (< 0.5 ATR): passive size soaked up aggressive flow
//   without letting price move.
//
//   Iceberg inference — a price level where the tape shows repeated fills
//   well in excess of the small resting size the book displays there.
//
//   Flow trend — accumulation (buy dominance into flat price),
//   distribution (sell dominance into flat price), or manipulation when
//   consecutive bars alternate extreme buy/sell dominance while price
//   reverts to where it started.

use serde::Serialize;

use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::types::{Candle, Lean, OrderBook, Trade};

/// Bars sampled for averages and the manipulation scan.
const FLOW_WINDOW: usize = 20;

/// Volume multiple that qualifies as an absorption candidate.
const ABSORPTION_VOLUME_RATIO: f64 = 2.0;

/// Range ceiling (in ATR multiples) for an absorption candidate.
const ABSORPTION_RANGE_RATIO: f64 = 0.5;

/// Minimum tape fills at one level before iceberg inference fires.
const ICEBERG_MIN_FILLS: usize = 5;

/// Institutional flow classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowTrend {
    Accumulation,
    Distribution,
    Manipulation,
    Neutral,
}

impl FlowTrend {
    fn lean(self) -> Lean {
        match self {
            Self::Accumulation => Lean::Bullish,
            Self::Distribution => Lean::Bearish,
            Self::Manipulation | Self::Neutral => Lean::Neutral,
        }
    }
}

impl std::fmt::Display for FlowTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accumulation => "accumulation",
            Self::Distribution => "distribution",
            Self::Manipulation => "manipulation",
            Self::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

/// A detected absorption event.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AbsorptionEvent {
    pub direction: Lean,
    /// Bar volume over the recent average.
    pub volume_ratio: f64,
    /// Bar range over ATR.
    pub range_ratio: f64,
    /// Combined strength in [0, 1].
    pub strength: f64,
}

/// Full order-flow payload.
#[derive(Debug, Clone, Serialize)]
pub struct OrderFlowAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absorption: Option<AbsorptionEvent>,
    pub iceberg_levels: usize,
    pub flow_trend: FlowTrend,
    /// Book depth imbalance in [-1, +1].
    pub book_imbalance: f64,
}

impl OrderFlowAnalysis {
    pub fn evidence(&self) -> String {
        match &self.absorption {
            Some(a) => format!(
                "{} flow, {} absorption (vol {:.1}x, range {:.2} ATR), book imbalance {:+.2}",
                self.flow_trend, a.direction, a.volume_ratio, a.range_ratio, self.book_imbalance
            ),
            None => format!(
                "{} flow, {} iceberg level(s), book imbalance {:+.2}",
                self.flow_trend, self.iceberg_levels, self.book_imbalance
            ),
        }
    }
}

// =============================================================================
// Absorption
// =============================================================================

fn detect_absorption(candles: &[Candle]) -> Option<AbsorptionEvent> {
    if candles.len() < FLOW_WINDOW {
        return None;
    }
    let recent = &candles[candles.len() - FLOW_WINDOW..];

    let avg_volume = recent.iter().map(|c| c.volume).sum::<f64>() / recent.len() as f64;
    if avg_volume < f64::EPSILON {
        return None;
    }

    // ATR over the window (simple TR average is enough at this scale).
    let mut tr_sum = 0.0;
    for w in recent.windows(2) {
        let tr = (w[1].high - w[1].low)
            .max((w[1].high - w[0].close).abs())
            .max((w[1].low - w[0].close).abs());
        tr_sum += tr;
    }
    let atr = tr_sum / (recent.len() - 1) as f64;
    if atr < f64::EPSILON {
        return None;
    }

    // Scan the last three bars, keep the strongest qualifying event.
    let mut best: Option<AbsorptionEvent> = None;
    for candle in &recent[recent.len().saturating_sub(3)..] {
        let volume_ratio = candle.volume / avg_volume;
        let range_ratio = (candle.high - candle.low) / atr;

        if volume_ratio > ABSORPTION_VOLUME_RATIO && range_ratio < ABSORPTION_RANGE_RATIO {
            let direction = if candle.close >= candle.open {
                Lean::Bullish
            } else {
                Lean::Bearish
            };
            let strength =
                ((volume_ratio / 3.0).min(1.0) * (1.0 - range_ratio)).clamp(0.0, 1.0);

            let event = AbsorptionEvent {
                direction,
                volume_ratio,
                range_ratio,
                strength,
            };

            if best.map_or(true, |b| event.strength > b.strength) {
                best = Some(event);
            }
        }
    }

    best
}

// =============================================================================
// Iceberg inference
// =============================================================================

/// Count price levels where the tape filled far more than the book rests.
fn infer_icebergs(book: &OrderBook, trades: &[Trade]) -> usize {
    if trades.is_empty() {
        return 0;
    }

    // Bucket trades by price level (grouped within 0.05%).
    let mut buckets: Vec<(f64, usize, f64)> = Vec::new(); // (price, fills, size)
    'next: for t in trades {
        for bucket in buckets.iter_mut() {
            if (t.price - bucket.0).abs() / bucket.0.max(f64::EPSILON) < 0.0005 {
                bucket.1 += 1;
                bucket.2 += t.size;
                continue 'next;
            }
        }
        buckets.push((t.price, 1, t.size));
    }

    let resting_at = |price: f64| -> Option<f64> {
        book.bids
            .iter()
            .chain(&book.asks)
            .find(|l| (l.price - price).abs() / price.max(f64::EPSILON) < 0.0005)
            .map(|l| l.size)
    };

    buckets
        .iter()
        .filter(|(price, fills, filled)| {
            *fills >= ICEBERG_MIN_FILLS
                && resting_at(*price).map_or(false, |resting| *filled > resting * 3.0)
        })
        .count()
}

// =============================================================================
// Flow trend
// =============================================================================

fn classify_flow(candles: &[Candle], book_imbalance: f64) -> FlowTrend {
    if candles.len() < 6 {
        return FlowTrend::Neutral;
    }
    let window = &candles[candles.len() - FLOW_WINDOW.min(candles.len())..];

    let buy_ratio = |c: &Candle| -> f64 {
        let range = (c.high - c.low).max(f64::EPSILON);
        ((c.close - c.low) / range).clamp(0.0, 1.0)
    };

    // Manipulation: alternating extreme dominance while price round-trips.
    let tail = &window[window.len().saturating_sub(6)..];
    let mut flips = 0;
    let mut prev_extreme: Option<bool> = None; // true = buy extreme
    for c in tail {
        let r = buy_ratio(c);
        let extreme = if r > 0.75 {
            Some(true)
        } else if r < 0.25 {
            Some(false)
        } else {
            None
        };
        if let (Some(e), Some(p)) = (extreme, prev_extreme) {
            if e != p {
                flips += 1;
            }
        }
        if extreme.is_some() {
            prev_extreme = extreme;
        }
    }
    let first = tail.first().map(|c| c.open).unwrap_or(0.0);
    let last = tail.last().map(|c| c.close).unwrap_or(0.0);
    let reverted = first > 0.0 && ((last - first) / first).abs() < 0.005;
    if flips >= 3 && reverted {
        return FlowTrend::Manipulation;
    }

    // Accumulation / distribution: sustained dominance into a quiet tape.
    let avg_ratio = window.iter().map(buy_ratio).sum::<f64>() / window.len() as f64;
    let w_first = window.first().map(|c| c.open).unwrap_or(0.0);
    let w_last = window.last().map(|c| c.close).unwrap_or(0.0);
    let drift = if w_first > 0.0 {
        (w_last - w_first) / w_first
    } else {
        0.0
    };

    if avg_ratio > 0.6 && drift < 0.01 && book_imbalance > -0.2 {
        FlowTrend::Accumulation
    } else if avg_ratio < 0.4 && drift > -0.01 && book_imbalance < 0.2 {
        FlowTrend::Distribution
    } else {
        FlowTrend::Neutral
    }
}

// =============================================================================
// Engine entry point
// =============================================================================

/// Analyze order flow from the book, tape, and recent candles.
pub fn analyze(
    book: Option<&OrderBook>,
    trades: Option<&[Trade]>,
    candles: &[Candle],
) -> EngineReport {
    let kind = EngineKind::OrderFlow;

    let book = match book {
        Some(b) if !b.bids.is_empty() && !b.asks.is_empty() => b,
        Some(_) => return EngineReport::unavailable(kind, "order book side empty"),
        None => return EngineReport::unavailable(kind, "order book missing"),
    };

    let book_imbalance = book.imbalance();
    let absorption = detect_absorption(candles);
    let iceberg_levels = trades.map(|t| infer_icebergs(book, t)).unwrap_or(0);
    let flow_trend = classify_flow(candles, book_imbalance);

    // Flow trend carries the direction; a strong book tilt can break a
    // neutral read (but never overrides manipulation).
    let lean = match flow_trend {
        FlowTrend::Neutral if book_imbalance > 0.3 => Lean::Bullish,
        FlowTrend::Neutral if book_imbalance < -0.3 => Lean::Bearish,
        other => other.lean(),
    };

    let absorption_boost = absorption.map(|a| a.strength * 20.0).unwrap_or(0.0);
    let score = (50.0
        + absorption_boost
        + book_imbalance.abs() * 20.0
        + (iceberg_levels.min(3) as f64) * 5.0)
        .min(95.0);

    let analysis = OrderFlowAnalysis {
        absorption,
        iceberg_levels,
        flow_trend,
        book_imbalance,
    };

    EngineReport::new(kind, score, lean, EngineDetail::OrderFlow(analysis))
}
