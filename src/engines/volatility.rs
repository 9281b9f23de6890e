// =============================================================================
// Volatility Engine — ATR regime, liquidity tier, divergence cross-check
// =============================================================================
//
// The enhanced layer folds three reads into one report:
//
//   ATR% regime   — ranging < 0.8%, normal 0.8-1.5%, high 1.5-2.5%,
//                   extreme > 2.5% of price
//   Liquidity     — 24h USD volume tiers; an illiquid market (< $1M) must
//                   reject any signal downstream regardless of other layers
//   Divergence    — price direction cross-checked against RSI, estimated
//                   CVD, and OBV over the last 20 bars

use serde::Serialize;

use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::indicators::atr::calculate_atr_pct;
use crate::indicators::obv::calculate_obv;
use crate::indicators::rsi::calculate_rsi;
use crate::types::{Candle, Lean, Ticker};

const ATR_PERIOD: usize = 14;
const DIVERGENCE_WINDOW: usize = 20;

/// ATR-percent volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    Ranging,
    Normal,
    High,
    Extreme,
}

impl VolatilityRegime {
    fn from_atr_pct(atr_pct: f64) -> Self {
        if atr_pct > 2.5 {
            Self::Extreme
        } else if atr_pct > 1.5 {
            Self::High
        } else if atr_pct >= 0.8 {
            Self::Normal
        } else {
            Self::Ranging
        }
    }
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ranging => "ranging",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Extreme => "extreme",
        };
        write!(f, "{s}")
    }
}

/// 24h USD volume liquidity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityTier {
    Illiquid,
    Low,
    Medium,
    High,
}

impl LiquidityTier {
    fn from_volume_usd(volume: f64) -> Self {
        if volume >= 50_000_000.0 {
            Self::High
        } else if volume >= 10_000_000.0 {
            Self::Medium
        } else if volume >= 1_000_000.0 {
            Self::Low
        } else {
            Self::Illiquid
        }
    }
}

impl std::fmt::Display for LiquidityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Illiquid => "illiquid",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Which oscillator disagreed with price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceMetric {
    Rsi,
    Cvd,
    Obv,
}

/// One divergence flag: the metric and the direction it argues for.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DivergenceFlag {
    pub metric: DivergenceMetric,
    pub direction: Lean,
}

/// Full volatility payload.
#[derive(Debug, Clone, Serialize)]
pub struct VolatilityAnalysis {
    pub atr_pct: f64,
    pub regime: VolatilityRegime,
    pub liquidity: LiquidityTier,
    pub divergences: Vec<DivergenceFlag>,
}

impl VolatilityAnalysis {
    pub fn evidence(&self) -> String {
        format!(
            "ATR {:.2}% ({} regime), {} liquidity, {} divergence flag(s)",
            self.atr_pct,
            self.regime,
            self.liquidity,
            self.divergences.len()
        )
    }
}

// =============================================================================
// Divergence cross-check
// =============================================================================

/// Net direction of a series over the window: sign of last minus first.
fn series_direction(series: &[f64]) -> f64 {
    match (series.first(), series.last()) {
        (Some(&a), Some(&b)) if a.is_finite() && b.is_finite() => (b - a).signum(),
        _ => 0.0,
    }
}

fn tail(series: &[f64], n: usize) -> &[f64] {
    &series[series.len().saturating_sub(n)..]
}

/// Cross-check price direction against each oscillator; a sign mismatch is
/// a divergence arguing in the oscillator's direction.
fn detect_divergences(candles: &[Candle]) -> Vec<DivergenceFlag> {
    if candles.len() < DIVERGENCE_WINDOW {
        return Vec::new();
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let price_dir = series_direction(tail(&closes, DIVERGENCE_WINDOW));
    if price_dir == 0.0 {
        return Vec::new();
    }

    // Estimated per-bar flow from body position, accumulated.
    let mut cvd = Vec::with_capacity(candles.len());
    let mut running = 0.0;
    for c in candles {
        let range = (c.high - c.low).max(f64::EPSILON);
        let ratio = ((c.close - c.low) / range).clamp(0.1, 0.9);
        let volume = if c.volume.is_finite() { c.volume } else { 0.0 };
        running += volume * (2.0 * ratio - 1.0);
        cvd.push(running);
    }

    let rsi = calculate_rsi(&closes, 14);
    let obv = calculate_obv(candles);

    let mut flags = Vec::new();
    for (metric, series) in [
        (DivergenceMetric::Rsi, &rsi),
        (DivergenceMetric::Cvd, &cvd),
        (DivergenceMetric::Obv, &obv),
    ] {
        if series.len() < 2 {
            continue;
        }
        let dir = series_direction(tail(series, DIVERGENCE_WINDOW));
        if dir != 0.0 && dir != price_dir {
            flags.push(DivergenceFlag {
                metric,
                direction: if dir > 0.0 { Lean::Bullish } else { Lean::Bearish },
            });
        }
    }

    flags
}

// =============================================================================
// Engine entry point
// =============================================================================

/// Analyze volatility, liquidity, and oscillator divergence.
pub fn analyze(candles: &[Candle], ticker: Option<&Ticker>) -> EngineReport {
    let kind = EngineKind::Volatility;

    let atr_pct = match calculate_atr_pct(candles, ATR_PERIOD) {
        Some(v) => v,
        None => {
            return EngineReport::unavailable(
                kind,
                format!("{} candles, need {}", candles.len(), ATR_PERIOD + 1),
            )
        }
    };

    let regime = VolatilityRegime::from_atr_pct(atr_pct);

    let liquidity = match ticker {
        Some(t) if t.volume_24h.is_finite() => LiquidityTier::from_volume_usd(t.volume_24h),
        // No ticker means no liquidity read; treat as the lowest tradable
        // tier so the layer degrades instead of rejecting everything.
        _ => LiquidityTier::Low,
    };

    let divergences = detect_divergences(candles);

    let bullish = divergences
        .iter()
        .filter(|d| d.direction == Lean::Bullish)
        .count();
    let bearish = divergences.len() - bullish;

    // An illiquid market never argues a direction.
    let lean = if liquidity == LiquidityTier::Illiquid {
        Lean::Neutral
    } else if bullish > bearish {
        Lean::Bullish
    } else if bearish > bullish {
        Lean::Bearish
    } else {
        Lean::Neutral
    };

    let agreeing = bullish.max(bearish);
    let score = (50.0 + 12.0 * agreeing as f64).min(95.0);

    let analysis = VolatilityAnalysis {
        atr_pct,
        regime,
        liquidity,
        divergences,
    };

    EngineReport::new(kind, score, lean, EngineDetail::Volatility(analysis))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: i64, close: f64, spread: f64, volume: f64) -> Candle {
        Candle::new(i * 60_000, close, close + spread, close - spread, close, volume)
    }

    fn tape(spread: f64) -> Vec<Candle> {
        (0..40)
            .map(|i| candle(i, 100.0 + (i as f64 * 0.4).sin(), spread, 1000.0))
            .collect()
    }

    fn ticker(volume: f64) -> Ticker {
        Ticker {
            price: 100.0,
            volume_24h: volume,
            change_24h: 0.0,
        }
    }

    #[test]
    fn too_few_candles_unavailable() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i, 100.0, 1.0, 10.0)).collect();
        assert!(!analyze(&candles, None).is_available());
    }

    #[test]
    fn regime_ladder() {
        assert_eq!(VolatilityRegime::from_atr_pct(0.5), VolatilityRegime::Ranging);
        assert_eq!(VolatilityRegime::from_atr_pct(1.0), VolatilityRegime::Normal);
        assert_eq!(VolatilityRegime::from_atr_pct(2.0), VolatilityRegime::High);
        assert_eq!(VolatilityRegime::from_atr_pct(3.0), VolatilityRegime::Extreme);
    }

    #[test]
    fn liquidity_ladder() {
        assert_eq!(LiquidityTier::from_volume_usd(500_000.0), LiquidityTier::Illiquid);
        assert_eq!(LiquidityTier::from_volume_usd(5_000_000.0), LiquidityTier::Low);
        assert_eq!(LiquidityTier::from_volume_usd(25_000_000.0), LiquidityTier::Medium);
        assert_eq!(LiquidityTier::from_volume_usd(80_000_000.0), LiquidityTier::High);
    }

    #[test]
    fn tight_tape_reads_ranging() {
        let report = analyze(&tape(0.2), Some(&ticker(100_000_000.0)));
        if let EngineDetail::Volatility(a) = &report.detail {
            assert_eq!(a.regime, VolatilityRegime::Ranging);
            assert_eq!(a.liquidity, LiquidityTier::High);
        } else {
            panic!("wrong detail variant");
        }
    }

    #[test]
    fn wide_tape_reads_extreme() {
        let report = analyze(&tape(4.0), Some(&ticker(100_000_000.0)));
        if let EngineDetail::Volatility(a) = &report.detail {
            assert_eq!(a.regime, VolatilityRegime::Extreme);
        }
    }

    #[test]
    fn illiquid_market_is_neutral() {
        let report = analyze(&tape(1.0), Some(&ticker(500_000.0)));
        assert_eq!(report.lean, Lean::Neutral);
        if let EngineDetail::Volatility(a) = &report.detail {
            assert_eq!(a.liquidity, LiquidityTier::Illiquid);
        }
    }

    #[test]
    fn bearish_divergence_price_up_flow_down() {
        // Price grinds higher while every close pins the low of its bar, so
        // estimated flow (and OBV direction) walks lower.
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.05;
                Candle::new(i * 60_000, base + 0.9, base + 1.0, base - 1.0, base - 0.9, 1000.0)
            })
            .collect();
        let flags = detect_divergences(&candles);
        assert!(
            flags.iter().any(|f| f.direction == Lean::Bearish),
            "expected a bearish divergence flag, got {flags:?}"
        );
    }

    #[test]
    fn no_divergence_on_aligned_trend() {
        // Clean uptrend with closes at the highs: all series agree.
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                Candle::new(i * 60_000, base - 0.9, base + 1.0, base - 1.0, base + 0.9, 1000.0)
            })
            .collect();
        assert!(detect_divergences(&candles).is_empty());
    }
}
