// =============================================================================
// Confluence Scorer — weighted multi-layer aggregation
// =============================================================================
//
// Pipeline per evaluation:
//
//   1. Base weight per layer, times the learned pattern multiplier.
//   2. Timeframe reweighting (1h boosts momentum/volatility, 1d boosts
//      structure and institutional flow; 4h and the rest are untouched).
//   3. Renormalize so active weights sum to 1.0 — unavailable or disabled
//      layers hold weight 0 and their share is redistributed
//      proportionally across the remainder.
//   4. overall = sum(weight_i * signed_i) with signed scores in [-100, 100].
//   5. Classification bands, layers-passed count, risk level, and a
//      templated recommendation.
//
// Determinism: layers are always visited in `EngineKind::ALL` order, so the
// same inputs and weight book produce bit-identical output.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::confluence::weights::PatternWeightBook;
use crate::engines::volatility::{LiquidityTier, VolatilityRegime};
use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::pairs::Timeframe;
use crate::types::Lean;

/// Weight renormalization tolerance.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// Final classification of a confluence evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalClass {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl SignalClass {
    fn from_overall(overall: f64) -> Self {
        if overall > 50.0 {
            Self::StrongBuy
        } else if overall > 20.0 {
            Self::Buy
        } else if overall >= -20.0 {
            Self::Hold
        } else if overall >= -50.0 {
            Self::Sell
        } else {
            Self::StrongSell
        }
    }

    /// Direction sign of the classification: +1, -1, or 0 for HOLD.
    pub fn sign(self) -> f64 {
        match self {
            Self::StrongBuy | Self::Buy => 1.0,
            Self::Sell | Self::StrongSell => -1.0,
            Self::Hold => 0.0,
        }
    }

    pub fn is_hold(self) -> bool {
        self == Self::Hold
    }
}

impl std::fmt::Display for SignalClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG_SELL",
        };
        write!(f, "{s}")
    }
}

/// Risk classification attached to the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

/// One layer's contribution to the final score.
#[derive(Debug, Clone, Serialize)]
pub struct LayerScore {
    pub layer: EngineKind,
    /// Normalized weight actually applied (0 for unavailable layers).
    pub weight: f64,
    /// Raw engine score in [0, 100].
    pub score: f64,
    /// Signed contribution before weighting, in [-100, 100].
    pub signed: f64,
    pub lean: Lean,
    pub available: bool,
}

/// Result of one confluence evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ConfluenceResult {
    /// Signed overall score; magnitude in [0, 100].
    pub overall_score: f64,
    pub signal: SignalClass,
    pub layers_passed: usize,
    pub per_layer: Vec<LayerScore>,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    pub timeframe: Timeframe,
    pub timestamp: i64,
}

impl ConfluenceResult {
    /// Name of the layer with the largest weighted contribution.
    pub fn dominant_factor(&self) -> Option<EngineKind> {
        self.per_layer
            .iter()
            .filter(|l| l.available)
            .max_by(|a, b| {
                (a.weight * a.signed.abs()).total_cmp(&(b.weight * b.signed.abs()))
            })
            .map(|l| l.layer)
    }

    /// Layers ranked by absolute weighted contribution, strongest first.
    pub fn ranked_factors(&self) -> Vec<&LayerScore> {
        let mut layers: Vec<&LayerScore> = self.per_layer.iter().filter(|l| l.available).collect();
        layers.sort_by(|a, b| {
            (b.weight * b.signed.abs()).total_cmp(&(a.weight * a.signed.abs()))
        });
        layers
    }
}

// =============================================================================
// Scorer
// =============================================================================

/// Stateless scoring engine over a shared learned-weight book.
#[derive(Clone)]
pub struct ConfluenceScorer {
    weights: Arc<PatternWeightBook>,
}

impl ConfluenceScorer {
    pub fn new(weights: Arc<PatternWeightBook>) -> Self {
        Self { weights }
    }

    pub fn weight_book(&self) -> &Arc<PatternWeightBook> {
        &self.weights
    }

    /// Timeframe weight adjustment factor for one layer.
    fn timeframe_factor(tf: Timeframe, kind: EngineKind) -> f64 {
        match tf {
            Timeframe::H1 => match kind {
                EngineKind::Momentum => 1.3,
                EngineKind::Volatility => 1.5,
                EngineKind::OrderFlow => 0.7,
                _ => 1.0,
            },
            Timeframe::D1 => match kind {
                EngineKind::MarketStructure => 1.3,
                EngineKind::OrderFlow => 1.4,
                EngineKind::Momentum => 0.8,
                _ => 1.0,
            },
            _ => 1.0,
        }
    }

    /// Score one full set of engine reports.
    ///
    /// `reports` must hold one report per engine kind; missing kinds are
    /// treated as unavailable layers.
    pub fn score(&self, reports: &[EngineReport], tf: Timeframe, now: i64) -> ConfluenceResult {
        // Index reports by kind so evaluation order is canonical.
        let mut by_kind: [Option<&EngineReport>; 8] = [None; 8];
        for r in reports {
            by_kind[r.kind.index()] = Some(r);
        }

        // --- Steps 1-2: composed raw weights --------------------------------
        let mut raw_weights = [0.0_f64; 8];
        for kind in EngineKind::ALL {
            let idx = kind.index();
            let available = by_kind[idx].map_or(false, |r| r.is_available());
            if !available {
                continue;
            }
            let learned = self.weights.multiplier(kind.pattern_name());
            raw_weights[idx] =
                kind.base_weight() * learned * Self::timeframe_factor(tf, kind);
        }

        // --- Step 3: renormalize --------------------------------------------
        let total: f64 = raw_weights.iter().sum();
        let mut weights = [0.0_f64; 8];
        if total > WEIGHT_EPSILON {
            for i in 0..8 {
                weights[i] = raw_weights[i] / total;
            }
        }

        // --- Step 4: weighted signed sum ------------------------------------
        let mut overall = 0.0;
        let mut per_layer = Vec::with_capacity(8);
        for kind in EngineKind::ALL {
            let idx = kind.index();
            match by_kind[idx] {
                Some(r) if r.is_available() => {
                    let signed = r.signed_score();
                    overall += weights[idx] * signed;
                    per_layer.push(LayerScore {
                        layer: kind,
                        weight: weights[idx],
                        score: r.score,
                        signed,
                        lean: r.lean,
                        available: true,
                    });
                }
                _ => per_layer.push(LayerScore {
                    layer: kind,
                    weight: 0.0,
                    score: 0.0,
                    signed: 0.0,
                    lean: Lean::Neutral,
                    available: false,
                }),
            }
        }

        if !overall.is_finite() {
            overall = 0.0;
        }

        // --- Step 5: classify -----------------------------------------------
        let mut signal = SignalClass::from_overall(overall);

        // --- Step 6: risk level ---------------------------------------------
        let (risk_level, forced_hold) = self.assess_risk(&by_kind);
        if forced_hold {
            signal = SignalClass::Hold;
        }

        // Layers passed: direction agrees with the classification and the
        // raw score clears the pattern's confidence gate.
        let class_sign = signal.sign();
        let layers_passed = per_layer
            .iter()
            .filter(|l| {
                l.available
                    && l.lean.sign() == class_sign
                    && l.score >= self.weights.min_confidence(l.layer.pattern_name()) * 100.0
            })
            .count();

        // HOLD counts neutral layers which have score semantics of "no
        // direction"; their gate is the same.
        let recommendation = {
            let dominant = per_layer
                .iter()
                .filter(|l| l.available)
                .max_by(|a, b| {
                    (a.weight * a.signed.abs()).total_cmp(&(b.weight * b.signed.abs()))
                })
                .map(|l| l.layer.pattern_name())
                .unwrap_or("none");
            render_recommendation(signal, risk_level, dominant)
        };

        debug!(
            overall = format!("{overall:.2}"),
            signal = %signal,
            layers_passed,
            risk = %risk_level,
            tf = %tf,
            "confluence scored"
        );

        ConfluenceResult {
            overall_score: overall,
            signal,
            layers_passed,
            per_layer,
            risk_level,
            recommendation,
            timeframe: tf,
            timestamp: now,
        }
    }

    /// Risk ladder. Returns (risk, force_hold).
    fn assess_risk(&self, by_kind: &[Option<&EngineReport>; 8]) -> (RiskLevel, bool) {
        let volatility = by_kind[EngineKind::Volatility.index()].and_then(|r| match &r.detail {
            EngineDetail::Volatility(a) => Some(a),
            _ => None,
        });
        let oi = by_kind[EngineKind::OpenInterest.index()].and_then(|r| match &r.detail {
            EngineDetail::OpenInterest(a) => Some(a),
            _ => None,
        });
        let flow = by_kind[EngineKind::OrderFlow.index()].and_then(|r| match &r.detail {
            EngineDetail::OrderFlow(a) => Some(a),
            _ => None,
        });

        // An illiquid market is never tradable: HOLD with HIGH risk.
        if let Some(v) = volatility {
            if v.liquidity == LiquidityTier::Illiquid {
                return (RiskLevel::High, true);
            }
            if v.regime == VolatilityRegime::Extreme {
                return (RiskLevel::High, false);
            }
        }

        if let Some(o) = oi {
            if o.critical_cluster_within(2.0) {
                return (RiskLevel::High, false);
            }
        }

        // Quiet, balanced conditions read LOW.
        if let (Some(v), Some(f)) = (volatility, flow) {
            if v.regime == VolatilityRegime::Ranging && f.book_imbalance.abs() < 0.2 {
                return (RiskLevel::Low, false);
            }
        }

        (RiskLevel::Medium, false)
    }
}

impl std::fmt::Debug for ConfluenceScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfluenceScorer").finish()
    }
}

// =============================================================================
// Recommendation templates
// =============================================================================

fn render_recommendation(signal: SignalClass, risk: RiskLevel, dominant: &str) -> String {
    let action = match signal {
        SignalClass::StrongBuy => "Strong long setup",
        SignalClass::Buy => "Long lean",
        SignalClass::Hold => "No edge, stand aside",
        SignalClass::Sell => "Short lean",
        SignalClass::StrongSell => "Strong short setup",
    };
    let risk_phrase = match risk {
        RiskLevel::Low => "conditions are quiet",
        RiskLevel::Medium => "size with normal discipline",
        RiskLevel::High => "elevated risk, reduce size or skip",
    };
    if signal.is_hold() {
        format!("{action} ({risk_phrase}); strongest layer: {dominant}")
    } else {
        format!("{action} led by {dominant}; {risk_phrase}")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::momentum::MomentumAnalysis;
    use crate::engines::open_interest::OiAnalysis;
    use crate::engines::order_flow::{FlowTrend, OrderFlowAnalysis};
    use crate::engines::volatility::VolatilityAnalysis;

    fn dummy_detail(kind: EngineKind) -> EngineDetail {
        match kind {
            EngineKind::OpenInterest => EngineDetail::OpenInterest(OiAnalysis {
                oi_usd: 500_000_000.0,
                oi_change_24h_pct: 0.0,
                oi_turnover: 0.3,
                pressure_ratio: 0.0,
                presence: crate::engines::open_interest::InstitutionalPresence::Moderate,
                clusters: vec![],
                nearest_critical_pct: None,
            }),
            EngineKind::OrderFlow => EngineDetail::OrderFlow(OrderFlowAnalysis {
                absorption: None,
                iceberg_levels: 0,
                flow_trend: FlowTrend::Neutral,
                book_imbalance: 0.0,
            }),
            EngineKind::Volatility => EngineDetail::Volatility(VolatilityAnalysis {
                atr_pct: 1.0,
                regime: VolatilityRegime::Normal,
                liquidity: LiquidityTier::High,
                divergences: vec![],
            }),
            _ => EngineDetail::Momentum(MomentumAnalysis {
                rsi: Some(50.0),
                macd_histogram: None,
                ema_alignment: Lean::Neutral,
                bollinger_percent_b: None,
                bullish_votes: 0,
                bearish_votes: 0,
                neutral_votes: 0,
            }),
        }
    }

    fn report(kind: EngineKind, score: f64, lean: Lean) -> EngineReport {
        EngineReport::new(kind, score, lean, dummy_detail(kind))
    }

    fn full_set(score: f64, lean: Lean) -> Vec<EngineReport> {
        EngineKind::ALL
            .into_iter()
            .map(|k| report(k, score, lean))
            .collect()
    }

    fn scorer() -> ConfluenceScorer {
        ConfluenceScorer::new(Arc::new(PatternWeightBook::new()))
    }

    #[test]
    fn all_bullish_80_on_1h_is_strong_buy_with_8_layers() {
        let result = scorer().score(&full_set(80.0, Lean::Bullish), Timeframe::H1, 0);
        assert!(
            result.overall_score >= 70.0 && result.overall_score <= 85.0,
            "overall {}",
            result.overall_score
        );
        assert_eq!(result.signal, SignalClass::StrongBuy);
        assert_eq!(result.layers_passed, 8);
    }

    #[test]
    fn active_weights_sum_to_one() {
        for tf in [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1] {
            let result = scorer().score(&full_set(80.0, Lean::Bullish), tf, 0);
            let sum: f64 = result.per_layer.iter().map(|l| l.weight).sum();
            assert!((sum - 1.0).abs() < WEIGHT_EPSILON, "tf {tf}: sum {sum}");
        }
    }

    #[test]
    fn conflicting_layers_resolve_to_hold() {
        // Structure bullish 70, CVD bearish 75, momentum bullish 60, the
        // rest neutral 50: weighted sum lands inside the HOLD band.
        let mut reports = Vec::new();
        for kind in EngineKind::ALL {
            let (score, lean) = match kind {
                EngineKind::MarketStructure => (70.0, Lean::Bullish),
                EngineKind::VolumeDelta => (75.0, Lean::Bearish),
                EngineKind::Momentum => (60.0, Lean::Bullish),
                _ => (50.0, Lean::Neutral),
            };
            reports.push(report(kind, score, lean));
        }
        let result = scorer().score(&reports, Timeframe::H4, 0);
        assert_eq!(result.signal, SignalClass::Hold);
        // +0.10*70 - 0.15*75 + 0.15*60 = 4.75
        assert!((result.overall_score - 4.75).abs() < 1e-9);
    }

    #[test]
    fn unavailable_layer_weight_is_redistributed() {
        let mut reports = full_set(80.0, Lean::Bullish);
        reports[EngineKind::Fibonacci.index()] =
            EngineReport::unavailable(EngineKind::Fibonacci, "short history");

        let result = scorer().score(&reports, Timeframe::H4, 0);
        let sum: f64 = result.per_layer.iter().map(|l| l.weight).sum();
        assert!((sum - 1.0).abs() < WEIGHT_EPSILON);
        assert_eq!(
            result.per_layer[EngineKind::Fibonacci.index()].weight, 0.0
        );
        // Seven identical bullish layers still produce overall 80.
        assert!((result.overall_score - 80.0).abs() < 1e-9);
        assert_eq!(result.layers_passed, 7);
    }

    #[test]
    fn classification_bands() {
        assert_eq!(SignalClass::from_overall(60.0), SignalClass::StrongBuy);
        assert_eq!(SignalClass::from_overall(50.0), SignalClass::Buy);
        assert_eq!(SignalClass::from_overall(20.0), SignalClass::Hold);
        assert_eq!(SignalClass::from_overall(-20.0), SignalClass::Hold);
        assert_eq!(SignalClass::from_overall(-21.0), SignalClass::Sell);
        assert_eq!(SignalClass::from_overall(-50.0), SignalClass::Sell);
        assert_eq!(SignalClass::from_overall(-51.0), SignalClass::StrongSell);
    }

    #[test]
    fn learned_multiplier_shifts_weighting() {
        let book = Arc::new(PatternWeightBook::new());
        // Crush everything except momentum.
        for kind in EngineKind::ALL {
            if kind != EngineKind::Momentum {
                book.apply_adjustment(kind.pattern_name(), -0.9, 0.0, "test", 0);
            }
        }
        let scorer = ConfluenceScorer::new(book);

        let mut reports = full_set(50.0, Lean::Neutral);
        reports[EngineKind::Momentum.index()] =
            report(EngineKind::Momentum, 90.0, Lean::Bullish);

        let result = scorer.score(&reports, Timeframe::H4, 0);
        // Momentum weight: 0.15*1.0 over total 0.15 + 0.85*0.1 = 0.235.
        let momentum_weight = result.per_layer[EngineKind::Momentum.index()].weight;
        assert!(momentum_weight > 0.6, "momentum weight {momentum_weight}");
        assert_eq!(result.signal, SignalClass::StrongBuy);
    }

    #[test]
    fn illiquid_market_forces_hold_high_risk() {
        let mut reports = full_set(85.0, Lean::Bullish);
        reports[EngineKind::Volatility.index()] = EngineReport::new(
            EngineKind::Volatility,
            60.0,
            Lean::Neutral,
            EngineDetail::Volatility(VolatilityAnalysis {
                atr_pct: 1.0,
                regime: VolatilityRegime::Normal,
                liquidity: LiquidityTier::Illiquid,
                divergences: vec![],
            }),
        );
        let result = scorer().score(&reports, Timeframe::H4, 0);
        assert_eq!(result.signal, SignalClass::Hold);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn extreme_volatility_is_high_risk() {
        let mut reports = full_set(80.0, Lean::Bullish);
        reports[EngineKind::Volatility.index()] = EngineReport::new(
            EngineKind::Volatility,
            60.0,
            Lean::Bullish,
            EngineDetail::Volatility(VolatilityAnalysis {
                atr_pct: 3.5,
                regime: VolatilityRegime::Extreme,
                liquidity: LiquidityTier::High,
                divergences: vec![],
            }),
        );
        let result = scorer().score(&reports, Timeframe::H4, 0);
        assert_eq!(result.risk_level, RiskLevel::High);
        // Not forced to hold — only illiquidity does that.
        assert_ne!(result.signal, SignalClass::Hold);
    }

    #[test]
    fn quiet_balanced_market_is_low_risk() {
        let mut reports = full_set(50.0, Lean::Neutral);
        reports[EngineKind::Volatility.index()] = EngineReport::new(
            EngineKind::Volatility,
            50.0,
            Lean::Neutral,
            EngineDetail::Volatility(VolatilityAnalysis {
                atr_pct: 0.4,
                regime: VolatilityRegime::Ranging,
                liquidity: LiquidityTier::High,
                divergences: vec![],
            }),
        );
        let result = scorer().score(&reports, Timeframe::H4, 0);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn determinism_bit_identical() {
        let reports = full_set(73.5, Lean::Bullish);
        let s = scorer();
        let a = s.score(&reports, Timeframe::H1, 42);
        let b = s.score(&reports, Timeframe::H1, 42);
        assert_eq!(a.overall_score.to_bits(), b.overall_score.to_bits());
        assert_eq!(a.signal, b.signal);
        assert_eq!(a.layers_passed, b.layers_passed);
    }

    #[test]
    fn dominant_factor_is_heaviest_contribution() {
        let mut reports = full_set(50.0, Lean::Neutral);
        reports[EngineKind::VolumeDelta.index()] =
            report(EngineKind::VolumeDelta, 90.0, Lean::Bullish);
        let result = scorer().score(&reports, Timeframe::H4, 0);
        assert_eq!(result.dominant_factor(), Some(EngineKind::VolumeDelta));
    }
}
