// =============================================================================
// Signal Enricher — execution parameters from a scored confluence result
// =============================================================================
//
// Entry is the current price (mid of ticker). The stop distance is a base
// 1.5% scaled by signal strength; take-profits sit at R-multiples
// {0.5, 1.0, 1.5} of the configured risk/reward. Position size is a 10%
// base scaled by confidence and strength, clamped to [0, 0.3] of equity.
//
// The final reality check enforces cross-layer consistency: a primary
// factor without supporting evidence is dropped, and a stated direction
// that fights a heavily one-sided order book (dominant side more than 3x
// the opposite) with two or more layers leaning the other way is rewritten
// to neutral with confidence capped at 60.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::confluence::{ConfluenceResult, SignalClass};
use crate::engines::volatility::{LiquidityTier, VolatilityRegime};
use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::pairs::{Pair, Timeframe};
use crate::runtime_config::EngineConfig;
use crate::types::{Lean, OrderBook};

/// Base position size as a fraction of equity before scaling.
const BASE_SIZE_FRACTION: f64 = 0.10;

/// Hard cap on the recommended size fraction.
const MAX_SIZE_FRACTION: f64 = 0.3;

/// Book dominance ratio beyond which the reality check may veto direction.
const BOOK_CONFLICT_RATIO: f64 = 3.0;

/// Confidence ceiling applied when the reality check fires.
const REALITY_CHECK_CONFIDENCE_CAP: f64 = 60.0;

/// Take-profit R-multiples.
const TP_MULTIPLES: [f64; 3] = [0.5, 1.0, 1.5];

/// Directional bias of an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Long,
    Short,
    Neutral,
}

impl Bias {
    fn from_class(class: SignalClass) -> Self {
        match class {
            SignalClass::Buy | SignalClass::StrongBuy => Self::Long,
            SignalClass::Sell | SignalClass::StrongSell => Self::Short,
            SignalClass::Hold => Self::Neutral,
        }
    }

    fn lean(self) -> Lean {
        match self {
            Self::Long => Lean::Bullish,
            Self::Short => Lean::Bearish,
            Self::Neutral => Lean::Neutral,
        }
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

/// Strength band of an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl SignalStrength {
    fn from_confidence(confidence: f64) -> Self {
        if confidence >= 75.0 {
            Self::VeryStrong
        } else if confidence >= 60.0 {
            Self::Strong
        } else if confidence >= 45.0 {
            Self::Moderate
        } else {
            Self::Weak
        }
    }

    /// Stop distance as a fraction of entry.
    fn stop_distance(self) -> f64 {
        match self {
            Self::VeryStrong => 0.010,
            Self::Strong => 0.012,
            Self::Moderate => 0.015,
            Self::Weak => 0.020,
        }
    }

    /// Position-size scaling factor.
    fn size_multiplier(self) -> f64 {
        match self {
            Self::Weak => 0.5,
            Self::Moderate => 1.0,
            Self::Strong => 1.5,
            Self::VeryStrong => 2.0,
        }
    }
}

/// Structured rationale attached to a signal.
#[derive(Debug, Clone, Serialize)]
pub struct SignalReasoning {
    /// Top contributing layers, strongest first (at most three).
    pub primary_factors: Vec<String>,
    /// One evidence line per primary factor.
    pub supporting_evidence: HashMap<String, String>,
    pub risk_factors: Vec<String>,
    pub market_context: String,
}

/// A fully enriched, immutable trading signal.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub signal_id: Uuid,
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub bias: Bias,
    /// Confidence in [0, 100].
    pub confidence: f64,
    pub strength: SignalStrength,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    /// One to three levels for directional signals, empty for neutral.
    pub take_profits: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_reward: Option<f64>,
    /// Fraction of equity, in [0, 0.3].
    pub recommended_size_fraction: f64,
    /// Worked sizing example in base-asset units, from configured equity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_coins: Option<f64>,
    /// Suggested maximum holding time in hours.
    pub max_holding_hours: f64,
    pub reasoning: SignalReasoning,
    pub invalidation_conditions: Vec<String>,
    /// True when the signal lacks a price and carries no execution levels.
    pub incomplete: bool,
    pub created_at: i64,
}

// =============================================================================
// Enricher
// =============================================================================

/// Stateless enrichment step between the scorer and the signal sink.
#[derive(Debug, Clone)]
pub struct SignalEnricher {
    risk_reward: f64,
    account_equity: f64,
    risk_per_trade_percent: f64,
    min_stop_distance: f64,
    min_tp_distance: f64,
}

impl SignalEnricher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            risk_reward: config.risk_reward,
            account_equity: config.account_equity,
            risk_per_trade_percent: config.risk_per_trade_percent,
            min_stop_distance: config.default_sl_percent,
            min_tp_distance: config.default_tp_percent,
        }
    }

    /// Build a signal from a confluence result.
    ///
    /// `price` is the ticker mid; when it is unavailable the signal is
    /// emitted incomplete with zero size and no execution levels.
    pub fn enrich(
        &self,
        pair: &Pair,
        confluence: &ConfluenceResult,
        reports: &[EngineReport],
        price: Option<f64>,
        book: Option<&OrderBook>,
        now: i64,
    ) -> Signal {
        let mut bias = Bias::from_class(confluence.signal);
        let mut confidence = confluence.overall_score.abs().clamp(0.0, 100.0);

        // --- Reality check: order-book conflict -----------------------------
        if bias != Bias::Neutral {
            if let Some(book) = book {
                let dominance = book.dominance_ratio();
                let book_side = if book.imbalance() > 0.0 {
                    Lean::Bullish
                } else {
                    Lean::Bearish
                };
                let opposing_layers = reports
                    .iter()
                    .filter(|r| r.is_available() && r.lean == bias.lean().opposite())
                    .count();

                if dominance > BOOK_CONFLICT_RATIO
                    && book_side == bias.lean().opposite()
                    && opposing_layers >= 2
                {
                    debug!(
                        pair = %pair,
                        dominance = format!("{dominance:.1}"),
                        opposing_layers,
                        "reality check: book conflict, neutralizing bias"
                    );
                    bias = Bias::Neutral;
                    confidence = confidence.min(REALITY_CHECK_CONFIDENCE_CAP);
                }
            }
        }

        let strength = SignalStrength::from_confidence(confidence);

        // --- Execution levels ------------------------------------------------
        let entry = price.filter(|p| p.is_finite() && *p > 0.0);
        let incomplete = entry.is_none();

        let (stop_loss, take_profits, risk_reward) = match (bias, entry) {
            (Bias::Neutral, _) | (_, None) => (None, Vec::new(), None),
            (bias, Some(entry)) => {
                // Strength-scaled distance, floored at the configured
                // minimums so a thin stop never collapses below them.
                let sd = strength.stop_distance().max(self.min_stop_distance);
                let dir = if bias == Bias::Long { 1.0 } else { -1.0 };

                let stop = entry * (1.0 - dir * sd);
                let tps: Vec<f64> = TP_MULTIPLES
                    .iter()
                    .map(|m| {
                        let dist = (sd * self.risk_reward * m).max(self.min_tp_distance * m);
                        entry * (1.0 + dir * dist)
                    })
                    .collect();

                let rr = (tps[0] - entry).abs() / (entry - stop).abs();
                (Some(stop), tps, Some(rr))
            }
        };

        // --- Position sizing -------------------------------------------------
        let recommended_size_fraction = if bias == Bias::Neutral || incomplete {
            0.0
        } else {
            (BASE_SIZE_FRACTION * (confidence / 100.0) * strength.size_multiplier())
                .clamp(0.0, MAX_SIZE_FRACTION)
        };

        let size_coins = match (entry, stop_loss) {
            (Some(e), Some(s)) if (e - s).abs() > f64::EPSILON => {
                let risk_usd = self.account_equity * (self.risk_per_trade_percent / 100.0);
                Some(risk_usd / (e - s).abs())
            }
            _ => None,
        };

        // --- Reasoning --------------------------------------------------------
        let reasoning = self.build_reasoning(pair, confluence, reports);
        let invalidation_conditions = invalidation_for(bias, stop_loss);

        let max_holding_hours =
            confluence.timeframe.interval_ms() as f64 * 24.0 / 3_600_000.0;

        Signal {
            signal_id: Uuid::new_v4(),
            pair: pair.clone(),
            timeframe: confluence.timeframe,
            bias,
            confidence,
            strength,
            entry,
            stop_loss,
            take_profits,
            risk_reward,
            recommended_size_fraction,
            size_coins,
            max_holding_hours,
            reasoning,
            invalidation_conditions,
            incomplete,
            created_at: now,
        }
    }

    fn build_reasoning(
        &self,
        pair: &Pair,
        confluence: &ConfluenceResult,
        reports: &[EngineReport],
    ) -> SignalReasoning {
        let evidence_for = |kind: EngineKind| -> Option<String> {
            reports
                .iter()
                .find(|r| r.kind == kind)
                .and_then(|r| r.evidence())
        };

        // Top three contributors with evidence; a factor with no evidence
        // line is dropped rather than listed unsupported.
        let mut primary_factors = Vec::new();
        let mut supporting_evidence = HashMap::new();
        for layer in confluence.ranked_factors().into_iter().take(3) {
            let name = layer.layer.pattern_name().to_string();
            match evidence_for(layer.layer) {
                Some(ev) => {
                    supporting_evidence.insert(name.clone(), ev);
                    primary_factors.push(name);
                }
                None => debug!(factor = %name, "dropping primary factor without evidence"),
            }
        }

        // Risk factors from the volatility and OI payloads.
        let mut risk_factors = Vec::new();
        for r in reports {
            match &r.detail {
                EngineDetail::Volatility(v) => {
                    if v.regime == VolatilityRegime::Extreme {
                        risk_factors.push(format!("extreme volatility ({:.2}% ATR)", v.atr_pct));
                    }
                    if v.liquidity <= LiquidityTier::Low {
                        risk_factors.push(format!("{} liquidity", v.liquidity));
                    }
                }
                EngineDetail::OpenInterest(o) => {
                    if o.critical_cluster_within(2.0) {
                        risk_factors.push("critical liquidation cluster within 2%".to_string());
                    }
                }
                _ => {}
            }
        }

        let market_context = format!(
            "{} {}: {} with {}/8 layers agreeing, risk {}",
            pair,
            confluence.timeframe,
            confluence.signal,
            confluence.layers_passed,
            confluence.risk_level
        );

        SignalReasoning {
            primary_factors,
            supporting_evidence,
            risk_factors,
            market_context,
        }
    }
}

fn invalidation_for(bias: Bias, stop: Option<f64>) -> Vec<String> {
    let stop_text = stop
        .map(|s| format!("{s:.4}"))
        .unwrap_or_else(|| "the stop".to_string());
    match bias {
        Bias::Long => vec![
            format!("candle close below {stop_text}"),
            "cumulative volume delta flips to seller dominance".to_string(),
            "open interest reverses while price stalls".to_string(),
        ],
        Bias::Short => vec![
            format!("candle close above {stop_text}"),
            "cumulative volume delta flips to buyer dominance".to_string(),
            "open interest reverses while price stalls".to_string(),
        ],
        Bias::Neutral => Vec::new(),
    }
}
