// =============================================================================
// Indicator Engines — shared output model
// =============================================================================
//
// Eight independent engines analyze the market-data surface for one pair and
// timeframe. Every engine produces an `EngineReport`: a score in [0, 100], a
// directional lean, and a typed payload. Engines are deterministic given
// identical inputs and share no mutable state, so the analyzer runs them in
// parallel.
//
// An engine that cannot produce a sound reading returns the `Unavailable`
// payload; the confluence scorer redistributes its weight across the
// remaining layers.

pub mod fibonacci;
pub mod funding;
pub mod market_structure;
pub mod momentum;
pub mod open_interest;
pub mod order_flow;
pub mod volatility;
pub mod volume_delta;

use serde::Serialize;

use crate::types::Lean;

pub use fibonacci::FibAnalysis;
pub use funding::FundingAnalysis;
pub use market_structure::StructureAnalysis;
pub use momentum::MomentumAnalysis;
pub use open_interest::OiAnalysis;
pub use order_flow::OrderFlowAnalysis;
pub use volatility::VolatilityAnalysis;
pub use volume_delta::VolumeDeltaAnalysis;

/// The eight analysis layers. Names double as the weight-vector keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    MarketStructure,
    VolumeDelta,
    Momentum,
    OpenInterest,
    Funding,
    OrderFlow,
    Fibonacci,
    Volatility,
}

impl EngineKind {
    /// Scoring order is fixed so confluence output is deterministic.
    pub const ALL: [EngineKind; 8] = [
        Self::MarketStructure,
        Self::VolumeDelta,
        Self::Momentum,
        Self::OpenInterest,
        Self::Funding,
        Self::OrderFlow,
        Self::Fibonacci,
        Self::Volatility,
    ];

    /// Stable index into per-layer arrays.
    pub fn index(self) -> usize {
        match self {
            Self::MarketStructure => 0,
            Self::VolumeDelta => 1,
            Self::Momentum => 2,
            Self::OpenInterest => 3,
            Self::Funding => 4,
            Self::OrderFlow => 5,
            Self::Fibonacci => 6,
            Self::Volatility => 7,
        }
    }

    /// Weight-vector / pattern-learning key.
    pub fn pattern_name(self) -> &'static str {
        match self {
            Self::MarketStructure => "market_structure",
            Self::VolumeDelta => "cvd",
            Self::Momentum => "momentum",
            Self::OpenInterest => "oi",
            Self::Funding => "funding",
            Self::OrderFlow => "institutional",
            Self::Fibonacci => "fibonacci",
            Self::Volatility => "enhanced",
        }
    }

    pub fn from_pattern_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.pattern_name() == name.trim().to_lowercase())
    }

    /// Base confluence weight before learned multipliers.
    pub fn base_weight(self) -> f64 {
        match self {
            Self::MarketStructure => 0.10,
            Self::VolumeDelta => 0.15,
            Self::Momentum => 0.15,
            Self::OpenInterest => 0.15,
            Self::Funding => 0.10,
            Self::OrderFlow => 0.10,
            Self::Fibonacci => 0.05,
            Self::Volatility => 0.20,
        }
    }

    /// Critical engines fail the whole pair when their inputs are missing.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::MarketStructure | Self::VolumeDelta | Self::Momentum)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pattern_name())
    }
}

/// Tagged per-engine payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum EngineDetail {
    Structure(StructureAnalysis),
    VolumeDelta(VolumeDeltaAnalysis),
    Momentum(MomentumAnalysis),
    OpenInterest(OiAnalysis),
    Funding(FundingAnalysis),
    OrderFlow(OrderFlowAnalysis),
    Fibonacci(FibAnalysis),
    Volatility(VolatilityAnalysis),
    Unavailable { reason: String },
}

/// The unified output of one engine run.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub kind: EngineKind,
    /// Strength of the reading in [0, 100].
    pub score: f64,
    pub lean: Lean,
    pub detail: EngineDetail,
}

impl EngineReport {
    pub fn new(kind: EngineKind, score: f64, lean: Lean, detail: EngineDetail) -> Self {
        // Non-finite scores collapse the layer rather than poison the sum.
        if !score.is_finite() {
            return Self::unavailable(kind, "non-finite score");
        }
        Self {
            kind,
            score: score.clamp(0.0, 100.0),
            lean,
            detail,
        }
    }

    pub fn unavailable(kind: EngineKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            score: 0.0,
            lean: Lean::Neutral,
            detail: EngineDetail::Unavailable {
                reason: reason.into(),
            },
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.detail, EngineDetail::Unavailable { .. })
    }

    /// Signed score in [-100, +100]: lean direction times magnitude.
    pub fn signed_score(&self) -> f64 {
        self.lean.sign() * self.score
    }

    /// One-line evidence string for the reasoning block.
    pub fn evidence(&self) -> Option<String> {
        match &self.detail {
            EngineDetail::Unavailable { .. } => None,
            EngineDetail::Structure(a) => Some(a.evidence()),
            EngineDetail::VolumeDelta(a) => Some(a.evidence()),
            EngineDetail::Momentum(a) => Some(a.evidence()),
            EngineDetail::OpenInterest(a) => Some(a.evidence()),
            EngineDetail::Funding(a) => Some(a.evidence()),
            EngineDetail::OrderFlow(a) => Some(a.evidence()),
            EngineDetail::Fibonacci(a) => Some(a.evidence()),
            EngineDetail::Volatility(a) => Some(a.evidence()),
        }
    }
}

// =============================================================================
// Layer mask
// =============================================================================

/// Subset of enabled analysis layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerMask {
    enabled: [bool; 8],
}

impl Default for LayerMask {
    fn default() -> Self {
        Self::all()
    }
}

impl LayerMask {
    pub fn all() -> Self {
        Self { enabled: [true; 8] }
    }

    pub fn none() -> Self {
        Self {
            enabled: [false; 8],
        }
    }

    /// Build a mask from pattern names; unknown names are ignored.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut mask = Self::none();
        for name in names {
            if let Some(kind) = EngineKind::from_pattern_name(name.as_ref()) {
                mask.enabled[kind.index()] = true;
            }
        }
        mask
    }

    pub fn is_enabled(&self, kind: EngineKind) -> bool {
        self.enabled[kind.index()]
    }

    pub fn enable(&mut self, kind: EngineKind) {
        self.enabled[kind.index()] = true;
    }

    pub fn disable(&mut self, kind: EngineKind) {
        self.enabled[kind.index()] = false;
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled.iter().filter(|&&e| e).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_names_round_trip() {
        for kind in EngineKind::ALL {
            assert_eq!(EngineKind::from_pattern_name(kind.pattern_name()), Some(kind));
        }
        assert_eq!(EngineKind::from_pattern_name("unknown"), None);
    }

    #[test]
    fn base_weights_sum_to_one() {
        let sum: f64 = EngineKind::ALL.iter().map(|k| k.base_weight()).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn critical_set_is_structure_cvd_momentum() {
        let critical: Vec<EngineKind> = EngineKind::ALL
            .into_iter()
            .filter(|k| k.is_critical())
            .collect();
        assert_eq!(
            critical,
            vec![
                EngineKind::MarketStructure,
                EngineKind::VolumeDelta,
                EngineKind::Momentum
            ]
        );
    }

    #[test]
    fn non_finite_score_collapses_to_unavailable() {
        let report = EngineReport::new(
            EngineKind::Momentum,
            f64::NAN,
            Lean::Bullish,
            EngineDetail::Unavailable {
                reason: "placeholder".into(),
            },
        );
        assert!(!report.is_available());
        assert_eq!(report.signed_score(), 0.0);
    }

    #[test]
    fn signed_score_uses_lean() {
        let report = EngineReport::unavailable(EngineKind::Funding, "x");
        assert_eq!(report.signed_score(), 0.0);
    }

    #[test]
    fn score_is_clamped() {
        let report = EngineReport::new(
            EngineKind::Funding,
            150.0,
            Lean::Bearish,
            EngineDetail::Unavailable { reason: "x".into() },
        );
        assert_eq!(report.score, 100.0);
        assert_eq!(report.signed_score(), -100.0);
    }

    #[test]
    fn layer_mask_from_names() {
        let mask = LayerMask::from_names(&["cvd", "momentum", "bogus"]);
        assert!(mask.is_enabled(EngineKind::VolumeDelta));
        assert!(mask.is_enabled(EngineKind::Momentum));
        assert!(!mask.is_enabled(EngineKind::Funding));
        assert_eq!(mask.enabled_count(), 2);
    }

    #[test]
    fn layer_mask_default_is_all() {
        assert_eq!(LayerMask::default().enabled_count(), 8);
    }
}
