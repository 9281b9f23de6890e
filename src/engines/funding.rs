// =============================================================================
// Funding Rate Engine — crowd positioning from perpetual funding
// =============================================================================
//
// Funding rates are periodic payments between longs and shorts that anchor
// the perpetual price to spot. The read is contrarian:
//
//   rate > +0.03%  =>  crowded longs, short-reversal bias
//   rate < -0.03%  =>  crowded shorts, long-reversal bias
//
// 0.03% (0.0003 as a decimal) is the "extreme" threshold; a softer elevated
// band at a third of that contributes a milder lean. The engine also
// correlates the funding history with the OI history (Pearson, NaN-safe) to
// gauge whether leverage is following the crowding.

use serde::Serialize;

use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::indicators::pearson_correlation;
use crate::types::{FundingRate, Lean, OpenInterest};

/// |rate| above this is an extreme funding condition.
pub const EXTREME_FUNDING_RATE: f64 = 0.0003;

/// |rate| above this (but below extreme) is elevated.
const ELEVATED_FUNDING_RATE: f64 = 0.0001;

/// Funding regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingRegime {
    ExtremePositive,
    ElevatedPositive,
    Balanced,
    ElevatedNegative,
    ExtremeNegative,
}

impl FundingRegime {
    fn classify(rate: f64) -> Self {
        if rate > EXTREME_FUNDING_RATE {
            Self::ExtremePositive
        } else if rate > ELEVATED_FUNDING_RATE {
            Self::ElevatedPositive
        } else if rate < -EXTREME_FUNDING_RATE {
            Self::ExtremeNegative
        } else if rate < -ELEVATED_FUNDING_RATE {
            Self::ElevatedNegative
        } else {
            Self::Balanced
        }
    }

    /// Contrarian lean: crowded longs invite a short, and vice versa.
    fn lean(self) -> Lean {
        match self {
            Self::ExtremePositive | Self::ElevatedPositive => Lean::Bearish,
            Self::ExtremeNegative | Self::ElevatedNegative => Lean::Bullish,
            Self::Balanced => Lean::Neutral,
        }
    }

    pub fn is_extreme(self) -> bool {
        matches!(self, Self::ExtremePositive | Self::ExtremeNegative)
    }
}

impl std::fmt::Display for FundingRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ExtremePositive => "extreme positive",
            Self::ElevatedPositive => "elevated positive",
            Self::Balanced => "balanced",
            Self::ElevatedNegative => "elevated negative",
            Self::ExtremeNegative => "extreme negative",
        };
        write!(f, "{s}")
    }
}

/// Full funding payload.
#[derive(Debug, Clone, Serialize)]
pub struct FundingAnalysis {
    /// Current rate as a decimal.
    pub current_rate: f64,
    pub regime: FundingRegime,
    pub extreme: bool,
    /// Pearson correlation between funding and OI histories; 0.0 when the
    /// series are too short or degenerate.
    pub funding_oi_correlation: f64,
}

impl FundingAnalysis {
    pub fn evidence(&self) -> String {
        format!(
            "funding {:.4}% ({}), funding/OI correlation {:+.2}",
            self.current_rate * 100.0,
            self.regime,
            self.funding_oi_correlation
        )
    }
}

/// Analyze the funding regime.
pub fn analyze(
    funding: Option<&FundingRate>,
    funding_history: &[FundingRate],
    oi_history: &[OpenInterest],
) -> EngineReport {
    let kind = EngineKind::Funding;

    let funding = match funding {
        Some(f) if f.current_rate.is_finite() => f,
        Some(_) => return EngineReport::unavailable(kind, "non-finite funding rate"),
        None => return EngineReport::unavailable(kind, "funding rate missing"),
    };

    let regime = FundingRegime::classify(funding.current_rate);

    // Align the two histories on their shared recent suffix.
    let n = funding_history.len().min(oi_history.len());
    let correlation = if n >= 3 {
        let rates: Vec<f64> = funding_history[funding_history.len() - n..]
            .iter()
            .map(|f| f.current_rate)
            .collect();
        let ois: Vec<f64> = oi_history[oi_history.len() - n..]
            .iter()
            .map(|o| o.oi_usd)
            .collect();
        pearson_correlation(&rates, &ois)
    } else {
        0.0
    };

    let score = match regime {
        FundingRegime::ExtremePositive | FundingRegime::ExtremeNegative => 85.0,
        FundingRegime::ElevatedPositive | FundingRegime::ElevatedNegative => 65.0,
        FundingRegime::Balanced => 50.0,
    };

    let analysis = FundingAnalysis {
        current_rate: funding.current_rate,
        regime,
        extreme: regime.is_extreme(),
        funding_oi_correlation: correlation,
    };

    EngineReport::new(kind, score, regime.lean(), EngineDetail::Funding(analysis))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SettleState;

    fn funding(rate: f64) -> FundingRate {
        FundingRate {
            current_rate: rate,
            next_rate: rate,
            next_time: 0,
            premium: 0.0,
            interest_rate: 0.0,
            settle_state: SettleState::Settled,
        }
    }

    #[test]
    fn missing_funding_unavailable() {
        assert!(!analyze(None, &[], &[]).is_available());
    }

    #[test]
    fn nan_funding_unavailable() {
        assert!(!analyze(Some(&funding(f64::NAN)), &[], &[]).is_available());
    }

    #[test]
    fn regime_ladder() {
        assert_eq!(FundingRegime::classify(0.0005), FundingRegime::ExtremePositive);
        assert_eq!(FundingRegime::classify(0.0002), FundingRegime::ElevatedPositive);
        assert_eq!(FundingRegime::classify(0.0), FundingRegime::Balanced);
        assert_eq!(FundingRegime::classify(-0.0002), FundingRegime::ElevatedNegative);
        assert_eq!(FundingRegime::classify(-0.0005), FundingRegime::ExtremeNegative);
    }

    #[test]
    fn extreme_positive_is_contrarian_short() {
        let report = analyze(Some(&funding(0.0005)), &[], &[]);
        assert_eq!(report.lean, Lean::Bearish);
        assert_eq!(report.score, 85.0);
        if let EngineDetail::Funding(a) = &report.detail {
            assert!(a.extreme);
        }
    }

    #[test]
    fn extreme_negative_is_contrarian_long() {
        let report = analyze(Some(&funding(-0.0005)), &[], &[]);
        assert_eq!(report.lean, Lean::Bullish);
    }

    #[test]
    fn balanced_is_neutral() {
        let report = analyze(Some(&funding(0.00005)), &[], &[]);
        assert_eq!(report.lean, Lean::Neutral);
        assert_eq!(report.signed_score(), 0.0);
    }

    #[test]
    fn exact_threshold_is_not_extreme() {
        // The condition is strictly greater than 0.03%.
        let report = analyze(Some(&funding(EXTREME_FUNDING_RATE)), &[], &[]);
        if let EngineDetail::Funding(a) = &report.detail {
            assert!(!a.extreme);
            assert_eq!(a.regime, FundingRegime::ElevatedPositive);
        }
    }

    #[test]
    fn correlation_over_aligned_histories() {
        let rates: Vec<FundingRate> = (0..10).map(|i| funding(0.0001 * i as f64)).collect();
        let ois: Vec<OpenInterest> = (0..10)
            .map(|i| OpenInterest {
                oi_base: 0.0,
                oi_usd: 1_000_000.0 * (i + 1) as f64,
                time: i,
            })
            .collect();

        let report = analyze(Some(&funding(0.0)), &rates, &ois);
        if let EngineDetail::Funding(a) = &report.detail {
            assert!((a.funding_oi_correlation - 1.0).abs() < 1e-9);
        } else {
            panic!("wrong detail variant");
        }
    }

    #[test]
    fn correlation_degenerate_series_is_zero() {
        let rates: Vec<FundingRate> = (0..10).map(|_| funding(0.0001)).collect();
        let ois: Vec<OpenInterest> = (0..10)
            .map(|i| OpenInterest {
                oi_base: 0.0,
                oi_usd: 1_000_000.0 * (i + 1) as f64,
                time: i,
            })
            .collect();
        let report = analyze(Some(&funding(0.0)), &rates, &ois);
        if let EngineDetail::Funding(a) = &report.detail {
            assert_eq!(a.funding_oi_correlation, 0.0);
        }
    }
}
