// =============================================================================
// Open Interest Engine — participation pressure and liquidation mapping
// =============================================================================
//
// Open Interest (OI) is the total notional of outstanding contracts. The
// engine reads the current snapshot against a rolling hourly window:
//
//   oi_change_24h  = (oi - oi_24h_ago) / oi_24h_ago * 100
//   oi_turnover    = volume_24h / oi
//   pressure_ratio = (oi - oi_avg_24h) / oi_avg_24h * 100
//
// Direction matrix: rising OI confirms the prevailing 24h price direction
// (new positions driving the move); falling OI means positions unwinding
// and reads neutral.
//
// Theoretical liquidation clusters are mapped at the standard leverage
// ladder; long liquidation = mark * (1 - 0.95/lev), shorts mirror. Cluster
// notional is a fixed at-risk fraction of OI allocated across the ladder.

use serde::Serialize;

use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::types::{Lean, OpenInterest, Ticker};

/// Standard leverage ladder for cluster mapping.
const LEVERAGE_LADDER: [f64; 8] = [2.0, 3.0, 5.0, 10.0, 20.0, 25.0, 50.0, 100.0];

/// OI share assumed to sit at each ladder rung (sums to 1.0).
const LEVERAGE_SHARES: [f64; 8] = [0.05, 0.07, 0.13, 0.25, 0.20, 0.15, 0.10, 0.05];

/// Fraction of allocated OI considered close enough to its liquidation
/// price to matter for clustering.
const AT_RISK_FRACTION: f64 = 0.0001;

/// Maintenance-margin buffer used in the liquidation price approximation.
const LIQ_BUFFER: f64 = 0.95;

/// Institutional footprint by absolute USD open interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionalPresence {
    Light,
    Moderate,
    Significant,
    Dominant,
}

impl InstitutionalPresence {
    fn from_oi_usd(oi_usd: f64) -> Self {
        if oi_usd >= 1_000_000_000.0 {
            Self::Dominant
        } else if oi_usd >= 500_000_000.0 {
            Self::Significant
        } else if oi_usd >= 200_000_000.0 {
            Self::Moderate
        } else {
            Self::Light
        }
    }
}

impl std::fmt::Display for InstitutionalPresence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Light => "light",
            Self::Moderate => "moderate",
            Self::Significant => "significant",
            Self::Dominant => "dominant",
        };
        write!(f, "{s}")
    }
}

/// Risk tier of a liquidation cluster by estimated USD notional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterTier {
    Minor,
    Major,
    Critical,
}

impl ClusterTier {
    fn from_notional(usd: f64) -> Self {
        if usd >= 100_000.0 {
            Self::Critical
        } else if usd >= 50_000.0 {
            Self::Major
        } else {
            Self::Minor
        }
    }
}

/// One theoretical liquidation cluster.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LiquidationCluster {
    pub leverage: f64,
    /// Liquidation price for longs at this leverage.
    pub long_price: f64,
    /// Liquidation price for shorts at this leverage.
    pub short_price: f64,
    /// Estimated at-risk notional in USD.
    pub notional_usd: f64,
    pub tier: ClusterTier,
}

/// Full open-interest payload.
#[derive(Debug, Clone, Serialize)]
pub struct OiAnalysis {
    pub oi_usd: f64,
    pub oi_change_24h_pct: f64,
    pub oi_turnover: f64,
    pub pressure_ratio: f64,
    pub presence: InstitutionalPresence,
    pub clusters: Vec<LiquidationCluster>,
    /// Distance (percent of mark) to the nearest critical cluster, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nearest_critical_pct: Option<f64>,
}

impl OiAnalysis {
    pub fn evidence(&self) -> String {
        format!(
            "OI ${:.0}M ({:+.1}% 24h, pressure {:+.1}%), {} presence",
            self.oi_usd / 1_000_000.0,
            self.oi_change_24h_pct,
            self.pressure_ratio,
            self.presence
        )
    }

    /// True when a critical cluster sits within `pct` percent of mark.
    pub fn critical_cluster_within(&self, pct: f64) -> bool {
        self.nearest_critical_pct.map_or(false, |d| d <= pct)
    }
}

// =============================================================================
// Cluster mapping
// =============================================================================

fn map_clusters(mark: f64, oi_usd: f64) -> Vec<LiquidationCluster> {
    LEVERAGE_LADDER
        .iter()
        .zip(&LEVERAGE_SHARES)
        .map(|(&lev, &share)| {
            let notional = oi_usd * share * AT_RISK_FRACTION;
            LiquidationCluster {
                leverage: lev,
                long_price: mark * (1.0 - LIQ_BUFFER / lev),
                short_price: mark * (1.0 + LIQ_BUFFER / lev),
                notional_usd: notional,
                tier: ClusterTier::from_notional(notional),
            }
        })
        .collect()
}

fn nearest_critical_pct(mark: f64, clusters: &[LiquidationCluster]) -> Option<f64> {
    if mark <= 0.0 {
        return None;
    }
    clusters
        .iter()
        .filter(|c| c.tier == ClusterTier::Critical)
        .flat_map(|c| [c.long_price, c.short_price])
        .map(|p| (p - mark).abs() / mark * 100.0)
        .min_by(f64::total_cmp)
}

// =============================================================================
// Engine entry point
// =============================================================================

/// Analyze open-interest pressure.
///
/// `history` is an hourly OI series (oldest first) covering at least the
/// trailing 24 hours; shorter histories degrade the change/pressure reads
/// to zero rather than failing the layer.
pub fn analyze(
    oi: Option<&OpenInterest>,
    history: &[OpenInterest],
    ticker: Option<&Ticker>,
) -> EngineReport {
    let kind = EngineKind::OpenInterest;

    let oi = match oi {
        Some(o) if o.oi_usd.is_finite() && o.oi_usd > 0.0 => o,
        Some(_) => return EngineReport::unavailable(kind, "non-finite open interest"),
        None => return EngineReport::unavailable(kind, "open interest missing"),
    };

    let window: Vec<f64> = history
        .iter()
        .rev()
        .take(24)
        .map(|h| h.oi_usd)
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();

    let oi_change_24h_pct = window
        .last() // oldest retained hour
        .map(|&oldest| (oi.oi_usd - oldest) / oldest * 100.0)
        .unwrap_or(0.0);

    let pressure_ratio = if window.is_empty() {
        0.0
    } else {
        let avg = window.iter().sum::<f64>() / window.len() as f64;
        if avg > 0.0 {
            (oi.oi_usd - avg) / avg * 100.0
        } else {
            0.0
        }
    };

    let (mark, volume_24h, change_24h) = match ticker {
        Some(t) => (t.price, t.volume_24h, t.change_24h),
        None => (0.0, 0.0, 0.0),
    };

    let oi_turnover = if oi.oi_usd > 0.0 { volume_24h / oi.oi_usd } else { 0.0 };

    let presence = InstitutionalPresence::from_oi_usd(oi.oi_usd);

    let clusters = if mark > 0.0 {
        map_clusters(mark, oi.oi_usd)
    } else {
        Vec::new()
    };
    let nearest_critical = nearest_critical_pct(mark, &clusters);

    // Rising OI confirms the prevailing price direction; falling OI means
    // positions unwinding and reads neutral.
    let lean = if oi_change_24h_pct > 1.0 {
        if change_24h > 0.0 {
            Lean::Bullish
        } else if change_24h < 0.0 {
            Lean::Bearish
        } else {
            Lean::Neutral
        }
    } else {
        Lean::Neutral
    };

    let presence_bonus = match presence {
        InstitutionalPresence::Dominant => 10.0,
        InstitutionalPresence::Significant => 5.0,
        _ => 0.0,
    };
    let score = (50.0 + pressure_ratio.abs().min(30.0) + presence_bonus).min(95.0);

    let analysis = OiAnalysis {
        oi_usd: oi.oi_usd,
        oi_change_24h_pct,
        oi_turnover,
        pressure_ratio,
        presence,
        clusters,
        nearest_critical_pct: nearest_critical,
    };

    EngineReport::new(kind, score, lean, EngineDetail::OpenInterest(analysis))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn oi(usd: f64, time: i64) -> OpenInterest {
        OpenInterest {
            oi_base: 0.0,
            oi_usd: usd,
            time,
        }
    }

    fn flat_history(usd: f64, hours: usize) -> Vec<OpenInterest> {
        (0..hours).map(|i| oi(usd, i as i64 * 3_600_000)).collect()
    }

    fn ticker(price: f64, volume: f64, change: f64) -> Ticker {
        Ticker {
            price,
            volume_24h: volume,
            change_24h: change,
        }
    }

    #[test]
    fn missing_oi_unavailable() {
        let report = analyze(None, &[], None);
        assert!(!report.is_available());
    }

    #[test]
    fn presence_tiers() {
        assert_eq!(
            InstitutionalPresence::from_oi_usd(100_000_000.0),
            InstitutionalPresence::Light
        );
        assert_eq!(
            InstitutionalPresence::from_oi_usd(300_000_000.0),
            InstitutionalPresence::Moderate
        );
        assert_eq!(
            InstitutionalPresence::from_oi_usd(700_000_000.0),
            InstitutionalPresence::Significant
        );
        assert_eq!(
            InstitutionalPresence::from_oi_usd(1_500_000_000.0),
            InstitutionalPresence::Dominant
        );
    }

    #[test]
    fn liquidation_prices_bracket_mark() {
        let clusters = map_clusters(100.0, 1_000_000_000.0);
        assert_eq!(clusters.len(), 8);
        for c in &clusters {
            assert!(c.long_price < 100.0);
            assert!(c.short_price > 100.0);
        }
        // 10x long liquidation: 100 * (1 - 0.095) = 90.5
        let ten_x = clusters.iter().find(|c| c.leverage == 10.0).unwrap();
        assert!((ten_x.long_price - 90.5).abs() < 1e-9);
        assert!((ten_x.short_price - 109.5).abs() < 1e-9);
    }

    #[test]
    fn cluster_tiers_scale_with_oi() {
        // 10x rung share is 0.25: 4B * 0.25 * 1e-4 = 100k => critical.
        let clusters = map_clusters(100.0, 4_000_000_000.0);
        let ten_x = clusters.iter().find(|c| c.leverage == 10.0).unwrap();
        assert_eq!(ten_x.tier, ClusterTier::Critical);

        let clusters = map_clusters(100.0, 100_000_000.0);
        assert!(clusters.iter().all(|c| c.tier == ClusterTier::Minor));
    }

    #[test]
    fn rising_oi_with_rising_price_is_bullish() {
        let history = flat_history(500_000_000.0, 24);
        let current = oi(600_000_000.0, 24 * 3_600_000);
        let report = analyze(
            Some(&current),
            &history,
            Some(&ticker(100.0, 250_000_000.0, 2.5)),
        );
        assert_eq!(report.lean, Lean::Bullish);
        if let EngineDetail::OpenInterest(a) = &report.detail {
            assert!(a.oi_change_24h_pct > 0.0);
            assert!(a.pressure_ratio > 0.0);
            assert!((a.oi_turnover - 250_000_000.0 / 600_000_000.0).abs() < 1e-12);
        } else {
            panic!("wrong detail variant");
        }
    }

    #[test]
    fn rising_oi_with_falling_price_is_bearish() {
        let history = flat_history(500_000_000.0, 24);
        let current = oi(600_000_000.0, 24 * 3_600_000);
        let report = analyze(
            Some(&current),
            &history,
            Some(&ticker(100.0, 250_000_000.0, -2.5)),
        );
        assert_eq!(report.lean, Lean::Bearish);
    }

    #[test]
    fn falling_oi_is_neutral() {
        let history = flat_history(500_000_000.0, 24);
        let current = oi(400_000_000.0, 24 * 3_600_000);
        let report = analyze(
            Some(&current),
            &history,
            Some(&ticker(100.0, 250_000_000.0, 2.5)),
        );
        assert_eq!(report.lean, Lean::Neutral);
    }

    #[test]
    fn no_history_degrades_gracefully() {
        let current = oi(600_000_000.0, 0);
        let report = analyze(Some(&current), &[], Some(&ticker(100.0, 1e8, 1.0)));
        assert!(report.is_available());
        if let EngineDetail::OpenInterest(a) = &report.detail {
            assert_eq!(a.oi_change_24h_pct, 0.0);
            assert_eq!(a.pressure_ratio, 0.0);
        }
    }

    #[test]
    fn nearest_critical_distance() {
        // Dominant OI so high-share rungs go critical; 2x cluster sits at
        // +-47.5% and 10x at +-9.5%.
        let clusters = map_clusters(100.0, 4_000_000_000.0);
        let nearest = nearest_critical_pct(100.0, &clusters).unwrap();
        assert!(nearest <= 47.5);
    }
}
