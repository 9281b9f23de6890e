// =============================================================================
// Momentum Engine — RSI / EMA stack / MACD / Bollinger ensemble
// =============================================================================
//
// Four sub-indicators each cast a directional vote:
//
//   RSI(14)          — trend read: > 55 bullish, < 45 bearish
//   EMA 12/26/50/200 — stack alignment with price
//   MACD(12,26,9)    — line vs signal plus histogram sign
//   Bollinger(20,2σ) — mean-reversion read: below the lower band is a
//                      bullish stretch, above the upper band bearish
//
// The ensemble bias is the majority vote; ties resolve to neutral.

use serde::Serialize;

use crate::engines::{EngineDetail, EngineKind, EngineReport};
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::ema::ema_stack;
use crate::indicators::macd::standard_macd;
use crate::indicators::rsi::latest_rsi;
use crate::types::{Candle, Lean};

const RSI_PERIOD: usize = 14;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_STD: f64 = 2.0;

/// Momentum payload: the individual readings plus the vote tally.
#[derive(Debug, Clone, Serialize)]
pub struct MomentumAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macd_histogram: Option<f64>,
    pub ema_alignment: Lean,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bollinger_percent_b: Option<f64>,
    pub bullish_votes: usize,
    pub bearish_votes: usize,
    pub neutral_votes: usize,
}

impl MomentumAnalysis {
    pub fn evidence(&self) -> String {
        let rsi = self
            .rsi
            .map(|v| format!("{v:.1}"))
            .unwrap_or_else(|| "n/a".into());
        format!(
            "RSI {} with EMA stack {}, votes {}-{}-{}",
            rsi, self.ema_alignment, self.bullish_votes, self.bearish_votes, self.neutral_votes
        )
    }
}

fn rsi_vote(rsi: f64) -> Lean {
    if rsi > 55.0 {
        Lean::Bullish
    } else if rsi < 45.0 {
        Lean::Bearish
    } else {
        Lean::Neutral
    }
}

fn macd_vote(macd: f64, signal: f64, histogram: f64) -> Lean {
    if macd > signal && histogram > 0.0 {
        Lean::Bullish
    } else if macd < signal && histogram < 0.0 {
        Lean::Bearish
    } else {
        Lean::Neutral
    }
}

fn bollinger_vote(percent_b: f64) -> Lean {
    if percent_b < 0.0 {
        Lean::Bullish
    } else if percent_b > 1.0 {
        Lean::Bearish
    } else {
        Lean::Neutral
    }
}

/// Analyze momentum over a chronological candle sequence.
pub fn analyze(candles: &[Candle]) -> EngineReport {
    let kind = EngineKind::Momentum;

    if candles.len() < RSI_PERIOD + 1 {
        return EngineReport::unavailable(
            kind,
            format!("{} candles, need {}", candles.len(), RSI_PERIOD + 1),
        );
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let price = match closes.last() {
        Some(&p) if p.is_finite() && p > 0.0 => p,
        _ => return EngineReport::unavailable(kind, "no finite close price"),
    };

    let rsi = latest_rsi(&closes, RSI_PERIOD);
    let stack = ema_stack(&closes);
    let macd = standard_macd(&closes);
    let bollinger = calculate_bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_STD);

    let ema_alignment = match &stack {
        Some(s) if s.is_bullish(price) => Lean::Bullish,
        Some(s) if s.is_bearish(price) => Lean::Bearish,
        Some(_) => Lean::Neutral,
        None => Lean::Neutral,
    };

    let percent_b = bollinger.as_ref().map(|bb| bb.percent_b(price));

    let mut votes: Vec<Lean> = Vec::with_capacity(4);
    if let Some(r) = rsi {
        votes.push(rsi_vote(r));
    }
    if stack.is_some() {
        votes.push(ema_alignment);
    }
    if let Some(m) = macd {
        votes.push(macd_vote(m.macd, m.signal, m.histogram));
    }
    if let Some(pb) = percent_b {
        votes.push(bollinger_vote(pb));
    }

    if votes.is_empty() {
        return EngineReport::unavailable(kind, "no sub-indicator could be computed");
    }

    let bullish = votes.iter().filter(|&&v| v == Lean::Bullish).count();
    let bearish = votes.iter().filter(|&&v| v == Lean::Bearish).count();
    let neutral = votes.len() - bullish - bearish;

    let lean = if bullish > bearish {
        Lean::Bullish
    } else if bearish > bullish {
        Lean::Bearish
    } else {
        Lean::Neutral
    };

    let winning = bullish.max(bearish);
    let score = if lean == Lean::Neutral {
        50.0
    } else {
        (40.0 + 15.0 * winning as f64).min(95.0)
    };

    let analysis = MomentumAnalysis {
        rsi,
        macd_histogram: macd.map(|m| m.histogram),
        ema_alignment,
        bollinger_percent_b: percent_b,
        bullish_votes: bullish,
        bearish_votes: bearish,
        neutral_votes: neutral,
    };

    EngineReport::new(kind, score, lean, EngineDetail::Momentum(analysis))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: i64, close: f64) -> Candle {
        Candle::new(i * 60_000, close, close + 0.5, close - 0.5, close, 1000.0)
    }

    fn trend_tape(n: usize, start: f64, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| candle(i as i64, start + step * i as f64))
            .collect()
    }

    #[test]
    fn too_few_candles_unavailable() {
        let report = analyze(&trend_tape(10, 100.0, 1.0));
        assert!(!report.is_available());
    }

    #[test]
    fn sustained_uptrend_votes_bullish() {
        let report = analyze(&trend_tape(120, 100.0, 0.5));
        assert_eq!(report.lean, Lean::Bullish);
        if let EngineDetail::Momentum(a) = &report.detail {
            assert!(a.bullish_votes > a.bearish_votes);
            assert_eq!(a.ema_alignment, Lean::Bullish);
            assert!(a.rsi.unwrap() > 55.0);
        } else {
            panic!("wrong detail variant");
        }
    }

    #[test]
    fn sustained_downtrend_votes_bearish() {
        let report = analyze(&trend_tape(120, 300.0, -0.5));
        assert_eq!(report.lean, Lean::Bearish);
    }

    #[test]
    fn flat_market_is_neutral() {
        let report = analyze(&trend_tape(120, 100.0, 0.0));
        assert_eq!(report.lean, Lean::Neutral);
        assert_eq!(report.signed_score(), 0.0);
    }

    #[test]
    fn vote_tally_adds_up() {
        let report = analyze(&trend_tape(120, 100.0, 0.3));
        if let EngineDetail::Momentum(a) = &report.detail {
            let total = a.bullish_votes + a.bearish_votes + a.neutral_votes;
            assert!(total >= 3, "expected at least RSI+EMA+MACD votes, got {total}");
        }
    }

    #[test]
    fn score_bounds() {
        for tape in [
            trend_tape(120, 100.0, 0.5),
            trend_tape(120, 300.0, -0.5),
            trend_tape(120, 100.0, 0.0),
        ] {
            let report = analyze(&tape);
            assert!((0.0..=95.0).contains(&report.score));
        }
    }

    #[test]
    fn works_with_short_history_without_macd() {
        // 20 candles: RSI and Bollinger vote, MACD and the EMA stack cannot.
        let report = analyze(&trend_tape(20, 100.0, 0.5));
        assert!(report.is_available());
    }
}
