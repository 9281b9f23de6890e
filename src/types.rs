// =============================================================================
// Shared market-data types used across the Argus intelligence engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single OHLCV candle. Sequences are always chronological, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in milliseconds since the UNIX epoch.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// True when every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }
}

/// Taker side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// A single executed trade from the public trade feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub time: i64,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
}

/// A single price level of an order book side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Order book snapshot. Bids are sorted descending by price, asks ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price of the top of book, if both sides have liquidity.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// Depth imbalance in [-1, +1]: positive when bids outweigh asks.
    pub fn imbalance(&self) -> f64 {
        let bid_depth: f64 = self.bids.iter().map(|l| l.size).sum();
        let ask_depth: f64 = self.asks.iter().map(|l| l.size).sum();
        let total = bid_depth + ask_depth;
        if total > 0.0 {
            (bid_depth - ask_depth) / total
        } else {
            0.0
        }
    }

    /// Ratio of the heavier side's depth to the lighter side's depth.
    ///
    /// Returns 1.0 when either side is empty (no meaningful dominance).
    pub fn dominance_ratio(&self) -> f64 {
        let bid_depth: f64 = self.bids.iter().map(|l| l.size).sum();
        let ask_depth: f64 = self.asks.iter().map(|l| l.size).sum();
        if bid_depth <= 0.0 || ask_depth <= 0.0 {
            return 1.0;
        }
        if bid_depth >= ask_depth {
            bid_depth / ask_depth
        } else {
            ask_depth / bid_depth
        }
    }
}

/// 24h rolling ticker for a single instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub price: f64,
    pub volume_24h: f64,
    pub change_24h: f64,
}

/// Funding settlement state reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleState {
    Settled,
    Processing,
}

impl Default for SettleState {
    fn default() -> Self {
        Self::Settled
    }
}

/// Funding rate snapshot for a perpetual swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    /// Current funding rate as a decimal (0.0001 = 0.01%).
    pub current_rate: f64,
    /// Predicted next funding rate.
    pub next_rate: f64,
    /// Timestamp (ms) of the next funding event.
    pub next_time: i64,
    /// Premium of the perp price over the index.
    #[serde(default)]
    pub premium: f64,
    /// Venue base interest rate component.
    #[serde(default)]
    pub interest_rate: f64,
    #[serde(default)]
    pub settle_state: SettleState,
}

/// Open interest snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInterest {
    /// Open interest in base-currency units.
    pub oi_base: f64,
    /// Open interest in USD notional.
    pub oi_usd: f64,
    /// Snapshot timestamp (ms).
    pub time: i64,
}

/// One venue's quote inside the aggregated multi-exchange report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueTicker {
    pub venue: String,
    pub price: f64,
    pub volume_24h: f64,
}

/// Health of the aggregated quote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteHealth {
    Healthy,
    Degraded,
    Down,
}

impl std::fmt::Display for QuoteHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Degradation metadata attached to the aggregated quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteDegradation {
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub health_status: QuoteHealth,
}

/// Aggregated multi-exchange ticker for a base asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiTickerReport {
    pub tickers: Vec<VenueTicker>,
    pub degradation: QuoteDegradation,
}

/// Directional lean shared by every indicator engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lean {
    Bullish,
    Bearish,
    Neutral,
}

impl Lean {
    /// Signed direction: +1 bullish, -1 bearish, 0 neutral.
    pub fn sign(self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Bearish => -1.0,
            Self::Neutral => 0.0,
        }
    }

    /// Lean with the opposite direction (neutral stays neutral).
    pub fn opposite(self) -> Self {
        match self {
            Self::Bullish => Self::Bearish,
            Self::Bearish => Self::Bullish,
            Self::Neutral => Self::Neutral,
        }
    }
}

impl std::fmt::Display for Lean {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Current UNIX timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
