// =============================================================================
// Market Data Gateway — provider contract
// =============================================================================
//
// The analytical core never talks to an exchange directly; it consumes this
// read-only contract. Implementations own their transport, retries, and
// authentication. The core distinguishes provider failures (timeout, rate
// limit, upstream error) from its own validation failures, and never caches
// gateway data beyond request scope.

pub mod okx;
pub mod sim;

use async_trait::async_trait;

use crate::pairs::{Pair, Timeframe};
use crate::types::{
    Candle, FundingRate, MultiTickerReport, OpenInterest, OrderBook, Ticker, Trade,
};

/// Provider-boundary error. The analyzer maps these onto its own taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("provider deadline exceeded: {0}")]
    Timeout(String),

    #[error("provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("provider returned an error: {0}")]
    Upstream(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed provider payload: {0}")]
    Parse(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Read-only market data surface for one provider.
///
/// Candle sequences are returned chronological, oldest first. Every call is
/// expected to enforce its own provider deadline; a blown deadline surfaces
/// as [`GatewayError::Timeout`].
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Most recent `limit` candles for the pair at the given timeframe.
    async fn candles(&self, pair: &Pair, tf: Timeframe, limit: u32) -> GatewayResult<Vec<Candle>>;

    /// Most recent `limit` public trades, oldest first.
    async fn trades(&self, pair: &Pair, limit: u32) -> GatewayResult<Vec<Trade>>;

    /// Current order book snapshot (bids descending, asks ascending).
    async fn order_book(&self, pair: &Pair) -> GatewayResult<OrderBook>;

    /// 24h rolling ticker.
    async fn ticker(&self, pair: &Pair) -> GatewayResult<Ticker>;

    /// Current funding rate.
    async fn funding_rate(&self, pair: &Pair) -> GatewayResult<FundingRate>;

    /// Recent funding-rate history, oldest first.
    async fn funding_history(&self, pair: &Pair, limit: u32) -> GatewayResult<Vec<FundingRate>>;

    /// Current open interest.
    async fn open_interest(&self, pair: &Pair) -> GatewayResult<OpenInterest>;

    /// Hourly open-interest history covering roughly the last `hours` hours,
    /// oldest first.
    async fn open_interest_history(
        &self,
        pair: &Pair,
        hours: u32,
    ) -> GatewayResult<Vec<OpenInterest>>;

    /// Aggregated multi-exchange quote for a base asset, with degradation
    /// metadata when secondary venues are unavailable.
    async fn multi_exchange_ticker(&self, base: &str) -> GatewayResult<MultiTickerReport>;
}
