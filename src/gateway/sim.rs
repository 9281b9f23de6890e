// =============================================================================
// Simulated Gateway — deterministic in-process market data
// =============================================================================
//
// Generates synthetic but internally consistent market data from per-pair
// profiles. No randomness: the same profile always yields bit-identical
// candles, trades, and books, which keeps downstream assertions stable. Used
// by the test suite and by `--sim` runs when no network is available.
//
// Failure injection: a profile can be armed with an error kind or an
// artificial delay so breaker and deadline paths can be exercised.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::gateway::{GatewayError, GatewayResult, MarketDataGateway};
use crate::pairs::{Pair, Timeframe};
use crate::types::{
    BookLevel, Candle, FundingRate, MultiTickerReport, OpenInterest, OrderBook, QuoteDegradation,
    QuoteHealth, SettleState, Ticker, Trade, TradeSide, VenueTicker,
};

/// Shape of the synthetic market for one pair.
#[derive(Debug, Clone)]
pub struct SimProfile {
    /// Price of the oldest generated candle.
    pub base_price: f64,
    /// Per-bar drift as a fraction of price (+0.002 = steady uptrend).
    pub drift_per_bar: f64,
    /// Amplitude of the superimposed wave, as a fraction of price.
    pub wave_amplitude: f64,
    /// Base-asset volume per bar.
    pub bar_volume: f64,
    /// 24h USD volume reported by the ticker.
    pub volume_24h_usd: f64,
    /// Current funding rate (decimal).
    pub funding_rate: f64,
    /// Open interest in USD.
    pub oi_usd: f64,
    /// Taker buy share of generated trades in [0, 1].
    pub buy_share: f64,
    /// Order book depth imbalance knob: bid depth = ask depth * this factor.
    pub bid_depth_factor: f64,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            base_price: 100.0,
            drift_per_bar: 0.0,
            wave_amplitude: 0.01,
            bar_volume: 1_000.0,
            volume_24h_usd: 150_000_000.0,
            funding_rate: 0.0001,
            oi_usd: 600_000_000.0,
            buy_share: 0.5,
            bid_depth_factor: 1.0,
        }
    }
}

impl SimProfile {
    /// A steadily trending market; positive drift for uptrend.
    pub fn trending(base_price: f64, drift_per_bar: f64) -> Self {
        Self {
            base_price,
            drift_per_bar,
            ..Self::default()
        }
    }
}

/// Injected failure mode for a pair.
#[derive(Debug, Clone)]
pub enum SimFault {
    /// The call fails with the given error kind.
    Error(SimErrorKind),
    /// The call sleeps this long before answering.
    DelayMs(u64),
}

#[derive(Debug, Clone, Copy)]
pub enum SimErrorKind {
    Timeout,
    RateLimited,
    Upstream,
}

/// Which gateway call a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCall {
    All,
    Candles,
    Trades,
    OrderBook,
    Ticker,
    Funding,
    FundingHistory,
    OpenInterest,
    OiHistory,
}

/// Deterministic in-process gateway.
pub struct SimGateway {
    profiles: RwLock<HashMap<String, SimProfile>>,
    faults: RwLock<HashMap<String, Vec<(SimCall, SimFault)>>>,
    /// Fixed "now" anchor so generated series are stable within a test.
    anchor_ms: i64,
}

impl SimGateway {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            faults: RwLock::new(HashMap::new()),
            anchor_ms: 1_700_000_000_000,
        }
    }

    pub fn set_profile(&self, pair: &str, profile: SimProfile) {
        self.profiles.write().insert(pair.to_uppercase(), profile);
    }

    /// Arm a fault on every call for `pair`.
    pub fn set_fault(&self, pair: &str, fault: SimFault) {
        self.set_fault_on(pair, SimCall::All, fault);
    }

    /// Arm a fault on one specific call for `pair`.
    pub fn set_fault_on(&self, pair: &str, call: SimCall, fault: SimFault) {
        self.faults
            .write()
            .entry(pair.to_uppercase())
            .or_default()
            .push((call, fault));
    }

    pub fn clear_fault(&self, pair: &str) {
        self.faults.write().remove(&pair.to_uppercase());
    }

    fn profile_for(&self, pair: &Pair) -> SimProfile {
        self.profiles
            .read()
            .get(pair.base())
            .cloned()
            .unwrap_or_default()
    }

    async fn check_fault(&self, pair: &Pair, call: SimCall) -> GatewayResult<()> {
        let fault = self.faults.read().get(pair.base()).and_then(|faults| {
            faults
                .iter()
                .find(|(scope, _)| *scope == SimCall::All || *scope == call)
                .map(|(_, f)| f.clone())
        });
        match fault {
            None => Ok(()),
            Some(SimFault::DelayMs(ms)) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                Ok(())
            }
            Some(SimFault::Error(kind)) => Err(match kind {
                SimErrorKind::Timeout => GatewayError::Timeout(format!("sim fault for {pair}")),
                SimErrorKind::RateLimited => {
                    GatewayError::RateLimited(format!("sim fault for {pair}"))
                }
                SimErrorKind::Upstream => GatewayError::Upstream(format!("sim fault for {pair}")),
            }),
        }
    }

    /// Deterministic pseudo-wave in [-1, 1] for bar index `i`.
    fn wave(i: usize) -> f64 {
        (i as f64 * 0.7).sin()
    }

    fn build_candles(&self, profile: &SimProfile, tf: Timeframe, limit: u32) -> Vec<Candle> {
        let n = limit as usize;
        let interval = tf.interval_ms();
        let start = self.anchor_ms - interval * n as i64;

        let mut candles = Vec::with_capacity(n);
        let mut price = profile.base_price;

        for i in 0..n {
            let wave = Self::wave(i) * profile.wave_amplitude * price;
            let open = price + wave * 0.25;
            let close = price * (1.0 + profile.drift_per_bar) + wave;
            let high = open.max(close) + price * profile.wave_amplitude * 0.5;
            let low = open.min(close) - price * profile.wave_amplitude * 0.5;
            let volume = profile.bar_volume * (1.0 + 0.2 * Self::wave(i + 3));

            candles.push(Candle {
                open_time: start + interval * i as i64,
                open,
                high,
                low,
                close,
                volume,
            });

            price = close;
        }

        candles
    }

    fn last_price(&self, profile: &SimProfile) -> f64 {
        self.build_candles(profile, Timeframe::H1, 100)
            .last()
            .map(|c| c.close)
            .unwrap_or(profile.base_price)
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataGateway for SimGateway {
    async fn candles(&self, pair: &Pair, tf: Timeframe, limit: u32) -> GatewayResult<Vec<Candle>> {
        self.check_fault(pair, SimCall::Candles).await?;
        let profile = self.profile_for(pair);
        Ok(self.build_candles(&profile, tf, limit))
    }

    async fn trades(&self, pair: &Pair, limit: u32) -> GatewayResult<Vec<Trade>> {
        self.check_fault(pair, SimCall::Trades).await?;
        let profile = self.profile_for(pair);
        let price = self.last_price(&profile);

        let n = limit as usize;
        let buy_every = if profile.buy_share <= 0.0 {
            usize::MAX
        } else {
            // One buy every k trades approximates the configured share.
            (1.0 / profile.buy_share).round().max(1.0) as usize
        };

        let mut trades = Vec::with_capacity(n);
        for i in 0..n {
            let side = if buy_every != usize::MAX && i % buy_every == 0 {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            };
            trades.push(Trade {
                time: self.anchor_ms - ((n - i) as i64) * 250,
                price: price * (1.0 + Self::wave(i) * 0.0005),
                size: profile.bar_volume / 500.0 * (1.0 + 0.1 * Self::wave(i + 7)),
                side,
            });
        }

        Ok(trades)
    }

    async fn order_book(&self, pair: &Pair) -> GatewayResult<OrderBook> {
        self.check_fault(pair, SimCall::OrderBook).await?;
        let profile = self.profile_for(pair);
        let mid = self.last_price(&profile);

        let mut bids = Vec::with_capacity(20);
        let mut asks = Vec::with_capacity(20);
        for i in 0..20 {
            let offset = mid * 0.0005 * (i + 1) as f64;
            let size = profile.bar_volume / 100.0 * (1.0 + 0.05 * i as f64);
            bids.push(BookLevel {
                price: mid - offset,
                size: size * profile.bid_depth_factor,
            });
            asks.push(BookLevel {
                price: mid + offset,
                size,
            });
        }

        Ok(OrderBook { bids, asks })
    }

    async fn ticker(&self, pair: &Pair) -> GatewayResult<Ticker> {
        self.check_fault(pair, SimCall::Ticker).await?;
        let profile = self.profile_for(pair);
        let price = self.last_price(&profile);

        Ok(Ticker {
            price,
            volume_24h: profile.volume_24h_usd,
            change_24h: profile.drift_per_bar * 24.0 * 100.0,
        })
    }

    async fn funding_rate(&self, pair: &Pair) -> GatewayResult<FundingRate> {
        self.check_fault(pair, SimCall::Funding).await?;
        let profile = self.profile_for(pair);

        Ok(FundingRate {
            current_rate: profile.funding_rate,
            next_rate: profile.funding_rate,
            next_time: self.anchor_ms + 4 * 3_600_000,
            premium: profile.funding_rate * 0.5,
            interest_rate: 0.0001,
            settle_state: SettleState::Settled,
        })
    }

    async fn funding_history(&self, pair: &Pair, limit: u32) -> GatewayResult<Vec<FundingRate>> {
        self.check_fault(pair, SimCall::FundingHistory).await?;
        let profile = self.profile_for(pair);

        let n = limit as usize;
        let mut history = Vec::with_capacity(n);
        for i in 0..n {
            history.push(FundingRate {
                current_rate: profile.funding_rate * (1.0 + 0.1 * Self::wave(i)),
                next_rate: 0.0,
                next_time: self.anchor_ms - ((n - i) as i64) * 8 * 3_600_000,
                premium: 0.0,
                interest_rate: 0.0,
                settle_state: SettleState::Settled,
            });
        }
        Ok(history)
    }

    async fn open_interest(&self, pair: &Pair) -> GatewayResult<OpenInterest> {
        self.check_fault(pair, SimCall::OpenInterest).await?;
        let profile = self.profile_for(pair);
        let price = self.last_price(&profile);

        Ok(OpenInterest {
            oi_base: if price > 0.0 { profile.oi_usd / price } else { 0.0 },
            oi_usd: profile.oi_usd,
            time: self.anchor_ms,
        })
    }

    async fn open_interest_history(
        &self,
        pair: &Pair,
        hours: u32,
    ) -> GatewayResult<Vec<OpenInterest>> {
        self.check_fault(pair, SimCall::OiHistory).await?;
        let profile = self.profile_for(pair);

        let n = hours as usize;
        let mut history = Vec::with_capacity(n);
        for i in 0..n {
            // OI drifts opposite to the wave so pressure tests see variation.
            let oi = profile.oi_usd * (1.0 + 0.05 * Self::wave(i + 11));
            history.push(OpenInterest {
                oi_base: 0.0,
                oi_usd: oi,
                time: self.anchor_ms - ((n - i) as i64) * 3_600_000,
            });
        }
        Ok(history)
    }

    async fn multi_exchange_ticker(&self, base: &str) -> GatewayResult<MultiTickerReport> {
        let pair = Pair::parse(base)
            .map_err(|e| GatewayError::Upstream(format!("aggregated quote: {e}")))?;
        self.check_fault(&pair, SimCall::Ticker).await?;
        let profile = self.profile_for(&pair);
        let price = self.last_price(&profile);

        Ok(MultiTickerReport {
            tickers: vec![
                VenueTicker {
                    venue: "sim-primary".to_string(),
                    price,
                    volume_24h: profile.volume_24h_usd,
                },
                VenueTicker {
                    venue: "sim-secondary".to_string(),
                    price: price * 1.0002,
                    volume_24h: profile.volume_24h_usd * 0.8,
                },
            ],
            degradation: QuoteDegradation {
                degraded: false,
                fallback_reason: None,
                health_status: QuoteHealth::Healthy,
            },
        })
    }
}

impl std::fmt::Debug for SimGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimGateway")
            .field("profiles", &self.profiles.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(s: &str) -> Pair {
        Pair::parse(s).unwrap()
    }

    #[tokio::test]
    async fn candles_are_deterministic_and_chronological() {
        let gw = SimGateway::new();
        let a = gw.candles(&pair("BTC"), Timeframe::H1, 50).await.unwrap();
        let b = gw.candles(&pair("BTC"), Timeframe::H1, 50).await.unwrap();

        assert_eq!(a.len(), 50);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.close.to_bits(), y.close.to_bits());
        }
        for w in a.windows(2) {
            assert!(w[0].open_time < w[1].open_time);
        }
    }

    #[tokio::test]
    async fn uptrend_profile_drifts_up() {
        let gw = SimGateway::new();
        gw.set_profile("ETH", SimProfile::trending(2000.0, 0.003));
        let candles = gw.candles(&pair("ETH"), Timeframe::H1, 100).await.unwrap();
        assert!(candles.last().unwrap().close > candles.first().unwrap().close);
    }

    #[tokio::test]
    async fn fault_injection_surfaces_errors() {
        let gw = SimGateway::new();
        gw.set_fault("BTC", SimFault::Error(SimErrorKind::RateLimited));
        let err = gw.ticker(&pair("BTC")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited(_)));

        gw.clear_fault("BTC");
        assert!(gw.ticker(&pair("BTC")).await.is_ok());
    }

    #[tokio::test]
    async fn buy_share_controls_trade_mix() {
        let gw = SimGateway::new();
        gw.set_profile(
            "SOL",
            SimProfile {
                buy_share: 1.0,
                ..SimProfile::default()
            },
        );
        let trades = gw.trades(&pair("SOL"), 100).await.unwrap();
        assert!(trades.iter().all(|t| t.side == TradeSide::Buy));
    }
}
