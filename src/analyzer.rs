// =============================================================================
// Per-Pair Analyzer — the single-pair analysis pipeline
// =============================================================================
//
// For one (pair, timeframe, options):
//
//   1. Validate against the pair registry and the closed timeframe set.
//   2. Consult the scope's circuit breaker; fail fast when open.
//   3. Under a single request deadline, fetch the full market-data surface
//      concurrently, run the eight engines, and score the confluence.
//   4. Enrich into a signal, register it for feedback, and record the
//      outcome with the breaker.
//
// Failure semantics: a gateway failure on the candle feed kills the whole
// pair (all three critical engines starve); other inputs degrade only
// their dependent layers, which is reported in `degraded_layers`. Two or
// more critical engines unavailable fails the pair as service_unavailable.
// Validation errors never touch the breaker.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreakerRegistry;
use crate::confluence::{ConfluenceResult, ConfluenceScorer};
use crate::engines::{self, EngineKind, EngineReport, LayerMask};
use crate::error::AnalysisError;
use crate::gateway::{GatewayError, MarketDataGateway};
use crate::pairs::{Pair, Timeframe};
use crate::runtime_config::EngineConfig;
use crate::signal::enricher::{Bias, Signal, SignalEnricher};
use crate::signal::feedback::FeedbackLearner;
use crate::storage::{SignalQuality, Storage};
use crate::types::{now_ms, Candle, FundingRate, OpenInterest, OrderBook, Ticker, Trade};

/// Trades fetched per analysis.
const TRADE_LIMIT: u32 = 200;

/// Hours of hourly OI history fetched per analysis.
const OI_HISTORY_HOURS: u32 = 24;

/// Funding history entries fetched per analysis.
const FUNDING_HISTORY_LIMIT: u32 = 24;

/// Options accepted by the analyze operation.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Candle history depth; clamped to [1, 1000].
    pub limit: u32,
    /// Include the raw per-engine reports in the result.
    pub include_details: bool,
    pub enabled_layers: LayerMask,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            include_details: false,
            enabled_layers: LayerMask::all(),
        }
    }
}

/// Successful per-pair analysis.
#[derive(Debug, Clone, Serialize)]
pub struct PairAnalysis {
    pub pair: Pair,
    pub timeframe: Timeframe,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub confluence: ConfluenceResult,
    pub signal: Signal,
    /// Layers that were enabled but could not produce a reading.
    pub degraded_layers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_reports: Option<Vec<EngineReport>>,
    pub processing_time_ms: u64,
}

/// The fetched market-data surface for one analysis.
struct MarketSurface {
    candles: Vec<Candle>,
    trades: Option<Vec<Trade>>,
    book: Option<OrderBook>,
    ticker: Option<Ticker>,
    funding: Option<FundingRate>,
    funding_history: Vec<FundingRate>,
    oi: Option<OpenInterest>,
    oi_history: Vec<OpenInterest>,
}

// =============================================================================
// Analyzer
// =============================================================================

pub struct PairAnalyzer {
    gateway: Arc<dyn MarketDataGateway>,
    scorer: ConfluenceScorer,
    enricher: SignalEnricher,
    breakers: Arc<CircuitBreakerRegistry>,
    learner: Arc<FeedbackLearner>,
    storage: Arc<dyn Storage>,
    config: Arc<EngineConfig>,
}

impl PairAnalyzer {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        scorer: ConfluenceScorer,
        breakers: Arc<CircuitBreakerRegistry>,
        learner: Arc<FeedbackLearner>,
        storage: Arc<dyn Storage>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let enricher = SignalEnricher::new(&config);
        Self {
            gateway,
            scorer,
            enricher,
            breakers,
            learner,
            storage,
            config,
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Analyze one pair under its own per-pair breaker scope.
    pub async fn analyze(
        &self,
        pair_raw: &str,
        tf_raw: &str,
        opts: &AnalyzeOptions,
    ) -> Result<PairAnalysis, AnalysisError> {
        let pair = Pair::parse(pair_raw)
            .map_err(|e| AnalysisError::Validation(e.to_string()))?;
        let scope = pair.base().to_string();
        self.analyze_in_scope(pair, tf_raw, opts, &scope).await
    }

    /// Analyze a validated pair, accounting failures to `breaker_scope`.
    ///
    /// The screener passes its shared scope here; per-pair calls pass the
    /// pair itself.
    pub async fn analyze_in_scope(
        &self,
        pair: Pair,
        tf_raw: &str,
        opts: &AnalyzeOptions,
        breaker_scope: &str,
    ) -> Result<PairAnalysis, AnalysisError> {
        let tf = Timeframe::parse(tf_raw).ok_or_else(|| {
            AnalysisError::Validation(format!("unsupported timeframe: {tf_raw:?}"))
        })?;

        if self.breakers.is_open(breaker_scope, now_ms()) {
            return Err(AnalysisError::Unavailable(format!(
                "circuit breaker open for {breaker_scope}"
            )));
        }

        let started = std::time::Instant::now();
        let deadline = Duration::from_millis(self.config.request_timeout_ms);

        let outcome = tokio::time::timeout(deadline, self.run_pipeline(&pair, tf, opts)).await;

        let result = match outcome {
            Err(_) => Err(AnalysisError::Timeout(format!(
                "analysis of {pair} exceeded {}ms",
                self.config.request_timeout_ms
            ))),
            Ok(inner) => inner,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.storage.record_metric("analyze", elapsed_ms);

        match result {
            Ok(mut analysis) => {
                self.breakers.record_success(breaker_scope);
                analysis.processing_time_ms = elapsed_ms;
                self.register_signal(&analysis);
                debug!(
                    pair = %analysis.pair,
                    tf = %analysis.timeframe,
                    signal = %analysis.confluence.signal,
                    score = format!("{:.1}", analysis.confluence.overall_score),
                    elapsed_ms,
                    "pair analyzed"
                );
                Ok(analysis)
            }
            Err(e) => {
                if e.trips_breaker() {
                    self.breakers.record_failure(breaker_scope, now_ms());
                }
                warn!(pair = %pair, error = %e, category = %e.category(), "pair analysis failed");
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Pipeline
    // -------------------------------------------------------------------------

    async fn run_pipeline(
        &self,
        pair: &Pair,
        tf: Timeframe,
        opts: &AnalyzeOptions,
    ) -> Result<PairAnalysis, AnalysisError> {
        let surface = self.fetch_surface(pair, tf, opts).await?;

        // Chronological-order precondition for every engine.
        if surface.candles.windows(2).any(|w| w[0].open_time > w[1].open_time) {
            return Err(AnalysisError::Internal(format!(
                "gateway returned out-of-order candles for {pair}"
            )));
        }

        let reports = self.run_engines(&surface, tf, &opts.enabled_layers).await;

        // Two or more starved critical layers invalidate the analysis.
        // Layers the caller disabled are excluded: opting out is not an
        // outage.
        let critical_down = reports
            .iter()
            .filter(|r| {
                opts.enabled_layers.is_enabled(r.kind)
                    && r.kind.is_critical()
                    && !r.is_available()
            })
            .count();
        if critical_down >= 2 {
            return Err(AnalysisError::Unavailable(format!(
                "{critical_down} critical layers unavailable for {pair}"
            )));
        }

        let degraded_layers: Vec<String> = reports
            .iter()
            .filter(|r| opts.enabled_layers.is_enabled(r.kind) && !r.is_available())
            .map(|r| r.kind.pattern_name().to_string())
            .collect();

        let now = now_ms();
        let confluence = self.scorer.score(&reports, tf, now);

        let price = surface
            .ticker
            .as_ref()
            .map(|t| t.price)
            .or_else(|| surface.book.as_ref().and_then(|b| b.mid_price()))
            .or_else(|| surface.candles.last().map(|c| c.close));

        let signal = self.enricher.enrich(
            pair,
            &confluence,
            &reports,
            price,
            surface.book.as_ref(),
            now,
        );

        Ok(PairAnalysis {
            pair: pair.clone(),
            timeframe: tf,
            price,
            confluence,
            signal,
            degraded_layers,
            engine_reports: opts.include_details.then_some(reports),
            processing_time_ms: 0, // stamped by the caller
        })
    }

    /// Fetch every input concurrently. Candles are load-bearing; all other
    /// inputs degrade to `None`/empty on failure.
    async fn fetch_surface(
        &self,
        pair: &Pair,
        tf: Timeframe,
        opts: &AnalyzeOptions,
    ) -> Result<MarketSurface, AnalysisError> {
        let limit = opts.limit.clamp(1, 1000);

        let (candles, trades, book, ticker, funding, funding_history, oi, oi_history) = tokio::join!(
            self.gateway.candles(pair, tf, limit),
            self.gateway.trades(pair, TRADE_LIMIT),
            self.gateway.order_book(pair),
            self.gateway.ticker(pair),
            self.gateway.funding_rate(pair),
            self.gateway.funding_history(pair, FUNDING_HISTORY_LIMIT),
            self.gateway.open_interest(pair),
            self.gateway.open_interest_history(pair, OI_HISTORY_HOURS),
        );

        // Candle failure starves all three critical engines: fail the pair
        // with the provider's own category.
        let candles = candles.map_err(map_gateway_error)?;

        let soft = |name: &str, err: &GatewayError| {
            debug!(pair = %pair, input = name, error = %err, "soft input unavailable");
        };

        Ok(MarketSurface {
            candles,
            trades: trades.map_err(|e| soft("trades", &e)).ok(),
            book: book.map_err(|e| soft("order_book", &e)).ok(),
            ticker: ticker.map_err(|e| soft("ticker", &e)).ok(),
            funding: funding.map_err(|e| soft("funding", &e)).ok(),
            funding_history: funding_history
                .map_err(|e| soft("funding_history", &e))
                .unwrap_or_default(),
            oi: oi.map_err(|e| soft("open_interest", &e)).ok(),
            oi_history: oi_history
                .map_err(|e| soft("oi_history", &e))
                .unwrap_or_default(),
        })
    }

    /// Run the eight engines concurrently over the fetched surface.
    async fn run_engines(
        &self,
        surface: &MarketSurface,
        tf: Timeframe,
        mask: &LayerMask,
    ) -> Vec<EngineReport> {
        let disabled =
            |kind: EngineKind| EngineReport::unavailable(kind, "layer disabled by request");

        let (structure, cvd, momentum, oi, funding, flow, fib, vol) = tokio::join!(
            async {
                if mask.is_enabled(EngineKind::MarketStructure) {
                    engines::market_structure::analyze(&surface.candles)
                } else {
                    disabled(EngineKind::MarketStructure)
                }
            },
            async {
                if mask.is_enabled(EngineKind::VolumeDelta) {
                    engines::volume_delta::analyze(&surface.candles, surface.trades.as_deref(), tf)
                } else {
                    disabled(EngineKind::VolumeDelta)
                }
            },
            async {
                if mask.is_enabled(EngineKind::Momentum) {
                    engines::momentum::analyze(&surface.candles)
                } else {
                    disabled(EngineKind::Momentum)
                }
            },
            async {
                if mask.is_enabled(EngineKind::OpenInterest) {
                    engines::open_interest::analyze(
                        surface.oi.as_ref(),
                        &surface.oi_history,
                        surface.ticker.as_ref(),
                    )
                } else {
                    disabled(EngineKind::OpenInterest)
                }
            },
            async {
                if mask.is_enabled(EngineKind::Funding) {
                    engines::funding::analyze(
                        surface.funding.as_ref(),
                        &surface.funding_history,
                        &surface.oi_history,
                    )
                } else {
                    disabled(EngineKind::Funding)
                }
            },
            async {
                if mask.is_enabled(EngineKind::OrderFlow) {
                    engines::order_flow::analyze(
                        surface.book.as_ref(),
                        surface.trades.as_deref(),
                        &surface.candles,
                    )
                } else {
                    disabled(EngineKind::OrderFlow)
                }
            },
            async {
                if mask.is_enabled(EngineKind::Fibonacci) {
                    engines::fibonacci::analyze(&surface.candles)
                } else {
                    disabled(EngineKind::Fibonacci)
                }
            },
            async {
                if mask.is_enabled(EngineKind::Volatility) {
                    engines::volatility::analyze(&surface.candles, surface.ticker.as_ref())
                } else {
                    disabled(EngineKind::Volatility)
                }
            },
        );

        vec![structure, cvd, momentum, oi, funding, flow, fib, vol]
    }

    /// Mirror emitted directional signals for the feedback loop.
    fn register_signal(&self, analysis: &PairAnalysis) {
        let signal = &analysis.signal;
        if signal.bias == Bias::Neutral {
            return;
        }
        if signal.confidence < self.config.min_signal_confidence * 100.0 {
            debug!(
                pair = %analysis.pair,
                confidence = signal.confidence,
                "signal below confidence floor, not registered"
            );
            return;
        }

        self.learner.register_signal(signal);
        self.storage.upsert_signal_quality(SignalQuality {
            signal_id: signal.signal_id.to_string(),
            pair: analysis.pair.base().to_string(),
            timeframe: analysis.timeframe.as_str().to_string(),
            confidence: signal.confidence,
            emitted_at: signal.created_at,
            final_rating: None,
            rated_at: None,
        });

        info!(
            pair = %analysis.pair,
            signal_id = %signal.signal_id,
            bias = %signal.bias,
            confidence = format!("{:.0}", signal.confidence),
            "signal registered"
        );
    }
}

impl std::fmt::Debug for PairAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairAnalyzer").finish()
    }
}

fn map_gateway_error(e: GatewayError) -> AnalysisError {
    match e {
        GatewayError::Timeout(m) => AnalysisError::Timeout(m),
        GatewayError::RateLimited(m) => AnalysisError::RateLimited(m),
        GatewayError::Upstream(m) | GatewayError::Transport(m) | GatewayError::Parse(m) => {
            AnalysisError::Internal(m)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::confluence::PatternWeightBook;
    use crate::error::ErrorCategory;
    use crate::gateway::sim::{SimCall, SimErrorKind, SimFault, SimGateway, SimProfile};
    use crate::storage::MemoryStorage;

    fn build(gateway: Arc<SimGateway>) -> PairAnalyzer {
        let config = Arc::new(EngineConfig::default());
        let weights = Arc::new(PatternWeightBook::new());
        let learner = Arc::new(FeedbackLearner::new(weights.clone(), &config));
        PairAnalyzer::new(
            gateway,
            ConfluenceScorer::new(weights),
            Arc::new(CircuitBreakerRegistry::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_cooldown_ms,
            )),
            learner,
            Arc::new(MemoryStorage::new()),
            config,
        )
    }

    #[tokio::test]
    async fn happy_path_produces_full_analysis() {
        let gateway = Arc::new(SimGateway::new());
        let analyzer = build(gateway);

        let result = analyzer
            .analyze("btc", "1h", &AnalyzeOptions::default())
            .await
            .expect("analysis should succeed");

        assert_eq!(result.pair.base(), "BTC");
        assert_eq!(result.timeframe, Timeframe::H1);
        assert!(result.price.is_some());
        assert!(result.degraded_layers.is_empty());
        assert!(result.engine_reports.is_none());

        let weight_sum: f64 = result.confluence.per_layer.iter().map(|l| l.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn include_details_returns_reports() {
        let gateway = Arc::new(SimGateway::new());
        let analyzer = build(gateway);

        let opts = AnalyzeOptions {
            include_details: true,
            ..Default::default()
        };
        let result = analyzer.analyze("ETH", "15m", &opts).await.unwrap();
        assert_eq!(result.engine_reports.as_ref().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn unknown_pair_is_validation_error() {
        let analyzer = build(Arc::new(SimGateway::new()));
        let err = analyzer
            .analyze("ZZZZ", "1h", &AnalyzeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn bad_timeframe_is_validation_error() {
        let analyzer = build(Arc::new(SimGateway::new()));
        let err = analyzer
            .analyze("BTC", "2h", &AnalyzeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn candle_failure_fails_whole_pair() {
        let gateway = Arc::new(SimGateway::new());
        gateway.set_fault_on("BTC", SimCall::Candles, SimFault::Error(SimErrorKind::Timeout));
        let analyzer = build(gateway);

        let err = analyzer
            .analyze("BTC", "1h", &AnalyzeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn soft_input_failure_degrades_layer_only() {
        let gateway = Arc::new(SimGateway::new());
        gateway.set_fault_on("BTC", SimCall::Funding, SimFault::Error(SimErrorKind::Upstream));
        let analyzer = build(gateway);

        let result = analyzer
            .analyze("BTC", "1h", &AnalyzeOptions::default())
            .await
            .expect("soft failure must not kill the pair");

        assert_eq!(result.degraded_layers, vec!["funding".to_string()]);
        let weight_sum: f64 = result.confluence.per_layer.iter().map(|l| l.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn breaker_opens_after_three_failures() {
        let gateway = Arc::new(SimGateway::new());
        gateway.set_fault_on("BTC", SimCall::Candles, SimFault::Error(SimErrorKind::Timeout));
        let analyzer = build(gateway.clone());

        for _ in 0..3 {
            let err = analyzer
                .analyze("BTC", "1h", &AnalyzeOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Timeout);
        }

        // Breaker now open: the gateway is healthy again but the fourth
        // call is rejected without reaching it.
        gateway.clear_fault("BTC");
        let err = analyzer
            .analyze("BTC", "1h", &AnalyzeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ServiceUnavailable);

        // Sibling pairs are unaffected.
        assert!(analyzer
            .analyze("ETH", "1h", &AnalyzeOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn validation_errors_never_trip_breaker() {
        let analyzer = build(Arc::new(SimGateway::new()));
        for _ in 0..5 {
            let _ = analyzer.analyze("ZZZZ", "1h", &AnalyzeOptions::default()).await;
        }
        assert_eq!(analyzer.breakers().state("ZZZZ").failure_count, 0);
    }

    #[tokio::test]
    async fn disabled_layers_are_not_degraded() {
        let gateway = Arc::new(SimGateway::new());
        let analyzer = build(gateway);

        let mut mask = LayerMask::all();
        mask.disable(EngineKind::Fibonacci);
        mask.disable(EngineKind::Funding);
        let opts = AnalyzeOptions {
            enabled_layers: mask,
            include_details: true,
            ..Default::default()
        };

        let result = analyzer.analyze("BTC", "1h", &opts).await.unwrap();
        // Disabled layers are unavailable but not reported as degraded.
        assert!(result.degraded_layers.is_empty());
        let reports = result.engine_reports.unwrap();
        assert!(!reports[EngineKind::Fibonacci.index()].is_available());
        assert!(!reports[EngineKind::Funding.index()].is_available());
    }

    #[tokio::test]
    async fn short_candle_history_degrades_fibonacci() {
        let gateway = Arc::new(SimGateway::new());
        let analyzer = build(gateway);

        // 16 candles: Fibonacci (needs 20) and the EMA-stack legs starve,
        // but RSI keeps momentum alive so only one critical layer is down
        // at most.
        let opts = AnalyzeOptions {
            limit: 16,
            ..Default::default()
        };
        let result = analyzer.analyze("BTC", "1h", &opts).await.unwrap();
        assert!(result
            .degraded_layers
            .iter()
            .any(|l| l == "fibonacci"));
    }

    #[tokio::test]
    async fn illiquid_pair_is_forced_neutral_with_high_risk() {
        let gateway = Arc::new(SimGateway::new());
        // Strong trend, but only $500k of daily volume.
        gateway.set_profile(
            "KAS",
            SimProfile {
                base_price: 0.15,
                drift_per_bar: 0.004,
                volume_24h_usd: 500_000.0,
                ..SimProfile::default()
            },
        );
        let analyzer = build(gateway);

        let result = analyzer
            .analyze("KAS", "1h", &AnalyzeOptions::default())
            .await
            .unwrap();

        assert_eq!(result.signal.bias, Bias::Neutral);
        assert_eq!(
            result.confluence.risk_level,
            crate::confluence::RiskLevel::High
        );
        assert!(result.signal.stop_loss.is_none());
        assert!(result.signal.take_profits.is_empty());
    }

    #[tokio::test]
    async fn directional_signal_is_registered() {
        let gateway = Arc::new(SimGateway::new());
        // Strong uptrend with heavy bid support produces a directional call.
        gateway.set_profile(
            "SOL",
            SimProfile {
                base_price: 100.0,
                drift_per_bar: 0.004,
                wave_amplitude: 0.002,
                buy_share: 0.9,
                bid_depth_factor: 1.5,
                ..SimProfile::default()
            },
        );
        let analyzer = build(gateway);

        let result = analyzer
            .analyze("SOL", "1h", &AnalyzeOptions::default())
            .await
            .unwrap();

        if result.signal.bias != Bias::Neutral
            && result.signal.confidence >= 60.0
        {
            // The learner accepted the mirror entry: feedback on this id
            // must resolve as a known signal.
            let ack = analyzer.learner.record_feedback(
                &result.signal.signal_id.to_string(),
                1,
                None,
                None,
                now_ms(),
            );
            assert!(ack.known_signal);
        }
    }
}
