// =============================================================================
// Multi-Symbol Screener — bounded-parallel fan-out with automatic batching
// =============================================================================
//
// Screens up to 100 symbols per request. Small requests run fully
// concurrently; anything beyond the batch size is partitioned in input
// order into sequential batches (concurrent within each batch) with a
// short gap between batches to respect provider budgets.
//
// Fault tolerance: one pair's failure never aborts its siblings. Every
// input symbol yields exactly one outcome — ok or failed with a category —
// and results are re-sorted into input order before returning. The
// aggregated path is guarded by its own shared circuit breaker, separate
// from the per-pair breakers.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzer::{AnalyzeOptions, PairAnalysis, PairAnalyzer};
use crate::breaker::SHARED_SCREENER_BREAKER;
use crate::engines::LayerMask;
use crate::error::{AnalysisError, ErrorCategory};
use crate::pairs::Pair;
use crate::runtime_config::EngineConfig;
use crate::types::now_ms;

/// Upper bound on symbols per request, after normalization.
pub const MAX_SYMBOLS: usize = 100;

/// Which batch-size budget applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenMode {
    General,
    Regime,
}

/// Screener request after transport decoding.
#[derive(Debug, Clone)]
pub struct ScreenRequest {
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub include_details: bool,
    /// Pattern names of the layers to run; `None` means all eight.
    pub enabled_layers: Option<Vec<String>>,
}

/// Outcome for one screened symbol.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairOutcome {
    Ok {
        #[serde(flatten)]
        analysis: Box<PairAnalysis>,
    },
    Failed {
        pair: String,
        category: ErrorCategory,
        message: String,
        processing_time_ms: u64,
    },
}

impl PairOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Timing summary for one executed batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_index: usize,
    pub size: usize,
    pub processing_time_ms: u64,
}

/// Aggregate statistics for one screening run.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenStats {
    pub total_symbols_requested: usize,
    pub total_symbols_processed: usize,
    pub successful_results: usize,
    pub failed_results: usize,
    pub success_rate_pct: f64,
    pub processing_time_ms: u64,
    pub batching_used: bool,
    pub batch_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_summaries: Option<Vec<BatchSummary>>,
    /// Histogram of confluence classifications among successful results.
    pub signal_histogram: HashMap<String, usize>,
    /// Mean overall score among successful results.
    pub average_score: f64,
}

/// Full screener result: per-pair outcomes in input order plus stats.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenOutcome {
    pub results: Vec<PairOutcome>,
    pub stats: ScreenStats,
}

// =============================================================================
// Screener
// =============================================================================

pub struct Screener {
    analyzer: Arc<PairAnalyzer>,
    config: Arc<EngineConfig>,
}

impl Screener {
    pub fn new(analyzer: Arc<PairAnalyzer>, config: Arc<EngineConfig>) -> Self {
        Self { analyzer, config }
    }

    /// Screen a symbol list. Per-symbol failures are embedded in the
    /// result; only request-level problems (empty list, too many symbols,
    /// shared breaker open) surface as errors.
    pub async fn screen(
        &self,
        request: &ScreenRequest,
        mode: ScreenMode,
    ) -> Result<ScreenOutcome, AnalysisError> {
        let started = std::time::Instant::now();

        if request.symbols.is_empty() {
            return Err(AnalysisError::InvalidRequest(
                "symbol list must not be empty".into(),
            ));
        }

        // Normalize and dedup, preserving first-seen order.
        let mut seen = std::collections::HashSet::new();
        let normalized: Vec<String> = request
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .filter(|s| seen.insert(s.clone()))
            .collect();

        if normalized.is_empty() {
            return Err(AnalysisError::InvalidRequest(
                "symbol list is empty after normalization".into(),
            ));
        }
        if normalized.len() > MAX_SYMBOLS {
            return Err(AnalysisError::TooManySymbols(normalized.len(), MAX_SYMBOLS));
        }

        if self
            .analyzer
            .breakers()
            .is_open(SHARED_SCREENER_BREAKER, now_ms())
        {
            return Err(AnalysisError::Unavailable(
                "aggregated screening breaker open".into(),
            ));
        }

        let opts = AnalyzeOptions {
            limit: 100,
            include_details: request.include_details,
            enabled_layers: request
                .enabled_layers
                .as_ref()
                .map(|names| LayerMask::from_names(names))
                .unwrap_or_else(LayerMask::all),
        };

        let batch_size = match mode {
            ScreenMode::General => self.config.batch_size_screener,
            ScreenMode::Regime => self.config.batch_size_regime,
        }
        .max(1);

        let batching_used = normalized.len() > batch_size;

        // --- Execute -----------------------------------------------------
        let mut indexed: Vec<(usize, PairOutcome)> = Vec::with_capacity(normalized.len());
        let mut batch_summaries = Vec::new();

        for (batch_index, chunk) in normalized.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.batch_inter_delay_ms,
                ))
                .await;
            }

            let batch_started = std::time::Instant::now();
            let base_index = batch_index * batch_size;

            let futures = chunk.iter().enumerate().map(|(offset, symbol)| {
                let index = base_index + offset;
                let symbol = symbol.clone();
                let timeframe = &request.timeframe;
                let opts = &opts;
                async move { (index, self.screen_one(symbol, timeframe, opts).await) }
            });
            let mut outcomes = join_all(futures).await;
            indexed.append(&mut outcomes);

            let batch_ms = batch_started.elapsed().as_millis() as u64;
            batch_summaries.push(BatchSummary {
                batch_index,
                size: chunk.len(),
                processing_time_ms: batch_ms,
            });
            debug!(batch_index, size = chunk.len(), batch_ms, "screener batch complete");
        }

        // Input order, regardless of completion order.
        indexed.sort_by_key(|(i, _)| *i);
        let results: Vec<PairOutcome> = indexed.into_iter().map(|(_, o)| o).collect();

        // --- Aggregate -----------------------------------------------------
        let successful = results.iter().filter(|r| r.is_ok()).count();
        let failed = results.len() - successful;

        let mut signal_histogram: HashMap<String, usize> = HashMap::new();
        let mut score_sum = 0.0;
        for r in &results {
            if let PairOutcome::Ok { analysis } = r {
                *signal_histogram
                    .entry(analysis.confluence.signal.to_string())
                    .or_insert(0) += 1;
                score_sum += analysis.confluence.overall_score;
            }
        }
        let average_score = if successful > 0 {
            score_sum / successful as f64
        } else {
            0.0
        };

        let stats = ScreenStats {
            total_symbols_requested: request.symbols.len(),
            total_symbols_processed: results.len(),
            successful_results: successful,
            failed_results: failed,
            success_rate_pct: if results.is_empty() {
                0.0
            } else {
                successful as f64 / results.len() as f64 * 100.0
            },
            processing_time_ms: started.elapsed().as_millis() as u64,
            batching_used,
            batch_count: batch_summaries.len(),
            batch_summaries: batching_used.then_some(batch_summaries),
            signal_histogram,
            average_score,
        };

        info!(
            requested = stats.total_symbols_requested,
            processed = stats.total_symbols_processed,
            ok = successful,
            failed,
            batches = stats.batch_count,
            elapsed_ms = stats.processing_time_ms,
            "screening complete"
        );

        Ok(ScreenOutcome { results, stats })
    }

    /// Analyze one symbol, converting every failure into a Failed outcome.
    async fn screen_one(
        &self,
        symbol: String,
        timeframe: &str,
        opts: &AnalyzeOptions,
    ) -> PairOutcome {
        let started = std::time::Instant::now();

        let pair = match Pair::parse(&symbol) {
            Ok(p) => p,
            Err(e) => {
                return PairOutcome::Failed {
                    pair: symbol,
                    category: ErrorCategory::Validation,
                    message: e.to_string(),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                }
            }
        };

        match self
            .analyzer
            .analyze_in_scope(pair.clone(), timeframe, opts, SHARED_SCREENER_BREAKER)
            .await
        {
            Ok(analysis) => PairOutcome::Ok {
                analysis: Box::new(analysis),
            },
            Err(e) => PairOutcome::Failed {
                pair: pair.base().to_string(),
                category: e.category(),
                message: e.to_string(),
                processing_time_ms: started.elapsed().as_millis() as u64,
            },
        }
    }
}

impl std::fmt::Debug for Screener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screener").finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerRegistry;
    use crate::confluence::{ConfluenceScorer, PatternWeightBook};
    use crate::gateway::sim::{SimCall, SimErrorKind, SimFault, SimGateway};
    use crate::signal::feedback::FeedbackLearner;
    use crate::storage::MemoryStorage;
    use crate::pairs::RECOGNIZED_PAIRS;

    fn build(gateway: Arc<SimGateway>) -> Screener {
        let mut raw = EngineConfig::default();
        // Keep tests fast: shortest allowed inter-batch gap.
        raw.batch_inter_delay_ms = 100;
        let config = Arc::new(raw);
        let weights = Arc::new(PatternWeightBook::new());
        let learner = Arc::new(FeedbackLearner::new(weights.clone(), &config));
        let analyzer = Arc::new(PairAnalyzer::new(
            gateway,
            ConfluenceScorer::new(weights),
            Arc::new(CircuitBreakerRegistry::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_cooldown_ms,
            )),
            learner,
            Arc::new(MemoryStorage::new()),
            config.clone(),
        ));
        Screener::new(analyzer, config)
    }

    fn request(symbols: Vec<&str>) -> ScreenRequest {
        ScreenRequest {
            symbols: symbols.into_iter().map(String::from).collect(),
            timeframe: "15m".to_string(),
            include_details: false,
            enabled_layers: None,
        }
    }

    #[tokio::test]
    async fn empty_symbol_list_is_invalid_request() {
        let screener = build(Arc::new(SimGateway::new()));
        let err = screener
            .screen(&request(vec![]), ScreenMode::General)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn over_one_hundred_symbols_is_rejected() {
        let symbols: Vec<String> = (0..101).map(|i| format!("SYM{i}")).collect();
        let req = ScreenRequest {
            symbols,
            timeframe: "15m".into(),
            include_details: false,
            enabled_layers: None,
        };
        let screener = build(Arc::new(SimGateway::new()));
        let err = screener.screen(&req, ScreenMode::General).await.unwrap_err();
        assert_eq!(err.code(), "TOO_MANY_SYMBOLS");
    }

    #[tokio::test]
    async fn small_request_runs_without_batching() {
        let screener = build(Arc::new(SimGateway::new()));
        let outcome = screener
            .screen(&request(vec!["BTC", "ETH", "SOL"]), ScreenMode::General)
            .await
            .unwrap();

        assert!(!outcome.stats.batching_used);
        assert_eq!(outcome.stats.batch_count, 1);
        assert!(outcome.stats.batch_summaries.is_none());
        assert_eq!(outcome.stats.total_symbols_processed, 3);
        assert_eq!(outcome.stats.successful_results, 3);
    }

    #[tokio::test]
    async fn twenty_five_symbols_form_two_batches() {
        let symbols: Vec<&str> = RECOGNIZED_PAIRS[..25].to_vec();
        let screener = build(Arc::new(SimGateway::new()));
        let outcome = screener
            .screen(&request(symbols), ScreenMode::General)
            .await
            .unwrap();

        assert!(outcome.stats.batching_used);
        assert_eq!(outcome.stats.batch_count, 2);
        let summaries = outcome.stats.batch_summaries.as_ref().unwrap();
        assert_eq!(summaries[0].size, 15);
        assert_eq!(summaries[1].size, 10);
        assert_eq!(outcome.stats.total_symbols_processed, 25);
        assert_eq!(
            outcome.stats.successful_results + outcome.stats.failed_results,
            25
        );
    }

    #[tokio::test]
    async fn regime_mode_uses_smaller_batches() {
        let symbols: Vec<&str> = RECOGNIZED_PAIRS[..12].to_vec();
        let screener = build(Arc::new(SimGateway::new()));
        let outcome = screener
            .screen(&request(symbols), ScreenMode::Regime)
            .await
            .unwrap();
        assert!(outcome.stats.batching_used);
        assert_eq!(outcome.stats.batch_count, 2);
    }

    #[tokio::test]
    async fn unknown_symbol_fails_individually() {
        let screener = build(Arc::new(SimGateway::new()));
        let outcome = screener
            .screen(&request(vec!["BTC", "ZZZZ", "ETH"]), ScreenMode::General)
            .await
            .unwrap();

        assert_eq!(outcome.stats.total_symbols_processed, 3);
        assert_eq!(outcome.stats.successful_results, 2);
        assert_eq!(outcome.stats.failed_results, 1);

        match &outcome.results[1] {
            PairOutcome::Failed { pair, category, .. } => {
                assert_eq!(pair, "ZZZZ");
                assert_eq!(*category, ErrorCategory::Validation);
            }
            other => panic!("expected failure for ZZZZ, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_failure_does_not_abort_siblings() {
        let gateway = Arc::new(SimGateway::new());
        gateway.set_fault_on("ETH", SimCall::Candles, SimFault::Error(SimErrorKind::Upstream));
        let screener = build(gateway);

        let outcome = screener
            .screen(&request(vec!["BTC", "ETH", "SOL"]), ScreenMode::General)
            .await
            .unwrap();

        assert_eq!(outcome.stats.successful_results, 2);
        assert_eq!(outcome.stats.failed_results, 1);
        match &outcome.results[1] {
            PairOutcome::Failed { category, .. } => {
                assert_eq!(*category, ErrorCategory::Internal)
            }
            other => panic!("expected ETH failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn results_are_in_input_order() {
        let symbols: Vec<&str> = RECOGNIZED_PAIRS[..20].to_vec();
        let screener = build(Arc::new(SimGateway::new()));
        let outcome = screener
            .screen(&request(symbols.clone()), ScreenMode::General)
            .await
            .unwrap();

        for (i, result) in outcome.results.iter().enumerate() {
            let name = match result {
                PairOutcome::Ok { analysis } => analysis.pair.base().to_string(),
                PairOutcome::Failed { pair, .. } => pair.clone(),
            };
            assert_eq!(name, symbols[i]);
        }
    }

    #[tokio::test]
    async fn duplicates_are_collapsed() {
        let screener = build(Arc::new(SimGateway::new()));
        let outcome = screener
            .screen(&request(vec!["BTC", "btc", " BTC ", "ETH"]), ScreenMode::General)
            .await
            .unwrap();

        assert_eq!(outcome.stats.total_symbols_requested, 4);
        assert_eq!(outcome.stats.total_symbols_processed, 2);
    }

    #[tokio::test]
    async fn disabled_layers_are_honored() {
        let screener = build(Arc::new(SimGateway::new()));
        let req = ScreenRequest {
            symbols: vec!["BTC".into()],
            timeframe: "1h".into(),
            include_details: true,
            enabled_layers: Some(vec!["cvd".into(), "momentum".into(), "market_structure".into()]),
        };
        let outcome = screener.screen(&req, ScreenMode::General).await.unwrap();
        match &outcome.results[0] {
            PairOutcome::Ok { analysis } => {
                let available = analysis
                    .engine_reports
                    .as_ref()
                    .unwrap()
                    .iter()
                    .filter(|r| r.is_available())
                    .count();
                assert!(available <= 3);
            }
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn histogram_and_average_cover_successes() {
        let screener = build(Arc::new(SimGateway::new()));
        let outcome = screener
            .screen(&request(vec!["BTC", "ETH"]), ScreenMode::General)
            .await
            .unwrap();

        let histogram_total: usize = outcome.stats.signal_histogram.values().sum();
        assert_eq!(histogram_total, outcome.stats.successful_results);
        assert!(outcome.stats.average_score.is_finite());
    }
}
