// =============================================================================
// Analytics Service — transport-agnostic request surface
// =============================================================================
//
// The boundary consumed by whatever transport fronts the engine. Every
// operation takes a typed request and returns a typed envelope:
//
//   success: { success: true, data, meta }
//   failure: { success: false, error: CODE, message, processing_time_ms,
//              timestamp }
//
// A screening request is partially successful by design: per-pair failures
// ride inside `data.results`, and the envelope stays `success: true` as
// long as the request itself was valid.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyzer::{AnalyzeOptions, PairAnalysis, PairAnalyzer};
use crate::engines::LayerMask;
use crate::error::AnalysisError;
use crate::runtime_config::EngineConfig;
use crate::screener::{ScreenMode, ScreenOutcome, ScreenRequest, Screener};
use crate::signal::feedback::{FeedbackAck, FeedbackLearner, FeedbackStatsReport, WeeklyReport};
use crate::storage::{Storage, StoredFeedback};
use crate::types::now_ms;

/// API version tag stamped into every success envelope.
const API_VERSION: &str = "1.0";

// =============================================================================
// Envelope types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ApiMeta {
    pub processing_time_ms: u64,
    pub timestamp: i64,
    pub api_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batching_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

/// Response envelope shared by every operation.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ApiMeta>,
    /// Machine-readable error code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T, meta: ApiMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(meta),
            error: None,
            message: None,
            processing_time_ms: None,
            timestamp: None,
        }
    }

    fn err(e: &AnalysisError, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            meta: None,
            error: Some(e.code().to_string()),
            message: Some(e.to_string()),
            processing_time_ms: Some(elapsed_ms),
            timestamp: Some(now_ms()),
        }
    }
}

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub pair: String,
    pub timeframe: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub include_details: Option<bool>,
    #[serde(default)]
    pub enabled_layers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub ref_id: String,
    /// +1 or -1.
    pub rating: i8,
    #[serde(default)]
    pub pattern_names: Option<Vec<String>>,
    #[serde(default)]
    pub response_time_s: Option<f64>,
}

// =============================================================================
// Service
// =============================================================================

pub struct AnalyticsService {
    analyzer: Arc<PairAnalyzer>,
    screener: Screener,
    learner: Arc<FeedbackLearner>,
    storage: Arc<dyn Storage>,
    config: Arc<EngineConfig>,
}

impl AnalyticsService {
    pub fn new(
        analyzer: Arc<PairAnalyzer>,
        screener: Screener,
        learner: Arc<FeedbackLearner>,
        storage: Arc<dyn Storage>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            analyzer,
            screener,
            learner,
            storage,
            config,
        }
    }

    pub fn learner(&self) -> &Arc<FeedbackLearner> {
        &self.learner
    }

    fn meta(&self, elapsed_ms: u64, batching: Option<(bool, usize)>) -> ApiMeta {
        ApiMeta {
            processing_time_ms: elapsed_ms,
            timestamp: now_ms(),
            api_version: API_VERSION,
            batching_enabled: batching.map(|(b, _)| b),
            batch_size: batching.map(|(_, s)| s),
        }
    }

    /// Analyze a single pair.
    pub async fn analyze(&self, request: &AnalyzeRequest) -> ApiResponse<PairAnalysis> {
        let started = std::time::Instant::now();

        let opts = AnalyzeOptions {
            limit: request.limit.unwrap_or(100),
            include_details: request.include_details.unwrap_or(false),
            enabled_layers: request
                .enabled_layers
                .as_ref()
                .map(|names| LayerMask::from_names(names))
                .unwrap_or_else(LayerMask::all),
        };

        match self
            .analyzer
            .analyze(&request.pair, &request.timeframe, &opts)
            .await
        {
            Ok(analysis) => {
                let elapsed = started.elapsed().as_millis() as u64;
                ApiResponse::ok(analysis, self.meta(elapsed, None))
            }
            Err(e) => ApiResponse::err(&e, started.elapsed().as_millis() as u64),
        }
    }

    /// Screen a list of symbols with automatic batching.
    pub async fn screen(&self, request: &ScreenRequest) -> ApiResponse<ScreenOutcome> {
        self.screen_with_mode(request, ScreenMode::General).await
    }

    /// Screen with the tighter regime-detection batch budget.
    pub async fn screen_regime(&self, request: &ScreenRequest) -> ApiResponse<ScreenOutcome> {
        self.screen_with_mode(request, ScreenMode::Regime).await
    }

    async fn screen_with_mode(
        &self,
        request: &ScreenRequest,
        mode: ScreenMode,
    ) -> ApiResponse<ScreenOutcome> {
        let started = std::time::Instant::now();
        let batch_size = match mode {
            ScreenMode::General => self.config.batch_size_screener,
            ScreenMode::Regime => self.config.batch_size_regime,
        };

        match self.screener.screen(request, mode).await {
            Ok(outcome) => {
                let elapsed = started.elapsed().as_millis() as u64;
                self.storage.record_metric("screen", elapsed);
                let batching = outcome.stats.batching_used;
                ApiResponse::ok(outcome, self.meta(elapsed, Some((batching, batch_size))))
            }
            Err(e) => ApiResponse::err(&e, started.elapsed().as_millis() as u64),
        }
    }

    /// Record one user rating for an emitted signal.
    pub fn record_feedback(&self, request: &FeedbackRequest) -> ApiResponse<FeedbackAck> {
        let started = std::time::Instant::now();

        if request.rating != 1 && request.rating != -1 {
            let e = AnalysisError::InvalidRequest(format!(
                "rating must be +1 or -1, got {}",
                request.rating
            ));
            return ApiResponse::err(&e, started.elapsed().as_millis() as u64);
        }
        if request.ref_id.trim().is_empty() {
            let e = AnalysisError::InvalidRequest("ref_id must not be empty".into());
            return ApiResponse::err(&e, started.elapsed().as_millis() as u64);
        }

        let now = now_ms();
        let latency_ms = request
            .response_time_s
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(|s| (s * 1000.0) as u64);

        let ack = self.learner.record_feedback(
            &request.ref_id,
            request.rating,
            request.pattern_names.clone(),
            latency_ms,
            now,
        );

        if ack.accepted {
            self.storage.append_feedback(StoredFeedback {
                ref_id: request.ref_id.clone(),
                rating: request.rating,
                pattern_names: ack.pattern_names.clone(),
                recorded_at: now,
            });
            // Attach the rating to the stored signal; unknown ids are
            // journaled only.
            let known = self
                .storage
                .apply_signal_rating(&request.ref_id, request.rating, now);
            info!(
                ref_id = %request.ref_id,
                rating = request.rating,
                known_signal = known,
                "feedback accepted"
            );
        }

        self.storage
            .record_metric("feedback", started.elapsed().as_millis() as u64);

        ApiResponse::ok(ack, self.meta(started.elapsed().as_millis() as u64, None))
    }

    /// Aggregated feedback stats over the trailing `days` (default 7).
    pub fn feedback_stats(&self, days: Option<u32>) -> ApiResponse<FeedbackStatsReport> {
        let started = std::time::Instant::now();
        let report = self.learner.stats(days.unwrap_or(7), now_ms());
        ApiResponse::ok(report, self.meta(started.elapsed().as_millis() as u64, None))
    }

    /// The weekly report: stats plus applied weight adjustments.
    pub fn weekly_report(&self) -> ApiResponse<WeeklyReport> {
        let started = std::time::Instant::now();
        let report = self.learner.weekly_report(now_ms());
        ApiResponse::ok(report, self.meta(started.elapsed().as_millis() as u64, None))
    }

    /// Run one learning pass over freshly journaled feedback. Invoked on a
    /// schedule by the runtime, not per request.
    pub fn run_learning_pass(&self) {
        self.learner.run_learning_pass(now_ms());
    }
}

impl std::fmt::Debug for AnalyticsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsService").finish()
    }
}
