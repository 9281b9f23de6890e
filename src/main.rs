// =============================================================================
// Argus Perp Intelligence Engine — Main Entry Point
// =============================================================================
//
// Wires the engine together at startup: every component is constructed once
// and injected, nothing is built per request. Runs a periodic scan over the
// configured watchlist and logs the non-HOLD calls; the typed service
// surface in `service.rs` is the boundary a transport layer would mount.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyzer;
mod breaker;
mod confluence;
mod engines;
mod error;
mod gateway;
mod indicators;
mod pairs;
mod recovery;
mod runtime_config;
mod screener;
mod service;
mod signal;
mod storage;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analyzer::PairAnalyzer;
use crate::breaker::CircuitBreakerRegistry;
use crate::confluence::{ConfluenceScorer, PatternWeightBook};
use crate::gateway::okx::OkxGateway;
use crate::gateway::sim::SimGateway;
use crate::gateway::MarketDataGateway;
use crate::recovery::RecoveryQueue;
use crate::runtime_config::EngineConfig;
use crate::screener::{ScreenRequest, Screener};
use crate::screener::PairOutcome;
use crate::service::AnalyticsService;
use crate::signal::feedback::FeedbackLearner;
use crate::storage::{MemoryStorage, Storage};

/// Where learned pattern weights are snapshotted between runs.
const WEIGHTS_PATH: &str = "pattern_weights.json";

/// Where the engine config lives.
const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Argus Perp Intelligence — Starting Up             ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });
    config.apply_env_overrides();
    let config = Arc::new(config);

    info!(
        watchlist = ?config.watchlist,
        request_timeout_ms = config.request_timeout_ms,
        batch_size = config.batch_size_screener,
        "engine configured"
    );

    // ── 2. Gateway selection ─────────────────────────────────────────────
    let use_sim = std::env::args().any(|a| a == "--sim")
        || std::env::var("ARGUS_SIM").map_or(false, |v| v == "1");

    let gateway: Arc<dyn MarketDataGateway> = if use_sim {
        warn!("running against the simulated gateway (--sim)");
        Arc::new(SimGateway::new())
    } else {
        Arc::new(OkxGateway::new())
    };

    // ── 3. Learned weights ───────────────────────────────────────────────
    let weights = Arc::new(PatternWeightBook::new());
    if let Err(e) = weights.load(WEIGHTS_PATH) {
        info!(error = %e, "no prior weight snapshot, starting neutral");
    }

    // ── 4. Core construction ─────────────────────────────────────────────
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        config.circuit_breaker_threshold,
        config.circuit_breaker_cooldown_ms,
    ));
    let learner = Arc::new(FeedbackLearner::new(weights.clone(), &config));
    let analyzer = Arc::new(PairAnalyzer::new(
        gateway.clone(),
        ConfluenceScorer::new(weights.clone()),
        breakers,
        learner.clone(),
        storage.clone(),
        config.clone(),
    ));
    let screener = Screener::new(analyzer.clone(), config.clone());
    let service = Arc::new(AnalyticsService::new(
        analyzer,
        screener,
        learner,
        storage,
        config.clone(),
    ));

    // ── 5. Recovery queue ────────────────────────────────────────────────
    let recovery_queue = Arc::new(RecoveryQueue::new());
    {
        let queue = recovery_queue.clone();
        let gw = gateway.clone();
        tokio::spawn(async move {
            recovery::run_recovery_loop(queue, gw).await;
        });
    }

    // ── 6. Learning pass loop ────────────────────────────────────────────
    {
        let svc = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                svc.run_learning_pass();
            }
        });
    }

    // ── 7. Watchlist scan loop ───────────────────────────────────────────
    {
        let svc = service.clone();
        let cfg = config.clone();
        let queue = recovery_queue.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(cfg.scan_interval_secs));
            loop {
                interval.tick().await;

                let request = ScreenRequest {
                    symbols: cfg.watchlist.clone(),
                    timeframe: "1h".to_string(),
                    include_details: false,
                    enabled_layers: None,
                };

                let resp = svc.screen(&request).await;
                match resp.data {
                    Some(outcome) => {
                        for result in &outcome.results {
                            match result {
                                PairOutcome::Ok { analysis } => {
                                    if !analysis.confluence.signal.is_hold() {
                                        info!(
                                            pair = %analysis.pair,
                                            signal = %analysis.confluence.signal,
                                            score = format!("{:.1}", analysis.confluence.overall_score),
                                            risk = %analysis.confluence.risk_level,
                                            "actionable call"
                                        );
                                    }
                                }
                                PairOutcome::Failed { pair, category, message, .. } => {
                                    warn!(pair = %pair, category = %category, message = %message, "scan failure");
                                    // Provider-side failures go to the
                                    // recovery queue for gentle probing.
                                    if category.trips_breaker() {
                                        queue.enqueue(pair);
                                    }
                                }
                            }
                        }
                        info!(
                            ok = outcome.stats.successful_results,
                            failed = outcome.stats.failed_results,
                            avg_score = format!("{:.1}", outcome.stats.average_score),
                            "watchlist scan complete"
                        );
                    }
                    None => {
                        error!(
                            code = resp.error.as_deref().unwrap_or("UNKNOWN"),
                            message = resp.message.as_deref().unwrap_or(""),
                            "watchlist scan rejected"
                        );
                    }
                }
            }
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    if let Err(e) = weights.save(WEIGHTS_PATH) {
        error!(error = %e, "failed to save pattern weights on shutdown");
    }

    info!("Argus shut down complete.");
    Ok(())
}
