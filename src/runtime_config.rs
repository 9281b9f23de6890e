// =============================================================================
// Engine Configuration — hot-loadable settings with atomic save
// =============================================================================
//
// Every tunable parameter of the intelligence engine lives here. Persistence
// uses an atomic tmp + rename pattern to prevent corruption on crash. All
// fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file. Selected fields can be overridden from the
// environment at startup.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_sl_percent() -> f64 {
    0.003
}

fn default_tp_percent() -> f64 {
    0.007
}

fn default_min_signal_confidence() -> f64 {
    0.6
}

fn default_risk_reward() -> f64 {
    2.0
}

fn default_account_equity() -> f64 {
    10_000.0
}

fn default_risk_per_trade_percent() -> f64 {
    1.0
}

fn default_batch_size_screener() -> usize {
    15
}

fn default_batch_size_regime() -> usize {
    10
}

fn default_batch_inter_delay_ms() -> u64 {
    250
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_ms() -> i64 {
    60_000
}

fn default_learning_velocity() -> f64 {
    0.15
}

fn default_min_feedback_threshold() -> u32 {
    3
}

fn default_sentiment_negative_threshold() -> f64 {
    -0.25
}

fn default_sentiment_positive_threshold() -> f64 {
    0.40
}

fn default_watchlist() -> Vec<String> {
    vec![
        "BTC".to_string(),
        "ETH".to_string(),
        "SOL".to_string(),
        "BNB".to_string(),
        "XRP".to_string(),
    ]
}

fn default_scan_interval_secs() -> u64 {
    300
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Argus engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Execution parameter defaults ---------------------------------------

    /// Baseline stop-loss distance as a fraction of entry (0.003 = 0.3%).
    #[serde(default = "default_sl_percent")]
    pub default_sl_percent: f64,

    /// Baseline take-profit distance as a fraction of entry.
    #[serde(default = "default_tp_percent")]
    pub default_tp_percent: f64,

    /// Minimum confidence (0-1) before a signal is worth emitting.
    #[serde(default = "default_min_signal_confidence")]
    pub min_signal_confidence: f64,

    /// Configured risk/reward multiple used for take-profit ladders.
    #[serde(default = "default_risk_reward")]
    pub risk_reward: f64,

    /// Account equity in USD used for the coin-quantity sizing example.
    #[serde(default = "default_account_equity")]
    pub account_equity: f64,

    /// Percent of equity risked per trade (1.0 = 1%).
    #[serde(default = "default_risk_per_trade_percent")]
    pub risk_per_trade_percent: f64,

    // --- Screener batching ---------------------------------------------------

    /// Batch size for the general multi-symbol screener.
    #[serde(default = "default_batch_size_screener")]
    pub batch_size_screener: usize,

    /// Batch size for regime-detection screening (tighter provider budget).
    #[serde(default = "default_batch_size_regime")]
    pub batch_size_regime: usize,

    /// Gap between sequential batches, in milliseconds. Clamped to [100, 1000].
    #[serde(default = "default_batch_inter_delay_ms")]
    pub batch_inter_delay_ms: u64,

    // --- Deadlines & breakers ------------------------------------------------

    /// Per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Consecutive failures before a pair's circuit breaker opens.
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// How long an open breaker rejects calls, in milliseconds.
    #[serde(default = "default_breaker_cooldown_ms")]
    pub circuit_breaker_cooldown_ms: i64,

    // --- Feedback learning ---------------------------------------------------

    /// Scale factor applied to net sentiment when adjusting weights.
    #[serde(default = "default_learning_velocity")]
    pub pattern_learning_velocity: f64,

    /// Minimum ratings in the window before any adjustment happens.
    #[serde(default = "default_min_feedback_threshold")]
    pub min_feedback_threshold: u32,

    /// Net sentiment below this reduces a pattern's weight.
    #[serde(default = "default_sentiment_negative_threshold")]
    pub sentiment_negative_threshold: f64,

    /// Net sentiment above this increases a pattern's weight.
    #[serde(default = "default_sentiment_positive_threshold")]
    pub sentiment_positive_threshold: f64,

    // --- Scan loop -----------------------------------------------------------

    /// Pairs the standalone scan loop screens on each tick.
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,

    /// Seconds between scan-loop ticks.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        // serde_json deserializing `{}` applies every field default.
        serde_json::from_str("{}").expect("defaults always deserialize")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            watchlist = ?config.watchlist,
            request_timeout_ms = config.request_timeout_ms,
            "engine config loaded"
        );

        Ok(config.clamped())
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialize engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Apply environment-variable overrides for deploy-time tuning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("ARGUS_WATCHLIST") {
            let list: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !list.is_empty() {
                self.watchlist = list;
            }
        }

        if let Ok(raw) = std::env::var("ARGUS_ACCOUNT_EQUITY") {
            match raw.parse::<f64>() {
                Ok(v) if v > 0.0 => self.account_equity = v,
                _ => warn!(raw = %raw, "ignoring invalid ARGUS_ACCOUNT_EQUITY"),
            }
        }

        if let Ok(raw) = std::env::var("ARGUS_RISK_PER_TRADE_PERCENT") {
            match raw.parse::<f64>() {
                Ok(v) if v > 0.0 => self.risk_per_trade_percent = v,
                _ => warn!(raw = %raw, "ignoring invalid ARGUS_RISK_PER_TRADE_PERCENT"),
            }
        }

        if let Ok(raw) = std::env::var("ARGUS_REQUEST_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(v) if v >= 1_000 => self.request_timeout_ms = v,
                _ => warn!(raw = %raw, "ignoring invalid ARGUS_REQUEST_TIMEOUT_MS"),
            }
        }

        *self = self.clone().clamped();
    }

    /// Clamp fields with documented valid ranges.
    fn clamped(mut self) -> Self {
        self.batch_inter_delay_ms = self.batch_inter_delay_ms.clamp(100, 1000);
        self.min_signal_confidence = self.min_signal_confidence.clamp(0.0, 1.0);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert!((cfg.default_sl_percent - 0.003).abs() < f64::EPSILON);
        assert!((cfg.default_tp_percent - 0.007).abs() < f64::EPSILON);
        assert!((cfg.min_signal_confidence - 0.6).abs() < f64::EPSILON);
        assert!((cfg.account_equity - 10_000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.batch_size_screener, 15);
        assert_eq!(cfg.batch_size_regime, 10);
        assert_eq!(cfg.request_timeout_ms, 30_000);
        assert_eq!(cfg.circuit_breaker_threshold, 3);
        assert_eq!(cfg.circuit_breaker_cooldown_ms, 60_000);
        assert!((cfg.pattern_learning_velocity - 0.15).abs() < f64::EPSILON);
        assert_eq!(cfg.min_feedback_threshold, 3);
        assert!((cfg.sentiment_negative_threshold + 0.25).abs() < f64::EPSILON);
        assert!((cfg.sentiment_positive_threshold - 0.40).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.batch_size_screener, 15);
        assert_eq!(cfg.watchlist.len(), 5);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "watchlist": ["ETH"], "batch_size_screener": 20 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.watchlist, vec!["ETH"]);
        assert_eq!(cfg.batch_size_screener, 20);
        assert_eq!(cfg.circuit_breaker_threshold, 3);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.watchlist, cfg2.watchlist);
        assert_eq!(cfg.request_timeout_ms, cfg2.request_timeout_ms);
    }

    #[test]
    fn batch_delay_is_clamped() {
        let json = r#"{ "batch_inter_delay_ms": 5 }"#;
        let cfg: EngineConfig = serde_json::from_str::<EngineConfig>(json)
            .unwrap()
            .clamped();
        assert_eq!(cfg.batch_inter_delay_ms, 100);

        let json = r#"{ "batch_inter_delay_ms": 9000 }"#;
        let cfg: EngineConfig = serde_json::from_str::<EngineConfig>(json)
            .unwrap()
            .clamped();
        assert_eq!(cfg.batch_inter_delay_ms, 1000);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine_config.json");

        let mut cfg = EngineConfig::default();
        cfg.watchlist = vec!["BTC".into(), "ETH".into()];
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.watchlist, vec!["BTC", "ETH"]);
    }
}
