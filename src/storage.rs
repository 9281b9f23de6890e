// =============================================================================
// Storage Contract — typed persistence surface consumed by the core
// =============================================================================
//
// The engine never talks to a database directly; it consumes this contract.
// The in-memory implementation below is the default backing store and the
// reference semantics for real implementations: append-only logs, counter
// metrics with response-time accumulation, a feedback journal, pattern
// weights, and per-signal quality records.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::confluence::weights::PatternWeight;

/// Bound on retained log entries in the in-memory store.
const MAX_LOGS: usize = 1000;

/// One appended log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: i64,
}

/// Accumulated counter with response-time totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricCounter {
    pub count: u64,
    pub total_response_time_ms: u64,
}

impl MetricCounter {
    pub fn average_response_time_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_response_time_ms as f64 / self.count as f64
        }
    }
}

/// Journaled feedback row.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFeedback {
    pub ref_id: String,
    pub rating: i8,
    pub pattern_names: Vec<String>,
    pub recorded_at: i64,
}

/// Quality record for one emitted signal, updated when feedback arrives.
#[derive(Debug, Clone, Serialize)]
pub struct SignalQuality {
    pub signal_id: String,
    pub pair: String,
    pub timeframe: String,
    pub confidence: f64,
    pub emitted_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_rating: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rated_at: Option<i64>,
}

/// The persistence surface the engine delegates to.
pub trait Storage: Send + Sync {
    fn append_log(&self, level: &str, message: &str, details: Option<serde_json::Value>, now: i64);
    fn record_metric(&self, name: &str, response_time_ms: u64);

    fn append_feedback(&self, record: StoredFeedback);
    fn feedback_by_ref(&self, ref_id: &str) -> Option<StoredFeedback>;
    fn feedback_since(&self, cutoff: i64) -> Vec<StoredFeedback>;

    fn upsert_pattern_weight(&self, weight: PatternWeight);
    fn pattern_weight(&self, name: &str) -> Option<PatternWeight>;
    fn all_pattern_weights(&self) -> Vec<PatternWeight>;

    fn upsert_signal_quality(&self, quality: SignalQuality);
    /// Attach a final rating to a stored signal. Returns false when the
    /// signal id is unknown.
    fn apply_signal_rating(&self, signal_id: &str, rating: i8, at: i64) -> bool;
    fn signal_quality(&self, signal_id: &str) -> Option<SignalQuality>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// Default process-local store.
#[derive(Default)]
pub struct MemoryStorage {
    logs: RwLock<Vec<LogEntry>>,
    metrics: RwLock<HashMap<String, MetricCounter>>,
    feedback: RwLock<Vec<StoredFeedback>>,
    weights: RwLock<HashMap<String, PatternWeight>>,
    signals: RwLock<HashMap<String, SignalQuality>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metric(&self, name: &str) -> MetricCounter {
        self.metrics.read().get(name).cloned().unwrap_or_default()
    }

    pub fn log_count(&self) -> usize {
        self.logs.read().len()
    }
}

impl Storage for MemoryStorage {
    fn append_log(&self, level: &str, message: &str, details: Option<serde_json::Value>, now: i64) {
        let mut logs = self.logs.write();
        logs.push(LogEntry {
            level: level.to_string(),
            message: message.to_string(),
            details,
            timestamp: now,
        });
        while logs.len() > MAX_LOGS {
            logs.remove(0);
        }
    }

    fn record_metric(&self, name: &str, response_time_ms: u64) {
        let mut metrics = self.metrics.write();
        let counter = metrics.entry(name.to_string()).or_default();
        counter.count += 1;
        counter.total_response_time_ms += response_time_ms;
    }

    fn append_feedback(&self, record: StoredFeedback) {
        self.feedback.write().push(record);
    }

    fn feedback_by_ref(&self, ref_id: &str) -> Option<StoredFeedback> {
        self.feedback
            .read()
            .iter()
            .find(|r| r.ref_id == ref_id)
            .cloned()
    }

    fn feedback_since(&self, cutoff: i64) -> Vec<StoredFeedback> {
        self.feedback
            .read()
            .iter()
            .filter(|r| r.recorded_at >= cutoff)
            .cloned()
            .collect()
    }

    fn upsert_pattern_weight(&self, weight: PatternWeight) {
        self.weights.write().insert(weight.name.clone(), weight);
    }

    fn pattern_weight(&self, name: &str) -> Option<PatternWeight> {
        self.weights.read().get(name).cloned()
    }

    fn all_pattern_weights(&self) -> Vec<PatternWeight> {
        let mut all: Vec<PatternWeight> = self.weights.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn upsert_signal_quality(&self, quality: SignalQuality) {
        self.signals
            .write()
            .insert(quality.signal_id.clone(), quality);
    }

    fn apply_signal_rating(&self, signal_id: &str, rating: i8, at: i64) -> bool {
        let mut signals = self.signals.write();
        match signals.get_mut(signal_id) {
            Some(q) => {
                q.final_rating = Some(rating);
                q.rated_at = Some(at);
                true
            }
            None => false,
        }
    }

    fn signal_quality(&self, signal_id: &str) -> Option<SignalQuality> {
        self.signals.read().get(signal_id).cloned()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("logs", &self.logs.read().len())
            .field("feedback", &self.feedback.read().len())
            .field("signals", &self.signals.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_are_bounded() {
        let store = MemoryStorage::new();
        for i in 0..1100 {
            store.append_log("info", "tick", None, i);
        }
        assert_eq!(store.log_count(), 1000);
    }

    #[test]
    fn metric_accumulates_response_times() {
        let store = MemoryStorage::new();
        store.record_metric("analyze", 100);
        store.record_metric("analyze", 300);
        let m = store.metric("analyze");
        assert_eq!(m.count, 2);
        assert_eq!(m.total_response_time_ms, 400);
        assert!((m.average_response_time_ms() - 200.0).abs() < 1e-12);
    }

    #[test]
    fn feedback_journal_queries() {
        let store = MemoryStorage::new();
        store.append_feedback(StoredFeedback {
            ref_id: "a".into(),
            rating: 1,
            pattern_names: vec!["cvd".into()],
            recorded_at: 100,
        });
        store.append_feedback(StoredFeedback {
            ref_id: "b".into(),
            rating: -1,
            pattern_names: vec![],
            recorded_at: 200,
        });

        assert_eq!(store.feedback_by_ref("a").unwrap().rating, 1);
        assert!(store.feedback_by_ref("zzz").is_none());
        assert_eq!(store.feedback_since(150).len(), 1);
    }

    #[test]
    fn signal_quality_rating_flow() {
        let store = MemoryStorage::new();
        store.upsert_signal_quality(SignalQuality {
            signal_id: "sig-1".into(),
            pair: "BTC".into(),
            timeframe: "1h".into(),
            confidence: 80.0,
            emitted_at: 10,
            final_rating: None,
            rated_at: None,
        });

        assert!(store.apply_signal_rating("sig-1", 1, 20));
        assert!(!store.apply_signal_rating("nope", 1, 20));

        let q = store.signal_quality("sig-1").unwrap();
        assert_eq!(q.final_rating, Some(1));
        assert_eq!(q.rated_at, Some(20));
    }
}
