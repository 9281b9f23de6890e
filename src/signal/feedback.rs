// =============================================================================
// Feedback Learner — user ratings drive pattern weight adjustment
// =============================================================================
//
// Every emitted signal can receive a +1/-1 rating keyed by its signal id.
// Ratings are journaled (bounded, drop-oldest) and deduplicated by ref_id:
// a second rating for the same signal is acknowledged but changes nothing.
//
// Learning runs as a discrete pass over the trailing 7-day window, per
// pattern, and only when new feedback arrived since the last pass:
//
//   total < 3                     no adjustment
//   net < -0.25                   weight -= min(0.2, |net| * velocity),
//                                 min_confidence += 0.05 (cap 0.95)
//   net > +0.40                   weight += min(0.2, net * velocity),
//                                 min_confidence -= 0.02 (floor 0.60)
//
// Ratings for unknown signal ids are journaled for audit but never feed
// the learning window.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::confluence::weights::{FeedbackStats, PatternWeightBook};
use crate::runtime_config::EngineConfig;
use crate::signal::enricher::Signal;

/// Journal bound (drop-oldest beyond this).
const MAX_JOURNAL: usize = 1000;

/// Signal mirror bound.
const MAX_SIGNALS: usize = 50;

/// Learning window in milliseconds (7 days).
const WINDOW_MS: i64 = 7 * 24 * 3_600_000;

/// Floor applied when positive feedback lowers the confidence gate.
const CONFIDENCE_RELAX_FLOOR: f64 = 0.60;

/// One journaled rating.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub ref_id: String,
    /// +1 or -1.
    pub rating: i8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_latency_ms: Option<u64>,
    pub pattern_names: Vec<String>,
    pub recorded_at: i64,
    /// True when the ref_id matched a known signal.
    pub linked: bool,
}

/// Lightweight mirror entry for an emitted signal.
#[derive(Debug, Clone, Serialize)]
struct SignalRecord {
    signal_id: String,
    patterns: Vec<String>,
    created_at: i64,
}

/// Acknowledgement returned to the request surface.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackAck {
    pub accepted: bool,
    pub duplicate: bool,
    pub known_signal: bool,
    pub pattern_names: Vec<String>,
}

/// Aggregated stats for one pattern over a query window.
#[derive(Debug, Clone, Serialize)]
pub struct PatternFeedbackSummary {
    pub pattern: String,
    pub total: u32,
    pub positive: u32,
    pub negative: u32,
    pub net_sentiment: f64,
    pub current_weight: f64,
    pub min_confidence: f64,
}

/// Response payload for the feedback-stats query.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackStatsReport {
    pub window_days: u32,
    pub total_ratings: u32,
    pub positive: u32,
    pub negative: u32,
    pub patterns: Vec<PatternFeedbackSummary>,
}

/// Response payload for the weekly report query.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyReport {
    pub stats: FeedbackStatsReport,
    /// Patterns adjusted during the window with their applied deltas.
    pub adjustments: Vec<AppliedAdjustment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedAdjustment {
    pub pattern: String,
    pub at: i64,
    pub delta: f64,
    pub new_weight: f64,
    pub reason: String,
}

// =============================================================================
// Learner
// =============================================================================

pub struct FeedbackLearner {
    weights: Arc<PatternWeightBook>,

    journal: RwLock<VecDeque<FeedbackRecord>>,
    seen_refs: RwLock<HashSet<String>>,
    signals: RwLock<VecDeque<SignalRecord>>,

    /// Per-pattern count of linked ratings ever journaled, and the count
    /// already consumed by a learning pass. A pass only evaluates patterns
    /// whose counter moved, which makes passes idempotent on a quiet
    /// journal.
    pattern_seq: RwLock<HashMap<String, u64>>,
    processed_seq: RwLock<HashMap<String, u64>>,

    learning_velocity: f64,
    min_feedback: u32,
    negative_threshold: f64,
    positive_threshold: f64,
}

impl FeedbackLearner {
    pub fn new(weights: Arc<PatternWeightBook>, config: &EngineConfig) -> Self {
        Self {
            weights,
            journal: RwLock::new(VecDeque::new()),
            seen_refs: RwLock::new(HashSet::new()),
            signals: RwLock::new(VecDeque::new()),
            pattern_seq: RwLock::new(HashMap::new()),
            processed_seq: RwLock::new(HashMap::new()),
            learning_velocity: config.pattern_learning_velocity,
            min_feedback: config.min_feedback_threshold,
            negative_threshold: config.sentiment_negative_threshold,
            positive_threshold: config.sentiment_positive_threshold,
        }
    }

    pub fn weight_book(&self) -> &Arc<PatternWeightBook> {
        &self.weights
    }

    /// Mirror an emitted signal so later feedback can resolve its patterns.
    pub fn register_signal(&self, signal: &Signal) {
        let mut signals = self.signals.write();
        signals.push_back(SignalRecord {
            signal_id: signal.signal_id.to_string(),
            patterns: signal.reasoning.primary_factors.clone(),
            created_at: signal.created_at,
        });
        while signals.len() > MAX_SIGNALS {
            signals.pop_front();
        }
    }

    /// Journal one rating. Duplicate ref_ids are acknowledged but ignored.
    pub fn record_feedback(
        &self,
        ref_id: &str,
        rating: i8,
        pattern_names: Option<Vec<String>>,
        response_latency_ms: Option<u64>,
        now: i64,
    ) -> FeedbackAck {
        if self.seen_refs.read().contains(ref_id) {
            debug!(ref_id, "duplicate feedback ignored");
            return FeedbackAck {
                accepted: false,
                duplicate: true,
                known_signal: false,
                pattern_names: Vec::new(),
            };
        }

        let known = self
            .signals
            .read()
            .iter()
            .find(|s| s.signal_id == ref_id)
            .map(|s| s.patterns.clone());
        let linked = known.is_some();

        let patterns = known
            .or(pattern_names)
            .unwrap_or_default();

        let record = FeedbackRecord {
            ref_id: ref_id.to_string(),
            rating: if rating >= 0 { 1 } else { -1 },
            response_latency_ms,
            pattern_names: patterns.clone(),
            recorded_at: now,
            linked,
        };

        {
            let mut journal = self.journal.write();
            let mut seen = self.seen_refs.write();
            seen.insert(ref_id.to_string());
            journal.push_back(record);
            while journal.len() > MAX_JOURNAL {
                if let Some(evicted) = journal.pop_front() {
                    seen.remove(&evicted.ref_id);
                }
            }
        }

        if linked {
            let mut seq = self.pattern_seq.write();
            for p in &patterns {
                *seq.entry(p.clone()).or_insert(0) += 1;
            }
        }

        debug!(ref_id, rating, linked, "feedback recorded");

        FeedbackAck {
            accepted: true,
            duplicate: false,
            known_signal: linked,
            pattern_names: patterns,
        }
    }

    /// Evaluate the trailing window and adjust weights for every pattern
    /// that received new linked feedback since the last pass.
    pub fn run_learning_pass(&self, now: i64) {
        let pending: Vec<String> = {
            let seq = self.pattern_seq.read();
            let processed = self.processed_seq.read();
            seq.iter()
                .filter(|(name, &count)| processed.get(*name).copied().unwrap_or(0) < count)
                .map(|(name, _)| name.clone())
                .collect()
        };

        for pattern in pending {
            let (total, positive, negative) = self.window_tallies(&pattern, now);

            let net = if total > 0 {
                (positive as f64 - negative as f64) / total as f64
            } else {
                0.0
            };

            self.weights.set_feedback_stats(
                &pattern,
                FeedbackStats {
                    total,
                    positive,
                    negative,
                    net_sentiment: net,
                },
            );

            if total >= self.min_feedback {
                if net < self.negative_threshold {
                    let delta = -(net.abs() * self.learning_velocity).min(0.2);
                    self.weights.apply_adjustment(
                        &pattern,
                        delta,
                        0.05,
                        &format!("net sentiment {net:.2} over {total} ratings"),
                        now,
                    );
                    info!(pattern = %pattern, net, delta, "pattern demoted by feedback");
                } else if net > self.positive_threshold {
                    let delta = (net * self.learning_velocity).min(0.2);
                    // Relaxing the gate has its own floor above the book's.
                    let current_gate = self.weights.min_confidence(&pattern);
                    let gate_delta = (CONFIDENCE_RELAX_FLOOR - current_gate).max(-0.02).min(0.0);
                    self.weights.apply_adjustment(
                        &pattern,
                        delta,
                        gate_delta,
                        &format!("net sentiment {net:.2} over {total} ratings"),
                        now,
                    );
                    info!(pattern = %pattern, net, delta, "pattern promoted by feedback");
                }
            }

            // Mark consumed regardless of whether a threshold fired so a
            // quiet journal never re-triggers.
            let consumed = self.pattern_seq.read().get(&pattern).copied().unwrap_or(0);
            self.processed_seq.write().insert(pattern, consumed);
        }
    }

    fn window_tallies(&self, pattern: &str, now: i64) -> (u32, u32, u32) {
        let journal = self.journal.read();
        let cutoff = now - WINDOW_MS;

        let mut total = 0;
        let mut positive = 0;
        let mut negative = 0;
        for r in journal.iter() {
            if !r.linked || r.recorded_at < cutoff {
                continue;
            }
            if r.pattern_names.iter().any(|p| p == pattern) {
                total += 1;
                if r.rating > 0 {
                    positive += 1;
                } else {
                    negative += 1;
                }
            }
        }
        (total, positive, negative)
    }

    // -------------------------------------------------------------------------
    // Reporting
    // -------------------------------------------------------------------------

    /// Aggregate feedback over the trailing `days`.
    pub fn stats(&self, days: u32, now: i64) -> FeedbackStatsReport {
        let cutoff = now - days as i64 * 24 * 3_600_000;
        let journal = self.journal.read();

        let mut total = 0;
        let mut positive = 0;
        let mut negative = 0;
        let mut per_pattern: HashMap<String, (u32, u32, u32)> = HashMap::new();

        for r in journal.iter().filter(|r| r.recorded_at >= cutoff) {
            total += 1;
            if r.rating > 0 {
                positive += 1;
            } else {
                negative += 1;
            }
            for p in &r.pattern_names {
                let entry = per_pattern.entry(p.clone()).or_default();
                entry.0 += 1;
                if r.rating > 0 {
                    entry.1 += 1;
                } else {
                    entry.2 += 1;
                }
            }
        }

        let mut patterns: Vec<PatternFeedbackSummary> = per_pattern
            .into_iter()
            .map(|(pattern, (t, p, n))| {
                let net = if t > 0 {
                    (p as f64 - n as f64) / t as f64
                } else {
                    0.0
                };
                let book_entry = self.weights.get(&pattern);
                PatternFeedbackSummary {
                    current_weight: book_entry.as_ref().map(|b| b.current_weight).unwrap_or(1.0),
                    min_confidence: book_entry.as_ref().map(|b| b.min_confidence).unwrap_or(0.6),
                    pattern,
                    total: t,
                    positive: p,
                    negative: n,
                    net_sentiment: net,
                }
            })
            .collect();
        patterns.sort_by(|a, b| a.pattern.cmp(&b.pattern));

        FeedbackStatsReport {
            window_days: days,
            total_ratings: total,
            positive,
            negative,
            patterns,
        }
    }

    /// The weekly report: stats plus adjustments applied in the window.
    pub fn weekly_report(&self, now: i64) -> WeeklyReport {
        let stats = self.stats(7, now);
        let cutoff = now - WINDOW_MS;

        let mut adjustments = Vec::new();
        for p in self.weights.snapshot() {
            for adj in p
                .adjustment_history
                .iter()
                .filter(|a| a.at >= cutoff)
            {
                adjustments.push(AppliedAdjustment {
                    pattern: p.name.clone(),
                    at: adj.at,
                    delta: adj.delta,
                    new_weight: adj.new_weight,
                    reason: adj.reason.clone(),
                });
            }
        }
        adjustments.sort_by_key(|a| a.at);

        WeeklyReport { stats, adjustments }
    }

    /// Number of journaled ratings (test/diagnostic hook).
    pub fn journal_len(&self) -> usize {
        self.journal.read().len()
    }
}

impl std::fmt::Debug for FeedbackLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackLearner")
            .field("journal", &self.journal.read().len())
            .field("signals", &self.signals.read().len())
            .finish()
    }
}
