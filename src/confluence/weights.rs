// =============================================================================
// Pattern Weight Book — learned per-pattern multipliers
// =============================================================================
//
// Each analysis layer has a learned weight multiplier in [0.1, 2.0] and a
// minimum-confidence gate in [0.5, 0.95], both adjusted by the feedback
// loop. Every mutation appends to a bounded adjustment history (last 10).
//
// Thread safety: one RwLock guards the whole book. Writers (the feedback
// learner) take the write lock per adjustment, which serializes mutations;
// scorer reads race freely and see the most recent committed values.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engines::EngineKind;

/// Hard bounds on the learned multiplier.
pub const WEIGHT_FLOOR: f64 = 0.1;
pub const WEIGHT_CEIL: f64 = 2.0;

/// Bounds on the per-pattern confidence gate.
pub const MIN_CONFIDENCE_FLOOR: f64 = 0.5;
pub const MIN_CONFIDENCE_CEIL: f64 = 0.95;

/// Adjustment history ring size.
const HISTORY_LIMIT: usize = 10;

/// Rolling feedback tallies for one pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: u32,
    pub positive: u32,
    pub negative: u32,
    /// (positive - negative) / total, in [-1, 1]; 0 when empty.
    pub net_sentiment: f64,
}

/// One recorded weight adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub at: i64,
    pub delta: f64,
    pub new_weight: f64,
    pub reason: String,
}

/// Learned state for one pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternWeight {
    pub name: String,
    /// The engine's base confluence weight, kept for reference.
    pub base_weight: f64,
    /// Learned multiplier applied to the base weight, in [0.1, 2.0].
    pub current_weight: f64,
    /// Confidence gate used by the layers-passed count, in [0.5, 0.95].
    pub min_confidence: f64,
    #[serde(default)]
    pub feedback_stats: FeedbackStats,
    #[serde(default)]
    pub adjustment_history: Vec<WeightAdjustment>,
}

impl PatternWeight {
    fn new(name: &str, base_weight: f64) -> Self {
        Self {
            name: name.to_string(),
            base_weight,
            current_weight: 1.0,
            min_confidence: 0.6,
            feedback_stats: FeedbackStats::default(),
            adjustment_history: Vec::new(),
        }
    }
}

/// Thread-safe book of learned pattern weights.
pub struct PatternWeightBook {
    patterns: RwLock<HashMap<String, PatternWeight>>,
}

impl PatternWeightBook {
    /// A book seeded with the eight engine patterns at neutral multipliers.
    pub fn new() -> Self {
        let mut patterns = HashMap::new();
        for kind in EngineKind::ALL {
            let name = kind.pattern_name();
            patterns.insert(name.to_string(), PatternWeight::new(name, kind.base_weight()));
        }
        Self {
            patterns: RwLock::new(patterns),
        }
    }

    /// Learned multiplier for a pattern; unknown patterns read neutral.
    pub fn multiplier(&self, name: &str) -> f64 {
        self.patterns
            .read()
            .get(name)
            .map(|p| p.current_weight)
            .unwrap_or(1.0)
    }

    /// Confidence gate for a pattern; unknown patterns read the default.
    pub fn min_confidence(&self, name: &str) -> f64 {
        self.patterns
            .read()
            .get(name)
            .map(|p| p.min_confidence)
            .unwrap_or(0.6)
    }

    /// Apply a weight/confidence adjustment to one pattern.
    ///
    /// Both deltas are clamped into the documented bounds and the change is
    /// appended to the pattern's bounded history. Unknown patterns are
    /// created on first adjustment so feedback on custom pattern names is
    /// not lost.
    pub fn apply_adjustment(
        &self,
        name: &str,
        weight_delta: f64,
        confidence_delta: f64,
        reason: &str,
        now: i64,
    ) {
        let mut patterns = self.patterns.write();
        let entry = patterns
            .entry(name.to_string())
            .or_insert_with(|| PatternWeight::new(name, 0.0));

        let new_weight = (entry.current_weight + weight_delta).clamp(WEIGHT_FLOOR, WEIGHT_CEIL);
        let applied_delta = new_weight - entry.current_weight;
        entry.current_weight = new_weight;

        entry.min_confidence = (entry.min_confidence + confidence_delta)
            .clamp(MIN_CONFIDENCE_FLOOR, MIN_CONFIDENCE_CEIL);

        entry.adjustment_history.push(WeightAdjustment {
            at: now,
            delta: applied_delta,
            new_weight,
            reason: reason.to_string(),
        });
        while entry.adjustment_history.len() > HISTORY_LIMIT {
            entry.adjustment_history.remove(0);
        }

        debug!(
            pattern = name,
            delta = applied_delta,
            new_weight,
            min_confidence = entry.min_confidence,
            "pattern weight adjusted"
        );
    }

    /// Replace a pattern's rolling feedback tallies.
    pub fn set_feedback_stats(&self, name: &str, stats: FeedbackStats) {
        let mut patterns = self.patterns.write();
        let entry = patterns
            .entry(name.to_string())
            .or_insert_with(|| PatternWeight::new(name, 0.0));
        entry.feedback_stats = stats;
    }

    /// Clone the full book for reporting.
    pub fn snapshot(&self) -> Vec<PatternWeight> {
        let mut all: Vec<PatternWeight> = self.patterns.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn get(&self, name: &str) -> Option<PatternWeight> {
        self.patterns.read().get(name).cloned()
    }

    // -------------------------------------------------------------------------
    // Persistence (atomic tmp + rename)
    // -------------------------------------------------------------------------

    /// Persist the book to `path` as pretty JSON using an atomic write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot();

        let content = serde_json::to_string_pretty(&snapshot)
            .context("failed to serialize pattern weights")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp weights to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp weights to {}", path.display()))?;

        info!(path = %path.display(), patterns = snapshot.len(), "pattern weights saved");
        Ok(())
    }

    /// Load previously saved weights over the seeded defaults.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pattern weights from {}", path.display()))?;
        let loaded: Vec<PatternWeight> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse pattern weights from {}", path.display()))?;

        let mut patterns = self.patterns.write();
        for mut p in loaded {
            p.current_weight = p.current_weight.clamp(WEIGHT_FLOOR, WEIGHT_CEIL);
            p.min_confidence = p
                .min_confidence
                .clamp(MIN_CONFIDENCE_FLOOR, MIN_CONFIDENCE_CEIL);
            patterns.insert(p.name.clone(), p);
        }

        info!(path = %path.display(), "pattern weights loaded");
        Ok(())
    }
}

impl Default for PatternWeightBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PatternWeightBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternWeightBook")
            .field("patterns", &self.patterns.read().len())
            .finish()
    }
}
