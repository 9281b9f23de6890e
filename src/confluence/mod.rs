// =============================================================================
// Confluence Module
// =============================================================================
//
// Weighted aggregation of the eight engine reports into a single score and
// classification, plus the learned per-pattern weight book the feedback
// loop mutates.

pub mod scorer;
pub mod weights;

pub use scorer::{ConfluenceResult, ConfluenceScorer, LayerScore, RiskLevel, SignalClass};
pub use weights::{PatternWeight, PatternWeightBook, WeightAdjustment};
