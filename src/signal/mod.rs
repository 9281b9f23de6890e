// =============================================================================
// Signal Module
// =============================================================================
//
// Turns a scored confluence result into an executable signal (entry, stop,
// take-profit ladder, sizing, invalidation rules) and feeds user ratings
// back into the pattern weight book.

pub mod enricher;
pub mod feedback;

pub use enricher::{Bias, Signal, SignalEnricher, SignalReasoning, SignalStrength};
pub use feedback::{FeedbackAck, FeedbackLearner, FeedbackRecord, FeedbackStatsReport, WeeklyReport};
