//! Confidence scoring and merging

pub mod aggregator;
pub mod merge;

pub use aggregator::{
    fields_below_threshold, overall_confidence, reenrichment_priority, ConfidenceAggregator,
    ConfidenceReport,
};
pub use merge::{choose_value, merge_confidence, merge_strategy_for_field, ChooseOutcome, MergeStrategy};
