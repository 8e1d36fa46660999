//! Merge strategy resolver
//!
//! Two entry points: [`merge_confidence`] collapses a list of candidate
//! observations of one field into a single value, [`choose_value`] decides
//! whether a single incoming value replaces the stored one.

use crate::types::{FieldName, FieldValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum confidence gain for a `weighted` replacement
const WEIGHTED_REPLACE_MARGIN: f64 = 0.15;
/// Confidence gap below which `average` keeps the stored value
const AVERAGE_KEEP_BAND: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Max,
    Weighted,
    Average,
    First,
    Last,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Max => "max",
            MergeStrategy::Weighted => "weighted",
            MergeStrategy::Average => "average",
            MergeStrategy::First => "first",
            MergeStrategy::Last => "last",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single-value replacement decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChooseOutcome {
    KeepExisting,
    Replace,
}

/// Fixed per-field policy
///
/// Identity fields take the most confident source, bios take the newest,
/// names and usernames blend.
pub fn merge_strategy_for_field(field: FieldName) -> MergeStrategy {
    match field {
        FieldName::Email | FieldName::Phone | FieldName::Location => MergeStrategy::Max,
        FieldName::Name | FieldName::Username => MergeStrategy::Weighted,
        FieldName::Bio => MergeStrategy::Last,
        FieldName::ProfileUrl => MergeStrategy::Max,
    }
}

/// Highest confidence; ties keep the earliest candidate
fn most_confident(values: &[FieldValue]) -> &FieldValue {
    let mut best = &values[0];
    for candidate in &values[1..] {
        if candidate.confidence > best.confidence {
            best = candidate;
        }
    }
    best
}

/// Earliest (`latest = false`) or latest timestamped candidate
fn by_timestamp(values: &[FieldValue], latest: bool) -> Option<&FieldValue> {
    let mut chosen: Option<&FieldValue> = None;
    for candidate in values {
        let Some(ts) = candidate.timestamp else {
            continue;
        };
        let better = match chosen.and_then(|c| c.timestamp) {
            None => true,
            Some(current) if latest => ts > current,
            Some(current) => ts < current,
        };
        if better {
            chosen = Some(candidate);
        }
    }
    chosen
}

/// Collapse candidate observations of one field
///
/// Returns `None` for an empty slice and the lone candidate unchanged for a
/// single-element slice. `first`/`last` fall back to `max` when no candidate
/// carries a timestamp.
pub fn merge_confidence(values: &[FieldValue], strategy: MergeStrategy) -> Option<FieldValue> {
    match values {
        [] => None,
        [single] => Some(single.clone()),
        _ => {
            let merged = match strategy {
                MergeStrategy::Max => most_confident(values).clone(),
                MergeStrategy::Weighted => {
                    let sum: f64 = values.iter().map(|v| v.confidence).sum();
                    let sum_sq: f64 = values.iter().map(|v| v.confidence * v.confidence).sum();
                    let confidence = if sum > 0.0 { sum_sq / sum } else { 0.0 };
                    most_confident(values).with_confidence(confidence)
                }
                MergeStrategy::Average => {
                    let mean =
                        values.iter().map(|v| v.confidence).sum::<f64>() / values.len() as f64;
                    most_confident(values).with_confidence(mean)
                }
                MergeStrategy::First => by_timestamp(values, false)
                    .unwrap_or_else(|| most_confident(values))
                    .clone(),
                MergeStrategy::Last => by_timestamp(values, true)
                    .unwrap_or_else(|| most_confident(values))
                    .clone(),
            };

            tracing::trace!(
                strategy = %strategy,
                candidates = values.len(),
                confidence = merged.confidence,
                "Merged field candidates"
            );
            Some(merged)
        }
    }
}

/// Decide whether `new_value` replaces the stored value
///
/// A missing or blank stored value is always replaced.
pub fn choose_value(
    existing: Option<&str>,
    existing_confidence: f64,
    new_value: &str,
    new_confidence: f64,
    strategy: MergeStrategy,
) -> ChooseOutcome {
    if existing.map_or(true, |v| v.trim().is_empty()) {
        return ChooseOutcome::Replace;
    }
    tracing::trace!(
        strategy = %strategy,
        existing_confidence,
        new_confidence,
        new_value_len = new_value.len(),
        "Choosing field value"
    );

    let replace = match strategy {
        MergeStrategy::Max => new_confidence > existing_confidence,
        MergeStrategy::Weighted => new_confidence - existing_confidence > WEIGHTED_REPLACE_MARGIN,
        MergeStrategy::Last => true,
        MergeStrategy::First => false,
        MergeStrategy::Average => {
            (new_confidence - existing_confidence).abs() >= AVERAGE_KEEP_BAND
                && new_confidence > existing_confidence
        }
    };

    if replace {
        ChooseOutcome::Replace
    } else {
        ChooseOutcome::KeepExisting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn fv(value: &str, confidence: f64) -> FieldValue {
        FieldValue::new(value, confidence)
    }

    #[test]
    fn test_empty_and_single() {
        assert!(merge_confidence(&[], MergeStrategy::Max).is_none());

        let only = fv("a", 0.9).with_source("import");
        for strategy in [
            MergeStrategy::Max,
            MergeStrategy::Weighted,
            MergeStrategy::Average,
            MergeStrategy::First,
            MergeStrategy::Last,
        ] {
            assert_eq!(merge_confidence(&[only.clone()], strategy), Some(only.clone()));
        }
    }

    #[test]
    fn test_max_prefers_highest_and_keeps_earliest_on_tie() {
        let values = [fv("a", 0.6), fv("b", 0.8), fv("c", 0.8)];
        let merged = merge_confidence(&values, MergeStrategy::Max).unwrap();
        assert_eq!(merged.value, "b");
        assert_eq!(merged.confidence, 0.8);
    }

    #[test]
    fn test_weighted_formula() {
        let symmetric = merge_confidence(&[fv("a", 0.9), fv("b", 0.9)], MergeStrategy::Weighted)
            .unwrap();
        assert!((symmetric.confidence - 0.9).abs() < 1e-12);

        // (0.81 + 0.09) / 1.2
        let mixed = merge_confidence(&[fv("a", 0.9), fv("b", 0.3)], MergeStrategy::Weighted)
            .unwrap();
        assert_eq!(mixed.value, "a");
        assert!((mixed.confidence - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_all_zero_confidence() {
        let merged =
            merge_confidence(&[fv("a", 0.0), fv("b", 0.0)], MergeStrategy::Weighted).unwrap();
        assert_eq!(merged.confidence, 0.0);
    }

    #[test]
    fn test_average() {
        let merged = merge_confidence(&[fv("a", 0.2), fv("b", 0.8)], MergeStrategy::Average)
            .unwrap();
        assert_eq!(merged.value, "b");
        assert!((merged.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_first_and_last_use_timestamps() {
        let now = Utc::now();
        let values = [
            fv("undated", 0.99),
            fv("old", 0.1).observed_at(now - Duration::days(2)),
            fv("new", 0.2).observed_at(now),
        ];
        assert_eq!(merge_confidence(&values, MergeStrategy::First).unwrap().value, "old");
        assert_eq!(merge_confidence(&values, MergeStrategy::Last).unwrap().value, "new");
    }

    #[test]
    fn test_first_and_last_fall_back_to_max() {
        let values = [fv("a", 0.4), fv("b", 0.7)];
        assert_eq!(merge_confidence(&values, MergeStrategy::First).unwrap().value, "b");
        assert_eq!(merge_confidence(&values, MergeStrategy::Last).unwrap().value, "b");
    }

    #[test]
    fn test_field_policy() {
        assert_eq!(merge_strategy_for_field(FieldName::Email), MergeStrategy::Max);
        assert_eq!(merge_strategy_for_field(FieldName::Name), MergeStrategy::Weighted);
        assert_eq!(merge_strategy_for_field(FieldName::Bio), MergeStrategy::Last);
        assert_eq!(merge_strategy_for_field(FieldName::Location), MergeStrategy::Max);
        assert_eq!(merge_strategy_for_field(FieldName::Phone), MergeStrategy::Max);
        assert_eq!(merge_strategy_for_field(FieldName::Username), MergeStrategy::Weighted);
        assert_eq!(merge_strategy_for_field(FieldName::ProfileUrl), MergeStrategy::Max);
    }

    #[test]
    fn test_choose_value_rules() {
        use ChooseOutcome::*;
        let existing = Some("old");

        assert_eq!(choose_value(existing, 0.5, "new", 0.6, MergeStrategy::Max), Replace);
        assert_eq!(choose_value(existing, 0.5, "new", 0.5, MergeStrategy::Max), KeepExisting);

        assert_eq!(choose_value(existing, 0.5, "new", 0.6, MergeStrategy::Weighted), KeepExisting);
        assert_eq!(choose_value(existing, 0.5, "new", 0.7, MergeStrategy::Weighted), Replace);

        assert_eq!(choose_value(existing, 0.9, "new", 0.1, MergeStrategy::Last), Replace);
        assert_eq!(choose_value(existing, 0.1, "new", 0.9, MergeStrategy::First), KeepExisting);

        assert_eq!(choose_value(existing, 0.5, "new", 0.55, MergeStrategy::Average), KeepExisting);
        assert_eq!(choose_value(existing, 0.5, "new", 0.7, MergeStrategy::Average), Replace);
        assert_eq!(choose_value(existing, 0.7, "new", 0.5, MergeStrategy::Average), KeepExisting);
    }

    #[test]
    fn test_missing_existing_always_replaced() {
        for strategy in [MergeStrategy::Weighted, MergeStrategy::First, MergeStrategy::Max] {
            assert_eq!(choose_value(None, 0.0, "v", 0.1, strategy), ChooseOutcome::Replace);
            assert_eq!(choose_value(Some("  "), 0.9, "v", 0.1, strategy), ChooseOutcome::Replace);
        }
    }
}
