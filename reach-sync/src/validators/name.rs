//! Person-name validator

use super::{is_title_case_word, FieldValidator, ValidationDetails, ValidationResult};
use crate::types::FieldName;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const BASE_SCORE: f64 = 0.3;
const MAX_PLACEHOLDER_DISTANCE: usize = 2;

/// Placeholder names seen in scraped and imported data
pub const PLACEHOLDER_NAMES: &[&str] = &[
    "john doe",
    "jane doe",
    "test user",
    "test test",
    "admin",
    "administrator",
    "user",
    "unknown",
    "anonymous",
    "no name",
    "first last",
    "firstname lastname",
    "asdf",
    "foo bar",
    "sample user",
    "fake name",
];

static ALLOWED_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z\s\-'.]+$").expect("valid name charset regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameDetails {
    pub length: usize,
    pub parts: usize,
    pub title_case: bool,
    pub has_digits: bool,
    pub allowed_charset: bool,
    /// Closest placeholder within the edit-distance limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder_match: Option<String>,
}

/// Closest placeholder name within `MAX_PLACEHOLDER_DISTANCE` edits
pub fn placeholder_match(name: &str) -> Option<&'static str> {
    let lowered = name.trim().to_lowercase();
    PLACEHOLDER_NAMES
        .iter()
        .map(|candidate| (*candidate, strsim::levenshtein(&lowered, candidate)))
        .filter(|(_, distance)| *distance <= MAX_PLACEHOLDER_DISTANCE)
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

#[derive(Debug, Default)]
pub struct NameValidator;

impl NameValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, raw: &str) -> ValidationResult {
        let name = raw.trim();
        let length = name.chars().count();
        if length < 2 {
            return ValidationResult::rejected(None);
        }

        let mut score = BASE_SCORE;

        if name.contains(' ') {
            score += 0.2;
        }

        let parts = name.split_whitespace().count();
        score += match parts {
            2 => 0.05,
            3 => 0.1,
            n if n > 3 => 0.05,
            _ => 0.0,
        };

        let title_case = name.split_whitespace().all(is_title_case_word);
        if title_case {
            score += 0.1;
        }

        if (4..=40).contains(&length) {
            score += 0.1;
        }

        let has_digits = name.chars().any(|c| c.is_ascii_digit());
        if has_digits {
            score -= 0.2;
        }

        let allowed_charset = ALLOWED_CHARS_RE.is_match(name);
        if allowed_charset {
            score += 0.1;
        } else {
            score -= 0.1;
        }

        let placeholder = placeholder_match(name);
        if placeholder.is_some() {
            score -= 0.3;
        }

        ValidationResult::scored(
            score,
            Some(ValidationDetails::Name(NameDetails {
                length,
                parts,
                title_case,
                has_digits,
                allowed_charset,
                placeholder_match: placeholder.map(str::to_string),
            })),
        )
    }
}

#[async_trait]
impl FieldValidator for NameValidator {
    fn field(&self) -> FieldName {
        FieldName::Name
    }

    fn method(&self) -> &'static str {
        "name_validation"
    }

    async fn validate(&self, raw: &str) -> ValidationResult {
        self.evaluate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_name_scores_high() {
        let result = NameValidator::new().evaluate("Jane Smith");
        assert!(result.score >= 0.7, "scored {}", result.score);
        assert!(result.is_valid);
    }

    #[test]
    fn test_too_short_is_rejected() {
        assert_eq!(NameValidator::new().evaluate("J").score, 0.0);
        assert_eq!(NameValidator::new().evaluate(" J ").score, 0.0);
    }

    #[test]
    fn test_placeholder_within_two_edits_is_penalized() {
        assert_eq!(placeholder_match("jon doe"), Some("john doe"));
        assert_eq!(placeholder_match("Test User"), Some("test user"));
        assert_eq!(placeholder_match("Jane Smith"), None);

        let real = NameValidator::new().evaluate("Jon Dover").score;
        let fake = NameValidator::new().evaluate("Jon Doe").score;
        assert!(fake < real);
    }

    #[test]
    fn test_placeholder_drops_below_threshold() {
        let result = NameValidator::new().evaluate("Test User");
        assert!(result.score < 0.6, "scored {}", result.score);
    }

    #[test]
    fn test_digits_and_symbols_penalized() {
        let v = NameValidator::new();
        let clean = v.evaluate("Mark Twain").score;
        assert!(v.evaluate("Mark Twain2").score < clean);
        assert!(v.evaluate("Mark_Twain!").score < clean);
    }

    #[test]
    fn test_three_part_name_bonus() {
        let v = NameValidator::new();
        let two = v.evaluate("Anna Maria").score;
        let three = v.evaluate("Anna Maria Lopez").score;
        assert!(three > two);
    }
}
