//! Social handle validator

use super::{FieldValidator, ValidationDetails, ValidationResult};
use crate::types::FieldName;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const BASE_SCORE: f64 = 0.3;

static HANDLE_CHARSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("valid handle regex"));

/// Auto-generated or throwaway handle shapes
static SPAM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^\d+$", r"^admin", r"^test", r"^user\d+$", r"^guest\d*$", r"^bot\d*$"]
        .iter()
        .map(|p| Regex::new(p).expect("valid spam pattern"))
        .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsernameDetails {
    /// Handle with the leading `@` removed
    pub normalized: String,
    pub length: usize,
    pub allowed_charset: bool,
    pub has_whitespace: bool,
    pub digit_ratio: f64,
    pub spam_pattern: bool,
}

/// Trim and drop a leading `@`
pub fn normalize_username(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_string()
}

pub fn matches_spam_pattern(handle: &str) -> bool {
    let lowered = handle.to_lowercase();
    SPAM_PATTERNS.iter().any(|re| re.is_match(&lowered))
}

#[derive(Debug, Default)]
pub struct UsernameValidator;

impl UsernameValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, raw: &str) -> ValidationResult {
        let handle = normalize_username(raw);
        let length = handle.chars().count();
        if length < 2 {
            return ValidationResult::rejected(None);
        }

        let mut score = BASE_SCORE;

        if length >= 3 {
            score += 0.1;
        }
        if length <= 20 {
            score += 0.05;
        }

        let allowed_charset = HANDLE_CHARSET_RE.is_match(&handle);
        if allowed_charset {
            score += 0.15;
        }

        let has_whitespace = handle.chars().any(char::is_whitespace);
        if has_whitespace {
            score -= 0.2;
        } else {
            score += 0.1;
        }

        if handle.chars().all(|c| c.is_ascii_alphanumeric()) {
            score += 0.05;
        }

        if handle.chars().next().is_some_and(|c| c.is_alphabetic()) {
            score += 0.05;
        }

        let digits = handle.chars().filter(|c| c.is_ascii_digit()).count();
        let digit_ratio = digits as f64 / length as f64;
        if digit_ratio > 0.5 {
            score -= 0.1;
        }

        let spam_pattern = matches_spam_pattern(&handle);
        if spam_pattern {
            score -= 0.2;
        }

        ValidationResult::scored(
            score,
            Some(ValidationDetails::Username(UsernameDetails {
                normalized: handle,
                length,
                allowed_charset,
                has_whitespace,
                digit_ratio,
                spam_pattern,
            })),
        )
    }
}

#[async_trait]
impl FieldValidator for UsernameValidator {
    fn field(&self) -> FieldName {
        FieldName::Username
    }

    fn method(&self) -> &'static str {
        "username_validation"
    }

    async fn validate(&self, raw: &str) -> ValidationResult {
        self.evaluate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_handle_scores_high() {
        let result = UsernameValidator::new().evaluate("@janesmith");
        // every bonus fires: 0.3 + 0.1 + 0.05 + 0.15 + 0.1 + 0.05 + 0.05
        assert!((result.score - 0.8).abs() < 1e-9);
        match result.details {
            Some(ValidationDetails::Username(d)) => assert_eq!(d.normalized, "janesmith"),
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_at_sign_alone_is_rejected() {
        assert_eq!(UsernameValidator::new().evaluate("@").score, 0.0);
        assert_eq!(UsernameValidator::new().evaluate("@a").score, 0.0);
    }

    #[test]
    fn test_spam_patterns() {
        for handle in ["123456", "admin_jane", "TestAccount", "user42", "guest", "bot7"] {
            assert!(matches_spam_pattern(handle), "{}", handle);
        }
        assert!(!matches_spam_pattern("user_jane"));
        assert!(!matches_spam_pattern("robotics"));
    }

    #[test]
    fn test_whitespace_and_digits_penalized() {
        let v = UsernameValidator::new();
        let clean = v.evaluate("jane_doe").score;
        assert!(v.evaluate("jane doe").score < clean);
        assert!(v.evaluate("j1234567").score < v.evaluate("jdoe1234").score);
    }
}
