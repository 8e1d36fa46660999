//! Field validators
//!
//! One scorer per contact field. Every validator follows the same shape:
//! start from a base score for non-empty input, add or subtract bounded deltas
//! for individual signals, clamp to [0, 1], and report `is_valid = score >= 0.5`.
//! Malformed input never errors; it scores 0 (or the field's base score where
//! the field's policy says so). External lookups that fail or time out are
//! treated as a missing signal and recorded in the details.

pub mod bio;
pub mod email;
pub mod location;
pub mod name;
pub mod phone;
pub mod username;

pub use bio::{BioDetails, BioValidator};
pub use email::{EmailDetails, EmailValidator, MxStatus};
pub use location::{LocationDetails, LocationValidator};
pub use name::{NameDetails, NameValidator};
pub use phone::{PhoneDetails, PhoneValidator};
pub use username::{UsernameDetails, UsernameValidator};

use crate::lookup::{DisposableDomains, GeocodingService, MxLookup, StaticDisposableDomains};
use crate::types::{clamp_unit, FieldName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Scores at or above this are considered valid
pub const VALID_THRESHOLD: f64 = 0.5;

/// Outcome of validating one raw field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Score (0.0-1.0)
    pub score: f64,
    /// Provenance for debugging and audit; not authoritative data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ValidationDetails>,
}

impl ValidationResult {
    /// Clamp `score` and derive `is_valid`
    pub fn scored(score: f64, details: Option<ValidationDetails>) -> Self {
        let score = clamp_unit(score);
        Self {
            is_valid: score >= VALID_THRESHOLD,
            score,
            details,
        }
    }

    /// Zero score, invalid
    pub fn rejected(details: Option<ValidationDetails>) -> Self {
        Self {
            is_valid: false,
            score: 0.0,
            details,
        }
    }
}

/// Per-field evidence attached to a [`ValidationResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationDetails {
    Email(EmailDetails),
    Name(NameDetails),
    Bio(BioDetails),
    Phone(PhoneDetails),
    Username(UsernameDetails),
    Location(LocationDetails),
    Generic(serde_json::Map<String, serde_json::Value>),
}

/// Common capability of every field scorer
#[async_trait]
pub trait FieldValidator: Send + Sync {
    /// Field this validator scores
    fn field(&self) -> FieldName;

    /// Method label recorded with every score
    fn method(&self) -> &'static str;

    async fn validate(&self, raw: &str) -> ValidationResult;

    /// Score only; 0 for missing or blank input
    async fn score(&self, raw: Option<&str>) -> f64 {
        match raw {
            Some(value) if !value.trim().is_empty() => self.validate(value).await.score,
            _ => 0.0,
        }
    }
}

/// Capability ports and tuning shared by the standard validators
#[derive(Clone)]
pub struct ValidatorPorts {
    pub mx: Option<Arc<dyn MxLookup>>,
    pub disposable: Arc<dyn DisposableDomains>,
    pub geocoding: Option<Arc<GeocodingService>>,
    pub lookup_timeout: Duration,
    pub phone_region: phonenumber::country::Id,
}

impl Default for ValidatorPorts {
    fn default() -> Self {
        Self {
            mx: None,
            disposable: Arc::new(StaticDisposableDomains::builtin()),
            geocoding: None,
            lookup_timeout: Duration::from_millis(3000),
            phone_region: phonenumber::country::Id::US,
        }
    }
}

/// Field → validator table
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: BTreeMap<FieldName, Arc<dyn FieldValidator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all six standard validators wired to `ports`
    pub fn standard(ports: &ValidatorPorts) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmailValidator::new(
            ports.disposable.clone(),
            ports.mx.clone(),
            ports.lookup_timeout,
        )));
        registry.register(Arc::new(NameValidator::new()));
        registry.register(Arc::new(BioValidator::new()));
        registry.register(Arc::new(PhoneValidator::new(ports.phone_region)));
        registry.register(Arc::new(UsernameValidator::new()));
        registry.register(Arc::new(LocationValidator::new(ports.geocoding.clone())));
        registry
    }

    /// Add or replace the validator for its field
    pub fn register(&mut self, validator: Arc<dyn FieldValidator>) {
        self.validators.insert(validator.field(), validator);
    }

    pub fn get(&self, field: FieldName) -> Option<&Arc<dyn FieldValidator>> {
        self.validators.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldName> + '_ {
        self.validators.keys().copied()
    }
}

/// Words made only of `[A-Za-z]` starting with an uppercase letter
pub(crate) fn is_title_case_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => chars.all(|c| c.is_ascii_alphabetic()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_validator_scores_blank_as_zero() {
        let registry = ValidatorRegistry::standard(&ValidatorPorts::default());
        assert_eq!(registry.fields().count(), 6);

        for field in FieldName::SCORED {
            let validator = registry.get(field).unwrap();
            assert_eq!(validator.score(None).await, 0.0, "{} None", field);
            assert_eq!(validator.score(Some("   ")).await, 0.0, "{} blank", field);

            let result = validator.validate("").await;
            assert_eq!(result.score, 0.0, "{} empty", field);
            assert!(!result.is_valid, "{} empty is_valid", field);
        }
    }

    #[tokio::test]
    async fn test_scores_always_within_unit_interval() {
        let registry = ValidatorRegistry::standard(&ValidatorPorts::default());
        let samples = [
            "a",
            "Dr. Jane Marie Smith-Jones",
            "12345678901234567890",
            "@@@@",
            "I am a founder, engineer, developer and author. My work: https://a.io https://b.io https://c.io https://d.io 🚀🚀🚀🚀🚀🚀🚀🚀",
            "click here buy now free money giveaway crypto onlyfans",
            "+1 650-253-0000",
            "San Francisco, CA",
            "admin",
            "first.last+promo@example.com",
        ];

        for field in FieldName::SCORED {
            let validator = registry.get(field).unwrap();
            for sample in samples {
                let result = validator.validate(sample).await;
                assert!(
                    (0.0..=1.0).contains(&result.score),
                    "{} scored {} for {:?}",
                    field,
                    result.score,
                    sample
                );
                assert_eq!(result.is_valid, result.score >= VALID_THRESHOLD);
            }
        }
    }

    #[test]
    fn test_scored_clamps_and_derives_validity() {
        assert_eq!(ValidationResult::scored(1.4, None).score, 1.0);
        assert_eq!(ValidationResult::scored(-0.2, None).score, 0.0);
        assert!(ValidationResult::scored(0.5, None).is_valid);
        assert!(!ValidationResult::scored(0.49, None).is_valid);
    }

    #[test]
    fn test_title_case_word() {
        assert!(is_title_case_word("Smith"));
        assert!(!is_title_case_word("smith"));
        assert!(!is_title_case_word("Sm1th"));
        assert!(!is_title_case_word(""));
    }
}
