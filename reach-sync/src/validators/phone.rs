//! Phone number validator
//!
//! Numbers are parsed with the libphonenumber port; numbers without an
//! international prefix are read in the configured default region.

use super::{FieldValidator, ValidationDetails, ValidationResult};
use crate::types::FieldName;
use async_trait::async_trait;
use phonenumber::country;
use phonenumber::Mode;
use serde::{Deserialize, Serialize};

const BASE_SCORE: f64 = 0.3;
const VALID_BONUS: f64 = 0.3;
const COUNTRY_CODE_BONUS: f64 = 0.1;
const POSSIBLE_BONUS: f64 = 0.1;
const FICTIONAL_PREFIX_PENALTY: f64 = 0.2;

/// E.164 caps a number at 15 digits
const MAX_DIGITS: usize = 15;
const MIN_NATIONAL_DIGITS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneDetails {
    pub parsed: bool,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e164: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<u16>,
    /// Input carried its own `+` / `00` international prefix
    pub country_code_present: bool,
    pub possible: bool,
    pub fictional_prefix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl PhoneDetails {
    fn unparsed(error: String) -> Self {
        Self {
            parsed: false,
            valid: false,
            e164: None,
            country_code: None,
            country_code_present: false,
            possible: false,
            fictional_prefix: false,
            parse_error: Some(error),
        }
    }
}

pub struct PhoneValidator {
    default_region: country::Id,
}

impl PhoneValidator {
    pub fn new(default_region: country::Id) -> Self {
        Self { default_region }
    }

    pub fn default_region(&self) -> country::Id {
        self.default_region
    }

    /// Base score without the "valid" flag
    fn base_only(details: PhoneDetails) -> ValidationResult {
        ValidationResult {
            is_valid: false,
            score: BASE_SCORE,
            details: Some(ValidationDetails::Phone(details)),
        }
    }
}

#[async_trait]
impl FieldValidator for PhoneValidator {
    fn field(&self) -> FieldName {
        FieldName::Phone
    }

    fn method(&self) -> &'static str {
        "phone_validation"
    }

    async fn validate(&self, raw: &str) -> ValidationResult {
        let phone = raw.trim();
        if phone.is_empty() {
            return ValidationResult::rejected(None);
        }

        let country_code_present = phone.starts_with('+') || phone.starts_with("00");

        let number = match phonenumber::parse(Some(self.default_region), phone) {
            Ok(number) => number,
            Err(e) => {
                tracing::debug!(error = %e, "Phone number did not parse");
                return Self::base_only(PhoneDetails::unparsed(e.to_string()));
            }
        };

        let national = number.national().value().to_string();
        let total_digits = national.len() + number.code().value().to_string().len();
        let possible = national.len() >= MIN_NATIONAL_DIGITS && total_digits <= MAX_DIGITS;
        let fictional_prefix = national.starts_with("555");
        let valid = phonenumber::is_valid(&number);

        let details = PhoneDetails {
            parsed: true,
            valid,
            e164: Some(number.format().mode(Mode::E164).to_string()),
            country_code: Some(number.code().value()),
            country_code_present,
            possible,
            fictional_prefix,
            parse_error: None,
        };

        if !valid {
            return Self::base_only(details);
        }

        let mut score = BASE_SCORE + VALID_BONUS;
        if country_code_present {
            score += COUNTRY_CODE_BONUS;
        }
        if possible {
            score += POSSIBLE_BONUS;
        }
        if fictional_prefix {
            score -= FICTIONAL_PREFIX_PENALTY;
        }

        ValidationResult::scored(score, Some(ValidationDetails::Phone(details)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PhoneValidator {
        PhoneValidator::new(country::Id::US)
    }

    fn details(result: &ValidationResult) -> &PhoneDetails {
        match result.details.as_ref() {
            Some(ValidationDetails::Phone(d)) => d,
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_international_number_scores_full() {
        let result = validator().validate("+1 650-253-0000").await;
        assert!(result.is_valid);
        // 0.3 base + 0.3 valid + 0.1 country code + 0.1 possible
        assert!((result.score - 0.8).abs() < 1e-9);
        assert!(details(&result).country_code_present);
        assert_eq!(details(&result).e164.as_deref(), Some("+16502530000"));
    }

    #[tokio::test]
    async fn test_national_number_uses_default_region() {
        let result = validator().validate("(650) 253-0000").await;
        assert!(result.is_valid);
        assert!(!details(&result).country_code_present);
        assert_eq!(details(&result).country_code, Some(1));
    }

    #[tokio::test]
    async fn test_garbage_scores_base_and_is_invalid() {
        let result = validator().validate("call me maybe").await;
        assert_eq!(result.score, 0.3);
        assert!(!result.is_valid);
        assert!(!details(&result).parsed);
    }

    #[tokio::test]
    async fn test_country_code_adds_signal() {
        let v = validator();
        let with = v.validate("+1 650 253 0000").await.score;
        let without = v.validate("650 253 0000").await.score;
        assert!(with > without);
    }
}
