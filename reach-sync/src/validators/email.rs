//! Email validator
//!
//! Malformed addresses (RFC 5322 grammar) score 0. Well-formed addresses start
//! at 0.4 and are adjusted for domain reputation, MX presence and a handful of
//! small quality signals.

use super::{FieldValidator, ValidationDetails, ValidationResult};
use crate::lookup::{with_timeout, DisposableDomains, MxLookup};
use crate::types::FieldName;
use async_trait::async_trait;
use email_address::EmailAddress;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const BASE_SCORE: f64 = 0.4;
const DISPOSABLE_PENALTY: f64 = 0.3;
const COMMON_DOMAIN_BONUS: f64 = 0.1;
const BUSINESS_DOMAIN_BONUS: f64 = 0.2;
const MX_BONUS: f64 = 0.2;
const QUALITY_SIGNAL_BONUS: f64 = 0.05;
const MAX_QUALITY_SIGNALS: usize = 4;

/// Free-mail providers
pub const COMMON_DOMAINS: &[&str] = &[
    "aol.com",
    "gmail.com",
    "gmx.com",
    "googlemail.com",
    "hotmail.com",
    "icloud.com",
    "live.com",
    "mail.com",
    "me.com",
    "msn.com",
    "outlook.com",
    "protonmail.com",
    "yahoo.com",
    "yandex.com",
    "zoho.com",
];

static LOCAL_PART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._-]+$").expect("valid local-part regex"));
static DIGIT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4,}").expect("valid digit regex"));

/// Result of the MX check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MxStatus {
    Present,
    Absent,
    /// Lookup failed or timed out
    Unknown,
    /// No resolver configured
    NotChecked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDetails {
    pub format_valid: bool,
    pub domain: Option<String>,
    pub disposable: bool,
    pub common_domain: bool,
    pub business_domain: bool,
    pub mx: MxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_error: Option<String>,
    /// Quality signals counted toward the bonus (at most 4)
    pub quality_signals: usize,
}

impl EmailDetails {
    fn malformed() -> Self {
        Self {
            format_valid: false,
            domain: None,
            disposable: false,
            common_domain: false,
            business_domain: false,
            mx: MxStatus::NotChecked,
            lookup_error: None,
            quality_signals: 0,
        }
    }
}

/// Reserved or obviously synthetic domains
pub fn is_test_domain(domain: &str) -> bool {
    let first_label = domain.split('.').next().unwrap_or_default();
    domain == "localhost"
        || first_label == "example"
        || first_label == "test"
        || domain.ends_with(".test")
        || domain.ends_with(".invalid")
        || domain.ends_with(".example")
}

pub fn is_common_domain(domain: &str) -> bool {
    COMMON_DOMAINS.contains(&domain)
}

pub struct EmailValidator {
    disposable: Arc<dyn DisposableDomains>,
    mx: Option<Arc<dyn MxLookup>>,
    lookup_timeout: Duration,
}

impl EmailValidator {
    pub fn new(
        disposable: Arc<dyn DisposableDomains>,
        mx: Option<Arc<dyn MxLookup>>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            disposable,
            mx,
            lookup_timeout,
        }
    }

    async fn check_mx(&self, domain: &str) -> (MxStatus, Option<String>) {
        let Some(mx) = &self.mx else {
            return (MxStatus::NotChecked, None);
        };

        match with_timeout("dns", self.lookup_timeout, mx.has_mx(domain)).await {
            Ok(true) => (MxStatus::Present, None),
            Ok(false) => (MxStatus::Absent, None),
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "MX lookup failed, skipping signal");
                (MxStatus::Unknown, Some(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl FieldValidator for EmailValidator {
    fn field(&self) -> FieldName {
        FieldName::Email
    }

    fn method(&self) -> &'static str {
        "email_validation"
    }

    async fn validate(&self, raw: &str) -> ValidationResult {
        let email = raw.trim().to_lowercase();
        if email.is_empty() {
            return ValidationResult::rejected(None);
        }

        if !EmailAddress::is_valid(&email) {
            return ValidationResult::rejected(Some(ValidationDetails::Email(
                EmailDetails::malformed(),
            )));
        }

        let Some((local, domain)) = email.rsplit_once('@') else {
            return ValidationResult::rejected(Some(ValidationDetails::Email(
                EmailDetails::malformed(),
            )));
        };

        let mut score = BASE_SCORE;

        let disposable = self.disposable.is_disposable(domain);
        if disposable {
            score -= DISPOSABLE_PENALTY;
        }

        let common_domain = is_common_domain(domain);
        let business_domain = !common_domain && !disposable;
        if common_domain {
            score += COMMON_DOMAIN_BONUS;
        } else if business_domain {
            score += BUSINESS_DOMAIN_BONUS;
        }

        let (mx, lookup_error) = self.check_mx(domain).await;
        if mx == MxStatus::Present {
            score += MX_BONUS;
        }

        let quality_signals = [
            !local.contains('+'),
            !is_test_domain(domain),
            email.len() < 50,
            local.len() >= 4,
            LOCAL_PART_RE.is_match(local),
            !DIGIT_RUN_RE.is_match(local),
        ]
        .iter()
        .filter(|&&signal| signal)
        .count()
        .min(MAX_QUALITY_SIGNALS);
        score += quality_signals as f64 * QUALITY_SIGNAL_BONUS;

        ValidationResult::scored(
            score,
            Some(ValidationDetails::Email(EmailDetails {
                format_valid: true,
                domain: Some(domain.to_string()),
                disposable,
                common_domain,
                business_domain,
                mx,
                lookup_error,
                quality_signals,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SyncError, SyncResult};
    use crate::lookup::StaticDisposableDomains;

    /// `None` simulates a resolver failure
    struct FixedMx(Option<bool>);

    #[async_trait]
    impl MxLookup for FixedMx {
        async fn has_mx(&self, _domain: &str) -> SyncResult<bool> {
            match self.0 {
                Some(v) => Ok(v),
                None => Err(SyncError::Lookup {
                    capability: "dns",
                    reason: "SERVFAIL".to_string(),
                }),
            }
        }
    }

    struct StalledMx;

    #[async_trait]
    impl MxLookup for StalledMx {
        async fn has_mx(&self, _domain: &str) -> SyncResult<bool> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(true)
        }
    }

    fn validator(mx: Option<Arc<dyn MxLookup>>) -> EmailValidator {
        EmailValidator::new(
            Arc::new(StaticDisposableDomains::builtin()),
            mx,
            Duration::from_millis(50),
        )
    }

    fn details(result: &ValidationResult) -> &EmailDetails {
        match result.details.as_ref() {
            Some(ValidationDetails::Email(d)) => d,
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_email_scores_zero() {
        let v = validator(None);
        for raw in ["not-an-email", "a@", "@b.com", "a b@c.com"] {
            let result = v.validate(raw).await;
            assert_eq!(result.score, 0.0, "{}", raw);
            assert!(!result.is_valid);
        }
    }

    #[tokio::test]
    async fn test_disposable_scores_below_free_mail() {
        let v = validator(None);
        let gmail = v.validate("a@gmail.com").await.score;

        for domain in ["mailinator.com", "tempmail.org", "yopmail.com", "10minutemail.com"] {
            let disposable = v.validate(&format!("a@{}", domain)).await.score;
            assert!(disposable < gmail, "{} ({}) vs gmail ({})", domain, disposable, gmail);
        }
    }

    #[tokio::test]
    async fn test_free_mail_score_breakdown() {
        let result = validator(None).validate("a@gmail.com").await;
        // 0.4 base + 0.1 common + 4 quality signals
        assert!((result.score - 0.7).abs() < 1e-9);
        assert!(details(&result).common_domain);
        assert!(!details(&result).business_domain);
        assert_eq!(details(&result).mx, MxStatus::NotChecked);
    }

    #[tokio::test]
    async fn test_business_domain_with_mx() {
        let mx: Arc<dyn MxLookup> = Arc::new(FixedMx(Some(true)));
        let result = validator(Some(mx)).validate("jane.smith@acme-corp.io").await;
        // 0.4 + 0.2 business + 0.2 mx + 0.2 quality, clamped
        assert_eq!(result.score, 1.0);
        assert_eq!(details(&result).mx, MxStatus::Present);
    }

    #[tokio::test]
    async fn test_mx_failure_is_not_penalized() {
        let without = validator(None).validate("jane@acme-corp.io").await.score;

        let failing: Arc<dyn MxLookup> = Arc::new(FixedMx(None));
        let failed = validator(Some(failing)).validate("jane@acme-corp.io").await;
        assert_eq!(failed.score, without);
        assert_eq!(details(&failed).mx, MxStatus::Unknown);
        assert!(details(&failed).lookup_error.is_some());

        let stalled: Arc<dyn MxLookup> = Arc::new(StalledMx);
        let timed_out = validator(Some(stalled)).validate("jane@acme-corp.io").await;
        assert_eq!(timed_out.score, without);
        assert_eq!(details(&timed_out).mx, MxStatus::Unknown);
    }

    #[tokio::test]
    async fn test_plus_addressing_and_digit_runs_cost_signals() {
        let v = validator(None);
        let clean = v.validate("jane@gmail.com").await;
        let noisy = v.validate("jane+12345@gmail.com").await;
        assert!(details(&noisy).quality_signals < details(&clean).quality_signals);
        assert!(noisy.score < clean.score);
    }

    #[test]
    fn test_test_domains() {
        assert!(is_test_domain("example.com"));
        assert!(is_test_domain("test.org"));
        assert!(is_test_domain("foo.invalid"));
        assert!(!is_test_domain("contest.com"));
    }
}
