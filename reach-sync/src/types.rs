//! Core types shared by the scoring and sync engine
//!
//! Field identifiers, confidence-scored values, status enums for change-log
//! entries, contacts and jobs, and the typed JSON payloads stored in
//! `metadata` / `parameters` / `enrichment_metadata` columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Implements `as_str`, `Display` and `FromStr` for a unit-only enum stored as TEXT
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Column / wire representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

// ============================================================================
// Fields
// ============================================================================

/// Contact field tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Email,
    Name,
    Bio,
    Phone,
    Location,
    Username,
    ProfileUrl,
}

text_enum!(FieldName {
    Email => "email",
    Name => "name",
    Bio => "bio",
    Phone => "phone",
    Location => "location",
    Username => "username",
    ProfileUrl => "profile_url",
});

impl FieldName {
    /// Fields that carry a validator and a confidence column
    pub const SCORED: [FieldName; 6] = [
        FieldName::Email,
        FieldName::Name,
        FieldName::Location,
        FieldName::Bio,
        FieldName::Phone,
        FieldName::Username,
    ];

    /// Fields compared by the change detector, in comparison order
    pub const SYNCABLE: [FieldName; 7] = [
        FieldName::Username,
        FieldName::Bio,
        FieldName::Location,
        FieldName::ProfileUrl,
        FieldName::Email,
        FieldName::Name,
        FieldName::Phone,
    ];

    /// Weight in the overall confidence (None for unscored fields)
    pub fn weight(&self) -> Option<f64> {
        match self {
            FieldName::Email => Some(0.25),
            FieldName::Name => Some(0.20),
            FieldName::Location => Some(0.15),
            FieldName::Bio => Some(0.15),
            FieldName::Phone => Some(0.15),
            FieldName::Username => Some(0.10),
            FieldName::ProfileUrl => None,
        }
    }

    /// Score below which the field requests re-enrichment
    pub fn reenrich_threshold(&self) -> Option<f64> {
        match self {
            FieldName::Email => Some(0.5),
            FieldName::Name => Some(0.6),
            FieldName::Location => Some(0.4),
            FieldName::Bio => Some(0.5),
            FieldName::Phone => Some(0.6),
            FieldName::Username => Some(0.5),
            FieldName::ProfileUrl => None,
        }
    }

    /// `contacts` column holding this field's confidence
    pub fn confidence_column(&self) -> Option<&'static str> {
        match self {
            FieldName::Email => Some("confidence_email"),
            FieldName::Name => Some("confidence_name"),
            FieldName::Bio => Some("confidence_bio"),
            FieldName::Phone => Some("confidence_phone"),
            FieldName::Location => Some("confidence_location"),
            FieldName::Username => Some("confidence_username"),
            FieldName::ProfileUrl => None,
        }
    }
}

/// Confidence-scored observation of a field value
///
/// Never mutated: a new observation is a new `FieldValue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    /// Confidence score (0.0-1.0)
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl FieldValue {
    /// Create a value with clamped confidence (0.0-1.0)
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: clamp_unit(confidence),
            source: None,
            timestamp: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn observed_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Copy with a different confidence
    pub fn with_confidence(&self, confidence: f64) -> Self {
        Self {
            confidence: clamp_unit(confidence),
            ..self.clone()
        }
    }
}

/// Per-field (or overall) confidence as stored in contact metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub value: f64,
    pub method: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ConfidenceScore {
    pub fn new(value: f64, method: impl Into<String>) -> Self {
        Self {
            value: clamp_unit(value),
            method: method.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }
}

/// Clamp to the unit interval; NaN collapses to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Origin of a detected change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Scrape,
    Import,
    Webhook,
    Manual,
}

text_enum!(ChangeSource {
    Scrape => "scrape",
    Import => "import",
    Webhook => "webhook",
    Manual => "manual",
});

/// Change-log entry state: `pending → processing → {completed | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

text_enum!(ChangeStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl ChangeStatus {
    /// Forward-only transitions; terminal states accept nothing
    pub fn can_transition_to(&self, next: ChangeStatus) -> bool {
        matches!(
            (self, next),
            (ChangeStatus::Pending, ChangeStatus::Processing)
                | (ChangeStatus::Processing, ChangeStatus::Completed)
                | (ChangeStatus::Processing, ChangeStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeStatus::Completed | ChangeStatus::Failed)
    }
}

/// Contact-level sync state derived from `outdated_fields`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSyncStatus {
    Synced,
    Outdated,
    Partial,
}

text_enum!(ContactSyncStatus {
    Synced => "synced",
    Outdated => "outdated",
    Partial => "partial",
});

/// Enrichment job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Finished with at least one failed item
    Partial,
    Failed,
    Cancelled,
}

text_enum!(JobStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Partial => "partial",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Enrichment priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

text_enum!(Priority {
    High => "high",
    Normal => "normal",
    Low => "low",
});

impl Priority {
    /// Processing order for a sync pass
    pub const ORDER: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];
}

/// Kind of enrichment job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ConfidenceReenrichment,
    SelectiveFieldEnrichment,
}

text_enum!(JobType {
    ConfidenceReenrichment => "confidence_reenrichment",
    SelectiveFieldEnrichment => "selective_field_enrichment",
});

// ============================================================================
// Typed JSON payloads
// ============================================================================

/// Contents of `contacts.metadata`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactMetadata {
    #[serde(default)]
    pub confidence_scores: BTreeMap<FieldName, ConfidenceScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall: Option<ConfidenceScore>,
    /// Keys written by other parts of the application, preserved untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One change as carried inside a selective enrichment job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedChange {
    pub change_id: Uuid,
    pub field: FieldName,
    #[serde(default)]
    pub old_value: Option<String>,
    #[serde(default)]
    pub new_value: Option<String>,
    pub confidence_before: f64,
}

/// Contents of `enrichment_jobs.parameters`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParameters {
    ConfidenceReenrichment {
        fields_to_enrich: Vec<FieldName>,
        priority: Priority,
        source_type: String,
        overall_confidence: f64,
    },
    SelectiveFieldEnrichment {
        changes_by_contact: BTreeMap<Uuid, Vec<ScopedChange>>,
        enrichment_scope: Vec<String>,
        priority: Priority,
        change_count: usize,
    },
    Generic(serde_json::Map<String, serde_json::Value>),
}

/// Persona inferred from a bio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    Professional,
    Creator,
    Personal,
    Unknown,
}

/// Email domain classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainClass {
    Free,
    Business,
    Disposable,
    Invalid,
}

/// Contents of `field_enrichment_history.enrichment_metadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnrichmentMetadata {
    Bio {
        topics: Vec<String>,
        sentiment: f64,
        persona: Persona,
    },
    Username {
        normalized: String,
        profile_scan_requested: bool,
        is_valid: bool,
    },
    Location {
        formatted_address: Option<String>,
        lat: Option<f64>,
        lng: Option<f64>,
        precision: Option<String>,
    },
    Email {
        domain: Option<String>,
        domain_class: DomainClass,
        format_valid: bool,
    },
    PassThrough,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = FieldName::SCORED.iter().filter_map(|f| f.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_field_name_text_round_trip() {
        for field in FieldName::SYNCABLE {
            assert_eq!(field.as_str().parse::<FieldName>().unwrap(), field);
        }
        assert!("nickname".parse::<FieldName>().is_err());
    }

    #[test]
    fn test_change_status_never_regresses() {
        assert!(ChangeStatus::Pending.can_transition_to(ChangeStatus::Processing));
        assert!(ChangeStatus::Processing.can_transition_to(ChangeStatus::Failed));
        assert!(!ChangeStatus::Pending.can_transition_to(ChangeStatus::Completed));
        assert!(!ChangeStatus::Completed.can_transition_to(ChangeStatus::Pending));
        assert!(!ChangeStatus::Failed.can_transition_to(ChangeStatus::Processing));
    }

    #[test]
    fn test_contact_metadata_preserves_unknown_keys() {
        let raw = r#"{"confidence_scores":{},"scraped_by":"crawler-7"}"#;
        let meta: ContactMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.extra.get("scraped_by").unwrap(), "crawler-7");

        let out = serde_json::to_value(&meta).unwrap();
        assert_eq!(out["scraped_by"], "crawler-7");
    }

    #[test]
    fn test_job_parameters_are_tagged() {
        let params = JobParameters::ConfidenceReenrichment {
            fields_to_enrich: vec![FieldName::Email],
            priority: Priority::High,
            source_type: "import".to_string(),
            overall_confidence: 0.3,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["kind"], "confidence_reenrichment");
        assert_eq!(json["fields_to_enrich"][0], "email");
    }

    #[test]
    fn test_field_value_confidence_is_clamped() {
        assert_eq!(FieldValue::new("x", 1.7).confidence, 1.0);
        assert_eq!(FieldValue::new("x", f64::NAN).confidence, 0.0);
    }
}
