//! Persistence port
//!
//! The engine reaches the database only through [`SyncStore`]. Every method
//! takes the owning user id and every implementation must scope reads and
//! writes to it; a row owned by another user behaves as if it did not exist.
//!
//! Change-log, enrichment-history and confidence-log rows are append-only.
//! Only the status columns of change-log and job rows are updated in place.

pub mod sqlite;

pub use sqlite::SqliteSyncStore;

use crate::error::SyncResult;
use crate::types::{
    ChangeSource, ChangeStatus, ConfidenceScore, ContactMetadata, ContactSyncStatus,
    EnrichmentMetadata, FieldName, JobParameters, JobStatus, JobType, Priority,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Records
// ============================================================================

/// One row of `contacts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub profile_url: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    /// Overall confidence
    pub confidence: Option<f64>,
    /// `confidence_<field>` columns that are set
    pub field_confidence: BTreeMap<FieldName, f64>,
    pub metadata: ContactMetadata,
    pub outdated_fields: Vec<FieldName>,
    pub sync_status: ContactSyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactRecord {
    /// Empty, synced contact owned by `user_id`
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            username: None,
            bio: None,
            location: None,
            profile_url: None,
            email: None,
            name: None,
            phone: None,
            confidence: None,
            field_confidence: BTreeMap::new(),
            metadata: ContactMetadata::default(),
            outdated_fields: Vec::new(),
            sync_status: ContactSyncStatus::Synced,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, field: FieldName, value: impl Into<String>) -> Self {
        self.set_value(field, Some(value.into()));
        self
    }

    pub fn value(&self, field: FieldName) -> Option<&str> {
        match field {
            FieldName::Username => self.username.as_deref(),
            FieldName::Bio => self.bio.as_deref(),
            FieldName::Location => self.location.as_deref(),
            FieldName::ProfileUrl => self.profile_url.as_deref(),
            FieldName::Email => self.email.as_deref(),
            FieldName::Name => self.name.as_deref(),
            FieldName::Phone => self.phone.as_deref(),
        }
    }

    /// Value if present and not blank
    pub fn present_value(&self, field: FieldName) -> Option<&str> {
        self.value(field).filter(|v| !v.trim().is_empty())
    }

    pub fn set_value(&mut self, field: FieldName, value: Option<String>) {
        let slot = match field {
            FieldName::Username => &mut self.username,
            FieldName::Bio => &mut self.bio,
            FieldName::Location => &mut self.location,
            FieldName::ProfileUrl => &mut self.profile_url,
            FieldName::Email => &mut self.email,
            FieldName::Name => &mut self.name,
            FieldName::Phone => &mut self.phone,
        };
        *slot = value;
    }

    /// Stored per-field confidence: column first, then metadata
    pub fn stored_confidence(&self, field: FieldName) -> Option<f64> {
        self.field_confidence
            .get(&field)
            .copied()
            .or_else(|| self.metadata.confidence_scores.get(&field).map(|s| s.value))
    }
}

/// Scores written back by the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct ContactScoreUpdate {
    pub field_confidence: BTreeMap<FieldName, f64>,
    pub overall: f64,
    pub metadata: ContactMetadata,
}

/// Outcome of enriching one outdated field
///
/// The observed value always lands in the field column; `None` clears it.
/// `score` is written to both `confidence_<field>` and
/// `metadata.confidence_scores`; `None` drops both.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldResolution {
    pub field: FieldName,
    pub value: Option<String>,
    pub score: Option<ConfidenceScore>,
}

/// One row of `sync_change_log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub contact_id: Uuid,
    pub field: FieldName,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub confidence_before: f64,
    pub confidence_after: Option<f64>,
    pub change_source: ChangeSource,
    pub sync_status: ChangeStatus,
    pub enrichment_job_id: Option<Uuid>,
    pub error_message: Option<String>,
    /// Failed entry this one re-queues
    pub retry_of: Option<Uuid>,
    pub detected_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Values for appending a change-log row (always `pending`)
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub contact_id: Uuid,
    pub field: FieldName,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub confidence_before: f64,
    pub source: ChangeSource,
    pub retry_of: Option<Uuid>,
}

/// Extra columns set together with a change-log status transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeOutcome {
    pub confidence_after: Option<f64>,
    pub error_message: Option<String>,
}

/// One row of `field_enrichment_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEnrichmentRecord {
    pub contact_id: Uuid,
    pub field: FieldName,
    pub enrichment_method: String,
    pub confidence_score: f64,
    pub data_source: String,
    pub enriched_value: Option<String>,
    pub metadata: EnrichmentMetadata,
    pub enriched_at: DateTime<Utc>,
}

/// One row of `field_confidence_log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidenceLogEntry {
    pub contact_id: Uuid,
    pub field: FieldName,
    pub confidence_score: f64,
    pub method: String,
    pub source_type: String,
    pub logged_at: DateTime<Utc>,
}

/// One row of `enrichment_jobs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: Priority,
    pub target_table: String,
    pub target_id: Option<Uuid>,
    pub parameters: JobParameters,
    /// Percent complete (0-100)
    pub progress: u8,
    pub results: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Values for creating an enrichment job (always `pending`)
#[derive(Debug, Clone, PartialEq)]
pub struct NewEnrichmentJob {
    pub job_type: JobType,
    pub priority: Priority,
    pub target_table: String,
    pub target_id: Option<Uuid>,
    pub parameters: JobParameters,
}

/// One row of `sync_jobs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub schedule: Option<String>,
    pub enabled: bool,
    pub days_back: u32,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub avg_duration_ms: f64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Per-user counts for dashboards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub changes_by_status: BTreeMap<String, u64>,
    pub contacts_by_status: BTreeMap<String, u64>,
    pub open_jobs: u64,
}

// ============================================================================
// Port
// ============================================================================

#[async_trait]
pub trait SyncStore: Send + Sync {
    // ---- contacts ----

    async fn insert_contact(&self, contact: &ContactRecord) -> SyncResult<()>;

    async fn get_contact(&self, user_id: Uuid, contact_id: Uuid) -> SyncResult<Option<ContactRecord>>;

    /// Contacts updated at or after `since` whose last sync predates the update
    async fn contacts_needing_sync(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<ContactRecord>>;

    /// Write per-field and overall confidence plus metadata
    async fn update_contact_scores(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        update: &ContactScoreUpdate,
    ) -> SyncResult<()>;

    /// Add `fields` to `outdated_fields` (no duplicates) and mark the contact outdated
    async fn mark_fields_outdated(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        fields: &[FieldName],
    ) -> SyncResult<()>;

    /// Atomically merge one enrichment result into the contact
    ///
    /// Writes the value and its score, drops the field from
    /// `outdated_fields`, recomputes `sync_status` and stamps `last_sync_at`.
    async fn resolve_outdated_field(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        resolution: &FieldResolution,
    ) -> SyncResult<ContactRecord>;

    // ---- change log ----

    async fn insert_change(&self, user_id: Uuid, change: &NewChange) -> SyncResult<ChangeLogEntry>;

    /// Append `changes` for one contact and mark their fields outdated
    ///
    /// All rows and the contact update commit together or not at all.
    async fn log_changes(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        changes: &[NewChange],
    ) -> SyncResult<Vec<ChangeLogEntry>>;

    async fn get_change(&self, user_id: Uuid, change_id: Uuid) -> SyncResult<Option<ChangeLogEntry>>;

    /// Entries of one contact, oldest first, optionally filtered by status
    async fn changes_for_contact(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        status: Option<ChangeStatus>,
    ) -> SyncResult<Vec<ChangeLogEntry>>;

    async fn changes_with_status(
        &self,
        user_id: Uuid,
        status: ChangeStatus,
    ) -> SyncResult<Vec<ChangeLogEntry>>;

    /// Move `pending` entries to `processing` under `job_id`
    ///
    /// Returns the ids that moved, in input order. Entries no longer
    /// `pending` are left alone.
    async fn claim_changes(&self, user_id: Uuid, change_ids: &[Uuid], job_id: Uuid)
        -> SyncResult<Vec<Uuid>>;

    /// Forward-only status transition
    async fn transition_change(
        &self,
        user_id: Uuid,
        change_id: Uuid,
        to: ChangeStatus,
        outcome: &ChangeOutcome,
    ) -> SyncResult<()>;

    // ---- append-only logs ----

    async fn append_enrichment_history(
        &self,
        user_id: Uuid,
        record: &FieldEnrichmentRecord,
    ) -> SyncResult<i64>;

    async fn enrichment_history(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
    ) -> SyncResult<Vec<FieldEnrichmentRecord>>;

    async fn append_confidence_log(
        &self,
        user_id: Uuid,
        entry: &FieldConfidenceLogEntry,
    ) -> SyncResult<()>;

    async fn confidence_log(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
    ) -> SyncResult<Vec<FieldConfidenceLogEntry>>;

    // ---- enrichment jobs ----

    async fn create_enrichment_job(
        &self,
        user_id: Uuid,
        job: &NewEnrichmentJob,
    ) -> SyncResult<EnrichmentJob>;

    async fn get_enrichment_job(&self, user_id: Uuid, job_id: Uuid)
        -> SyncResult<Option<EnrichmentJob>>;

    async fn list_enrichment_jobs(
        &self,
        user_id: Uuid,
        job_type: Option<JobType>,
    ) -> SyncResult<Vec<EnrichmentJob>>;

    /// Persist status, progress, results, error and lifecycle timestamps
    async fn save_enrichment_job_state(&self, job: &EnrichmentJob) -> SyncResult<()>;

    // ---- sync jobs ----

    async fn create_sync_job(
        &self,
        user_id: Uuid,
        name: &str,
        schedule: Option<&str>,
        days_back: u32,
    ) -> SyncResult<SyncJob>;

    async fn get_sync_job(&self, user_id: Uuid, job_id: Uuid) -> SyncResult<Option<SyncJob>>;

    /// Fold one run into the running statistics
    async fn record_sync_run(
        &self,
        user_id: Uuid,
        job_id: Uuid,
        duration_ms: f64,
        succeeded: bool,
    ) -> SyncResult<SyncJob>;

    async fn sync_summary(&self, user_id: Uuid) -> SyncResult<SyncSummary>;
}
