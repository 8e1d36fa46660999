//! SQLite implementation of [`SyncStore`]
//!
//! JSON columns are decoded into their typed payloads here, so a malformed
//! row surfaces as a serialization error instead of travelling through the
//! engine. Primary mutations go through `retry_on_lock`.

use super::{
    ChangeLogEntry, ChangeOutcome, ContactRecord, ContactScoreUpdate, EnrichmentJob,
    FieldConfidenceLogEntry, FieldEnrichmentRecord, FieldResolution, NewChange, NewEnrichmentJob,
    SyncJob, SyncStore, SyncSummary,
};
use crate::error::{SyncError, SyncResult};
use crate::types::{ChangeStatus, ContactSyncStatus, FieldName, JobStatus, JobType};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reach_common::db::{format_timestamp, parse_timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

const CONTACT_COLUMNS: &str = "id, user_id, username, bio, location, profile_url, email, name, phone, \
     confidence, confidence_email, confidence_name, confidence_bio, confidence_phone, \
     confidence_location, confidence_username, metadata, outdated_fields, sync_status, \
     last_sync_at, created_at, updated_at";

const CHANGE_COLUMNS: &str = "id, user_id, contact_id, field_name, old_value, new_value, \
     confidence_before, confidence_after, change_source, sync_status, enrichment_job_id, \
     error_message, retry_of, detected_at, processed_at";

const JOB_COLUMNS: &str = "id, user_id, job_type, status, priority, target_table, target_id, \
     parameters, progress, results, error_message, created_at, started_at, completed_at";

const SYNC_JOB_COLUMNS: &str = "id, user_id, name, schedule, enabled, days_back, total_runs, \
     successful_runs, failed_runs, avg_duration_ms, last_run_at, created_at";

// ============================================================================
// Column decoding
// ============================================================================

fn parse_uuid(raw: &str, column: &str) -> SyncResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        SyncError::Store(reach_common::Error::Internal(format!(
            "Failed to parse {} '{}': {}",
            column, raw, e
        )))
    })
}

fn parse_text<T>(raw: &str, column: &str) -> SyncResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|e| {
        SyncError::Store(reach_common::Error::Internal(format!(
            "Failed to parse {}: {}",
            column, e
        )))
    })
}

fn uuid_col(row: &SqliteRow, column: &str) -> SyncResult<Uuid> {
    let raw: String = row.try_get(column)?;
    parse_uuid(&raw, column)
}

fn opt_uuid_col(row: &SqliteRow, column: &str) -> SyncResult<Option<Uuid>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| parse_uuid(&s, column)).transpose()
}

fn ts_col(row: &SqliteRow, column: &str) -> SyncResult<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    Ok(parse_timestamp(&raw)?)
}

fn opt_ts_col(row: &SqliteRow, column: &str) -> SyncResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    Ok(raw.map(|s| parse_timestamp(&s)).transpose()?)
}

fn row_to_contact(row: &SqliteRow) -> SyncResult<ContactRecord> {
    let mut field_confidence = BTreeMap::new();
    for field in FieldName::SCORED {
        if let Some(column) = field.confidence_column() {
            if let Some(value) = row.try_get::<Option<f64>, _>(column)? {
                field_confidence.insert(field, value);
            }
        }
    }

    let metadata: String = row.try_get("metadata")?;
    let outdated_fields: String = row.try_get("outdated_fields")?;
    let sync_status: String = row.try_get("sync_status")?;

    Ok(ContactRecord {
        id: uuid_col(row, "id")?,
        user_id: uuid_col(row, "user_id")?,
        username: row.try_get("username")?,
        bio: row.try_get("bio")?,
        location: row.try_get("location")?,
        profile_url: row.try_get("profile_url")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        confidence: row.try_get("confidence")?,
        field_confidence,
        metadata: serde_json::from_str(&metadata)?,
        outdated_fields: serde_json::from_str(&outdated_fields)?,
        sync_status: parse_text(&sync_status, "contacts.sync_status")?,
        last_sync_at: opt_ts_col(row, "last_sync_at")?,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
    })
}

fn row_to_change(row: &SqliteRow) -> SyncResult<ChangeLogEntry> {
    let field: String = row.try_get("field_name")?;
    let source: String = row.try_get("change_source")?;
    let status: String = row.try_get("sync_status")?;

    Ok(ChangeLogEntry {
        id: uuid_col(row, "id")?,
        user_id: uuid_col(row, "user_id")?,
        contact_id: uuid_col(row, "contact_id")?,
        field: parse_text(&field, "sync_change_log.field_name")?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        confidence_before: row.try_get("confidence_before")?,
        confidence_after: row.try_get("confidence_after")?,
        change_source: parse_text(&source, "sync_change_log.change_source")?,
        sync_status: parse_text(&status, "sync_change_log.sync_status")?,
        enrichment_job_id: opt_uuid_col(row, "enrichment_job_id")?,
        error_message: row.try_get("error_message")?,
        retry_of: opt_uuid_col(row, "retry_of")?,
        detected_at: ts_col(row, "detected_at")?,
        processed_at: opt_ts_col(row, "processed_at")?,
    })
}

fn row_to_job(row: &SqliteRow) -> SyncResult<EnrichmentJob> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let parameters: String = row.try_get("parameters")?;
    let results: String = row.try_get("results")?;
    let progress: i64 = row.try_get("progress")?;

    Ok(EnrichmentJob {
        id: uuid_col(row, "id")?,
        user_id: uuid_col(row, "user_id")?,
        job_type: parse_text(&job_type, "enrichment_jobs.job_type")?,
        status: parse_text(&status, "enrichment_jobs.status")?,
        priority: parse_text(&priority, "enrichment_jobs.priority")?,
        target_table: row.try_get("target_table")?,
        target_id: opt_uuid_col(row, "target_id")?,
        parameters: serde_json::from_str(&parameters)?,
        progress: progress.clamp(0, 100) as u8,
        results: serde_json::from_str(&results)?,
        error_message: row.try_get("error_message")?,
        created_at: ts_col(row, "created_at")?,
        started_at: opt_ts_col(row, "started_at")?,
        completed_at: opt_ts_col(row, "completed_at")?,
    })
}

fn row_to_sync_job(row: &SqliteRow) -> SyncResult<SyncJob> {
    let days_back: i64 = row.try_get("days_back")?;
    let total_runs: i64 = row.try_get("total_runs")?;
    let successful_runs: i64 = row.try_get("successful_runs")?;
    let failed_runs: i64 = row.try_get("failed_runs")?;

    Ok(SyncJob {
        id: uuid_col(row, "id")?,
        user_id: uuid_col(row, "user_id")?,
        name: row.try_get("name")?,
        schedule: row.try_get("schedule")?,
        enabled: row.try_get("enabled")?,
        days_back: days_back.max(0) as u32,
        total_runs: total_runs.max(0) as u64,
        successful_runs: successful_runs.max(0) as u64,
        failed_runs: failed_runs.max(0) as u64,
        avg_duration_ms: row.try_get("avg_duration_ms")?,
        last_run_at: opt_ts_col(row, "last_run_at")?,
        created_at: ts_col(row, "created_at")?,
    })
}

/// Fresh `pending` row for `change`
fn pending_entry(user_id: Uuid, change: &NewChange) -> ChangeLogEntry {
    ChangeLogEntry {
        id: Uuid::new_v4(),
        user_id,
        contact_id: change.contact_id,
        field: change.field,
        old_value: change.old_value.clone(),
        new_value: change.new_value.clone(),
        confidence_before: change.confidence_before,
        confidence_after: None,
        change_source: change.source,
        sync_status: ChangeStatus::Pending,
        enrichment_job_id: None,
        error_message: None,
        retry_of: change.retry_of,
        detected_at: Utc::now(),
        processed_at: None,
    }
}

fn contact_not_found(contact_id: Uuid) -> SyncError {
    SyncError::NotFound(format!("contact {}", contact_id))
}

// ============================================================================
// Store
// ============================================================================

/// [`SyncStore`] over a SQLite pool created by `reach_common::db`
#[derive(Clone)]
pub struct SqliteSyncStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteSyncStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Bound on the total lock-retry wait per primary mutation
    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_contact_in(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        contact_id: Uuid,
    ) -> SyncResult<Option<ContactRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contacts WHERE id = ? AND user_id = ?",
            CONTACT_COLUMNS
        ))
        .bind(contact_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(row_to_contact).transpose()
    }

    async fn update_scores_once(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        update: &ContactScoreUpdate,
    ) -> SyncResult<()> {
        let metadata = serde_json::to_string(&update.metadata)?;
        let score = |field: FieldName| update.field_confidence.get(&field).copied();

        let result = sqlx::query(
            r#"
            UPDATE contacts SET
                confidence = ?,
                confidence_email = ?,
                confidence_name = ?,
                confidence_bio = ?,
                confidence_phone = ?,
                confidence_location = ?,
                confidence_username = ?,
                metadata = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(update.overall)
        .bind(score(FieldName::Email))
        .bind(score(FieldName::Name))
        .bind(score(FieldName::Bio))
        .bind(score(FieldName::Phone))
        .bind(score(FieldName::Location))
        .bind(score(FieldName::Username))
        .bind(&metadata)
        .bind(contact_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(contact_not_found(contact_id));
        }
        Ok(())
    }

    async fn mark_outdated_in(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        contact_id: Uuid,
        fields: &[FieldName],
    ) -> SyncResult<()> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT outdated_fields FROM contacts WHERE id = ? AND user_id = ?",
        )
        .bind(contact_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        let raw = raw.ok_or_else(|| contact_not_found(contact_id))?;
        let mut outdated: Vec<FieldName> = serde_json::from_str(&raw)?;
        for field in fields {
            if !outdated.contains(field) {
                outdated.push(*field);
            }
        }

        sqlx::query(
            "UPDATE contacts SET outdated_fields = ?, sync_status = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(serde_json::to_string(&outdated)?)
        .bind(ContactSyncStatus::Outdated.as_str())
        .bind(format_timestamp(&Utc::now()))
        .bind(contact_id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn mark_outdated_once(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        fields: &[FieldName],
    ) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::mark_outdated_in(&mut tx, user_id, contact_id, fields).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn resolve_field_once(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        resolution: &FieldResolution,
    ) -> SyncResult<ContactRecord> {
        let mut tx = self.pool.begin().await?;

        let mut contact = Self::fetch_contact_in(&mut tx, user_id, contact_id)
            .await?
            .ok_or_else(|| contact_not_found(contact_id))?;

        let field = resolution.field;
        contact.set_value(field, resolution.value.clone());
        match &resolution.score {
            Some(score) => {
                contact.metadata.confidence_scores.insert(field, score.clone());
                if field.confidence_column().is_some() {
                    contact.field_confidence.insert(field, score.value);
                }
            }
            None => {
                contact.metadata.confidence_scores.remove(&field);
                contact.field_confidence.remove(&field);
            }
        }
        contact.outdated_fields.retain(|f| *f != field);
        contact.sync_status = if contact.outdated_fields.is_empty() {
            ContactSyncStatus::Synced
        } else {
            ContactSyncStatus::Partial
        };
        let now = Utc::now();
        contact.last_sync_at = Some(now);

        // Column names come from the closed FieldName set
        let confidence_clause = field
            .confidence_column()
            .map(|column| format!(", {} = ?", column))
            .unwrap_or_default();
        let sql = format!(
            "UPDATE contacts SET {} = ?{}, metadata = ?, outdated_fields = ?, sync_status = ?, last_sync_at = ? WHERE id = ? AND user_id = ?",
            field.as_str(),
            confidence_clause
        );

        let mut query = sqlx::query(&sql).bind(resolution.value.clone());
        if field.confidence_column().is_some() {
            query = query.bind(contact.field_confidence.get(&field).copied());
        }
        query
            .bind(serde_json::to_string(&contact.metadata)?)
            .bind(serde_json::to_string(&contact.outdated_fields)?)
            .bind(contact.sync_status.as_str())
            .bind(format_timestamp(&now))
            .bind(contact_id.to_string())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(contact)
    }

    async fn insert_change_in(conn: &mut SqliteConnection, entry: &ChangeLogEntry) -> SyncResult<()> {
        sqlx::query(&format!(
            "INSERT INTO sync_change_log ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CHANGE_COLUMNS
        ))
        .bind(entry.id.to_string())
        .bind(entry.user_id.to_string())
        .bind(entry.contact_id.to_string())
        .bind(entry.field.as_str())
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(entry.confidence_before)
        .bind(entry.confidence_after)
        .bind(entry.change_source.as_str())
        .bind(entry.sync_status.as_str())
        .bind(entry.enrichment_job_id.map(|id| id.to_string()))
        .bind(&entry.error_message)
        .bind(entry.retry_of.map(|id| id.to_string()))
        .bind(format_timestamp(&entry.detected_at))
        .bind(entry.processed_at.as_ref().map(format_timestamp))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn insert_change_once(&self, entry: &ChangeLogEntry) -> SyncResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_change_in(&mut conn, entry).await
    }

    async fn log_changes_once(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        entries: &[ChangeLogEntry],
    ) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            Self::insert_change_in(&mut tx, entry).await?;
        }
        let fields: Vec<FieldName> = entries.iter().map(|e| e.field).collect();
        Self::mark_outdated_in(&mut tx, user_id, contact_id, &fields).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn claim_once(
        &self,
        user_id: Uuid,
        change_ids: &[Uuid],
        job_id: Uuid,
    ) -> SyncResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let mut claimed = Vec::new();

        for change_id in change_ids {
            let result = sqlx::query(
                r#"
                UPDATE sync_change_log
                SET sync_status = ?, enrichment_job_id = ?
                WHERE id = ? AND user_id = ? AND sync_status = ?
                "#,
            )
            .bind(ChangeStatus::Processing.as_str())
            .bind(job_id.to_string())
            .bind(change_id.to_string())
            .bind(user_id.to_string())
            .bind(ChangeStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                claimed.push(*change_id);
            }
        }

        tx.commit().await?;
        Ok(claimed)
    }

    async fn transition_once(
        &self,
        user_id: Uuid,
        change_id: Uuid,
        to: ChangeStatus,
        outcome: &ChangeOutcome,
    ) -> SyncResult<()> {
        let current: Option<String> = sqlx::query_scalar(
            "SELECT sync_status FROM sync_change_log WHERE id = ? AND user_id = ?",
        )
        .bind(change_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let current = current.ok_or_else(|| SyncError::NotFound(format!("change {}", change_id)))?;
        let from: ChangeStatus = parse_text(&current, "sync_change_log.sync_status")?;
        let invalid = || SyncError::InvalidTransition {
            id: change_id,
            from,
            to,
        };

        if !from.can_transition_to(to) {
            return Err(invalid());
        }

        let processed_at = to.is_terminal().then(|| format_timestamp(&Utc::now()));

        // Guarded on the status read above; a concurrent transition makes this a no-op
        let result = sqlx::query(
            r#"
            UPDATE sync_change_log SET
                sync_status = ?,
                confidence_after = COALESCE(?, confidence_after),
                error_message = COALESCE(?, error_message),
                processed_at = COALESCE(?, processed_at)
            WHERE id = ? AND user_id = ? AND sync_status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(outcome.confidence_after)
        .bind(&outcome.error_message)
        .bind(processed_at)
        .bind(change_id.to_string())
        .bind(user_id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(invalid());
        }
        Ok(())
    }

    async fn append_history_once(
        &self,
        user_id: Uuid,
        record: &FieldEnrichmentRecord,
    ) -> SyncResult<i64> {
        let metadata = serde_json::to_string(&record.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO field_enrichment_history (
                user_id, contact_id, field_name, enrichment_method, confidence_score,
                data_source, enriched_value, enrichment_metadata, enriched_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id.to_string())
        .bind(record.contact_id.to_string())
        .bind(record.field.as_str())
        .bind(&record.enrichment_method)
        .bind(record.confidence_score)
        .bind(&record.data_source)
        .bind(&record.enriched_value)
        .bind(&metadata)
        .bind(format_timestamp(&record.enriched_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn create_job_once(&self, job: &EnrichmentJob) -> SyncResult<()> {
        sqlx::query(&format!(
            "INSERT INTO enrichment_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ))
        .bind(job.id.to_string())
        .bind(job.user_id.to_string())
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.priority.as_str())
        .bind(&job.target_table)
        .bind(job.target_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&job.parameters)?)
        .bind(job.progress as i64)
        .bind(serde_json::to_string(&job.results)?)
        .bind(&job.error_message)
        .bind(format_timestamp(&job.created_at))
        .bind(job.started_at.as_ref().map(format_timestamp))
        .bind(job.completed_at.as_ref().map(format_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_job_once(&self, job: &EnrichmentJob) -> SyncResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE enrichment_jobs SET
                status = ?,
                progress = ?,
                results = ?,
                error_message = ?,
                started_at = ?,
                completed_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.progress.min(100) as i64)
        .bind(serde_json::to_string(&job.results)?)
        .bind(&job.error_message)
        .bind(job.started_at.as_ref().map(format_timestamp))
        .bind(job.completed_at.as_ref().map(format_timestamp))
        .bind(job.id.to_string())
        .bind(job.user_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("enrichment job {}", job.id)));
        }
        Ok(())
    }

    async fn record_run_once(
        &self,
        user_id: Uuid,
        job_id: Uuid,
        duration_ms: f64,
        succeeded: bool,
    ) -> SyncResult<SyncJob> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_jobs WHERE id = ? AND user_id = ?",
            SYNC_JOB_COLUMNS
        ))
        .bind(job_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let mut job = row
            .as_ref()
            .map(row_to_sync_job)
            .transpose()?
            .ok_or_else(|| SyncError::NotFound(format!("sync job {}", job_id)))?;

        job.total_runs += 1;
        if succeeded {
            job.successful_runs += 1;
        } else {
            job.failed_runs += 1;
        }
        job.avg_duration_ms += (duration_ms - job.avg_duration_ms) / job.total_runs as f64;
        job.last_run_at = Some(Utc::now());

        sqlx::query(
            r#"
            UPDATE sync_jobs SET
                total_runs = ?,
                successful_runs = ?,
                failed_runs = ?,
                avg_duration_ms = ?,
                last_run_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(job.total_runs as i64)
        .bind(job.successful_runs as i64)
        .bind(job.failed_runs as i64)
        .bind(job.avg_duration_ms)
        .bind(job.last_run_at.as_ref().map(format_timestamp))
        .bind(job_id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn insert_contact(&self, contact: &ContactRecord) -> SyncResult<()> {
        let score = |field: FieldName| contact.field_confidence.get(&field).copied();

        sqlx::query(&format!(
            "INSERT INTO contacts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CONTACT_COLUMNS
        ))
        .bind(contact.id.to_string())
        .bind(contact.user_id.to_string())
        .bind(&contact.username)
        .bind(&contact.bio)
        .bind(&contact.location)
        .bind(&contact.profile_url)
        .bind(&contact.email)
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(contact.confidence)
        .bind(score(FieldName::Email))
        .bind(score(FieldName::Name))
        .bind(score(FieldName::Bio))
        .bind(score(FieldName::Phone))
        .bind(score(FieldName::Location))
        .bind(score(FieldName::Username))
        .bind(serde_json::to_string(&contact.metadata)?)
        .bind(serde_json::to_string(&contact.outdated_fields)?)
        .bind(contact.sync_status.as_str())
        .bind(contact.last_sync_at.as_ref().map(format_timestamp))
        .bind(format_timestamp(&contact.created_at))
        .bind(format_timestamp(&contact.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_contact(&self, user_id: Uuid, contact_id: Uuid) -> SyncResult<Option<ContactRecord>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_contact_in(&mut conn, user_id, contact_id).await
    }

    async fn contacts_needing_sync(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<ContactRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM contacts
            WHERE user_id = ?
              AND updated_at >= ?
              AND (last_sync_at IS NULL OR last_sync_at < updated_at)
            ORDER BY updated_at
            "#,
            CONTACT_COLUMNS
        ))
        .bind(user_id.to_string())
        .bind(format_timestamp(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_contact).collect()
    }

    async fn update_contact_scores(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        update: &ContactScoreUpdate,
    ) -> SyncResult<()> {
        retry_on_lock("update_contact_scores", self.max_lock_wait_ms, || {
            self.update_scores_once(user_id, contact_id, update)
        })
        .await
    }

    async fn mark_fields_outdated(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        fields: &[FieldName],
    ) -> SyncResult<()> {
        retry_on_lock("mark_fields_outdated", self.max_lock_wait_ms, || {
            self.mark_outdated_once(user_id, contact_id, fields)
        })
        .await
    }

    async fn resolve_outdated_field(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        resolution: &FieldResolution,
    ) -> SyncResult<ContactRecord> {
        retry_on_lock("resolve_outdated_field", self.max_lock_wait_ms, || {
            self.resolve_field_once(user_id, contact_id, resolution)
        })
        .await
    }

    async fn insert_change(&self, user_id: Uuid, change: &NewChange) -> SyncResult<ChangeLogEntry> {
        let entry = pending_entry(user_id, change);

        retry_on_lock("insert_change", self.max_lock_wait_ms, || {
            self.insert_change_once(&entry)
        })
        .await?;

        Ok(entry)
    }

    async fn log_changes(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        changes: &[NewChange],
    ) -> SyncResult<Vec<ChangeLogEntry>> {
        if changes.iter().any(|c| c.contact_id != contact_id) {
            return Err(SyncError::Store(reach_common::Error::InvalidInput(format!(
                "change batch mixes contacts (expected {})",
                contact_id
            ))));
        }
        let entries: Vec<ChangeLogEntry> = changes.iter().map(|c| pending_entry(user_id, c)).collect();
        if entries.is_empty() {
            return Ok(entries);
        }

        retry_on_lock("log_changes", self.max_lock_wait_ms, || {
            self.log_changes_once(user_id, contact_id, &entries)
        })
        .await?;

        Ok(entries)
    }

    async fn get_change(&self, user_id: Uuid, change_id: Uuid) -> SyncResult<Option<ChangeLogEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_change_log WHERE id = ? AND user_id = ?",
            CHANGE_COLUMNS
        ))
        .bind(change_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_change).transpose()
    }

    async fn changes_for_contact(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        status: Option<ChangeStatus>,
    ) -> SyncResult<Vec<ChangeLogEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM sync_change_log
            WHERE user_id = ? AND contact_id = ? AND (? IS NULL OR sync_status = ?)
            ORDER BY detected_at, rowid
            "#,
            CHANGE_COLUMNS
        ))
        .bind(user_id.to_string())
        .bind(contact_id.to_string())
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_change).collect()
    }

    async fn changes_with_status(
        &self,
        user_id: Uuid,
        status: ChangeStatus,
    ) -> SyncResult<Vec<ChangeLogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sync_change_log WHERE user_id = ? AND sync_status = ? ORDER BY detected_at, rowid",
            CHANGE_COLUMNS
        ))
        .bind(user_id.to_string())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_change).collect()
    }

    async fn claim_changes(
        &self,
        user_id: Uuid,
        change_ids: &[Uuid],
        job_id: Uuid,
    ) -> SyncResult<Vec<Uuid>> {
        retry_on_lock("claim_changes", self.max_lock_wait_ms, || {
            self.claim_once(user_id, change_ids, job_id)
        })
        .await
    }

    async fn transition_change(
        &self,
        user_id: Uuid,
        change_id: Uuid,
        to: ChangeStatus,
        outcome: &ChangeOutcome,
    ) -> SyncResult<()> {
        retry_on_lock("transition_change", self.max_lock_wait_ms, || {
            self.transition_once(user_id, change_id, to, outcome)
        })
        .await
    }

    async fn append_enrichment_history(
        &self,
        user_id: Uuid,
        record: &FieldEnrichmentRecord,
    ) -> SyncResult<i64> {
        retry_on_lock("append_enrichment_history", self.max_lock_wait_ms, || {
            self.append_history_once(user_id, record)
        })
        .await
    }

    async fn enrichment_history(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
    ) -> SyncResult<Vec<FieldEnrichmentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT contact_id, field_name, enrichment_method, confidence_score, data_source,
                   enriched_value, enrichment_metadata, enriched_at
            FROM field_enrichment_history
            WHERE user_id = ? AND contact_id = ?
            ORDER BY id
            "#,
        )
        .bind(user_id.to_string())
        .bind(contact_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> SyncResult<FieldEnrichmentRecord> {
                let field: String = row.try_get("field_name")?;
                let metadata: String = row.try_get("enrichment_metadata")?;
                Ok(FieldEnrichmentRecord {
                    contact_id: uuid_col(row, "contact_id")?,
                    field: parse_text(&field, "field_enrichment_history.field_name")?,
                    enrichment_method: row.try_get("enrichment_method")?,
                    confidence_score: row.try_get("confidence_score")?,
                    data_source: row.try_get("data_source")?,
                    enriched_value: row.try_get("enriched_value")?,
                    metadata: serde_json::from_str(&metadata)?,
                    enriched_at: ts_col(row, "enriched_at")?,
                })
            })
            .collect()
    }

    async fn append_confidence_log(
        &self,
        user_id: Uuid,
        entry: &FieldConfidenceLogEntry,
    ) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO field_confidence_log (
                user_id, contact_id, field_name, confidence_score, method, source_type, logged_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id.to_string())
        .bind(entry.contact_id.to_string())
        .bind(entry.field.as_str())
        .bind(entry.confidence_score)
        .bind(&entry.method)
        .bind(&entry.source_type)
        .bind(format_timestamp(&entry.logged_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn confidence_log(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
    ) -> SyncResult<Vec<FieldConfidenceLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT contact_id, field_name, confidence_score, method, source_type, logged_at
            FROM field_confidence_log
            WHERE user_id = ? AND contact_id = ?
            ORDER BY id
            "#,
        )
        .bind(user_id.to_string())
        .bind(contact_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> SyncResult<FieldConfidenceLogEntry> {
                let field: String = row.try_get("field_name")?;
                Ok(FieldConfidenceLogEntry {
                    contact_id: uuid_col(row, "contact_id")?,
                    field: parse_text(&field, "field_confidence_log.field_name")?,
                    confidence_score: row.try_get("confidence_score")?,
                    method: row.try_get("method")?,
                    source_type: row.try_get("source_type")?,
                    logged_at: ts_col(row, "logged_at")?,
                })
            })
            .collect()
    }

    async fn create_enrichment_job(
        &self,
        user_id: Uuid,
        job: &NewEnrichmentJob,
    ) -> SyncResult<EnrichmentJob> {
        let record = EnrichmentJob {
            id: Uuid::new_v4(),
            user_id,
            job_type: job.job_type,
            status: JobStatus::Pending,
            priority: job.priority,
            target_table: job.target_table.clone(),
            target_id: job.target_id,
            parameters: job.parameters.clone(),
            progress: 0,
            results: serde_json::Value::Object(serde_json::Map::new()),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        retry_on_lock("create_enrichment_job", self.max_lock_wait_ms, || {
            self.create_job_once(&record)
        })
        .await?;

        tracing::debug!(
            job_id = %record.id,
            job_type = %record.job_type,
            priority = %record.priority,
            "Created enrichment job"
        );
        Ok(record)
    }

    async fn get_enrichment_job(
        &self,
        user_id: Uuid,
        job_id: Uuid,
    ) -> SyncResult<Option<EnrichmentJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM enrichment_jobs WHERE id = ? AND user_id = ?",
            JOB_COLUMNS
        ))
        .bind(job_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_enrichment_jobs(
        &self,
        user_id: Uuid,
        job_type: Option<JobType>,
    ) -> SyncResult<Vec<EnrichmentJob>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM enrichment_jobs
            WHERE user_id = ? AND (? IS NULL OR job_type = ?)
            ORDER BY created_at, rowid
            "#,
            JOB_COLUMNS
        ))
        .bind(user_id.to_string())
        .bind(job_type.map(|t| t.as_str()))
        .bind(job_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    async fn save_enrichment_job_state(&self, job: &EnrichmentJob) -> SyncResult<()> {
        retry_on_lock("save_enrichment_job_state", self.max_lock_wait_ms, || {
            self.save_job_once(job)
        })
        .await
    }

    async fn create_sync_job(
        &self,
        user_id: Uuid,
        name: &str,
        schedule: Option<&str>,
        days_back: u32,
    ) -> SyncResult<SyncJob> {
        let job = SyncJob {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            schedule: schedule.map(str::to_string),
            enabled: true,
            days_back,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            avg_duration_ms: 0.0,
            last_run_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(&format!(
            "INSERT INTO sync_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SYNC_JOB_COLUMNS
        ))
        .bind(job.id.to_string())
        .bind(user_id.to_string())
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(job.enabled)
        .bind(job.days_back as i64)
        .bind(0i64)
        .bind(0i64)
        .bind(0i64)
        .bind(0.0f64)
        .bind(Option::<String>::None)
        .bind(format_timestamp(&job.created_at))
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get_sync_job(&self, user_id: Uuid, job_id: Uuid) -> SyncResult<Option<SyncJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_jobs WHERE id = ? AND user_id = ?",
            SYNC_JOB_COLUMNS
        ))
        .bind(job_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_sync_job).transpose()
    }

    async fn record_sync_run(
        &self,
        user_id: Uuid,
        job_id: Uuid,
        duration_ms: f64,
        succeeded: bool,
    ) -> SyncResult<SyncJob> {
        retry_on_lock("record_sync_run", self.max_lock_wait_ms, || {
            self.record_run_once(user_id, job_id, duration_ms, succeeded)
        })
        .await
    }

    async fn sync_summary(&self, user_id: Uuid) -> SyncResult<SyncSummary> {
        let change_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT sync_status, COUNT(*) FROM sync_change_log WHERE user_id = ? GROUP BY sync_status",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let contact_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT sync_status, COUNT(*) FROM contacts WHERE user_id = ? GROUP BY sync_status",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let open_jobs: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM enrichment_jobs WHERE user_id = ? AND status IN (?, ?)",
        )
        .bind(user_id.to_string())
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(SyncSummary {
            changes_by_status: change_rows
                .into_iter()
                .map(|(status, n)| (status, n.max(0) as u64))
                .collect(),
            contacts_by_status: contact_rows
                .into_iter()
                .map(|(status, n)| (status, n.max(0) as u64))
                .collect(),
            open_jobs: open_jobs.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewChange;
    use crate::types::{ChangeSource, ConfidenceScore};
    use reach_common::db::open_in_memory;

    async fn store() -> SqliteSyncStore {
        SqliteSyncStore::new(open_in_memory().await.unwrap())
    }

    fn change(contact_id: Uuid, field: FieldName) -> NewChange {
        NewChange {
            contact_id,
            field,
            old_value: Some("old".to_string()),
            new_value: Some("new".to_string()),
            confidence_before: 0.5,
            source: ChangeSource::Import,
            retry_of: None,
        }
    }

    #[tokio::test]
    async fn test_contact_round_trip_preserves_metadata_extras() {
        let store = store().await;
        let user = Uuid::new_v4();
        let mut contact = ContactRecord::new(user)
            .with(FieldName::Email, "jane@acme.io")
            .with(FieldName::Name, "Jane Smith");
        contact.field_confidence.insert(FieldName::Email, 0.9);
        contact
            .metadata
            .extra
            .insert("crm_id".to_string(), serde_json::json!("abc-1"));

        store.insert_contact(&contact).await.unwrap();
        let loaded = store.get_contact(user, contact.id).await.unwrap().unwrap();

        assert_eq!(loaded.email.as_deref(), Some("jane@acme.io"));
        assert_eq!(loaded.field_confidence.get(&FieldName::Email), Some(&0.9));
        assert_eq!(loaded.metadata.extra["crm_id"], "abc-1");
        assert_eq!(loaded.sync_status, ContactSyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_other_users_rows_are_invisible() {
        let store = store().await;
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let contact = ContactRecord::new(owner).with(FieldName::Bio, "hello world");
        store.insert_contact(&contact).await.unwrap();

        assert!(store.get_contact(stranger, contact.id).await.unwrap().is_none());
        assert!(matches!(
            store
                .mark_fields_outdated(stranger, contact.id, &[FieldName::Bio])
                .await,
            Err(SyncError::NotFound(_))
        ));

        let entry = store.insert_change(owner, &change(contact.id, FieldName::Bio)).await.unwrap();
        assert!(store.get_change(stranger, entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_outdated_is_idempotent() {
        let store = store().await;
        let user = Uuid::new_v4();
        let contact = ContactRecord::new(user);
        store.insert_contact(&contact).await.unwrap();

        store
            .mark_fields_outdated(user, contact.id, &[FieldName::Bio, FieldName::Email])
            .await
            .unwrap();
        store
            .mark_fields_outdated(user, contact.id, &[FieldName::Bio])
            .await
            .unwrap();

        let loaded = store.get_contact(user, contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.outdated_fields, vec![FieldName::Bio, FieldName::Email]);
        assert_eq!(loaded.sync_status, ContactSyncStatus::Outdated);
        assert!(loaded.updated_at >= contact.updated_at);
    }

    #[tokio::test]
    async fn test_resolve_outdated_field_recomputes_status() {
        let store = store().await;
        let user = Uuid::new_v4();
        let contact = ContactRecord::new(user).with(FieldName::Email, "old@acme.io");
        store.insert_contact(&contact).await.unwrap();
        store
            .mark_fields_outdated(user, contact.id, &[FieldName::Bio, FieldName::Email])
            .await
            .unwrap();

        let resolution = FieldResolution {
            field: FieldName::Bio,
            value: Some("Fresh bio text".to_string()),
            score: Some(ConfidenceScore::new(0.8, "bio_enrichment")),
        };
        let partial = store
            .resolve_outdated_field(user, contact.id, &resolution)
            .await
            .unwrap();
        assert_eq!(partial.sync_status, ContactSyncStatus::Partial);
        assert_eq!(partial.outdated_fields, vec![FieldName::Email]);
        assert_eq!(partial.bio.as_deref(), Some("Fresh bio text"));
        assert!(partial.last_sync_at.is_some());

        let resolution = FieldResolution {
            field: FieldName::Email,
            value: Some("new@acme.io".to_string()),
            score: Some(ConfidenceScore::new(0.7, "email_enrichment")),
        };
        let synced = store
            .resolve_outdated_field(user, contact.id, &resolution)
            .await
            .unwrap();
        assert_eq!(synced.sync_status, ContactSyncStatus::Synced);
        assert!(synced.outdated_fields.is_empty());

        let loaded = store.get_contact(user, contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.metadata.confidence_scores[&FieldName::Bio].value, 0.8);
        assert_eq!(loaded.bio.as_deref(), Some("Fresh bio text"));
        assert_eq!(loaded.email.as_deref(), Some("new@acme.io"));
        // Column and metadata agree, so the next prior confidence is current
        assert_eq!(loaded.field_confidence.get(&FieldName::Email), Some(&0.7));
        assert_eq!(loaded.stored_confidence(FieldName::Email), Some(0.7));
    }

    #[tokio::test]
    async fn test_resolve_cleared_field_drops_value_and_score() {
        let store = store().await;
        let user = Uuid::new_v4();
        let mut contact = ContactRecord::new(user).with(FieldName::Phone, "+1 650-253-0000");
        contact.field_confidence.insert(FieldName::Phone, 0.9);
        contact
            .metadata
            .confidence_scores
            .insert(FieldName::Phone, ConfidenceScore::new(0.9, "phone_validation"));
        store.insert_contact(&contact).await.unwrap();
        store
            .mark_fields_outdated(user, contact.id, &[FieldName::Phone])
            .await
            .unwrap();

        let resolution = FieldResolution {
            field: FieldName::Phone,
            value: None,
            score: None,
        };
        store
            .resolve_outdated_field(user, contact.id, &resolution)
            .await
            .unwrap();

        let loaded = store.get_contact(user, contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.phone, None);
        assert!(loaded.field_confidence.get(&FieldName::Phone).is_none());
        assert!(!loaded.metadata.confidence_scores.contains_key(&FieldName::Phone));
        assert_eq!(loaded.sync_status, ContactSyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_log_changes_marks_fields_outdated() {
        let store = store().await;
        let user = Uuid::new_v4();
        let contact = ContactRecord::new(user);
        store.insert_contact(&contact).await.unwrap();

        let logged = store
            .log_changes(
                user,
                contact.id,
                &[change(contact.id, FieldName::Bio), change(contact.id, FieldName::Name)],
            )
            .await
            .unwrap();
        assert_eq!(logged.len(), 2);
        assert!(logged.iter().all(|e| e.sync_status == ChangeStatus::Pending));

        let loaded = store.get_contact(user, contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.outdated_fields, vec![FieldName::Bio, FieldName::Name]);
        assert_eq!(loaded.sync_status, ContactSyncStatus::Outdated);
    }

    #[tokio::test]
    async fn test_log_changes_rolls_back_when_contact_update_fails() {
        let store = store().await;
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let contact = ContactRecord::new(owner);
        store.insert_contact(&contact).await.unwrap();

        // Rows insert fine, but the contact is invisible to `stranger`
        let result = store
            .log_changes(stranger, contact.id, &[change(contact.id, FieldName::Bio)])
            .await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));

        for user in [owner, stranger] {
            assert!(store
                .changes_for_contact(user, contact.id, None)
                .await
                .unwrap()
                .is_empty());
        }
    }

    #[tokio::test]
    async fn test_change_transitions_are_forward_only() {
        let store = store().await;
        let user = Uuid::new_v4();
        let contact = ContactRecord::new(user);
        store.insert_contact(&contact).await.unwrap();
        let entry = store.insert_change(user, &change(contact.id, FieldName::Name)).await.unwrap();

        let skip = store
            .transition_change(user, entry.id, ChangeStatus::Completed, &ChangeOutcome::default())
            .await;
        assert!(matches!(skip, Err(SyncError::InvalidTransition { .. })));

        let job_id = Uuid::new_v4();
        assert_eq!(
            store.claim_changes(user, &[entry.id], job_id).await.unwrap(),
            vec![entry.id]
        );
        // Already processing: a second claim moves nothing
        assert!(store
            .claim_changes(user, &[entry.id], Uuid::new_v4())
            .await
            .unwrap()
            .is_empty());

        store
            .transition_change(
                user,
                entry.id,
                ChangeStatus::Completed,
                &ChangeOutcome {
                    confidence_after: Some(0.9),
                    error_message: None,
                },
            )
            .await
            .unwrap();

        let done = store.get_change(user, entry.id).await.unwrap().unwrap();
        assert_eq!(done.sync_status, ChangeStatus::Completed);
        assert_eq!(done.enrichment_job_id, Some(job_id));
        assert_eq!(done.confidence_after, Some(0.9));
        assert!(done.processed_at.is_some());

        let regress = store
            .transition_change(user, entry.id, ChangeStatus::Failed, &ChangeOutcome::default())
            .await;
        assert!(matches!(regress, Err(SyncError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_sync_run_statistics_use_incremental_mean() {
        let store = store().await;
        let user = Uuid::new_v4();
        let job = store.create_sync_job(user, "nightly", Some("0 3 * * *"), 7).await.unwrap();

        store.record_sync_run(user, job.id, 100.0, true).await.unwrap();
        store.record_sync_run(user, job.id, 200.0, false).await.unwrap();
        let after = store.record_sync_run(user, job.id, 300.0, true).await.unwrap();

        assert_eq!(after.total_runs, 3);
        assert_eq!(after.successful_runs, 2);
        assert_eq!(after.failed_runs, 1);
        assert!((after.avg_duration_ms - 200.0).abs() < 1e-9);

        let loaded = store.get_sync_job(user, job.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_runs, 3);
        assert!(loaded.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let store = store().await;
        let user = Uuid::new_v4();
        let contact = ContactRecord::new(user);
        store.insert_contact(&contact).await.unwrap();
        store.insert_change(user, &change(contact.id, FieldName::Name)).await.unwrap();
        store.insert_change(user, &change(contact.id, FieldName::Bio)).await.unwrap();

        let summary = store.sync_summary(user).await.unwrap();
        assert_eq!(summary.changes_by_status.get("pending"), Some(&2));
        assert_eq!(summary.contacts_by_status.get("synced"), Some(&1));
        assert_eq!(summary.open_jobs, 0);
    }
}
