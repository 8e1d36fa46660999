//! Sync Manager
//!
//! Orchestrates one sync pass: detect pending changes, bucket them by
//! priority, enrich each bucket under one scoped job, then feed completed
//! contacts back through the confidence aggregator.
//!
//! Buckets run sequentially (high, normal, low). Changes inside a bucket run
//! concurrently and fail independently: one failed change never aborts the
//! rest of its bucket.

use super::change_detector::ChangeDetector;
use super::enricher::SmartEnricher;
use crate::confidence::ConfidenceAggregator;
use crate::error::{SyncError, SyncResult};
use crate::store::{ChangeLogEntry, ChangeOutcome, SyncStore, SyncSummary};
use crate::types::{ChangeStatus, FieldName, JobStatus, Priority};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Source label for re-scores triggered by a sync pass
pub const FEEDBACK_SOURCE: &str = "sync_feedback";

/// Prior confidence above which identity fields jump the queue
const HIGH_PRIORITY_CONFIDENCE: f64 = 0.7;

/// Prior confidence below which descriptive fields wait
const LOW_PRIORITY_CONFIDENCE: f64 = 0.5;

/// Bucket for one change
///
/// `high` for email/username with prior confidence above 0.7, `low` for
/// bio/location with prior confidence below 0.5, `normal` otherwise.
pub fn priority_for(field: FieldName, confidence_before: f64) -> Priority {
    match field {
        FieldName::Email | FieldName::Username if confidence_before > HIGH_PRIORITY_CONFIDENCE => {
            Priority::High
        }
        FieldName::Bio | FieldName::Location if confidence_before < LOW_PRIORITY_CONFIDENCE => {
            Priority::Low
        }
        _ => Priority::Normal,
    }
}

/// Split changes into priority buckets, preserving detection order
pub fn bucket_changes(changes: Vec<ChangeLogEntry>) -> BTreeMap<Priority, Vec<ChangeLogEntry>> {
    let mut buckets: BTreeMap<Priority, Vec<ChangeLogEntry>> = BTreeMap::new();
    for change in changes {
        buckets
            .entry(priority_for(change.field, change.confidence_before))
            .or_default()
            .push(change);
    }
    buckets
}

/// Outcome of one priority bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub priority: Priority,
    pub changes: usize,
    pub processed: usize,
    pub failed: usize,
    /// Changes another pass claimed first
    pub skipped: usize,
    /// `None` when the job could not be created
    pub job_id: Option<Uuid>,
}

/// Outcome of one `run_sync` pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRunStats {
    pub detected: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub buckets: Vec<BucketStats>,
    pub reenrichment_jobs_queued: usize,
    pub duration_ms: u64,
}

pub struct SyncManager {
    store: Arc<dyn SyncStore>,
    detector: ChangeDetector,
    enricher: SmartEnricher,
    aggregator: ConfidenceAggregator,
    default_days_back: u32,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn SyncStore>,
        detector: ChangeDetector,
        enricher: SmartEnricher,
        aggregator: ConfidenceAggregator,
    ) -> Self {
        Self {
            store,
            detector,
            enricher,
            aggregator,
            default_days_back: 7,
        }
    }

    /// Look-back window used when neither the caller nor the sync job sets one
    pub fn with_default_days_back(mut self, days_back: u32) -> Self {
        self.default_days_back = days_back;
        self
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn enricher(&self) -> &SmartEnricher {
        &self.enricher
    }

    pub fn aggregator(&self) -> &ConfidenceAggregator {
        &self.aggregator
    }

    /// Run one sync pass for `user_id`
    ///
    /// Only detection (and loading the named sync job) can fail the pass.
    /// Per-change, per-bucket, feedback and statistics failures are logged
    /// and reflected in the returned counts.
    pub async fn run_sync(
        &self,
        user_id: Uuid,
        sync_job_id: Option<Uuid>,
        days_back: Option<u32>,
    ) -> SyncResult<SyncRunStats> {
        let started = Instant::now();

        let sync_job = match sync_job_id {
            Some(id) => Some(
                self.store
                    .get_sync_job(user_id, id)
                    .await?
                    .ok_or_else(|| SyncError::NotFound(format!("sync job {}", id)))?,
            ),
            None => None,
        };
        let days_back = days_back
            .or_else(|| sync_job.as_ref().map(|job| job.days_back))
            .unwrap_or(self.default_days_back);

        let changes = self.detector.detect_changes(user_id, days_back).await?;
        let detected = changes.len();

        tracing::info!(
            user_id = %user_id,
            sync_job_id = ?sync_job_id,
            days_back,
            detected,
            "Sync pass started"
        );

        let mut buckets = bucket_changes(changes);
        let mut bucket_stats = Vec::new();
        let mut completed_contacts = BTreeSet::new();

        for priority in Priority::ORDER {
            let Some(bucket) = buckets.remove(&priority) else {
                continue;
            };
            let (stats, contacts) = self.process_bucket(user_id, priority, &bucket).await;
            completed_contacts.extend(contacts);
            bucket_stats.push(stats);
        }

        let mut reenrichment_jobs_queued = 0usize;
        for contact_id in &completed_contacts {
            match self
                .aggregator
                .score_contact(user_id, *contact_id, FEEDBACK_SOURCE)
                .await
            {
                Ok(report) => {
                    if report.reenrichment_job.is_some() {
                        reenrichment_jobs_queued += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        contact_id = %contact_id,
                        error = %e,
                        "Confidence feedback failed"
                    );
                }
            }
        }

        let processed = bucket_stats.iter().map(|b| b.processed).sum::<usize>();
        let failed = bucket_stats.iter().map(|b| b.failed).sum::<usize>();
        let skipped = bucket_stats.iter().map(|b| b.skipped).sum::<usize>();
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(job) = &sync_job {
            if let Err(e) = self
                .store
                .record_sync_run(user_id, job.id, duration_ms as f64, failed == 0)
                .await
            {
                tracing::warn!(sync_job_id = %job.id, error = %e, "Failed to record sync run");
            }
        }

        tracing::info!(
            user_id = %user_id,
            detected,
            processed,
            failed,
            skipped,
            reenrichment_jobs_queued,
            duration_ms,
            "Sync pass finished"
        );

        Ok(SyncRunStats {
            detected,
            processed,
            failed,
            skipped,
            buckets: bucket_stats,
            reenrichment_jobs_queued,
            duration_ms,
        })
    }

    /// Enrich one bucket under a single scoped job
    ///
    /// Only the changes the job claimed are enriched; the rest belong to a
    /// concurrent pass and are counted as skipped. Returns the bucket
    /// statistics and the contacts with at least one completed change.
    async fn process_bucket(
        &self,
        user_id: Uuid,
        priority: Priority,
        bucket: &[ChangeLogEntry],
    ) -> (BucketStats, BTreeSet<Uuid>) {
        let mut stats = BucketStats {
            priority,
            changes: bucket.len(),
            processed: 0,
            failed: 0,
            skipped: 0,
            job_id: None,
        };

        let scoped = match self
            .enricher
            .create_scoped_enrichment_job(user_id, bucket, priority)
            .await
        {
            Ok(scoped) => scoped,
            Err(e) => {
                tracing::error!(
                    priority = %priority,
                    changes = bucket.len(),
                    error = %e,
                    "Failed to create enrichment job for bucket"
                );
                stats.failed = bucket.len();
                return (stats, BTreeSet::new());
            }
        };
        let job = &scoped.job;
        stats.job_id = Some(job.id);
        stats.skipped = scoped.skipped.len();

        if let Err(e) = self.enricher.start_job(user_id, job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to mark job running");
        }

        let outcomes = join_all(
            scoped
                .claimed
                .iter()
                .map(|change| self.process_change(user_id, change)),
        )
        .await;

        let mut completed_contacts = BTreeSet::new();
        let mut failed_changes = Vec::new();
        for (change, ok) in scoped.claimed.iter().zip(outcomes) {
            if ok {
                stats.processed += 1;
                completed_contacts.insert(change.contact_id);
            } else {
                stats.failed += 1;
                failed_changes.push(change.id);
            }
        }

        let status = if stats.failed == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Partial
        };
        let results = json!({
            "processed": stats.processed,
            "failed": stats.failed,
            "skipped": stats.skipped,
            "failed_change_ids": failed_changes,
            "skipped_change_ids": scoped.skipped,
        });
        if let Err(e) = self
            .enricher
            .finish_job(user_id, job.id, status, results, None)
            .await
        {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to finish enrichment job");
        }

        (stats, completed_contacts)
    }

    /// Enrich one change and move it to its terminal state; `true` on success
    async fn process_change(&self, user_id: Uuid, change: &ChangeLogEntry) -> bool {
        let result = self
            .enricher
            .process_field_enrichment(
                user_id,
                change.contact_id,
                change.field,
                change.new_value.as_deref(),
            )
            .await;

        let (to, outcome) = match &result {
            Ok(enriched) => (
                ChangeStatus::Completed,
                ChangeOutcome {
                    confidence_after: Some(enriched.enrichment.confidence),
                    error_message: None,
                },
            ),
            Err(e) => {
                tracing::warn!(
                    change_id = %change.id,
                    contact_id = %change.contact_id,
                    field = %change.field,
                    error = %e,
                    "Field enrichment failed"
                );
                (
                    ChangeStatus::Failed,
                    ChangeOutcome {
                        confidence_after: None,
                        error_message: Some(e.to_string()),
                    },
                )
            }
        };

        match self
            .store
            .transition_change(user_id, change.id, to, &outcome)
            .await
        {
            Ok(()) => result.is_ok(),
            Err(e) => {
                tracing::warn!(
                    change_id = %change.id,
                    to = %to,
                    error = %e,
                    "Failed to record change outcome"
                );
                if to == ChangeStatus::Completed {
                    let fallback = ChangeOutcome {
                        confidence_after: None,
                        error_message: Some(e.to_string()),
                    };
                    if let Err(e) = self
                        .store
                        .transition_change(user_id, change.id, ChangeStatus::Failed, &fallback)
                        .await
                    {
                        tracing::warn!(change_id = %change.id, error = %e, "Failed to mark change failed");
                    }
                }
                false
            }
        }
    }

    /// Re-queue failed changes for the next pass
    pub async fn requeue_failed(&self, user_id: Uuid) -> SyncResult<Vec<ChangeLogEntry>> {
        self.detector.requeue_failed_changes(user_id).await
    }

    /// Change-log and contact status counts for dashboards
    pub async fn sync_summary(&self, user_id: Uuid) -> SyncResult<SyncSummary> {
        self.store.sync_summary(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rules() {
        assert_eq!(priority_for(FieldName::Email, 0.8), Priority::High);
        assert_eq!(priority_for(FieldName::Username, 0.71), Priority::High);
        assert_eq!(priority_for(FieldName::Email, 0.7), Priority::Normal);
        assert_eq!(priority_for(FieldName::Bio, 0.4), Priority::Low);
        assert_eq!(priority_for(FieldName::Location, 0.49), Priority::Low);
        assert_eq!(priority_for(FieldName::Location, 0.5), Priority::Normal);
        assert_eq!(priority_for(FieldName::Name, 0.9), Priority::Normal);
        assert_eq!(priority_for(FieldName::Phone, 0.1), Priority::Normal);
    }
}
