//! Change Detector
//!
//! Owns the `sync_change_log` state machine entry point: new deltas are
//! appended as `pending`, and failed entries are re-queued by appending a
//! fresh `pending` copy (entries themselves never move backwards).

use crate::error::SyncResult;
use crate::store::{ChangeLogEntry, ContactRecord, NewChange, SyncStore};
use crate::types::{ChangeSource, ChangeStatus, FieldName};
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Prior confidence assumed for a field that was never scored
pub const DEFAULT_CONFIDENCE_BEFORE: f64 = 0.5;

/// Incoming field values; a missing key means "not provided"
pub type FieldUpdates = BTreeMap<FieldName, Option<String>>;

/// Trimmed value, `None` when blank
fn normalized(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct ChangeDetector {
    store: Arc<dyn SyncStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// Pending entries of every contact updated in the last `days_back` days
    /// and not synced since
    pub async fn detect_changes(&self, user_id: Uuid, days_back: u32) -> SyncResult<Vec<ChangeLogEntry>> {
        let since = Utc::now() - Duration::days(i64::from(days_back));
        let contacts = self.store.contacts_needing_sync(user_id, since).await?;

        tracing::debug!(
            user_id = %user_id,
            days_back,
            contacts = contacts.len(),
            "Scanning contacts for pending changes"
        );

        let per_contact = join_all(
            contacts
                .iter()
                .map(|contact| self.detect_contact_changes(user_id, contact.id)),
        )
        .await;

        let mut changes = Vec::new();
        for result in per_contact {
            changes.extend(result?);
        }
        Ok(changes)
    }

    /// Already-logged pending entries of one contact
    pub async fn detect_contact_changes(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
    ) -> SyncResult<Vec<ChangeLogEntry>> {
        self.store
            .changes_for_contact(user_id, contact_id, Some(ChangeStatus::Pending))
            .await
    }

    /// Log one `pending` entry per syncable field whose value differs
    ///
    /// Fields missing from `incoming`, unchanged fields and fields empty on
    /// both sides are skipped. The entries and the contact's outdated marking
    /// commit together.
    pub async fn compare_and_log_changes(
        &self,
        user_id: Uuid,
        current: &ContactRecord,
        incoming: &FieldUpdates,
        source: ChangeSource,
    ) -> SyncResult<Vec<ChangeLogEntry>> {
        let mut changes = Vec::new();

        for field in FieldName::SYNCABLE {
            let Some(new_value) = incoming.get(&field) else {
                continue;
            };
            let old = normalized(current.value(field));
            let new = normalized(new_value.as_deref());
            if old == new {
                continue;
            }

            changes.push(NewChange {
                contact_id: current.id,
                field,
                old_value: old.map(str::to_string),
                new_value: new.map(str::to_string),
                confidence_before: current
                    .stored_confidence(field)
                    .unwrap_or(DEFAULT_CONFIDENCE_BEFORE),
                source,
                retry_of: None,
            });
        }

        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let logged = self.store.log_changes(user_id, current.id, &changes).await?;
        let fields: Vec<FieldName> = logged.iter().map(|c| c.field).collect();
        tracing::info!(
            contact_id = %current.id,
            source = %source,
            fields = ?fields,
            "Logged field changes"
        );

        Ok(logged)
    }

    /// Append a fresh `pending` copy of every failed entry not yet re-queued
    pub async fn requeue_failed_changes(&self, user_id: Uuid) -> SyncResult<Vec<ChangeLogEntry>> {
        let mut requeued_ids = HashSet::new();
        let mut failed = Vec::new();
        for status in [
            ChangeStatus::Pending,
            ChangeStatus::Processing,
            ChangeStatus::Completed,
            ChangeStatus::Failed,
        ] {
            let entries = self.store.changes_with_status(user_id, status).await?;
            requeued_ids.extend(entries.iter().filter_map(|e| e.retry_of));
            if status == ChangeStatus::Failed {
                failed = entries;
            }
        }

        let mut requeued = Vec::new();
        for entry in failed.iter().filter(|e| !requeued_ids.contains(&e.id)) {
            let retry = NewChange {
                contact_id: entry.contact_id,
                field: entry.field,
                old_value: entry.old_value.clone(),
                new_value: entry.new_value.clone(),
                confidence_before: entry.confidence_before,
                source: entry.change_source,
                retry_of: Some(entry.id),
            };
            let created = self
                .store
                .log_changes(user_id, entry.contact_id, &[retry])
                .await?;
            requeued.extend(created);
        }

        if !requeued.is_empty() {
            tracing::info!(user_id = %user_id, count = requeued.len(), "Re-queued failed changes");
        }
        Ok(requeued)
    }
}
