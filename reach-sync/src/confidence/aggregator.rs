//! Confidence Aggregator
//!
//! Scores every present field of a contact, combines the field scores into a
//! renormalized weighted average and queues a re-enrichment job when the
//! contact (or any single field) falls below its threshold.
//!
//! **Weights:** email 0.25, name 0.20, location 0.15, bio 0.15, phone 0.15,
//! username 0.10. Absent fields drop out of both numerator and denominator.
//!
//! **Re-enrichment:** `overall < 0.5` or any field below its own threshold
//! (email 0.5, name 0.6, location 0.4, bio 0.5, phone 0.6, username 0.5).

use crate::error::{SyncError, SyncResult};
use crate::store::{
    ContactRecord, ContactScoreUpdate, EnrichmentJob, FieldConfidenceLogEntry, NewEnrichmentJob,
    SyncStore,
};
use crate::types::{ConfidenceScore, FieldName, JobParameters, JobType, Priority};
use crate::validators::{ValidationResult, ValidatorRegistry};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Overall score below which a contact is always re-enriched
pub const OVERALL_REENRICH_THRESHOLD: f64 = 0.5;

/// Method label stored with the overall score
pub const OVERALL_METHOD: &str = "weighted_average";

/// Outcome of one `compute_confidence` call
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceReport {
    /// Contact as written back (scores and metadata applied)
    pub contact: ContactRecord,
    pub scores: BTreeMap<FieldName, ValidationResult>,
    pub overall: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reenrichment_job: Option<EnrichmentJob>,
}

/// Renormalized weighted average over the scored fields present in `scores`
///
/// Returns 0 when no weighted field is present.
pub fn overall_confidence(scores: &BTreeMap<FieldName, f64>) -> f64 {
    let (weighted, total_weight) = scores
        .iter()
        .filter_map(|(field, score)| field.weight().map(|w| (score * w, w)))
        .fold((0.0, 0.0), |(sum, weights), (value, w)| (sum + value, weights + w));

    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    }
}

/// Fields scoring under their own threshold, in weight order
pub fn fields_below_threshold(scores: &BTreeMap<FieldName, f64>) -> Vec<FieldName> {
    FieldName::SCORED
        .into_iter()
        .filter(|field| match (scores.get(field), field.reenrich_threshold()) {
            (Some(score), Some(threshold)) => *score < threshold,
            _ => false,
        })
        .collect()
}

/// `High` iff email is among the fields to re-enrich
pub fn reenrichment_priority(fields: &[FieldName]) -> Priority {
    if fields.contains(&FieldName::Email) {
        Priority::High
    } else {
        Priority::Normal
    }
}

pub struct ConfidenceAggregator {
    store: Arc<dyn SyncStore>,
    registry: ValidatorRegistry,
}

impl ConfidenceAggregator {
    pub fn new(store: Arc<dyn SyncStore>, registry: ValidatorRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Load a contact and score it
    pub async fn score_contact(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        source_type: &str,
    ) -> SyncResult<ConfidenceReport> {
        let contact = self
            .store
            .get_contact(user_id, contact_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("contact {}", contact_id)))?;

        self.compute_confidence(user_id, &contact, source_type).await
    }

    /// Validate all present fields concurrently
    pub async fn validate_fields(
        &self,
        contact: &ContactRecord,
    ) -> Vec<(FieldName, &'static str, ValidationResult)> {
        let tasks = FieldName::SCORED.into_iter().filter_map(|field| {
            let value = contact.present_value(field)?;
            let validator = self.registry.get(field)?.clone();
            Some(async move {
                let result = validator.validate(value).await;
                (field, validator.method(), result)
            })
        });

        join_all(tasks).await
    }

    /// Score, persist and (if needed) queue re-enrichment for one contact
    ///
    /// Confidence-log writes are advisory. The contact update and the job
    /// creation are primary and propagate their errors.
    pub async fn compute_confidence(
        &self,
        user_id: Uuid,
        contact: &ContactRecord,
        source_type: &str,
    ) -> SyncResult<ConfidenceReport> {
        let results = self.validate_fields(contact).await;

        let scores: BTreeMap<FieldName, f64> =
            results.iter().map(|(field, _, r)| (*field, r.score)).collect();
        let overall = overall_confidence(&scores);

        let now = Utc::now();
        for (field, method, result) in &results {
            let entry = FieldConfidenceLogEntry {
                contact_id: contact.id,
                field: *field,
                confidence_score: result.score,
                method: method.to_string(),
                source_type: source_type.to_string(),
                logged_at: now,
            };
            if let Err(e) = self.store.append_confidence_log(user_id, &entry).await {
                tracing::warn!(
                    contact_id = %contact.id,
                    field = %field,
                    error = %e,
                    "Failed to log field confidence"
                );
            }
        }

        let mut metadata = contact.metadata.clone();
        for field in FieldName::SCORED {
            metadata.confidence_scores.remove(&field);
        }
        for (field, method, result) in &results {
            let mut score = ConfidenceScore::new(result.score, *method);
            score.timestamp = now;
            score.metadata = result
                .details
                .as_ref()
                .and_then(|d| serde_json::to_value(d).ok());
            metadata.confidence_scores.insert(*field, score);
        }
        let mut overall_score = ConfidenceScore::new(overall, OVERALL_METHOD);
        overall_score.timestamp = now;
        metadata.overall = Some(overall_score);

        let update = ContactScoreUpdate {
            field_confidence: scores.clone(),
            overall,
            metadata,
        };
        self.store
            .update_contact_scores(user_id, contact.id, &update)
            .await?;

        let mut updated = contact.clone();
        updated.field_confidence = update.field_confidence;
        updated.confidence = Some(overall);
        updated.metadata = update.metadata;

        let below = fields_below_threshold(&scores);
        let reenrichment_job = if overall < OVERALL_REENRICH_THRESHOLD || !below.is_empty() {
            let priority = reenrichment_priority(&below);
            let job = self
                .store
                .create_enrichment_job(
                    user_id,
                    &NewEnrichmentJob {
                        job_type: JobType::ConfidenceReenrichment,
                        priority,
                        target_table: "contacts".to_string(),
                        target_id: Some(contact.id),
                        parameters: JobParameters::ConfidenceReenrichment {
                            fields_to_enrich: below.clone(),
                            priority,
                            source_type: source_type.to_string(),
                            overall_confidence: overall,
                        },
                    },
                )
                .await?;

            tracing::info!(
                contact_id = %contact.id,
                overall,
                fields = ?below,
                priority = %priority,
                "Queued confidence re-enrichment"
            );
            Some(job)
        } else {
            None
        };

        tracing::debug!(
            contact_id = %contact.id,
            fields_scored = results.len(),
            overall,
            "Computed contact confidence"
        );

        Ok(ConfidenceReport {
            contact: updated,
            scores: results.into_iter().map(|(f, _, r)| (f, r)).collect(),
            overall,
            reenrichment_job,
        })
    }
}
