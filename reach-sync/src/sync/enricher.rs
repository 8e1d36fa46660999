//! Smart Enricher
//!
//! Turns batches of pending changes into scoped enrichment jobs and runs the
//! field-specific enrichment routine for each change.
//!
//! **Per-field routines:**
//! - bio: topics, lexicon sentiment, persona; confidence = bio score
//! - username: normalized handle, profile-scan request; confidence = username score
//! - location: geocode (0.95 / 0.85 / 0.75 / 0.6 by precision), else location score
//! - email: format + domain class; confidence = email score (0 when malformed)
//! - everything else: pass-through at 0.7
//!
//! Every attempt appends one `field_enrichment_history` row before the
//! contact is updated.

use super::profile_analysis::{classify_persona, extract_topics, sentiment};
use crate::error::{SyncError, SyncResult};
use crate::lookup::{GeocodePrecision, GeocodingService};
use crate::store::{
    ChangeLogEntry, ContactRecord, EnrichmentJob, FieldEnrichmentRecord, FieldResolution,
    NewEnrichmentJob, SyncStore,
};
use crate::types::{
    ChangeStatus, ConfidenceScore, DomainClass, EnrichmentMetadata, FieldName, JobParameters,
    JobStatus, JobType, Priority, ScopedChange,
};
use crate::validators::username::normalize_username;
use crate::validators::{ValidationDetails, ValidationResult, ValidatorRegistry};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Confidence assigned to fields without a dedicated routine
pub const PASS_THROUGH_CONFIDENCE: f64 = 0.7;

/// Data source recorded for enrichment driven by the change log
pub const SYNC_DATA_SOURCE: &str = "sync_change_log";

/// Enrichment capabilities a changed field calls for
pub fn enrichment_scope(field: FieldName) -> &'static [&'static str] {
    match field {
        FieldName::Email => &["email_verification", "domain_classification"],
        FieldName::Name => &["name_normalization"],
        FieldName::Bio => &["persona_analysis", "topic_extraction"],
        FieldName::Phone => &["phone_validation"],
        FieldName::Location => &["geocoding", "timezone_inference"],
        FieldName::Username => &["profile_scan", "social_verification"],
        FieldName::ProfileUrl => &["profile_scan"],
    }
}

/// Confidence of a geocoded location by hit precision
pub fn geocode_confidence(precision: GeocodePrecision) -> f64 {
    match precision {
        GeocodePrecision::Exact => 0.95,
        GeocodePrecision::Interpolated => 0.85,
        GeocodePrecision::AreaCenter => 0.75,
        GeocodePrecision::Approximate => 0.6,
    }
}

/// Result of one field-specific routine, before persistence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldEnrichment {
    pub field: FieldName,
    /// Trimmed new value; `None` when the change cleared the field
    pub value: Option<String>,
    pub confidence: f64,
    pub method: &'static str,
    pub metadata: EnrichmentMetadata,
}

/// Result of `process_field_enrichment`
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentOutcome {
    pub enrichment: FieldEnrichment,
    pub history_id: i64,
    /// Column value before the observed value was applied
    pub previous_value: Option<String>,
    pub contact: ContactRecord,
}

/// Job created for a batch of changes, with the entries it actually claimed
#[derive(Debug, Clone, Serialize)]
pub struct ScopedJob {
    pub job: EnrichmentJob,
    /// Entries now `processing` under `job`, in input order
    pub claimed: Vec<ChangeLogEntry>,
    /// Entries that were no longer `pending` (another pass owns them)
    pub skipped: Vec<Uuid>,
}

pub struct SmartEnricher {
    store: Arc<dyn SyncStore>,
    registry: ValidatorRegistry,
    geocoding: Option<Arc<GeocodingService>>,
}

impl SmartEnricher {
    pub fn new(
        store: Arc<dyn SyncStore>,
        registry: ValidatorRegistry,
        geocoding: Option<Arc<GeocodingService>>,
    ) -> Self {
        Self {
            store,
            registry,
            geocoding,
        }
    }

    // ========================================================================
    // Job creation
    // ========================================================================

    /// One `selective_field_enrichment` job for `changes`, claiming them
    ///
    /// Changes are grouped by contact and the scope is the sorted union of
    /// every changed field's scope tags. Claimed entries move to
    /// `processing` with the job id attached; only those may be enriched
    /// under this job.
    pub async fn create_scoped_enrichment_job(
        &self,
        user_id: Uuid,
        changes: &[ChangeLogEntry],
        priority: Priority,
    ) -> SyncResult<ScopedJob> {
        let mut changes_by_contact: BTreeMap<Uuid, Vec<ScopedChange>> = BTreeMap::new();
        let mut scope = BTreeSet::new();

        for change in changes {
            changes_by_contact
                .entry(change.contact_id)
                .or_default()
                .push(ScopedChange {
                    change_id: change.id,
                    field: change.field,
                    old_value: change.old_value.clone(),
                    new_value: change.new_value.clone(),
                    confidence_before: change.confidence_before,
                });
            scope.extend(enrichment_scope(change.field).iter().copied());
        }

        let job = self
            .store
            .create_enrichment_job(
                user_id,
                &NewEnrichmentJob {
                    job_type: JobType::SelectiveFieldEnrichment,
                    priority,
                    target_table: SYNC_DATA_SOURCE.to_string(),
                    target_id: None,
                    parameters: JobParameters::SelectiveFieldEnrichment {
                        changes_by_contact,
                        enrichment_scope: scope.into_iter().map(str::to_string).collect(),
                        priority,
                        change_count: changes.len(),
                    },
                },
            )
            .await?;

        let ids: Vec<Uuid> = changes.iter().map(|c| c.id).collect();
        let claimed_ids: HashSet<Uuid> = self
            .store
            .claim_changes(user_id, &ids, job.id)
            .await?
            .into_iter()
            .collect();

        let mut claimed = Vec::with_capacity(claimed_ids.len());
        let mut skipped = Vec::new();
        for change in changes {
            if claimed_ids.contains(&change.id) {
                let mut entry = change.clone();
                entry.sync_status = ChangeStatus::Processing;
                entry.enrichment_job_id = Some(job.id);
                claimed.push(entry);
            } else {
                skipped.push(change.id);
            }
        }

        if !skipped.is_empty() {
            tracing::info!(
                job_id = %job.id,
                skipped = skipped.len(),
                "Changes already claimed elsewhere; skipping"
            );
        }
        tracing::info!(
            job_id = %job.id,
            priority = %priority,
            changes = claimed.len(),
            "Created scoped enrichment job"
        );

        Ok(ScopedJob {
            job,
            claimed,
            skipped,
        })
    }

    // ========================================================================
    // Field enrichment
    // ========================================================================

    /// Run the field routine, append history, apply the observed value
    ///
    /// The change is the newest observation of the field, so its value
    /// replaces the stored one together with its score. A cleared value
    /// empties the column and drops the score.
    pub async fn process_field_enrichment(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        field: FieldName,
        new_value: Option<&str>,
    ) -> SyncResult<EnrichmentOutcome> {
        let contact = self
            .store
            .get_contact(user_id, contact_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("contact {}", contact_id)))?;

        let enrichment = self.enrich_field(field, new_value).await?;
        let now = Utc::now();

        let history_id = self
            .store
            .append_enrichment_history(
                user_id,
                &FieldEnrichmentRecord {
                    contact_id,
                    field,
                    enrichment_method: enrichment.method.to_string(),
                    confidence_score: enrichment.confidence,
                    data_source: SYNC_DATA_SOURCE.to_string(),
                    enriched_value: enrichment.value.clone(),
                    metadata: enrichment.metadata.clone(),
                    enriched_at: now,
                },
            )
            .await?;

        let score = match &enrichment.value {
            Some(_) => {
                let mut score = ConfidenceScore::new(enrichment.confidence, enrichment.method);
                score.timestamp = now;
                score.metadata = Some(serde_json::to_value(&enrichment.metadata)?);
                Some(score)
            }
            None => None,
        };
        let previous_value = contact.value(field).map(str::to_string);

        let contact = self
            .store
            .resolve_outdated_field(
                user_id,
                contact_id,
                &FieldResolution {
                    field,
                    value: enrichment.value.clone(),
                    score,
                },
            )
            .await?;

        tracing::debug!(
            contact_id = %contact_id,
            field = %field,
            confidence = enrichment.confidence,
            sync_status = %contact.sync_status,
            "Enriched field"
        );

        Ok(EnrichmentOutcome {
            enrichment,
            history_id,
            previous_value,
            contact,
        })
    }

    /// Field routine only; nothing is persisted
    pub async fn enrich_field(
        &self,
        field: FieldName,
        new_value: Option<&str>,
    ) -> SyncResult<FieldEnrichment> {
        let Some(value) = new_value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(FieldEnrichment {
                field,
                value: None,
                confidence: 0.0,
                method: "cleared",
                metadata: EnrichmentMetadata::PassThrough,
            });
        };

        let enrichment = match field {
            FieldName::Bio => self.enrich_bio(value).await?,
            FieldName::Username => self.enrich_username(value).await?,
            FieldName::Location => self.enrich_location(value).await?,
            FieldName::Email => self.enrich_email(value).await?,
            FieldName::Name | FieldName::Phone | FieldName::ProfileUrl => FieldEnrichment {
                field,
                value: Some(value.to_string()),
                confidence: PASS_THROUGH_CONFIDENCE,
                method: "pass_through",
                metadata: EnrichmentMetadata::PassThrough,
            },
        };
        Ok(enrichment)
    }

    async fn validate(&self, field: FieldName, value: &str) -> SyncResult<ValidationResult> {
        let validator = self.registry.get(field).ok_or_else(|| SyncError::Enrichment {
            field,
            reason: "no validator registered".to_string(),
        })?;
        Ok(validator.validate(value).await)
    }

    async fn enrich_bio(&self, bio: &str) -> SyncResult<FieldEnrichment> {
        let result = self.validate(FieldName::Bio, bio).await?;
        Ok(FieldEnrichment {
            field: FieldName::Bio,
            value: Some(bio.to_string()),
            confidence: result.score,
            method: "bio_analysis",
            metadata: EnrichmentMetadata::Bio {
                topics: extract_topics(bio),
                sentiment: sentiment(bio),
                persona: classify_persona(bio),
            },
        })
    }

    async fn enrich_username(&self, username: &str) -> SyncResult<FieldEnrichment> {
        let result = self.validate(FieldName::Username, username).await?;
        let normalized = match &result.details {
            Some(ValidationDetails::Username(details)) => details.normalized.clone(),
            _ => normalize_username(username),
        };

        Ok(FieldEnrichment {
            field: FieldName::Username,
            value: Some(username.to_string()),
            confidence: result.score,
            method: "profile_rescan",
            metadata: EnrichmentMetadata::Username {
                normalized,
                profile_scan_requested: result.is_valid,
                is_valid: result.is_valid,
            },
        })
    }

    async fn enrich_location(&self, location: &str) -> SyncResult<FieldEnrichment> {
        if let Some(geocoding) = &self.geocoding {
            match geocoding.lookup(location).await {
                Ok(Some(hit)) => {
                    return Ok(FieldEnrichment {
                        field: FieldName::Location,
                        value: Some(location.to_string()),
                        confidence: geocode_confidence(hit.precision),
                        method: "geocoding",
                        metadata: EnrichmentMetadata::Location {
                            formatted_address: Some(hit.formatted_address),
                            lat: Some(hit.lat),
                            lng: Some(hit.lng),
                            precision: Some(hit.precision.as_str().to_string()),
                        },
                    });
                }
                Ok(None) => {
                    tracing::debug!(location = %location, "No geocoding result");
                }
                Err(e) => {
                    tracing::warn!(
                        location = %location,
                        error = %e,
                        "Geocoding failed, falling back to text score"
                    );
                }
            }
        }

        let result = self.validate(FieldName::Location, location).await?;
        Ok(FieldEnrichment {
            field: FieldName::Location,
            value: Some(location.to_string()),
            confidence: result.score,
            method: "location_validation",
            metadata: EnrichmentMetadata::Location {
                formatted_address: None,
                lat: None,
                lng: None,
                precision: None,
            },
        })
    }

    async fn enrich_email(&self, email: &str) -> SyncResult<FieldEnrichment> {
        let result = self.validate(FieldName::Email, email).await?;

        let (domain, domain_class, format_valid) = match &result.details {
            Some(ValidationDetails::Email(details)) if details.format_valid => {
                let class = if details.disposable {
                    DomainClass::Disposable
                } else if details.common_domain {
                    DomainClass::Free
                } else {
                    DomainClass::Business
                };
                (details.domain.clone(), class, true)
            }
            _ => (None, DomainClass::Invalid, false),
        };

        Ok(FieldEnrichment {
            field: FieldName::Email,
            value: Some(email.to_string()),
            confidence: if format_valid { result.score } else { 0.0 },
            method: "email_classification",
            metadata: EnrichmentMetadata::Email {
                domain,
                domain_class,
                format_valid,
            },
        })
    }

    // ========================================================================
    // Job lifecycle
    // ========================================================================

    async fn load_open_job(&self, user_id: Uuid, job_id: Uuid) -> SyncResult<EnrichmentJob> {
        let job = self
            .store
            .get_enrichment_job(user_id, job_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("enrichment job {}", job_id)))?;

        if job.status.is_terminal() {
            return Err(SyncError::JobTerminal {
                id: job.id,
                status: job.status,
            });
        }
        Ok(job)
    }

    /// `pending` → `running`
    pub async fn start_job(&self, user_id: Uuid, job_id: Uuid) -> SyncResult<EnrichmentJob> {
        let mut job = self.load_open_job(user_id, job_id).await?;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            self.store.save_enrichment_job_state(&job).await?;
        }
        Ok(job)
    }

    /// Raise progress; never lowers it and clamps at 100
    pub async fn update_progress(
        &self,
        user_id: Uuid,
        job_id: Uuid,
        progress: u8,
    ) -> SyncResult<EnrichmentJob> {
        let mut job = self.load_open_job(user_id, job_id).await?;
        let progress = progress.min(100);
        if progress > job.progress {
            job.progress = progress;
            self.store.save_enrichment_job_state(&job).await?;
        }
        Ok(job)
    }

    /// Move a job to `completed`, `partial` or `failed`
    pub async fn finish_job(
        &self,
        user_id: Uuid,
        job_id: Uuid,
        status: JobStatus,
        results: serde_json::Value,
        error_message: Option<String>,
    ) -> SyncResult<EnrichmentJob> {
        if !matches!(
            status,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed
        ) {
            return Err(SyncError::InvalidJobOutcome { id: job_id, status });
        }

        let mut job = self.load_open_job(user_id, job_id).await?;
        let now = Utc::now();
        job.status = status;
        if status != JobStatus::Failed {
            job.progress = 100;
        }
        job.results = results;
        job.error_message = error_message;
        if job.started_at.is_none() {
            job.started_at = Some(now);
        }
        job.completed_at = Some(now);
        self.store.save_enrichment_job_state(&job).await?;

        tracing::info!(job_id = %job.id, status = %status, "Enrichment job finished");
        Ok(job)
    }

    pub async fn cancel_job(&self, user_id: Uuid, job_id: Uuid) -> SyncResult<EnrichmentJob> {
        let mut job = self.load_open_job(user_id, job_id).await?;
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        self.store.save_enrichment_job_state(&job).await?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_syncable_field_has_scope() {
        for field in FieldName::SYNCABLE {
            assert!(!enrichment_scope(field).is_empty(), "{}", field);
        }
        assert_eq!(
            enrichment_scope(FieldName::Bio),
            &["persona_analysis", "topic_extraction"]
        );
    }

    #[test]
    fn test_geocode_confidence_follows_precision() {
        assert_eq!(geocode_confidence(GeocodePrecision::Exact), 0.95);
        assert_eq!(geocode_confidence(GeocodePrecision::Interpolated), 0.85);
        assert_eq!(geocode_confidence(GeocodePrecision::AreaCenter), 0.75);
        assert_eq!(geocode_confidence(GeocodePrecision::Approximate), 0.6);
    }
}
