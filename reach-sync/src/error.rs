//! Error types for reach-sync
//!
//! Validators never return errors: malformed input becomes a zero score.
//! Errors here come from capability lookups, persistence and state rules.

use crate::types::{ChangeStatus, FieldName, JobStatus};
use thiserror::Error;
use uuid::Uuid;

/// Sync engine error type
#[derive(Debug, Error)]
pub enum SyncError {
    /// Persistence failure (wraps reach-common error)
    #[error("Store error: {0}")]
    Store(#[from] reach_common::Error),

    /// External capability (DNS, geocoding) failed
    #[error("Lookup failed ({capability}): {reason}")]
    Lookup {
        capability: &'static str,
        reason: String,
    },

    /// External capability exceeded the configured timeout
    #[error("Lookup timed out ({capability}) after {timeout_ms} ms")]
    Timeout {
        capability: &'static str,
        timeout_ms: u64,
    },

    /// Field-specific enrichment could not produce a value
    #[error("Enrichment of {field} failed: {reason}")]
    Enrichment { field: FieldName, reason: String },

    /// Change-log entry asked to move backwards or out of a terminal state
    #[error("Invalid change transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: ChangeStatus,
        to: ChangeStatus,
    },

    /// Enrichment job already in a terminal state
    #[error("Enrichment job {id} is already {status}")]
    JobTerminal { id: Uuid, status: JobStatus },

    /// Job asked to finish with a non-final status
    #[error("Enrichment job {id} cannot finish as {status}")]
    InvalidJobOutcome { id: Uuid, status: JobStatus },

    /// Record missing or owned by another user
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Store(reach_common::Error::Database(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Store(reach_common::Error::Serialization(err))
    }
}

/// Result type for engine operations
pub type SyncResult<T> = Result<T, SyncError>;
