//! Change detection, enrichment and sync orchestration

pub mod change_detector;
pub mod enricher;
pub mod manager;
pub mod profile_analysis;

pub use change_detector::{ChangeDetector, FieldUpdates};
pub use enricher::{enrichment_scope, EnrichmentOutcome, FieldEnrichment, ScopedJob, SmartEnricher};
pub use manager::{priority_for, BucketStats, SyncManager, SyncRunStats};
