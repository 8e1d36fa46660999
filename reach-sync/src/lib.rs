//! # reach-sync
//!
//! Confidence scoring and incremental sync engine for contact records.
//!
//! - `validators`: per-field scorers (email, name, bio, phone, username, location)
//! - `confidence`: weighted aggregation, merge strategies, re-enrichment triggers
//! - `sync`: change detection, scoped enrichment, priority-bucketed sync passes
//! - `store`: persistence port and its SQLite implementation
//! - `lookup`: external capability ports (MX, geocoding, disposable domains)

pub mod confidence;
pub mod error;
pub mod lookup;
pub mod store;
pub mod sync;
pub mod types;
pub mod utils;
pub mod validators;

pub use crate::error::{SyncError, SyncResult};
