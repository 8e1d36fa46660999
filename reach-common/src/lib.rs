//! # Reach Common Library
//!
//! Shared code for the Reach contact-intelligence services:
//! - Error type shared by every crate
//! - Bootstrap configuration (TOML + environment)
//! - Database initialization and schema

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;

pub use error::{Error, Result};
