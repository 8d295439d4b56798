//! Storage Layer
//!
//! Read-only gateway to the reference store holding known plate records.
//! The core never writes; records are adapted into the shape the match
//! policy consumes.

pub mod database;

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::analysis::normalize::NormalizedKey;

pub use database::SqliteStore;

/// A known (identifier, region, holder) triple from the reference store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceRecord {
    /// Plate identifier (normalized)
    #[serde(rename = "plate_number")]
    pub identifier: NormalizedKey,
    /// Registration region, e.g. the province (normalized)
    #[serde(rename = "province")]
    pub region: NormalizedKey,
    /// Registered holder of the plate
    #[serde(rename = "owner_name")]
    pub holder: String,
}

impl ReferenceRecord {
    pub fn new(identifier: NormalizedKey, region: NormalizedKey, holder: impl Into<String>) -> Self {
        Self {
            identifier,
            region,
            holder: holder.into(),
        }
    }
}

/// Failures at the store boundary
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or opened
    #[error("reference store unavailable: {0}")]
    Unavailable(String),
    /// The store was reachable but a query failed
    #[error("reference store query failed: {0}")]
    Query(String),
}

/// Read-only access to reference records
pub trait ReferenceStore {
    /// Every record, in the store's stable iteration order
    fn all_records(&self) -> Result<Vec<ReferenceRecord>, StoreError>;

    /// Records whose normalized identifier contains `identifier`. Stored
    /// plates may carry spacing or punctuation, so the comparison happens on
    /// normalized keys rather than in the backend. An empty key is rejected.
    fn records_for(&self, identifier: &NormalizedKey) -> Result<Vec<ReferenceRecord>, StoreError> {
        if identifier.is_empty() {
            return Err(StoreError::Query("empty plate number".to_string()));
        }
        Ok(self
            .all_records()?
            .into_iter()
            .filter(|r| r.identifier.as_str().contains(identifier.as_str()))
            .collect())
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "plateverifier", "PlateVerifier")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
