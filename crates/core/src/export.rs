//! Annotation export and validated import
//!
//! Exports are JSON documents of the form
//!
//! ```json
//! { "version": "1.0", "timestamp": 1718000000000, "annotations": [ ... ] }
//! ```
//!
//! Imports are validated in full before the store is touched, so a bad file
//! never leaves a partial import behind.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::annotation::{Annotation, AnnotationError, AnnotationId};
use crate::annotation_store::{unix_millis, AnnotationStore};

/// Format version written by this crate
pub const EXPORT_VERSION: &str = "1.0";

/// Major version this crate can read
pub const SUPPORTED_MAJOR: u32 = 1;

/// Allowed clock skew for export timestamps in the future
pub const MAX_FUTURE_SKEW_MS: i64 = 24 * 60 * 60 * 1000;

/// Serialized annotation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationExport {
    pub version: String,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    pub annotations: Vec<Annotation>,
}

impl AnnotationExport {
    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Counts for display
    pub fn summary(&self) -> ExportSummary {
        let mut kinds = BTreeMap::new();
        for annotation in &self.annotations {
            *kinds.entry(annotation.kind.to_string()).or_insert(0) += 1;
        }
        ExportSummary {
            version: self.version.clone(),
            annotations: self.annotations.len(),
            kinds,
        }
    }
}

/// Short description of an export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub version: String,
    pub annotations: usize,
    pub kinds: BTreeMap<String, usize>,
}

/// Reasons an import is rejected
#[derive(Debug, thiserror::Error)]
pub enum ImportValidationError {
    #[error("malformed export: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("could not read export: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid version {0:?}, expected MAJOR.MINOR")]
    MalformedVersion(String),

    #[error("unsupported export version {found} (supported major version: {supported})")]
    UnsupportedVersion { found: String, supported: u32 },

    #[error("invalid timestamp {0}: negative or too far in the future")]
    InvalidTimestamp(i64),

    #[error("annotation {index} ({id}) is invalid: {source}")]
    InvalidAnnotation {
        index: usize,
        id: AnnotationId,
        #[source]
        source: AnnotationError,
    },

    #[error("annotation id {0} appears more than once")]
    DuplicateId(AnnotationId),
}

/// Exports store contents and imports validated exports
#[derive(Debug, Clone, Default)]
pub struct ExportImportManager {
    /// Fixed clock for validation, milliseconds since the epoch
    now: Option<i64>,
}

impl ExportImportManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate timestamps against a fixed clock instead of the system time
    pub fn with_clock(mut self, now_millis: i64) -> Self {
        self.now = Some(now_millis);
        self
    }

    /// Snapshot the store's current annotations
    pub fn export(&self, store: &AnnotationStore) -> AnnotationExport {
        AnnotationExport {
            version: EXPORT_VERSION.to_string(),
            timestamp: self.now(),
            annotations: store.annotations(),
        }
    }

    /// Parse and validate an export document
    pub fn import_json(&self, text: &str) -> Result<AnnotationExport, ImportValidationError> {
        let export: AnnotationExport = serde_json::from_str(text)?;
        self.validate(&export)?;
        Ok(export)
    }

    /// Read, parse and validate an export file
    pub fn import_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<AnnotationExport, ImportValidationError> {
        let text = std::fs::read_to_string(path)?;
        self.import_json(&text)
    }

    /// Check version, timestamp and every annotation
    pub fn validate(&self, export: &AnnotationExport) -> Result<(), ImportValidationError> {
        let major = parse_version(&export.version)?;
        if major != SUPPORTED_MAJOR {
            return Err(ImportValidationError::UnsupportedVersion {
                found: export.version.clone(),
                supported: SUPPORTED_MAJOR,
            });
        }

        let latest = self.now().saturating_add(MAX_FUTURE_SKEW_MS);
        if export.timestamp < 0 || export.timestamp > latest {
            return Err(ImportValidationError::InvalidTimestamp(export.timestamp));
        }

        let mut seen = HashSet::with_capacity(export.annotations.len());
        for (index, annotation) in export.annotations.iter().enumerate() {
            annotation
                .validate()
                .map_err(|source| ImportValidationError::InvalidAnnotation {
                    index,
                    id: annotation.id,
                    source,
                })?;
            if !seen.insert(annotation.id) {
                return Err(ImportValidationError::DuplicateId(annotation.id));
            }
        }
        Ok(())
    }

    /// Validate, then replace the store's annotations as one undoable step
    ///
    /// Returns the number of imported annotations.
    pub fn apply(
        &self,
        store: &AnnotationStore,
        export: AnnotationExport,
    ) -> Result<usize, ImportValidationError> {
        self.validate(&export)?;
        let count = export.annotations.len();
        store
            .replace_all(export.annotations)
            .map_err(|source| match source {
                AnnotationError::DuplicateId(id) => ImportValidationError::DuplicateId(id),
                other => ImportValidationError::InvalidAnnotation {
                    index: 0,
                    id: AnnotationId::nil(),
                    source: other,
                },
            })?;
        info!(count, "imported annotations");
        Ok(count)
    }

    fn now(&self) -> i64 {
        self.now.unwrap_or_else(|| unix_millis() as i64)
    }
}

/// Major component of a `MAJOR.MINOR` version
fn parse_version(version: &str) -> Result<u32, ImportValidationError> {
    let malformed = || ImportValidationError::MalformedVersion(version.to_string());
    let (major, minor) = version.split_once('.').ok_or_else(malformed)?;
    let is_number = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !is_number(major) || !is_number(minor) {
        return Err(malformed());
    }
    major.parse().map_err(|_| malformed())
}
