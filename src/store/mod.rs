//! Append-only result stores.
//!
//! Stores only ever add records. Duplicates across runs are expected and are
//! resolved at query time by the ranking selector.

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::model::{AdaptedSubmission, CanonicalResult};
use crate::normalize::{normalize_timestamp, validate_record};

mod directory;
mod sqlite;

pub use directory::DirectoryStore;
pub use sqlite::SqliteStore;

pub trait ResultStore {
    /// Appends every record of `submission`; returns a description of where
    /// they were written.
    fn append(&mut self, submission: &AdaptedSubmission) -> Result<String>;

    /// Every committed record that passes canonical validation.
    fn load_all(&self) -> Result<Vec<CanonicalResult>>;
}

impl ResultStore for Vec<CanonicalResult> {
    fn append(&mut self, submission: &AdaptedSubmission) -> Result<String> {
        self.extend(submission.results.iter().cloned());
        Ok(format!("memory[{}]", self.len()))
    }

    fn load_all(&self) -> Result<Vec<CanonicalResult>> {
        Ok(self.clone())
    }
}

/// A record read back from a store, with the location it came from.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub source: String,
    pub record: CanonicalResult,
}

/// Canonical records held by one stored document: either an adapted
/// submission (`results` array) or a single bare record. Timestamps are
/// rewritten to canonical form so every store orders them the same way.
/// Entries that fail to deserialize or validate are skipped with a warning.
pub(crate) fn records_from_document(source: &str, document: &Value) -> Vec<StoredRecord> {
    let entries = match document.get("results").and_then(Value::as_array) {
        Some(results) => results.iter().collect::<Vec<_>>(),
        None => vec![document],
    };

    let mut records = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let mut record = match serde_json::from_value::<CanonicalResult>(entry.clone()) {
            Ok(record) => record,
            Err(err) => {
                warn!(source, index, error = %err, "skipping non-canonical stored entry");
                continue;
            }
        };
        match normalize_timestamp(&record.timestamp) {
            Ok(timestamp) => record.timestamp = timestamp,
            Err(err) => {
                warn!(source, index, error = %err, "skipping stored record with invalid timestamp");
                continue;
            }
        }
        if let Err(err) = validate_record(&record) {
            warn!(source, index, error = %err, "skipping invalid stored record");
            continue;
        }
        records.push(StoredRecord {
            source: source.to_string(),
            record,
        });
    }

    records
}
