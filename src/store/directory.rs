use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use super::{ResultStore, StoredRecord, records_from_document};
use crate::model::{AdaptedSubmission, CanonicalResult};
use crate::util::{read_json_value, sha256_bytes, utc_compact_string, write_new_file};

const MAX_NAME_ATTEMPTS: usize = 1000;

/// One JSON file per adapter run under `root`. Files are created once and
/// never rewritten.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_entries(&self) -> Result<Vec<StoredRecord>> {
        let mut records = Vec::new();
        for path in self.result_files()? {
            let source = path.display().to_string();
            let document = match read_json_value(&path) {
                Ok(document) => document,
                Err(err) => {
                    warn!(path = %source, error = %format!("{err:#}"), "skipping unreadable result file");
                    continue;
                }
            };
            records.extend(records_from_document(&source, &document));
        }
        Ok(records)
    }

    /// Published result files in name order. Staging files are hidden and
    /// never listed.
    pub fn result_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            warn!(path = %self.root.display(), "results directory missing");
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to read {}", self.root.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", self.root.display()))?;
            let path = entry.path();

            if !entry
                .file_type()
                .with_context(|| format!("failed to inspect file type: {}", path.display()))?
                .is_file()
            {
                continue;
            }

            let visible_json = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.') && name.ends_with(".json"));
            if visible_json {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

impl ResultStore for DirectoryStore {
    fn append(&mut self, submission: &AdaptedSubmission) -> Result<String> {
        let mut data = serde_json::to_vec_pretty(submission)
            .context("failed to serialize submission for result store")?;
        data.push(b'\n');

        let stem = format!(
            "{}-{}",
            utc_compact_string(Utc::now()),
            &sha256_bytes(&data)[..12]
        );

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = match attempt {
                0 => format!("{stem}.json"),
                n => format!("{stem}-{n}.json"),
            };
            let path = self.root.join(file_name);

            if write_new_file(&path, &data)? {
                info!(
                    path = %path.display(),
                    records = submission.results.len(),
                    "appended results to store"
                );
                return Ok(path.display().to_string());
            }
        }

        bail!(
            "could not find a free result file name for {stem} in {}",
            self.root.display()
        )
    }

    fn load_all(&self) -> Result<Vec<CanonicalResult>> {
        Ok(self
            .load_entries()?
            .into_iter()
            .map(|stored| stored.record)
            .collect())
    }
}
