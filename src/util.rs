use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha256_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Loads a raw JSON document without interpreting it.
pub fn read_json_value(path: &Path) -> Result<Value> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// Writes `data` to `path` only if nothing exists there yet.
///
/// The bytes land in a hidden staging file first and are then hard-linked
/// into place, so readers never observe a partially written file. Returns
/// `Ok(false)` when the path is already taken.
pub fn write_new_file(path: &Path, data: &[u8]) -> Result<bool> {
    let parent = path
        .parent()
        .with_context(|| format!("path has no parent directory: {}", path.display()))?;
    ensure_directory(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid file name: {}", path.display()))?;
    let staging_path = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));

    let linked = write_staging_file(&staging_path, data).and_then(|()| {
        match fs::hard_link(&staging_path, path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to publish {}", path.display())),
        }
    });

    match fs::remove_file(&staging_path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) if linked.is_err() => {
            warn!(path = %staging_path.display(), error = %err, "failed to remove staging file");
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to remove {}", staging_path.display()));
        }
    }

    linked
}

fn write_staging_file(staging_path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(staging_path)
        .with_context(|| format!("failed to create {}", staging_path.display()))?;
    file.write_all(data)
        .with_context(|| format!("failed to write {}", staging_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", staging_path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn directory_entries(path: &Path) -> Vec<String> {
        fs::read_dir(path)
            .expect("directory should be readable")
            .map(|entry| {
                entry
                    .expect("entry should be readable")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn new_file_is_published_once_without_staging_leftovers() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("run.json");

        assert!(write_new_file(&path, b"first").expect("first write"));
        assert!(!write_new_file(&path, b"second").expect("second write"));

        assert_eq!(fs::read(&path).expect("published file"), b"first");
        assert_eq!(directory_entries(dir.path()), vec!["run.json"]);
    }

    #[test]
    fn taken_directory_path_leaves_no_staging_file() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let taken = dir.path().join("taken");
        fs::create_dir(&taken).expect("directory should be created");

        assert!(!write_new_file(&taken, b"data").expect("taken path"));
        assert_eq!(directory_entries(dir.path()), vec!["taken"]);
    }
}
