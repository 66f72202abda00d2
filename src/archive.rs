use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::util::{ensure_directory, sha256_hex, to_json_pretty_bytes, utc_object_key_prefix, write_bytes};

pub const DEFAULT_BUCKET: &str = "reports";
pub const TASK_METADATA_OBJECT: &str = "task_metadata.json";

#[derive(Debug, Clone, Serialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct RunArchive {
    root: PathBuf,
    bucket: String,
}

impl RunArchive {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn bucket_path(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    pub fn ensure_bucket(&self) -> Result<()> {
        let bucket_path = self.bucket_path();
        if bucket_path.is_dir() {
            info!(bucket = %self.bucket, "bucket already exists");
            return Ok(());
        }

        info!(bucket = %self.bucket, "bucket not found, creating it");
        ensure_directory(&bucket_path)
            .with_context(|| format!("failed to create bucket '{}'", self.bucket))?;
        info!(bucket = %self.bucket, path = %bucket_path.display(), "bucket created");
        Ok(())
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<StoredObject> {
        self.ensure_bucket()?;

        let data = to_json_pretty_bytes(value)
            .with_context(|| format!("failed to serialize object {key}"))?;
        let path = self.bucket_path().join(key);
        write_bytes(&path, &data)?;

        Ok(StoredObject {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            path,
            size_bytes: data.len(),
            sha256: sha256_hex(&data),
        })
    }

    pub fn put_task_metadata<T: Serialize>(
        &self,
        at: DateTime<Utc>,
        value: &T,
    ) -> Result<StoredObject> {
        let key = format!("{}/{TASK_METADATA_OBJECT}", utc_object_key_prefix(at));
        let stored = self.put_json(&key, value)?;
        info!(
            bucket = %stored.bucket,
            key = %stored.key,
            bytes = stored.size_bytes,
            sha256 = %stored.sha256,
            "uploaded run metadata"
        );
        Ok(stored)
    }

    pub fn latest_key(&self) -> Result<Option<String>> {
        let bucket_path = self.bucket_path();
        if !bucket_path.is_dir() {
            return Ok(None);
        }

        let mut prefixes = Vec::<String>::new();
        let entries = fs::read_dir(&bucket_path)
            .with_context(|| format!("failed to read {}", bucket_path.display()))?;
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to read entry in {}", bucket_path.display()))?;
            let has_metadata = entry.path().join(TASK_METADATA_OBJECT).is_file();
            if let (true, Some(name)) = (has_metadata, entry.file_name().to_str()) {
                prefixes.push(name.to_string());
            }
        }

        prefixes.sort();
        Ok(prefixes
            .pop()
            .map(|prefix| format!("{prefix}/{TASK_METADATA_OBJECT}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn put_task_metadata_writes_under_timestamped_key() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RunArchive::new(dir.path(), DEFAULT_BUCKET);
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap();

        let stored = archive
            .put_task_metadata(at, &serde_json::json!([{"task_name": "scrape_pisos"}]))
            .unwrap();

        assert_eq!(stored.key, "2025-06-01T08-30-00Z/task_metadata.json");
        assert_eq!(stored.path, dir.path().join(DEFAULT_BUCKET).join(&stored.key));
        let written = fs::read(&stored.path).unwrap();
        assert_eq!(written.len(), stored.size_bytes);
        assert_eq!(sha256_hex(&written), stored.sha256);

        let parsed: serde_json::Value = serde_json::from_slice(&written).unwrap();
        assert_eq!(parsed[0]["task_name"], "scrape_pisos");
    }

    #[test]
    fn latest_key_picks_most_recent_run() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RunArchive::new(dir.path(), "runs");
        assert_eq!(archive.latest_key().unwrap(), None);

        let earlier = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        archive.put_task_metadata(later, &1).unwrap();
        archive.put_task_metadata(earlier, &2).unwrap();

        assert_eq!(
            archive.latest_key().unwrap().as_deref(),
            Some("2025-02-01T00-00-00Z/task_metadata.json")
        );
    }
}
