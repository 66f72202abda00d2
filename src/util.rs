use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn utc_object_key_prefix(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn ensure_parent_directory(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_directory(parent),
        _ => Ok(()),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn to_json_pretty_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut data = serde_json::to_vec_pretty(value).context("failed to serialize json")?;
    data.push(b'\n');
    Ok(data)
}

pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    ensure_parent_directory(path)?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create file: {}", path.display()))?;
    file.write_all(data)
        .with_context(|| format!("failed to write file: {}", path.display()))?;

    Ok(())
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = to_json_pretty_bytes(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;
    write_bytes(path, &data)
}
