//! File system storage adapter.
//!
//! Each key is stored as one JSON file:
//! ```text
//! {root}/
//! ├── agent%3Aresearcher.json
//! ├── task%3Awf-1%3Afetch.json
//! └── workflow%3Awf-1.json
//! ```
//! Characters outside `[A-Za-z0-9._-]` are percent-encoded in file names.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use agentweave_protocols::{StateError, StorageAdapter};

use crate::pattern::KeyPattern;

const EXTENSION: &str = "json";

pub struct FileStorageAdapter {
    root: PathBuf,
}

impl FileStorageAdapter {
    /// Open (and create if needed) a storage directory.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StateError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("FileStorageAdapter initialized at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", encode_key(key), EXTENSION))
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl StorageAdapter for FileStorageAdapter {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StateError> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StateError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&value)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StateError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>, StateError> {
        let pattern = KeyPattern::new(pattern)?;
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_key(stem) {
                Some(key) if pattern.matches(&key) => keys.push(key),
                Some(_) => {}
                None => warn!("Ignoring undecodable state file {:?}", path),
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
