//! File-based state storage backend.
//!
//! Each record lives in its own JSON file under the base directory, so
//! writes for different logical names never touch the same file. A
//! per-name lock table serializes concurrent access to the same name;
//! writes go through a temp file and rename so readers never observe a
//! half-written record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StateError;

use super::record::StateRecord;
use super::store::{StateStore, StoreResult};

/// File extension for record files.
const RECORD_EXT: &str = "json";

/// File-based state store with one file per logical name.
#[derive(Debug)]
pub struct FileStateStore {
    base_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileStateStore {
    /// Creates a store rooted at `base_dir`. The directory is created
    /// on first write.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the record file for a logical name.
    ///
    /// Logical names may contain characters that are hostile to file
    /// systems, so the name is sanitized and suffixed with a short hash
    /// of the original to keep distinct names distinct.
    fn record_path(&self, name: &str) -> PathBuf {
        let sanitized: String = name
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        let tag: String = digest.chars().take(8).collect();
        self.base_dir
            .join(format!("{sanitized}-{tag}"))
            .with_extension(RECORD_EXT)
    }

    /// Returns the lock guarding a logical name, creating it on first
    /// use.
    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn ensure_dir(&self) -> StoreResult<()> {
        if !self.base_dir.exists() {
            debug!("creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::backend(format!("failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    async fn read_record(&self, path: &PathBuf) -> StoreResult<Option<StateRecord>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StateError::corrupted(format!("failed to read record file: {e}")))?;

        let record: StateRecord = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("failed to parse record file: {e}")))?;

        Ok(Some(record))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, name: &str) -> StoreResult<Option<StateRecord>> {
        let lock = self.lock_for(name).await;
        let _guard = lock.lock().await;
        self.read_record(&self.record_path(name)).await
    }

    async fn put(&self, record: &StateRecord) -> StoreResult<()> {
        let lock = self.lock_for(&record.name).await;
        let _guard = lock.lock().await;

        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("failed to serialize record: {e}")))?;

        let path = self.record_path(&record.name);
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::backend(format!("failed to create temp record file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::backend(format!("failed to write record file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::backend(format!("failed to sync record file: {e}")))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::backend(format!("failed to rename record file: {e}")))?;

        debug!(name = record.name, "state record written");
        Ok(())
    }

    async fn remove(&self, name: &str) -> StoreResult<()> {
        let lock = self.lock_for(name).await;
        let _guard = lock.lock().await;

        let path = self.record_path(name);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| StateError::backend(format!("failed to delete record file: {e}")))?;
            debug!(name, "state record removed");
        }
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<StateRecord>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| StateError::backend(format!("failed to read state directory: {e}")))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::backend(format!("failed to read state directory: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(record) = self.read_record(&path).await? {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
