use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::object::{FileSummary, StoredFile};
use crate::{Result, StorageError, StorageStats};

/// In-memory blob store of a storage node. Content does not survive a
/// process restart.
pub struct StorageEngine {
    files: RwLock<HashMap<String, StoredFile>>,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `data` as `version` of `name`, replacing any older copy.
    pub async fn put(&self, name: &str, version: u64, data: Bytes) -> Result<StoredFile> {
        let file = StoredFile::new(name.to_string(), version, data);

        let mut files = self.files.write().await;
        if let Some(existing) = files.get(name) {
            if existing.version > version {
                return Err(StorageError::StaleVersion {
                    name: name.to_string(),
                    offered: version,
                    stored: existing.version,
                });
            }
        }
        files.insert(name.to_string(), file.clone());
        drop(files);

        tracing::info!("Stored file {} v{} ({} bytes)", name, version, file.size());
        Ok(file)
    }

    pub async fn get(&self, name: &str) -> Result<StoredFile> {
        let file = self
            .files
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        if !file.verify_integrity() {
            return Err(StorageError::Corruption(format!(
                "File {} failed integrity check",
                name
            )));
        }
        Ok(file)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.files.read().await.contains_key(name)
    }

    pub async fn inventory(&self) -> Vec<FileSummary> {
        let files = self.files.read().await;
        let mut summaries: Vec<_> = files.values().map(StoredFile::summary).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub async fn stats(&self) -> StorageStats {
        let files = self.files.read().await;
        StorageStats {
            total_files: files.len() as u64,
            total_size_bytes: files.values().map(StoredFile::size).sum(),
        }
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newer_version_replaces_older() {
        let engine = StorageEngine::new();
        engine.put("a.txt", 1, Bytes::from_static(b"one")).await.unwrap();
        engine.put("a.txt", 2, Bytes::from_static(b"two")).await.unwrap();

        let file = engine.get("a.txt").await.unwrap();
        assert_eq!(file.version, 2);
        assert_eq!(&file.data[..], b"two");
    }

    #[tokio::test]
    async fn older_version_is_rejected() {
        let engine = StorageEngine::new();
        engine.put("a.txt", 3, Bytes::from_static(b"three")).await.unwrap();

        let result = engine.put("a.txt", 2, Bytes::from_static(b"two")).await;
        assert!(matches!(result, Err(StorageError::StaleVersion { stored: 3, .. })));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let engine = StorageEngine::new();
        assert!(matches!(engine.get("nope").await, Err(StorageError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn inventory_lists_files_sorted() {
        let engine = StorageEngine::new();
        engine.put("b", 1, Bytes::from_static(b"b")).await.unwrap();
        engine.put("a", 4, Bytes::from_static(b"a")).await.unwrap();

        let names: Vec<_> = engine
            .inventory()
            .await
            .into_iter()
            .map(|f| (f.name, f.version))
            .collect();
        assert_eq!(names, vec![("a".to_string(), 4), ("b".to_string(), 1)]);
        assert_eq!(engine.stats().await.total_files, 2);
    }
}
