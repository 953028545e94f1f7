mod engine;
mod object;

pub use engine::StorageEngine;
pub use object::{checksum, FileSummary, StoredFile};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_files: u64,
    pub total_size_bytes: u64,
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Stale write for {name}: version {offered} < stored {stored}")]
    StaleVersion { name: String, offered: u64, stored: u64 },
}
