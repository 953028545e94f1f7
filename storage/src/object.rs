use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A file replica as held by one storage node.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub version: u64,
    pub data: Bytes,
    pub checksum: String,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub name: String,
    pub version: u64,
    pub checksum: String,
    pub size: u64,
}

impl StoredFile {
    pub fn new(name: String, version: u64, data: Bytes) -> Self {
        let checksum = checksum(&data);
        Self {
            name,
            version,
            data,
            checksum,
            stored_at: Utc::now(),
        }
    }

    pub fn verify_integrity(&self) -> bool {
        checksum(&self.data) == self.checksum
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            name: self.name.clone(),
            version: self.version,
            checksum: self.checksum.clone(),
            size: self.size(),
        }
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
