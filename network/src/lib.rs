mod communication;
mod discovery;
mod manager;

pub use communication::{read_frame, write_frame, MessageHandler, TcpTransport};
pub use discovery::CoordinatorResolver;
pub use manager::NetworkManager;

use bytes::Bytes;
use consensus::{ClusterSnapshot, ConsensusMessage, NodeId, NodeRecord};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Every request that travels between clients and nodes, or between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetworkMessage {
    Register {
        node_id: NodeId,
        address: SocketAddr,
    },
    Consensus(ConsensusMessage),
    WhoIsCoordinator,
    LockRequest {
        resource_key: String,
        client_id: String,
    },
    Unlock {
        resource_key: String,
        client_id: String,
    },
    Upload {
        file_name: String,
        payload: Bytes,
    },
    Download {
        file_name: String,
    },
    Locate {
        file_name: String,
    },
    ListNodes,

    // Coordinator to storage node.
    StoreBlob {
        file_name: String,
        version: u64,
        payload: Bytes,
    },
    FetchBlob {
        file_name: String,
    },
    Inventory,
}

impl NetworkMessage {
    /// True for requests only the current coordinator may serve.
    pub fn requires_coordinator(&self) -> bool {
        matches!(
            self,
            NetworkMessage::Register { .. }
                | NetworkMessage::LockRequest { .. }
                | NetworkMessage::Unlock { .. }
                | NetworkMessage::Upload { .. }
                | NetworkMessage::Download { .. }
                | NetworkMessage::Locate { .. }
                | NetworkMessage::ListNodes
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetworkResponse {
    Registered {
        snapshot: ClusterSnapshot,
    },
    Consensus(ConsensusMessage),
    Coordinator {
        coordinator_id: NodeId,
        coordinator_address: SocketAddr,
    },
    NoCoordinator,
    NotCoordinator {
        coordinator: Option<(NodeId, SocketAddr)>,
    },
    Granted,
    Denied,
    Released,
    NotHolder,
    Uploaded {
        replicas: Vec<NodeId>,
        version: u64,
    },
    Payload {
        data: Bytes,
    },
    Located {
        replicas: Vec<NodeId>,
    },
    Nodes {
        nodes: Vec<NodeRecord>,
    },
    NotFound,
    Stored {
        checksum: String,
    },
    Blob {
        version: u64,
        data: Bytes,
        checksum: String,
    },
    Inventory {
        files: Vec<BlobSummary>,
    },
    Error {
        message: String,
    },
}

impl NetworkResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkResponse::Registered { .. } => "REGISTERED",
            NetworkResponse::Consensus(_) => "CONSENSUS",
            NetworkResponse::Coordinator { .. } => "COORDINATOR",
            NetworkResponse::NoCoordinator => "NO_COORDINATOR",
            NetworkResponse::NotCoordinator { .. } => "NOT_COORDINATOR",
            NetworkResponse::Granted => "GRANTED",
            NetworkResponse::Denied => "DENIED",
            NetworkResponse::Released => "RELEASED",
            NetworkResponse::NotHolder => "NOT_HOLDER",
            NetworkResponse::Uploaded { .. } => "UPLOADED",
            NetworkResponse::Payload { .. } => "PAYLOAD",
            NetworkResponse::Located { .. } => "LOCATED",
            NetworkResponse::Nodes { .. } => "NODES",
            NetworkResponse::NotFound => "NOT_FOUND",
            NetworkResponse::Stored { .. } => "STORED",
            NetworkResponse::Blob { .. } => "BLOB",
            NetworkResponse::Inventory { .. } => "INVENTORY",
            NetworkResponse::Error { .. } => "ERROR",
        }
    }
}

/// One file held by a storage node, as reported by `Inventory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobSummary {
    pub name: String,
    pub version: u64,
    pub checksum: String,
}

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout talking to {0}")]
    Timeout(SocketAddr),

    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No coordinator answered among {0} candidates")]
    NoCoordinator(usize),

    #[error("Not coordinator: current coordinator is {0:?}")]
    NotCoordinator(Option<NodeId>),
}

impl From<bincode::Error> for NetworkError {
    fn from(err: bincode::Error) -> Self {
        NetworkError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub request_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2000,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}
