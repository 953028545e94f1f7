use bytes::Bytes;
use consensus::{NodeId, NodeRecord};
use network::{CoordinatorResolver, NetworkMessage, NetworkResponse, TcpTransport};
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::error::{ClusterError, Result};

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub replicas: Vec<NodeId>,
    pub version: u64,
}

/// Client side of the cluster. Every call goes to the coordinator through a
/// [`CoordinatorResolver`], so it keeps working across failovers.
pub struct ClusterClient {
    resolver: CoordinatorResolver,
    client_id: String,
}

impl ClusterClient {
    pub fn new(candidates: Vec<SocketAddr>, config: &network::Config) -> Self {
        Self::with_client_id(candidates, config, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_client_id(
        candidates: Vec<SocketAddr>,
        config: &network::Config,
        client_id: String,
    ) -> Self {
        Self {
            resolver: CoordinatorResolver::new(candidates, TcpTransport::new(config)),
            client_id,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn coordinator(&self) -> Result<(NodeId, SocketAddr)> {
        Ok(self.resolver.resolve_coordinator().await?)
    }

    /// Returns true if the lock was granted.
    pub async fn lock(&self, resource_key: &str) -> Result<bool> {
        let message = NetworkMessage::LockRequest {
            resource_key: resource_key.to_string(),
            client_id: self.client_id.clone(),
        };
        match self.resolver.call(message).await? {
            NetworkResponse::Granted => Ok(true),
            NetworkResponse::Denied => Ok(false),
            other => Err(unexpected(other)),
        }
    }

    /// Returns true if this client held the lock and released it.
    pub async fn unlock(&self, resource_key: &str) -> Result<bool> {
        let message = NetworkMessage::Unlock {
            resource_key: resource_key.to_string(),
            client_id: self.client_id.clone(),
        };
        match self.resolver.call(message).await? {
            NetworkResponse::Released => Ok(true),
            NetworkResponse::NotHolder => Ok(false),
            other => Err(unexpected(other)),
        }
    }

    /// Uploads under the file's lock. The unlock is attempted even when the
    /// upload itself failed.
    pub async fn upload(&self, file_name: &str, payload: Bytes) -> Result<UploadReceipt> {
        if !self.lock(file_name).await? {
            return Err(ClusterError::LockDenied(file_name.to_string()));
        }

        let result = self.put(file_name, payload).await;

        match self.unlock(file_name).await {
            Ok(true) => {}
            Ok(false) => warn!("Lock on {} was gone before unlock", file_name),
            Err(e) => warn!("Failed to unlock {}: {}", file_name, e),
        }

        result
    }

    async fn put(&self, file_name: &str, payload: Bytes) -> Result<UploadReceipt> {
        let message = NetworkMessage::Upload {
            file_name: file_name.to_string(),
            payload,
        };
        match self.resolver.call(message).await? {
            NetworkResponse::Uploaded { replicas, version } => {
                info!("Uploaded {} v{} to {} replicas", file_name, version, replicas.len());
                Ok(UploadReceipt { replicas, version })
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn download(&self, file_name: &str) -> Result<Bytes> {
        let message = NetworkMessage::Download {
            file_name: file_name.to_string(),
        };
        match self.resolver.call(message).await? {
            NetworkResponse::Payload { data } => Ok(data),
            NetworkResponse::NotFound => Err(ClusterError::FileNotFound(file_name.to_string())),
            other => Err(unexpected(other)),
        }
    }

    pub async fn locate(&self, file_name: &str) -> Result<Vec<NodeId>> {
        let message = NetworkMessage::Locate {
            file_name: file_name.to_string(),
        };
        match self.resolver.call(message).await? {
            NetworkResponse::Located { replicas } => Ok(replicas),
            NetworkResponse::NotFound => Err(ClusterError::FileNotFound(file_name.to_string())),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        match self.resolver.call(NetworkMessage::ListNodes).await? {
            NetworkResponse::Nodes { nodes } => Ok(nodes),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: NetworkResponse) -> ClusterError {
    match response {
        NetworkResponse::Error { message } => ClusterError::Rejected(message),
        other => ClusterError::UnexpectedResponse(other.kind()),
    }
}
