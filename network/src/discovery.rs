use consensus::NodeId;
use std::net::SocketAddr;
use tokio::sync::RwLock;

use crate::communication::TcpTransport;
use crate::{NetworkError, NetworkMessage, NetworkResponse, Result};

/// Finds the coordinator from a static candidate list and keeps calls
/// working across coordinator changes.
///
/// Candidates are probed highest NodeId first, mirroring election priority.
/// A failed call triggers exactly one re-resolution and one retry.
pub struct CoordinatorResolver {
    candidates: Vec<SocketAddr>,
    transport: TcpTransport,
    current: RwLock<Option<(NodeId, SocketAddr)>>,
}

impl CoordinatorResolver {
    pub fn new(mut candidates: Vec<SocketAddr>, transport: TcpTransport) -> Self {
        candidates.sort_by(|a, b| b.port().cmp(&a.port()));
        candidates.dedup();

        Self {
            candidates,
            transport,
            current: RwLock::new(None),
        }
    }

    pub fn candidates(&self) -> &[SocketAddr] {
        &self.candidates
    }

    pub fn transport(&self) -> &TcpTransport {
        &self.transport
    }

    pub async fn current(&self) -> Option<(NodeId, SocketAddr)> {
        *self.current.read().await
    }

    /// Returns the first candidate that names itself as coordinator.
    pub async fn resolve_coordinator(&self) -> Result<(NodeId, SocketAddr)> {
        for candidate in &self.candidates {
            let candidate_id = NodeId::from_addr(candidate);
            match self.transport.request(*candidate, &NetworkMessage::WhoIsCoordinator).await {
                Ok(NetworkResponse::Coordinator { coordinator_id, .. })
                    if coordinator_id == candidate_id =>
                {
                    tracing::info!("Coordinator resolved to {} at {}", candidate_id, candidate);
                    *self.current.write().await = Some((candidate_id, *candidate));
                    return Ok((candidate_id, *candidate));
                }
                Ok(other) => {
                    tracing::debug!(
                        "Candidate {} is not coordinator (replied {})",
                        candidate_id,
                        other.kind()
                    );
                }
                Err(e) => {
                    tracing::debug!("Candidate {} unreachable: {}", candidate_id, e);
                }
            }
        }

        *self.current.write().await = None;
        Err(NetworkError::NoCoordinator(self.candidates.len()))
    }

    /// Sends `message` to the coordinator, re-resolving and retrying once on
    /// failure or a `NotCoordinator` reply.
    pub async fn call(&self, message: NetworkMessage) -> Result<NetworkResponse> {
        let target = match self.current().await {
            Some(target) => target,
            None => self.resolve_coordinator().await?,
        };

        match self.transport.request(target.1, &message).await {
            Ok(NetworkResponse::NotCoordinator { .. }) => {
                tracing::info!("Node {} is no longer coordinator, re-resolving", target.0);
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                tracing::warn!("Call to coordinator {} failed: {}, re-resolving", target.0, e);
            }
        }

        let target = self.resolve_coordinator().await?;
        match self.transport.request(target.1, &message).await? {
            NetworkResponse::NotCoordinator { coordinator } => {
                *self.current.write().await = None;
                Err(NetworkError::NotCoordinator(coordinator.map(|(id, _)| id)))
            }
            response => Ok(response),
        }
    }
}
