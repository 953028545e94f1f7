use async_trait::async_trait;
use consensus::{ConsensusMessage, ElectionCoordinator, HeartbeatMonitor, SharedClusterView};
use network::{BlobSummary, MessageHandler, NetworkMessage, NetworkResponse};
use std::sync::Arc;
use storage::{StorageEngine, StorageError};

use crate::locks::{LockManager, LockOutcome, ReleaseOutcome};
use crate::replication::ReplicationCoordinator;
use crate::ApiError;

/// Serves every inbound cluster request of one node.
///
/// Coordinator-only requests are answered with `NotCoordinator` unless the
/// local view says this node currently holds the role.
pub struct RequestHandler {
    view: SharedClusterView,
    election: Arc<ElectionCoordinator>,
    heartbeat: Arc<HeartbeatMonitor>,
    locks: Arc<LockManager>,
    replication: Arc<ReplicationCoordinator>,
    storage: Arc<StorageEngine>,
}

impl RequestHandler {
    pub fn new(
        view: SharedClusterView,
        election: Arc<ElectionCoordinator>,
        heartbeat: Arc<HeartbeatMonitor>,
        locks: Arc<LockManager>,
        replication: Arc<ReplicationCoordinator>,
        storage: Arc<StorageEngine>,
    ) -> Self {
        Self {
            view,
            election,
            heartbeat,
            locks,
            replication,
            storage,
        }
    }

    /// Resets coordinator-side state whenever this node starts a new term as
    /// coordinator. Re-asserting leadership at a later epoch is not a new term.
    pub async fn watch_leadership(self: Arc<Self>) {
        let (self_id, mut leadership_rx) = {
            let view = self.view.read().await;
            (view.self_id(), view.subscribe())
        };
        let mut current_term = None;

        while leadership_rx.changed().await.is_ok() {
            let leadership = *leadership_rx.borrow_and_update();
            if leadership.coordinator_id != Some(self_id) {
                current_term = None;
                continue;
            }
            if current_term == Some(leadership.term) {
                continue;
            }
            current_term = Some(leadership.term);

            tracing::info!(
                "Node {} took over as coordinator for epoch {}",
                self_id,
                leadership.term
            );
            self.locks.reset(leadership.term).await;
            self.replication.rebuild_from_inventory().await;
        }
    }

    async fn handle_consensus(&self, message: ConsensusMessage) -> NetworkResponse {
        let reply = match message {
            ConsensusMessage::Heartbeat { sender_id } => {
                self.heartbeat.on_heartbeat(sender_id).await
            }
            ConsensusMessage::Election { .. }
            | ConsensusMessage::Answer { .. }
            | ConsensusMessage::Coordinator { .. } => self.election.handle_message(message).await,
            ConsensusMessage::HeartbeatAck { .. } | ConsensusMessage::Ack => ConsensusMessage::Ack,
        };
        NetworkResponse::Consensus(reply)
    }

    async fn who_is_coordinator(&self) -> NetworkResponse {
        let view = self.view.read().await;
        match view.coordinator_record() {
            Some(record) => NetworkResponse::Coordinator {
                coordinator_id: record.id,
                coordinator_address: record.address,
            },
            None => NetworkResponse::NoCoordinator,
        }
    }

    async fn storage_request(&self, message: NetworkMessage) -> NetworkResponse {
        match message {
            NetworkMessage::StoreBlob {
                file_name,
                version,
                payload,
            } => match self.storage.put(&file_name, version, payload).await {
                Ok(file) => NetworkResponse::Stored { checksum: file.checksum },
                Err(e) => error_response(e),
            },
            NetworkMessage::FetchBlob { file_name } => match self.storage.get(&file_name).await {
                Ok(file) => NetworkResponse::Blob {
                    version: file.version,
                    data: file.data,
                    checksum: file.checksum,
                },
                Err(StorageError::FileNotFound(_)) => NetworkResponse::NotFound,
                Err(e) => error_response(e),
            },
            NetworkMessage::Inventory => {
                let files = self
                    .storage
                    .inventory()
                    .await
                    .into_iter()
                    .map(|f| BlobSummary {
                        name: f.name,
                        version: f.version,
                        checksum: f.checksum,
                    })
                    .collect();
                NetworkResponse::Inventory { files }
            }
            other => NetworkResponse::Error {
                message: format!("unexpected storage request {:?}", other),
            },
        }
    }

    async fn coordinator_request(&self, message: NetworkMessage, term: u64) -> NetworkResponse {
        match message {
            NetworkMessage::Register { node_id, address } => {
                let mut view = self.view.write().await;
                if view.upsert_member(address) {
                    tracing::info!("Node {} registered from {}", node_id, address);
                } else {
                    tracing::debug!("Node {} re-registered from {}", node_id, address);
                }
                NetworkResponse::Registered {
                    snapshot: view.snapshot(),
                }
            }
            NetworkMessage::LockRequest {
                resource_key,
                client_id,
            } => match self.locks.acquire(term, &resource_key, &client_id).await {
                LockOutcome::Granted => NetworkResponse::Granted,
                LockOutcome::Denied => NetworkResponse::Denied,
            },
            NetworkMessage::Unlock {
                resource_key,
                client_id,
            } => match self.locks.release(term, &resource_key, &client_id).await {
                ReleaseOutcome::Released => NetworkResponse::Released,
                ReleaseOutcome::NotHolder => NetworkResponse::NotHolder,
            },
            NetworkMessage::Upload { file_name, payload } => {
                match self.replication.write(&file_name, payload).await {
                    Ok(record) => NetworkResponse::Uploaded {
                        replicas: record.replicas,
                        version: record.version,
                    },
                    Err(e) => error_response(e),
                }
            }
            NetworkMessage::Download { file_name } => {
                match self.replication.read(&file_name).await {
                    Ok(data) => NetworkResponse::Payload { data },
                    Err(ApiError::FileNotFound(_)) => NetworkResponse::NotFound,
                    Err(e) => error_response(e),
                }
            }
            NetworkMessage::Locate { file_name } => {
                match self.replication.locate(&file_name).await {
                    Ok(replicas) => NetworkResponse::Located { replicas },
                    Err(ApiError::FileNotFound(_)) => NetworkResponse::NotFound,
                    Err(e) => error_response(e),
                }
            }
            NetworkMessage::ListNodes => {
                let view = self.view.read().await;
                NetworkResponse::Nodes {
                    nodes: view.members().cloned().collect(),
                }
            }
            other => NetworkResponse::Error {
                message: format!("unexpected coordinator request {:?}", other),
            },
        }
    }
}

#[async_trait]
impl MessageHandler for RequestHandler {
    async fn handle(&self, message: NetworkMessage) -> NetworkResponse {
        if message.requires_coordinator() {
            let term = {
                let view = self.view.read().await;
                if !view.is_coordinator() {
                    return NetworkResponse::NotCoordinator {
                        coordinator: view.coordinator_record().map(|r| (r.id, r.address)),
                    };
                }
                view.term()
            };
            return self.coordinator_request(message, term).await;
        }

        match message {
            NetworkMessage::Consensus(message) => self.handle_consensus(message).await,
            NetworkMessage::WhoIsCoordinator => self.who_is_coordinator().await,
            other => self.storage_request(other).await,
        }
    }
}

fn error_response(error: impl std::fmt::Display) -> NetworkResponse {
    NetworkResponse::Error {
        message: error.to_string(),
    }
}
