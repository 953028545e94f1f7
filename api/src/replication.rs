use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use consensus::{NodeId, SharedClusterView};
use futures::future::join_all;
use network::{NetworkMessage, NetworkResponse, TcpTransport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{ApiError, ApiResult};

/// Outbound request path from the coordinator to storage nodes.
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    async fn request(
        &self,
        to: SocketAddr,
        message: NetworkMessage,
    ) -> network::Result<NetworkResponse>;
}

#[async_trait]
impl NodeClient for TcpTransport {
    async fn request(
        &self,
        to: SocketAddr,
        message: NetworkMessage,
    ) -> network::Result<NetworkResponse> {
        TcpTransport::request(self, to, &message).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub replicas: Vec<NodeId>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Placement table and replica fan-out, active on the coordinator only.
pub struct ReplicationCoordinator {
    view: SharedClusterView,
    client: Arc<dyn NodeClient>,
    placements: RwLock<HashMap<String, FileRecord>>,
    replication_factor: usize,
}

impl ReplicationCoordinator {
    pub fn new(
        view: SharedClusterView,
        client: Arc<dyn NodeClient>,
        replication_factor: usize,
    ) -> Self {
        Self {
            view,
            client,
            placements: RwLock::new(HashMap::new()),
            replication_factor,
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Picks up to `replication_factor` alive storage nodes, least loaded
    /// first, ties broken by ascending NodeId. Empty only when no storage
    /// node is alive.
    pub async fn place_file(&self, name: &str) -> Vec<NodeId> {
        let candidates: Vec<NodeId> = {
            let view = self.view.read().await;
            view.storage_candidates().into_iter().map(|m| m.id).collect()
        };

        let mut load: HashMap<NodeId, usize> = HashMap::new();
        {
            let placements = self.placements.read().await;
            for record in placements.values().filter(|r| r.name != name) {
                for id in &record.replicas {
                    *load.entry(*id).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(usize, NodeId)> = candidates
            .into_iter()
            .map(|id| (load.get(&id).copied().unwrap_or(0), id))
            .collect();
        ranked.sort();
        ranked
            .into_iter()
            .take(self.replication_factor)
            .map(|(_, id)| id)
            .collect()
    }

    /// Stores `payload` on a fresh replica set. Replicas that fail are left
    /// out of the record; the write fails only when none acknowledged.
    pub async fn write(&self, name: &str, payload: Bytes) -> ApiResult<FileRecord> {
        let chosen = self.place_file(name).await;
        if chosen.is_empty() {
            tracing::warn!("Upload of {} rejected: no alive storage nodes", name);
            return Err(ApiError::ZeroReplicas(name.to_string()));
        }

        let version = self
            .placements
            .read()
            .await
            .get(name)
            .map(|r| r.version + 1)
            .unwrap_or(1);
        let expected = storage::checksum(&payload);
        let targets = self.addresses(&chosen).await;

        let stores = targets.into_iter().map(|(id, address)| {
            let message = NetworkMessage::StoreBlob {
                file_name: name.to_string(),
                version,
                payload: payload.clone(),
            };
            async move { (id, self.client.request(address, message).await) }
        });

        let mut replicas = Vec::new();
        for (id, result) in join_all(stores).await {
            match result {
                Ok(NetworkResponse::Stored { checksum }) if checksum == expected => {
                    replicas.push(id)
                }
                Ok(NetworkResponse::Stored { checksum }) => {
                    tracing::warn!(
                        "Replica {} stored {} with checksum mismatch ({})",
                        id,
                        name,
                        checksum
                    );
                }
                Ok(other) => {
                    tracing::warn!("Replica {} refused {}: {}", id, name, other.kind());
                }
                Err(e) => {
                    tracing::warn!("Replica {} unreachable while storing {}: {}", id, name, e);
                }
            }
        }

        if replicas.is_empty() {
            return Err(ApiError::ZeroReplicas(name.to_string()));
        }

        let record = FileRecord {
            name: name.to_string(),
            replicas,
            version,
            updated_at: Utc::now(),
        };
        self.placements
            .write()
            .await
            .insert(name.to_string(), record.clone());

        tracing::info!(
            "Stored {} v{} on replicas {:?}",
            name,
            version,
            record.replicas.iter().map(|id| id.0).collect::<Vec<_>>()
        );
        Ok(record)
    }

    /// Recorded replicas of `name` that are currently alive, in stored order.
    pub async fn locate(&self, name: &str) -> ApiResult<Vec<NodeId>> {
        let replicas = self
            .placements
            .read()
            .await
            .get(name)
            .map(|r| r.replicas.clone())
            .ok_or_else(|| ApiError::FileNotFound(name.to_string()))?;

        let view = self.view.read().await;
        Ok(replicas.into_iter().filter(|id| view.is_alive(*id)).collect())
    }

    /// First replica in `locate` order that returns an intact copy wins.
    pub async fn read(&self, name: &str) -> ApiResult<Bytes> {
        let replicas = self.locate(name).await?;

        for (id, address) in self.addresses(&replicas).await {
            let message = NetworkMessage::FetchBlob {
                file_name: name.to_string(),
            };
            match self.client.request(address, message).await {
                Ok(NetworkResponse::Blob { data, checksum, .. })
                    if storage::checksum(&data) == checksum =>
                {
                    tracing::debug!("Read {} from replica {}", name, id);
                    return Ok(data);
                }
                Ok(other) => {
                    tracing::warn!("Replica {} could not serve {}: {}", id, name, other.kind());
                }
                Err(e) => {
                    tracing::warn!("Replica {} unreachable while reading {}: {}", id, name, e);
                }
            }
        }

        Err(ApiError::ReplicasUnavailable(name.to_string()))
    }

    pub async fn files(&self) -> Vec<FileRecord> {
        let mut files: Vec<_> = self.placements.read().await.values().cloned().collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    /// Rebuilds the placement table from the blobs alive members report.
    ///
    /// For every name the highest version wins; its replicas are the members
    /// holding that version, in ascending NodeId order. Records written while
    /// the rebuild runs are kept unless a member reports a newer version.
    pub async fn rebuild_from_inventory(&self) -> usize {
        // Forget the previous term's table; writes from here on are merged.
        self.placements.write().await.clear();

        let members: Vec<(NodeId, SocketAddr)> = {
            let view = self.view.read().await;
            view.members()
                .filter(|m| m.alive)
                .map(|m| (m.id, m.address))
                .collect()
        };

        let requests = members.into_iter().map(|(id, address)| async move {
            (id, self.client.request(address, NetworkMessage::Inventory).await)
        });

        let mut latest: BTreeMap<String, (u64, Vec<NodeId>)> = BTreeMap::new();
        for (id, result) in join_all(requests).await {
            let files = match result {
                Ok(NetworkResponse::Inventory { files }) => files,
                Ok(other) => {
                    tracing::debug!("Node {} answered inventory with {}", id, other.kind());
                    continue;
                }
                Err(e) => {
                    tracing::debug!("Node {} unreachable for inventory: {}", id, e);
                    continue;
                }
            };

            for file in files {
                let entry = latest.entry(file.name).or_insert((file.version, Vec::new()));
                if file.version > entry.0 {
                    *entry = (file.version, vec![id]);
                } else if file.version == entry.0 {
                    entry.1.push(id);
                }
            }
        }

        let now = Utc::now();
        let mut placements = self.placements.write().await;
        for (name, (version, mut replicas)) in latest {
            if placements.get(&name).is_some_and(|r| r.version >= version) {
                continue;
            }
            replicas.sort();
            let record = FileRecord {
                name: name.clone(),
                replicas,
                version,
                updated_at: now,
            };
            placements.insert(name, record);
        }

        let count = placements.len();
        tracing::info!("Placement table rebuilt with {} files", count);
        count
    }

    async fn addresses(&self, ids: &[NodeId]) -> Vec<(NodeId, SocketAddr)> {
        let view = self.view.read().await;
        ids.iter()
            .filter_map(|id| view.address_of(*id).map(|address| (*id, address)))
            .collect()
    }
}
