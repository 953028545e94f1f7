use api::{AdminServer, AdminState, LockManager, ReplicationCoordinator, RequestHandler};
use consensus::{ClusterView, ElectionCoordinator, HeartbeatMonitor, NodeId, SharedClusterView};
use network::{CoordinatorResolver, NetworkManager, NetworkMessage, NetworkResponse, TcpTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use storage::StorageEngine;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;

/// A cluster node with its listener bound but no tasks running yet.
pub struct Node {
    config: Config,
    address: SocketAddr,
    view: SharedClusterView,
    transport: TcpTransport,
    storage: Arc<StorageEngine>,
    election: Arc<ElectionCoordinator>,
    heartbeat: Arc<HeartbeatMonitor>,
    locks: Arc<LockManager>,
    replication: Arc<ReplicationCoordinator>,
    handler: Arc<RequestHandler>,
    network_manager: NetworkManager,
}

/// Handle to a started node. Dropping it leaves the node running; call
/// [`RunningNode::shutdown`] to stop it.
pub struct RunningNode {
    id: NodeId,
    address: SocketAddr,
    view: SharedClusterView,
    election: Arc<ElectionCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    pub async fn bind(config: Config) -> Result<Self> {
        let config = config.validate()?;
        let address = config.address();
        info!("Initializing node {} at {}", NodeId::from_addr(&address), address);

        let consensus_config: consensus::Config = config.clone().into();
        let network_config: network::Config = config.clone().into();
        let api_config: api::Config = config.clone().into();

        let network_manager = NetworkManager::bind(address, &network_config).await?;
        let transport = TcpTransport::new(&network_config);

        let view = ClusterView::new(address, &consensus_config.peers).shared();
        let storage = Arc::new(StorageEngine::new());
        let election = ElectionCoordinator::new(
            &consensus_config,
            view.clone(),
            Arc::new(transport.clone()),
        );
        let heartbeat = HeartbeatMonitor::new(
            &consensus_config,
            view.clone(),
            election.clone(),
            Arc::new(transport.clone()),
        );
        let locks = Arc::new(LockManager::new(api_config.lock_ttl()));
        // Shorter than client requests, so a hung replica cannot use up the
        // budget of the client call it serves.
        let replica_transport = TcpTransport::new(&network::Config {
            request_timeout_ms: api_config.replica_timeout_ms,
            ..network_config.clone()
        });
        let replication = Arc::new(ReplicationCoordinator::new(
            view.clone(),
            Arc::new(replica_transport),
            api_config.replication_factor,
        ));
        let handler = Arc::new(RequestHandler::new(
            view.clone(),
            election.clone(),
            heartbeat.clone(),
            locks.clone(),
            replication.clone(),
            storage.clone(),
        ));

        Ok(Self {
            config,
            address,
            view,
            transport,
            storage,
            election,
            heartbeat,
            locks,
            replication,
            handler,
            network_manager,
        })
    }

    pub fn id(&self) -> NodeId {
        NodeId::from_addr(&self.address)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.network_manager.local_addr()
    }

    /// Spawns the node's tasks, then joins the cluster: registers with a
    /// running coordinator if one answers, otherwise starts an election.
    pub async fn start(self) -> Result<RunningNode> {
        info!("Starting node {} services", self.id());
        let mut tasks = Vec::new();

        // Subscribe before anything can change leadership.
        let watcher = self.handler.clone();
        tasks.push(tokio::spawn(async move { watcher.watch_leadership().await }));

        let handler: Arc<dyn network::MessageHandler> = self.handler.clone();
        let network_manager = self.network_manager;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = network_manager.serve(handler).await {
                error!("Cluster listener stopped: {}", e);
            }
        }));

        let heartbeat = self.heartbeat.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = heartbeat.run().await {
                error!("Heartbeat monitor stopped: {}", e);
            }
        }));

        let locks = self.locks.clone();
        let sweep_every = api::Config::from(self.config.clone()).lock_sweep_interval();
        tasks.push(tokio::spawn(async move { locks.run_sweeper(sweep_every).await }));

        if let Some(admin_address) = self.config.admin_address() {
            let admin = AdminServer::new(
                admin_address,
                AdminState {
                    view: self.view.clone(),
                    replication: self.replication.clone(),
                    storage: self.storage.clone(),
                },
            );
            tasks.push(tokio::spawn(async move {
                if let Err(e) = admin.start().await {
                    error!("Admin server stopped: {}", e);
                }
            }));
        }

        Self::join_cluster(
            &self.config,
            self.address,
            &self.view,
            &self.transport,
            &self.election,
        )
        .await;

        Ok(RunningNode {
            id: NodeId::from_addr(&self.address),
            address: self.address,
            view: self.view,
            election: self.election,
            tasks,
        })
    }

    async fn join_cluster(
        config: &Config,
        address: SocketAddr,
        view: &SharedClusterView,
        transport: &TcpTransport,
        election: &Arc<ElectionCoordinator>,
    ) {
        let node_id = NodeId::from_addr(&address);
        let candidates: Vec<SocketAddr> = config
            .peers
            .iter()
            .copied()
            .filter(|p| *p != address)
            .collect();
        let resolver = CoordinatorResolver::new(candidates, transport.clone());

        match resolver.resolve_coordinator().await {
            Ok((coordinator_id, coordinator_address)) => {
                let register = NetworkMessage::Register { node_id, address };
                match transport.request(coordinator_address, &register).await {
                    Ok(NetworkResponse::Registered { snapshot }) => {
                        view.write().await.merge_snapshot(&snapshot);
                        info!(
                            "Node {} joined cluster under coordinator {} (epoch {})",
                            node_id, coordinator_id, snapshot.epoch
                        );
                        return;
                    }
                    Ok(other) => {
                        warn!(
                            "Coordinator {} refused registration: {}",
                            coordinator_id,
                            other.kind()
                        );
                    }
                    Err(e) => {
                        warn!("Registration with coordinator {} failed: {}", coordinator_id, e);
                    }
                }
            }
            Err(e) => {
                info!("Node {} found no coordinator ({}), starting election", node_id, e);
            }
        }

        tokio::spawn(election.start_election());
    }
}

impl RunningNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn view(&self) -> &SharedClusterView {
        &self.view
    }

    pub async fn is_coordinator(&self) -> bool {
        self.view.read().await.is_coordinator()
    }

    pub async fn coordinator_id(&self) -> Option<NodeId> {
        self.view.read().await.coordinator_id()
    }

    /// Blocks until Ctrl-C, then stops the node.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested for node {}", self.id);
        self.shutdown().await;
        Ok(())
    }

    /// Stops every task of the node and closes its listener.
    pub async fn shutdown(self) {
        self.election.stop();
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Node {} stopped", self.id);
    }
}
