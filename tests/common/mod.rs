#![allow(dead_code)]

use async_trait::async_trait;
use consensus::{
    ClusterView, ConsensusError, ConsensusMessage, ElectionCoordinator, HeartbeatMonitor, NodeId,
    PeerTransport, SharedClusterView,
};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn consensus_config(port: u16, ports: &[u16]) -> consensus::Config {
    consensus::Config {
        address: addr(port),
        peers: ports.iter().filter(|p| **p != port).map(|p| addr(*p)).collect(),
        heartbeat_interval_ms: 1000,
        missed_heartbeat_threshold: 2,
        election_answer_timeout_ms: 500,
        victory_timeout_ms: 1000,
    }
}

#[derive(Clone)]
pub struct LocalNode {
    pub id: NodeId,
    pub view: SharedClusterView,
    pub election: Arc<ElectionCoordinator>,
    pub heartbeat: Arc<HeartbeatMonitor>,
}

impl LocalNode {
    pub async fn coordinator(&self) -> Option<NodeId> {
        self.view.read().await.coordinator_id()
    }

    pub async fn epoch(&self) -> u64 {
        self.view.read().await.epoch()
    }
}

/// In-process message bus standing in for TCP between election nodes.
#[derive(Default)]
pub struct LocalNet {
    nodes: Mutex<HashMap<SocketAddr, LocalNode>>,
    down: Mutex<HashSet<SocketAddr>>,
    silent: Mutex<HashSet<SocketAddr>>,
    answer_only: Mutex<HashSet<SocketAddr>>,
}

impl LocalNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(self: &Arc<Self>, port: u16, ports: &[u16]) -> LocalNode {
        let config = consensus_config(port, ports);
        let view = ClusterView::new(config.address, &config.peers).shared();
        let transport: Arc<dyn PeerTransport> = Arc::new(LocalTransport {
            net: self.clone(),
            from: config.address,
        });
        let election = ElectionCoordinator::new(&config, view.clone(), transport.clone());
        let heartbeat = HeartbeatMonitor::new(&config, view.clone(), election.clone(), transport);

        let node = LocalNode {
            id: NodeId(port),
            view,
            election,
            heartbeat,
        };
        self.nodes.lock().unwrap().insert(config.address, node.clone());
        node
    }

    pub fn cluster(self: &Arc<Self>, ports: &[u16]) -> Vec<LocalNode> {
        ports.iter().map(|p| self.add_node(*p, ports)).collect()
    }

    /// Messages to and from a killed node fail as if it were unreachable.
    pub fn kill(&self, port: u16) {
        self.down.lock().unwrap().insert(addr(port));
    }

    pub fn revive(&self, port: u16) {
        self.down.lock().unwrap().remove(&addr(port));
    }

    /// The node accepts messages but never replies.
    pub fn silence(&self, port: u16) {
        self.silent.lock().unwrap().insert(addr(port));
    }

    /// The node answers ELECTION but never runs an election of its own.
    pub fn answer_only(&self, port: u16) {
        self.answer_only.lock().unwrap().insert(addr(port));
    }
}

struct LocalTransport {
    net: Arc<LocalNet>,
    from: SocketAddr,
}

#[async_trait]
impl PeerTransport for LocalTransport {
    async fn send(
        &self,
        to: SocketAddr,
        message: ConsensusMessage,
    ) -> consensus::Result<ConsensusMessage> {
        let unreachable = {
            let down = self.net.down.lock().unwrap();
            down.contains(&self.from) || down.contains(&to)
        };
        if unreachable {
            return Err(ConsensusError::Network(format!("{} unreachable", to)));
        }
        let silent = self.net.silent.lock().unwrap().contains(&to);
        let answer_only = self.net.answer_only.lock().unwrap().contains(&to);
        if silent {
            std::future::pending::<()>().await;
        }
        if answer_only {
            return Ok(match message {
                ConsensusMessage::Election { .. } => ConsensusMessage::Answer {
                    epoch: 0,
                    sender_id: NodeId::from_addr(&to),
                },
                _ => ConsensusMessage::Ack,
            });
        }

        let target = self
            .net
            .nodes
            .lock()
            .unwrap()
            .get(&to)
            .cloned()
            .ok_or_else(|| ConsensusError::Network(format!("no node at {}", to)))?;

        Ok(match message {
            ConsensusMessage::Heartbeat { sender_id } => {
                target.heartbeat.on_heartbeat(sender_id).await
            }
            other => target.election.handle_message(other).await,
        })
    }
}
