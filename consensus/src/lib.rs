//! Cluster coordination: membership view, Bully leader election and
//! heartbeat-driven failure detection.

mod bully;
mod heartbeat;
mod messages;
mod view;

pub use bully::{ElectionCoordinator, ElectionPhase, ElectionState};
pub use heartbeat::HeartbeatMonitor;
pub use messages::ConsensusMessage;
pub use view::{ClusterView, HeartbeatOutcome, Leadership, SharedClusterView};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Node identity. Equal to the node's listening port; a higher id has a
/// higher election priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u16);

impl NodeId {
    pub fn from_addr(addr: &SocketAddr) -> Self {
        Self(addr.port())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Follower,
    Unknown,
}

/// What one process currently believes about one member of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub address: SocketAddr,
    pub role: Role,
    pub last_seen: DateTime<Utc>,
    pub alive: bool,
    pub missed_heartbeats: u32,
}

impl NodeRecord {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            id: NodeId::from_addr(&address),
            address,
            role: Role::Unknown,
            last_seen: Utc::now(),
            alive: true,
            missed_heartbeats: 0,
        }
    }
}

/// Serializable copy of a [`ClusterView`], handed to nodes that register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub self_id: NodeId,
    pub members: Vec<NodeRecord>,
    pub coordinator_id: Option<NodeId>,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub address: SocketAddr,
    pub peers: Vec<SocketAddr>,
    pub heartbeat_interval_ms: u64,
    pub missed_heartbeat_threshold: u32,
    pub election_answer_timeout_ms: u64,
    pub victory_timeout_ms: u64,
}

impl Config {
    pub fn node_id(&self) -> NodeId {
        NodeId::from_addr(&self.address)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn election_answer_timeout(&self) -> Duration {
        Duration::from_millis(self.election_answer_timeout_ms)
    }

    pub fn victory_timeout(&self) -> Duration {
        Duration::from_millis(self.victory_timeout_ms)
    }
}

/// Request/response channel the coordination layer uses to reach its peers.
///
/// Implementations bound every call by their own timeout; an `Err` means the
/// peer was unreachable for this call only.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn send(&self, to: SocketAddr, message: ConsensusMessage) -> Result<ConsensusMessage>;
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}
