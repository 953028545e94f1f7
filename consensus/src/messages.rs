use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Election and liveness traffic between cluster nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Heartbeat {
        sender_id: NodeId,
    },
    HeartbeatAck {
        sender_id: NodeId,
        coordinator_id: Option<NodeId>,
        epoch: u64,
    },
    Election {
        epoch: u64,
        sender_id: NodeId,
    },
    Answer {
        epoch: u64,
        sender_id: NodeId,
    },
    Coordinator {
        epoch: u64,
        sender_id: NodeId,
    },
    Ack,
}

impl ConsensusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Heartbeat { .. } => "HEARTBEAT",
            ConsensusMessage::HeartbeatAck { .. } => "HEARTBEAT_ACK",
            ConsensusMessage::Election { .. } => "ELECTION",
            ConsensusMessage::Answer { .. } => "ANSWER",
            ConsensusMessage::Coordinator { .. } => "COORDINATOR",
            ConsensusMessage::Ack => "ACK",
        }
    }
}
