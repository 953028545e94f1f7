use futures::future::join_all;
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior};

use crate::messages::ConsensusMessage;
use crate::view::HeartbeatOutcome;
use crate::{Config, ElectionCoordinator, NodeId, PeerTransport, Result, Role, SharedClusterView};

/// Fixed-interval liveness probing.
///
/// The coordinator probes every other member; a follower probes only the
/// coordinator and starts an election once it has missed `threshold`
/// consecutive answers.
pub struct HeartbeatMonitor {
    self_id: NodeId,
    view: SharedClusterView,
    election: Arc<ElectionCoordinator>,
    transport: Arc<dyn PeerTransport>,
    interval: Duration,
    threshold: u32,
}

impl HeartbeatMonitor {
    pub fn new(
        config: &Config,
        view: SharedClusterView,
        election: Arc<ElectionCoordinator>,
        transport: Arc<dyn PeerTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_id: config.node_id(),
            view,
            election,
            transport,
            interval: config.heartbeat_interval(),
            threshold: config.missed_heartbeat_threshold.max(1),
        })
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        tracing::info!(
            "Heartbeat monitor for node {} running every {:?} (threshold {})",
            self.self_id,
            self.interval,
            self.threshold
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; give the node a full interval
        // to finish registering before probing.
        interval.tick().await;

        loop {
            interval.tick().await;
            self.probe_once().await;
        }
    }

    /// Runs a single probe round according to the node's current role.
    pub async fn probe_once(&self) {
        let (role, targets) = {
            let view = self.view.read().await;
            let role = view.role();
            let targets: Vec<_> = match role {
                Role::Coordinator => view.peers().map(|m| (m.id, m.address)).collect(),
                Role::Follower => view
                    .coordinator_record()
                    .map(|m| vec![(m.id, m.address)])
                    .unwrap_or_default(),
                Role::Unknown => Vec::new(),
            };
            (role, targets)
        };

        if role == Role::Unknown {
            if !self.election.is_active().await {
                tracing::info!("Node {} has no coordinator, starting election", self.self_id);
                tokio::spawn(self.election.start_election());
            }
            return;
        }

        let probes = targets.into_iter().map(|(id, address)| {
            let transport = self.transport.clone();
            let message = ConsensusMessage::Heartbeat {
                sender_id: self.self_id,
            };
            async move { (id, transport.send(address, message).await) }
        });
        let results = join_all(probes).await;

        let mut coordinator_lost = false;
        let mut newer_leadership = None;
        {
            let mut view = self.view.write().await;
            for (id, result) in results {
                match result {
                    Ok(reply) => {
                        if let ConsensusMessage::HeartbeatAck {
                            coordinator_id: Some(coordinator),
                            epoch,
                            ..
                        } = reply
                        {
                            if epoch > view.epoch() {
                                newer_leadership = Some((epoch, coordinator));
                            }
                        }
                        if view.record_heartbeat_success(id) == HeartbeatOutcome::Recovered {
                            tracing::info!("Node {} answering heartbeats again", id);
                        }
                    }
                    Err(e) => match view.record_heartbeat_failure(id, self.threshold) {
                        HeartbeatOutcome::MarkedDead => {
                            tracing::warn!(
                                "Node {} marked dead after {} missed heartbeats: {}",
                                id,
                                self.threshold,
                                e
                            );
                            if role == Role::Follower && view.coordinator_id() == Some(id) {
                                view.clear_coordinator();
                                coordinator_lost = true;
                            }
                        }
                        HeartbeatOutcome::Missed(count) => {
                            tracing::trace!(
                                "Heartbeat to {} missed ({} in a row): {}",
                                id,
                                count,
                                e
                            );
                        }
                        _ => {}
                    },
                }
            }
        }

        if let Some((epoch, coordinator)) = newer_leadership {
            if coordinator > self.self_id {
                self.election.on_coordinator(epoch, coordinator).await;
            } else if coordinator < self.self_id {
                // A lower node leads a newer epoch; outrank it through a round.
                tracing::info!(
                    "Node {} saw lower node {} leading epoch {}, starting election",
                    self.self_id,
                    coordinator,
                    epoch
                );
                tokio::spawn(self.election.start_election_above(epoch));
            }
        }

        if coordinator_lost {
            tracing::warn!("Node {} lost its coordinator, starting election", self.self_id);
            tokio::spawn(self.election.start_election());
        }
    }

    /// Reply to an inbound HEARTBEAT.
    pub async fn on_heartbeat(&self, sender_id: NodeId) -> ConsensusMessage {
        tracing::trace!("Heartbeat from {}", sender_id);
        let view = self.view.read().await;
        ConsensusMessage::HeartbeatAck {
            sender_id: self.self_id,
            coordinator_id: view.coordinator_id(),
            epoch: view.epoch(),
        }
    }
}
