use futures::future::{join_all, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::messages::ConsensusMessage;
use crate::{Config, NodeId, NodeRecord, PeerTransport, SharedClusterView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionPhase {
    Idle,
    ElectionInProgress,
    WaitingForVictory,
    WonElection,
}

/// Transient per-node election state. `round` distinguishes successive
/// attempts so that late timers from an abandoned round do nothing.
#[derive(Debug, Clone)]
pub struct ElectionState {
    pub phase: ElectionPhase,
    pub deadline: Option<Instant>,
    pub epoch: u64,
    pub round: u64,
}

impl ElectionState {
    fn idle() -> Self {
        Self {
            phase: ElectionPhase::Idle,
            deadline: None,
            epoch: 0,
            round: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            ElectionPhase::ElectionInProgress | ElectionPhase::WaitingForVictory
        )
    }

    fn reset(&mut self) {
        self.phase = ElectionPhase::Idle;
        self.deadline = None;
    }
}

/// Bully election. The highest alive NodeId always ends up coordinator.
///
/// Lock order is view first, then election state; neither guard is held
/// across a network call.
pub struct ElectionCoordinator {
    self_id: NodeId,
    view: SharedClusterView,
    state: Mutex<ElectionState>,
    transport: Arc<dyn PeerTransport>,
    answer_timeout: Duration,
    victory_timeout: Duration,
    stopped: AtomicBool,
}

impl ElectionCoordinator {
    pub fn new(
        config: &Config,
        view: SharedClusterView,
        transport: Arc<dyn PeerTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_id: config.node_id(),
            view,
            state: Mutex::new(ElectionState::idle()),
            transport,
            answer_timeout: config.election_answer_timeout(),
            victory_timeout: config.victory_timeout(),
            stopped: AtomicBool::new(false),
        })
    }

    pub async fn state(&self) -> ElectionState {
        self.state.lock().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_active()
    }

    /// Detaches this coordinator from pending timers; no further rounds run.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Runs one election round. Does nothing while a round is already in
    /// progress or waiting for a victory announcement.
    pub fn start_election(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let this = Arc::clone(self);
        async move { this.run_round().await }.boxed()
    }

    /// Like `start_election`, but the round's epoch is raised above `epoch`,
    /// a newer epoch seen elsewhere in the cluster.
    pub fn start_election_above(self: &Arc<Self>, epoch: u64) -> BoxFuture<'static, ()> {
        let this = Arc::clone(self);
        async move {
            {
                let mut state = this.state.lock().await;
                state.epoch = state.epoch.max(epoch);
            }
            this.run_round().await
        }
        .boxed()
    }

    async fn run_round(self: Arc<Self>) {
        if self.is_stopped() {
            return;
        }

        let (epoch, round, higher) = {
            let view = self.view.read().await;
            let mut state = self.state.lock().await;
            if state.is_active() {
                tracing::debug!(
                    "Node {} already in election round {}, not restarting",
                    self.self_id,
                    state.round
                );
                return;
            }
            state.round += 1;
            state.epoch = state.epoch.max(view.epoch()) + 1;
            state.phase = ElectionPhase::ElectionInProgress;
            state.deadline = Some(Instant::now() + self.answer_timeout);
            (state.epoch, state.round, view.higher_members())
        };

        tracing::info!(
            "Node {} starting election for epoch {} ({} higher-priority peers)",
            self.self_id,
            epoch,
            higher.len()
        );

        if self.solicit_answers(&higher, epoch).await {
            self.enter_waiting(round).await;
        } else {
            self.declare_victory(epoch, round).await;
        }
    }

    /// Sends ELECTION to every higher node; true as soon as one answers.
    async fn solicit_answers(&self, higher: &[NodeRecord], epoch: u64) -> bool {
        if higher.is_empty() {
            return false;
        }

        let mut pending: FuturesUnordered<_> = higher
            .iter()
            .map(|peer| {
                let transport = self.transport.clone();
                let (id, address) = (peer.id, peer.address);
                let message = ConsensusMessage::Election {
                    epoch,
                    sender_id: self.self_id,
                };
                async move { (id, transport.send(address, message).await) }
            })
            .collect();

        let first_answer = async {
            while let Some((peer, reply)) = pending.next().await {
                match reply {
                    Ok(ConsensusMessage::Answer { .. }) => {
                        tracing::debug!("Node {} got ANSWER from {}", self.self_id, peer);
                        return true;
                    }
                    Ok(other) => {
                        tracing::debug!(
                            "Node {} got {} from {} instead of ANSWER",
                            self.self_id,
                            other.kind(),
                            peer
                        );
                    }
                    Err(e) => {
                        tracing::debug!("ELECTION to {} failed: {}", peer, e);
                    }
                }
            }
            false
        };

        tokio::time::timeout(self.answer_timeout, first_answer)
            .await
            .unwrap_or(false)
    }

    async fn enter_waiting(self: &Arc<Self>, round: u64) {
        let deadline = Instant::now() + self.jittered_victory_timeout();
        {
            let mut state = self.state.lock().await;
            if state.round != round || state.phase != ElectionPhase::ElectionInProgress {
                return;
            }
            state.phase = ElectionPhase::WaitingForVictory;
            state.deadline = Some(deadline);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if this.victory_timed_out(round).await {
                tracing::warn!(
                    "Node {} saw no COORDINATOR after ANSWER, restarting election",
                    this.self_id
                );
                this.start_election().await;
            }
        });
    }

    async fn victory_timed_out(&self, round: u64) -> bool {
        if self.is_stopped() {
            return false;
        }
        let mut state = self.state.lock().await;
        if state.round == round && state.phase == ElectionPhase::WaitingForVictory {
            state.reset();
            true
        } else {
            false
        }
    }

    fn jittered_victory_timeout(&self) -> Duration {
        let spread = (self.victory_timeout.as_millis() / 4) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..spread)
        };
        self.victory_timeout + Duration::from_millis(jitter)
    }

    async fn declare_victory(&self, epoch: u64, round: u64) {
        if self.is_stopped() {
            return;
        }

        let lower = {
            let mut view = self.view.write().await;
            let mut state = self.state.lock().await;
            if state.round != round || state.phase != ElectionPhase::ElectionInProgress {
                return;
            }
            if epoch <= view.epoch() {
                state.reset();
                return;
            }
            state.phase = ElectionPhase::WonElection;
            state.deadline = None;
            view.begin_term(self.self_id, epoch);
            view.lower_members()
        };

        tracing::info!("Node {} won election, now coordinator for epoch {}", self.self_id, epoch);

        let announcements = lower.iter().map(|peer| {
            let message = ConsensusMessage::Coordinator {
                epoch,
                sender_id: self.self_id,
            };
            let (id, address) = (peer.id, peer.address);
            async move {
                if let Err(e) = self.transport.send(address, message).await {
                    tracing::debug!("COORDINATOR to {} failed: {}", id, e);
                }
            }
        });
        join_all(announcements).await;

        let mut state = self.state.lock().await;
        if state.round == round && state.phase == ElectionPhase::WonElection {
            state.reset();
        }
    }

    /// Handles an inbound election-protocol message and returns the reply.
    pub async fn handle_message(self: &Arc<Self>, message: ConsensusMessage) -> ConsensusMessage {
        match message {
            ConsensusMessage::Election { epoch, sender_id } => {
                self.on_election(epoch, sender_id).await
            }
            ConsensusMessage::Answer { epoch, sender_id } => {
                self.on_answer(epoch, sender_id).await;
                ConsensusMessage::Ack
            }
            ConsensusMessage::Coordinator { epoch, sender_id } => {
                self.on_coordinator(epoch, sender_id).await;
                ConsensusMessage::Ack
            }
            other => {
                tracing::debug!("Election coordinator ignoring {}", other.kind());
                ConsensusMessage::Ack
            }
        }
    }

    /// A lower node is challenging. Answer it, then either re-announce our
    /// own leadership (already coordinator) or run our own round.
    pub async fn on_election(self: &Arc<Self>, epoch: u64, sender_id: NodeId) -> ConsensusMessage {
        let (view_epoch, is_coordinator, sender_address) = {
            let view = self.view.read().await;
            (view.epoch(), view.is_coordinator(), view.address_of(sender_id))
        };

        if sender_id >= self.self_id {
            tracing::debug!(
                "Node {} ignoring ELECTION from higher node {}",
                self.self_id,
                sender_id
            );
            return ConsensusMessage::Ack;
        }
        if epoch < view_epoch {
            tracing::debug!(
                "Node {} ignoring stale ELECTION from {} (epoch {} < {})",
                self.self_id,
                sender_id,
                epoch,
                view_epoch
            );
            return ConsensusMessage::Ack;
        }

        if is_coordinator {
            // A challenger is normally exactly one epoch ahead of us. Anything
            // further means it would reject our current epoch as stale.
            let announce_epoch = if epoch > view_epoch + 1 {
                let mut view = self.view.write().await;
                view.adopt_coordinator(self.self_id, epoch);
                tracing::info!("Node {} re-asserting leadership at epoch {}", self.self_id, epoch);
                epoch
            } else {
                view_epoch
            };

            if let Some(address) = sender_address {
                let transport = self.transport.clone();
                let message = ConsensusMessage::Coordinator {
                    epoch: announce_epoch,
                    sender_id: self.self_id,
                };
                tokio::spawn(async move {
                    if let Err(e) = transport.send(address, message).await {
                        tracing::debug!("Re-announcing leadership to {} failed: {}", sender_id, e);
                    }
                });
            }
        } else {
            tokio::spawn(self.start_election_above(epoch));
        }

        ConsensusMessage::Answer {
            epoch: view_epoch,
            sender_id: self.self_id,
        }
    }

    pub async fn on_answer(self: &Arc<Self>, _epoch: u64, sender_id: NodeId) {
        if sender_id <= self.self_id {
            return;
        }
        let round = {
            let state = self.state.lock().await;
            if state.phase != ElectionPhase::ElectionInProgress {
                return;
            }
            state.round
        };
        self.enter_waiting(round).await;
    }

    /// Accepts `sender_id` as coordinator unless `epoch` is older than ours.
    pub async fn on_coordinator(&self, epoch: u64, sender_id: NodeId) {
        let mut view = self.view.write().await;
        if epoch < view.epoch() {
            tracing::debug!(
                "Node {} ignoring stale COORDINATOR({}) from {}, local epoch {}",
                self.self_id,
                epoch,
                sender_id,
                view.epoch()
            );
            return;
        }

        let changed = view.adopt_coordinator(sender_id, epoch);
        let mut state = self.state.lock().await;
        // Drop any candidate epoch from a round that lost, so repeated
        // challenges do not drift ahead of the coordinator.
        state.epoch = epoch;
        state.reset();

        if changed {
            tracing::info!(
                "Node {} accepted {} as coordinator for epoch {}",
                self.self_id,
                sender_id,
                epoch
            );
        }
    }
}
