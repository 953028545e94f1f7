use chrono::Utc;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::{ClusterSnapshot, NodeId, NodeRecord, Role};

pub type SharedClusterView = Arc<RwLock<ClusterView>>;

/// Published whenever the believed coordinator or the epoch changes.
///
/// `term` is the epoch at which `coordinator_id` took over. A coordinator
/// that re-asserts itself at a later epoch keeps its term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leadership {
    pub coordinator_id: Option<NodeId>,
    pub epoch: u64,
    pub term: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Alive,
    Recovered,
    Missed(u32),
    MarkedDead,
    Unknown,
}

/// The local record of known peers, their roles and the believed coordinator.
///
/// Different processes may disagree for a while; at most one member is
/// `Role::Coordinator` inside a single view.
#[derive(Debug)]
pub struct ClusterView {
    self_id: NodeId,
    members: BTreeMap<NodeId, NodeRecord>,
    coordinator_id: Option<NodeId>,
    epoch: u64,
    term: u64,
    leadership_tx: watch::Sender<Leadership>,
}

impl ClusterView {
    pub fn new(address: SocketAddr, peers: &[SocketAddr]) -> Self {
        let self_id = NodeId::from_addr(&address);
        let mut members = BTreeMap::new();
        members.insert(self_id, NodeRecord::new(address));
        for peer in peers {
            members
                .entry(NodeId::from_addr(peer))
                .or_insert_with(|| NodeRecord::new(*peer));
        }

        let (leadership_tx, _) = watch::channel(Leadership {
            coordinator_id: None,
            epoch: 0,
            term: 0,
        });

        Self {
            self_id,
            members,
            coordinator_id: None,
            epoch: 0,
            term: 0,
            leadership_tx,
        }
    }

    pub fn shared(self) -> SharedClusterView {
        Arc::new(RwLock::new(self))
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Epoch at which the current coordinator took over.
    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn coordinator_id(&self) -> Option<NodeId> {
        self.coordinator_id
    }

    pub fn coordinator_record(&self) -> Option<&NodeRecord> {
        self.coordinator_id.and_then(|id| self.members.get(&id))
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator_id == Some(self.self_id)
    }

    pub fn role(&self) -> Role {
        match self.coordinator_id {
            Some(id) if id == self.self_id => Role::Coordinator,
            Some(_) => Role::Follower,
            None => Role::Unknown,
        }
    }

    pub fn member(&self, id: NodeId) -> Option<&NodeRecord> {
        self.members.get(&id)
    }

    pub fn address_of(&self, id: NodeId) -> Option<SocketAddr> {
        self.members.get(&id).map(|m| m.address)
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.members.get(&id).map(|m| m.alive).unwrap_or(false)
    }

    pub fn members(&self) -> impl Iterator<Item = &NodeRecord> {
        self.members.values()
    }

    pub fn peers(&self) -> impl Iterator<Item = &NodeRecord> {
        let self_id = self.self_id;
        self.members.values().filter(move |m| m.id != self_id)
    }

    /// Members with a strictly higher election priority than this node.
    pub fn higher_members(&self) -> Vec<NodeRecord> {
        self.members
            .range((Bound::Excluded(self.self_id), Bound::Unbounded))
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn lower_members(&self) -> Vec<NodeRecord> {
        self.members
            .range(..self.self_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Alive members that may receive file replicas: everyone except the
    /// node currently acting as coordinator.
    pub fn storage_candidates(&self) -> Vec<NodeRecord> {
        self.members
            .values()
            .filter(|m| m.alive && Some(m.id) != self.coordinator_id)
            .cloned()
            .collect()
    }

    /// Adds a member announced through `REGISTER`. Returns true if it was new.
    pub fn upsert_member(&mut self, address: SocketAddr) -> bool {
        let id = NodeId::from_addr(&address);
        match self.members.get_mut(&id) {
            Some(record) => {
                record.address = address;
                record.alive = true;
                record.missed_heartbeats = 0;
                record.last_seen = Utc::now();
                false
            }
            None => {
                let mut record = NodeRecord::new(address);
                if Some(id) != self.coordinator_id {
                    record.role = Role::Follower;
                }
                self.members.insert(id, record);
                true
            }
        }
    }

    /// Installs `coordinator` for `epoch`. Returns false when the pair is
    /// stale or already in place.
    pub fn adopt_coordinator(&mut self, coordinator: NodeId, epoch: u64) -> bool {
        if epoch < self.epoch {
            return false;
        }
        if epoch == self.epoch && self.coordinator_id == Some(coordinator) {
            return false;
        }
        let new_term = self.coordinator_id != Some(coordinator);
        self.install(coordinator, epoch, new_term);
        true
    }

    /// Installs `coordinator` after it won an election round at `epoch`.
    /// Unlike `adopt_coordinator` this always opens a new term.
    pub fn begin_term(&mut self, coordinator: NodeId, epoch: u64) -> bool {
        if epoch <= self.epoch {
            return false;
        }
        self.install(coordinator, epoch, true);
        true
    }

    fn install(&mut self, coordinator: NodeId, epoch: u64, new_term: bool) {
        if new_term {
            self.term = epoch;
        }
        self.epoch = epoch;
        self.coordinator_id = Some(coordinator);
        for record in self.members.values_mut() {
            record.role = if record.id == coordinator {
                Role::Coordinator
            } else {
                Role::Follower
            };
        }
        if let Some(record) = self.members.get_mut(&coordinator) {
            record.alive = true;
            record.missed_heartbeats = 0;
            record.last_seen = Utc::now();
        }

        self.leadership_tx.send_replace(self.leadership());
    }

    /// Forgets the coordinator after it was declared dead. The epoch is kept
    /// so stale announcements from it are still rejected.
    pub fn clear_coordinator(&mut self) {
        if let Some(id) = self.coordinator_id.take() {
            if let Some(record) = self.members.get_mut(&id) {
                record.role = Role::Unknown;
            }
            self.leadership_tx.send_replace(self.leadership());
        }
    }

    pub fn record_heartbeat_success(&mut self, id: NodeId) -> HeartbeatOutcome {
        let Some(record) = self.members.get_mut(&id) else {
            return HeartbeatOutcome::Unknown;
        };
        let was_dead = !record.alive;
        record.alive = true;
        record.missed_heartbeats = 0;
        record.last_seen = Utc::now();
        if was_dead {
            HeartbeatOutcome::Recovered
        } else {
            HeartbeatOutcome::Alive
        }
    }

    /// Counts one missed heartbeat; the member is only marked dead once
    /// `threshold` consecutive probes have failed.
    pub fn record_heartbeat_failure(&mut self, id: NodeId, threshold: u32) -> HeartbeatOutcome {
        let Some(record) = self.members.get_mut(&id) else {
            return HeartbeatOutcome::Unknown;
        };
        record.missed_heartbeats = record.missed_heartbeats.saturating_add(1);
        if record.alive && record.missed_heartbeats >= threshold {
            record.alive = false;
            HeartbeatOutcome::MarkedDead
        } else {
            HeartbeatOutcome::Missed(record.missed_heartbeats)
        }
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            self_id: self.self_id,
            members: self.members.values().cloned().collect(),
            coordinator_id: self.coordinator_id,
            epoch: self.epoch,
        }
    }

    /// Merges what a coordinator told us at registration time.
    pub fn merge_snapshot(&mut self, snapshot: &ClusterSnapshot) {
        for member in &snapshot.members {
            if member.id == self.self_id {
                continue;
            }
            self.members
                .entry(member.id)
                .or_insert_with(|| NodeRecord::new(member.address));
        }
        if let Some(coordinator) = snapshot.coordinator_id {
            self.adopt_coordinator(coordinator, snapshot.epoch);
        }
    }

    pub fn leadership(&self) -> Leadership {
        Leadership {
            coordinator_id: self.coordinator_id,
            epoch: self.epoch,
            term: self.term,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Leadership> {
        self.leadership_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn higher_and_lower_members_split_on_self() {
        let view = ClusterView::new(addr(5001), &[addr(5000), addr(5001), addr(5002)]);

        let higher: Vec<_> = view.higher_members().iter().map(|m| m.id).collect();
        let lower: Vec<_> = view.lower_members().iter().map(|m| m.id).collect();

        assert_eq!(higher, vec![NodeId(5002)]);
        assert_eq!(lower, vec![NodeId(5000)]);
    }

    #[test]
    fn only_one_member_holds_coordinator_role() {
        let mut view = ClusterView::new(addr(5000), &[addr(5001), addr(5002)]);
        assert!(view.adopt_coordinator(NodeId(5001), 1));
        assert!(view.adopt_coordinator(NodeId(5002), 2));

        let coordinators = view
            .members()
            .filter(|m| m.role == Role::Coordinator)
            .count();
        assert_eq!(coordinators, 1);
        assert_eq!(view.coordinator_id(), Some(NodeId(5002)));
    }

    #[test]
    fn reasserted_leadership_keeps_its_term() {
        let mut view = ClusterView::new(addr(5000), &[addr(5001)]);
        view.adopt_coordinator(NodeId(5001), 1);
        assert!(view.adopt_coordinator(NodeId(5001), 3));
        assert_eq!((view.epoch(), view.term()), (3, 1));

        view.clear_coordinator();
        view.adopt_coordinator(NodeId(5001), 4);
        assert_eq!(view.term(), 4);

        view.adopt_coordinator(NodeId(5000), 5);
        assert_eq!(view.leadership().term, 5);

        assert!(view.begin_term(NodeId(5000), 6));
        assert_eq!(view.term(), 6);
        assert!(!view.begin_term(NodeId(5000), 6));
    }

    #[test]
    fn failure_threshold_marks_dead_then_recovers() {
        let mut view = ClusterView::new(addr(5000), &[addr(5001)]);

        assert_eq!(view.record_heartbeat_failure(NodeId(5001), 2), HeartbeatOutcome::Missed(1));
        assert!(view.is_alive(NodeId(5001)));
        assert_eq!(view.record_heartbeat_failure(NodeId(5001), 2), HeartbeatOutcome::MarkedDead);
        assert!(!view.is_alive(NodeId(5001)));
        assert_eq!(view.record_heartbeat_success(NodeId(5001)), HeartbeatOutcome::Recovered);
        assert!(view.is_alive(NodeId(5001)));
    }
}
