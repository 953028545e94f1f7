mod common;

use api::{LockManager, LockOutcome};
use common::LocalNet;
use consensus::{ConsensusMessage, ElectionPhase, NodeId};
use proptest::prelude::*;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn highest_node_wins_when_lowest_starts() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001, 5002]);

    nodes[0].election.start_election().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let epoch = nodes[2].epoch().await;
    assert!(epoch > 0);
    for node in &nodes {
        assert_eq!(node.coordinator().await, Some(NodeId(5002)), "node {}", node.id);
        assert_eq!(node.epoch().await, epoch);
        assert!(!node.election.is_active().await);
    }
    assert!(nodes[2].view.read().await.is_coordinator());
}

#[tokio::test(start_paused = true)]
async fn unreachable_highest_node_is_skipped() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001, 5002]);
    net.kill(5002);

    nodes[0].election.start_election().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5001)));
    assert_eq!(nodes[1].coordinator().await, Some(NodeId(5001)));
}

#[tokio::test(start_paused = true)]
async fn lone_node_elects_itself() {
    let net = LocalNet::new();
    let node = net.add_node(5000, &[5000, 5001, 5002]);
    net.kill(5001);
    net.kill(5002);

    node.election.start_election().await;

    assert_eq!(node.coordinator().await, Some(NodeId(5000)));
    assert_eq!(node.epoch().await, 1);
    assert_eq!(node.election.state().await.phase, ElectionPhase::Idle);
}

#[tokio::test]
async fn stale_coordinator_announcement_changes_nothing() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001, 5002]);

    nodes[0].election.on_coordinator(5, NodeId(5002)).await;
    nodes[0].election.on_coordinator(3, NodeId(5001)).await;

    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5002)));
    assert_eq!(nodes[0].epoch().await, 5);
}

#[tokio::test]
async fn repeated_coordinator_announcement_is_idempotent() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001]);
    let mut leadership = nodes[0].view.read().await.subscribe();

    nodes[0].election.on_coordinator(2, NodeId(5001)).await;
    assert!(leadership.has_changed().unwrap());
    leadership.borrow_and_update();

    nodes[0].election.on_coordinator(2, NodeId(5001)).await;
    assert!(!leadership.has_changed().unwrap());
    assert_eq!(nodes[0].epoch().await, 2);
}

#[tokio::test(start_paused = true)]
async fn stale_or_higher_election_messages_are_not_answered() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001, 5002]);
    nodes[1].election.on_coordinator(4, NodeId(5002)).await;

    let stale = nodes[1]
        .election
        .handle_message(ConsensusMessage::Election {
            epoch: 2,
            sender_id: NodeId(5000),
        })
        .await;
    assert_eq!(stale, ConsensusMessage::Ack);

    let from_higher = nodes[1]
        .election
        .handle_message(ConsensusMessage::Election {
            epoch: 5,
            sender_id: NodeId(5002),
        })
        .await;
    assert_eq!(from_higher, ConsensusMessage::Ack);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!nodes[1].election.is_active().await);
    assert_eq!(nodes[1].coordinator().await, Some(NodeId(5002)));
}

#[tokio::test(start_paused = true)]
async fn election_from_lower_node_gets_answer() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001]);

    let reply = nodes[1]
        .election
        .handle_message(ConsensusMessage::Election {
            epoch: 1,
            sender_id: NodeId(5000),
        })
        .await;
    assert!(matches!(reply, ConsensusMessage::Answer { sender_id: NodeId(5001), .. }));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(nodes[1].coordinator().await, Some(NodeId(5001)));
    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5001)));
}

#[tokio::test(start_paused = true)]
async fn running_round_is_not_restarted() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001]);
    net.silence(5001);

    tokio::spawn(nodes[0].election.start_election());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = nodes[0].election.state().await;
    assert_eq!(state.phase, ElectionPhase::ElectionInProgress);
    assert_eq!(state.round, 1);

    nodes[0].election.start_election().await;
    assert_eq!(nodes[0].election.state().await.round, 1);

    // The silent peer never answers, so the round ends in self-promotion.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5000)));
    assert_eq!(nodes[0].election.state().await.round, 1);
}

#[tokio::test(start_paused = true)]
async fn missing_victory_announcement_restarts_election() {
    let net = LocalNet::new();
    let node = net.add_node(5000, &[5000, 5001]);
    net.answer_only(5001);

    node.election.start_election().await;
    let state = node.election.state().await;
    assert_eq!(state.phase, ElectionPhase::WaitingForVictory);
    assert_eq!(state.round, 1);

    // Victory timeout is 1000 ms plus up to 25% jitter.
    tokio::time::sleep(Duration::from_millis(1400)).await;

    let state = node.election.state().await;
    assert!(state.round >= 2);
    assert_eq!(state.phase, ElectionPhase::WaitingForVictory);
    assert_eq!(node.coordinator().await, None);
}

#[tokio::test(start_paused = true)]
async fn spurious_challenge_keeps_coordinator_epoch() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001]);

    nodes[1].election.start_election().await;
    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5001)));
    let epoch = nodes[1].epoch().await;

    nodes[0].election.start_election().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(nodes[1].epoch().await, epoch);
    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5001)));
    assert!(!nodes[0].election.is_active().await);
}

#[tokio::test(start_paused = true)]
async fn repeated_challenges_keep_coordinator_term_and_locks() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5001, 5002]);
    nodes[1].election.start_election().await;

    let term = nodes[1].view.read().await.term();
    let locks = LockManager::new(Duration::from_secs(30));
    assert_eq!(locks.acquire(term, "test.txt", "client-a").await, LockOutcome::Granted);

    for _ in 0..3 {
        nodes[0].election.start_election().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let (coordinator, epoch, current_term) = {
        let view = nodes[1].view.read().await;
        (view.coordinator_id(), view.epoch(), view.term())
    };
    assert_eq!(coordinator, Some(NodeId(5002)));
    assert_eq!(epoch, term);
    assert_eq!(current_term, term);
    assert_eq!(
        locks.acquire(current_term, "test.txt", "client-b").await,
        LockOutcome::Denied
    );
}

#[tokio::test(start_paused = true)]
async fn fresh_higher_node_outbids_challenger_epoch() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001]);
    nodes[0].election.on_coordinator(7, NodeId(5000)).await;

    nodes[0].election.start_election().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5001)));
    assert!(nodes[1].epoch().await > 7);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn election_converges_on_highest_alive_node(
        ports in prop::collection::btree_set(6000u16..6050, 2..6),
        down_mask in prop::collection::vec(any::<bool>(), 6),
        starter in any::<prop::sample::Index>(),
    ) {
        let ports: Vec<u16> = ports.into_iter().collect();
        let highest = *ports.last().unwrap();
        let dead: Vec<u16> = ports
            .iter()
            .zip(&down_mask)
            .filter(|(port, down)| **down && **port != highest)
            .map(|(port, _)| *port)
            .collect();
        let alive: Vec<u16> = ports.iter().copied().filter(|p| !dead.contains(p)).collect();
        let starter = alive[starter.index(alive.len())];

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let net = LocalNet::new();
            let nodes = net.cluster(&ports);
            for port in &dead {
                net.kill(*port);
            }

            let first = nodes.iter().find(|n| n.id == NodeId(starter)).unwrap();
            first.election.start_election().await;
            tokio::time::sleep(Duration::from_secs(30)).await;

            for node in nodes.iter().filter(|n| alive.contains(&n.id.0)) {
                assert_eq!(node.coordinator().await, Some(NodeId(highest)), "node {}", node.id);
            }
        });
    }
}
