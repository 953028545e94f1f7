mod common;

use common::LocalNet;
use consensus::{NodeId, Role};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn follower_elects_after_coordinator_misses_threshold() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001, 5002]);
    nodes[2].election.start_election().await;
    assert_eq!(nodes[1].coordinator().await, Some(NodeId(5002)));

    net.kill(5002);

    nodes[1].heartbeat.probe_once().await;
    assert_eq!(nodes[1].coordinator().await, Some(NodeId(5002)));

    nodes[1].heartbeat.probe_once().await;
    assert!(!nodes[1].view.read().await.is_alive(NodeId(5002)));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(nodes[1].coordinator().await, Some(NodeId(5001)));
    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5001)));
    assert!(nodes[1].epoch().await > nodes[2].epoch().await);
}

#[tokio::test(start_paused = true)]
async fn coordinator_marks_member_dead_only_at_threshold_then_recovers() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001, 5002]);
    nodes[2].election.start_election().await;

    net.kill(5000);
    nodes[2].heartbeat.probe_once().await;
    assert!(nodes[2].view.read().await.is_alive(NodeId(5000)));

    nodes[2].heartbeat.probe_once().await;
    {
        let view = nodes[2].view.read().await;
        assert!(!view.is_alive(NodeId(5000)));
        let candidates: Vec<_> = view.storage_candidates().iter().map(|m| m.id).collect();
        assert_eq!(candidates, vec![NodeId(5001)]);
    }

    net.revive(5000);
    nodes[2].heartbeat.probe_once().await;
    assert!(nodes[2].view.read().await.is_alive(NodeId(5000)));
    assert_eq!(nodes[2].view.read().await.role(), Role::Coordinator);
}

#[tokio::test(start_paused = true)]
async fn newer_leadership_of_higher_node_in_ack_is_adopted() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001, 5002]);
    nodes[0].election.on_coordinator(1, NodeId(5001)).await;
    nodes[1].election.on_coordinator(3, NodeId(5002)).await;

    nodes[0].heartbeat.probe_once().await;

    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5002)));
    assert_eq!(nodes[0].epoch().await, 3);
}

#[tokio::test(start_paused = true)]
async fn revived_higher_node_reclaims_leadership_from_lower_coordinator() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5001, 5002]);
    nodes[1].election.start_election().await;
    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5002)));

    net.kill(5002);
    nodes[0].heartbeat.probe_once().await;
    nodes[0].heartbeat.probe_once().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5001)));
    assert_eq!(nodes[1].coordinator().await, Some(NodeId(5002)));

    // The lower node now leads a newer epoch than the one 5002 remembers.
    net.revive(5002);
    for _ in 0..10 {
        nodes[0].heartbeat.probe_once().await;
        nodes[1].heartbeat.probe_once().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5002)));
    assert_eq!(nodes[1].coordinator().await, Some(NodeId(5002)));
    let leadership = nodes[1].view.read().await.leadership();
    assert!(leadership.epoch > 2);
    assert_eq!(leadership.term, leadership.epoch);
}

#[tokio::test(start_paused = true)]
async fn node_without_coordinator_starts_election() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001]);
    assert_eq!(nodes[0].view.read().await.role(), Role::Unknown);

    nodes[0].heartbeat.probe_once().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5001)));
    assert_eq!(nodes[1].view.read().await.role(), Role::Coordinator);
}

#[tokio::test(start_paused = true)]
async fn monitor_loop_detects_failure_on_its_own() {
    let net = LocalNet::new();
    let nodes = net.cluster(&[5000, 5001]);
    nodes[1].election.start_election().await;

    for node in &nodes {
        tokio::spawn(node.heartbeat.clone().run());
    }
    net.kill(5001);

    // Two missed 1 s probes, then an election with a 500 ms answer timeout.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(nodes[0].coordinator().await, Some(NodeId(5000)));
}
