//! The registry runs a whole cluster inside one process.

use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;
use tokio::time::sleep;

use quorum::config::RaftConfig;
use quorum::raft::RoleKind;
use quorum::Registry;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_registry_cluster_elects_and_replicates() {
    let dir = TempDir::new().unwrap();
    let ports: Vec<u16> = (0..3)
        .map(|_| {
            std::net::UdpSocket::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap()
                .port()
        })
        .collect();
    let ids: Vec<String> = ports
        .iter()
        .map(|port| format!("127.0.0.1:{}", port))
        .collect();
    let cluster: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();

    let mut registry = Registry::new();
    let mut clients = Vec::new();
    for id in &cluster {
        let base = RaftConfig {
            log_path: dir.path().join(id.replace(':', "_")),
            heartbeat_interval: 0.05,
            election_interval: (0.15, 0.3),
            ..RaftConfig::default()
        };
        clients.push(registry.register(id, &cluster, base).unwrap());
    }

    // registering the same id twice is refused
    let base = RaftConfig {
        log_path: dir.path().join("dup"),
        heartbeat_interval: 0.05,
        election_interval: (0.15, 0.3),
        ..RaftConfig::default()
    };
    assert!(registry.register(cluster[0], &cluster, base).is_err());

    // some node becomes leader; the registry can wait on it by id
    let start = Instant::now();
    let leader = loop {
        if let Some(client) = clients
            .iter()
            .find(|client| client.status().role == RoleKind::Leader)
        {
            break client.clone();
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "no leader elected"
        );
        sleep(Duration::from_millis(20)).await;
    };
    registry.wait_until_leader(leader.id()).await.unwrap();
    assert_eq!(Some(leader.id().clone()), registry.get_leader(leader.id()));

    // a write through the leader is readable on every registered node
    leader.set("greeting", json!("hello")).await.unwrap();
    for id in &cluster {
        let client = registry.client(id).unwrap();
        let start = Instant::now();
        loop {
            if client.get("greeting").await.unwrap() == Some(json!("hello")) {
                break;
            }
            assert!(
                start.elapsed() < Duration::from_secs(2),
                "write never reached {}",
                id
            );
            sleep(Duration::from_millis(20)).await;
        }
    }

    registry.stop().await;
}
