//! Process wiring for `quorum` nodes: run a single node to completion, or
//! manage several in one process through an explicit [`Registry`].

#[macro_use]
extern crate slog;

use std::collections::HashMap;

use futures::future::RemoteHandle;
use futures::FutureExt;
use slog::Logger;
use tokio::sync::broadcast;

use quorum_core::error::{Error, Result};
use quorum_core::logger::get_root_logger;
use quorum_raft::client::Client;
use quorum_raft::config::RaftConfig;
use quorum_raft::raft::NodeId;
use quorum_raft::server::RaftNode;

pub use quorum_raft::client;
pub use quorum_raft::config;
pub use quorum_raft::raft;

/// Run one node until the shutdown channel fires or the node hits a fatal
/// storage error.
pub async fn run(
    config: RaftConfig,
    shutdown: (broadcast::Sender<()>, broadcast::Receiver<()>),
) -> Result<()> {
    let (node, _client) = RaftNode::new(config)?;
    node.run(shutdown.1).await
}

struct NodeHandle {
    client: Client,
    done: RemoteHandle<Result<()>>,
}

/// An explicit registry of the nodes running in this process. The embedding
/// service registers each local node once — with the full cluster's ids —
/// and reaches them by id afterwards. Tests run whole clusters in a single
/// process through it.
pub struct Registry {
    logger: Logger,
    shutdown: broadcast::Sender<()>,
    nodes: HashMap<NodeId, NodeHandle>,
}

impl Registry {
    pub fn new() -> Registry {
        let (shutdown, _) = broadcast::channel(1);
        Registry {
            logger: get_root_logger().new(o!()),
            shutdown,
            nodes: HashMap::new(),
        }
    }

    /// Start a node for `id` in a cluster of `cluster` ids. `base` supplies
    /// everything but identity and peers (storage path, intervals, codec).
    /// Returns the node's client handle.
    pub fn register(&mut self, id: &str, cluster: &[&str], base: RaftConfig) -> Result<Client> {
        if self.nodes.contains_key(id) {
            return Err(Error::Config(format!("node `{}` already registered", id)));
        }
        let mut config = base;
        config.id = id.to_string();
        config.peers = cluster.iter().map(|peer| peer.to_string()).collect();
        config.validate()?;

        let (node, client) = RaftNode::new(config)?;
        info!(self.logger, "registering node"; "id" => %id);
        let (task, done) = node.run(self.shutdown.subscribe()).remote_handle();
        tokio::spawn(task);
        self.nodes.insert(
            id.to_string(),
            NodeHandle {
                client: client.clone(),
                done,
            },
        );
        Ok(client)
    }

    pub fn client(&self, id: &str) -> Option<Client> {
        self.nodes.get(id).map(|node| node.client.clone())
    }

    /// The leader as believed by node `id`.
    pub fn get_leader(&self, id: &str) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.client.get_leader())
    }

    /// Suspend until node `id` holds leadership.
    pub async fn wait_until_leader(&self, id: &str) -> Result<()> {
        let client = self
            .client(id)
            .ok_or_else(|| Error::Config(format!("unknown node `{}`", id)))?;
        client.wait_until_leader().await
    }

    /// Stop every node and wait for their loops to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        for (id, node) in self.nodes {
            if let Err(e) = node.done.await {
                error!(self.logger, "node exited with error"; "id" => %id, "error" => %e);
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
