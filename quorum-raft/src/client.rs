use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use quorum_core::error::{Error, Result};

use crate::raft::{NodeId, RoleKind, Status};

/// Requests from the facade into a node's event loop.
#[derive(Debug)]
pub enum ClientRequest {
    /// Read this node's state machine.
    Get {
        name: String,
        reply: oneshot::Sender<Option<Value>>,
    },
    /// Submit a `{name: value}` command; only the leader accepts it.
    Set {
        name: String,
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle onto one node. Cheap to clone and usable from any task; every
/// operation goes through the node's own event loop, so handlers stay
/// single-threaded.
#[derive(Clone, Debug)]
pub struct Client {
    id: NodeId,
    requests: mpsc::UnboundedSender<ClientRequest>,
    status: watch::Receiver<Status>,
}

impl Client {
    pub(crate) fn new(
        id: NodeId,
        requests: mpsc::UnboundedSender<ClientRequest>,
        status: watch::Receiver<Status>,
    ) -> Client {
        Client {
            id,
            requests,
            status,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// The leader this node currently believes in: itself when leading, the
    /// sender of the last AppendEntries when following, none while an
    /// election is running.
    pub fn get_leader(&self) -> Option<NodeId> {
        self.status.borrow().leader.clone()
    }

    /// The node's current role, term, and leader.
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Suspend until this node holds leadership. Resolves `Cancelled` if
    /// the node stops first.
    pub async fn wait_until_leader(&self) -> Result<()> {
        let mut status = self.status.clone();
        loop {
            if status.borrow().role == RoleKind::Leader {
                return Ok(());
            }
            status.changed().await.map_err(|_| Error::Cancelled)?;
        }
    }

    /// Read a replicated value from this node's state machine. Reads are
    /// local and never fail at the protocol level.
    pub async fn get(&self, name: &str) -> Result<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(ClientRequest::Get {
                name: name.to_string(),
                reply: tx,
            })
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)
    }

    /// Write a replicated value through this node. Resolves once the entry
    /// is applied on the leader; anywhere else it fails fast with
    /// `NotALeader` carrying the believed leader id.
    pub async fn set(&self, name: &str, value: Value) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(ClientRequest::Set {
                name: name.to_string(),
                value,
                reply: tx,
            })
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Bind a named replicated value with a default.
    pub fn replicated(&self, name: &str, default: Value) -> Replicated {
        Replicated {
            client: self.clone(),
            name: name.to_string(),
            default,
        }
    }
}

/// A named replicated value bound to one node: reads come from that node's
/// state machine, writes are submitted through it to the leader.
#[derive(Clone, Debug)]
pub struct Replicated {
    client: Client,
    name: String,
    default: Value,
}

impl Replicated {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current applied value, or the binding's default.
    pub async fn get(&self) -> Result<Value> {
        Ok(self
            .client
            .get(&self.name)
            .await?
            .unwrap_or_else(|| self.default.clone()))
    }

    /// Replicate a new value. Fails with `NotALeader` on a non-leader node.
    pub async fn set(&self, value: Value) -> Result<()> {
        self.client.set(&self.name, value).await
    }
}
