use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;

use quorum_core::error::{Error, Result};

use crate::codec::{Cryptor, Serializer};
use crate::raft::NodeId;

/// Which frame codec the node uses on the wire and in the log file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    Json,
    Encrypted,
}

/// Per-node configuration. Deserializable from a config file merged with
/// environment variables; every field has a default so partial files work.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// This node's identity, `host:port`. Doubles as the UDP bind address.
    pub id: NodeId,
    /// Every node in the cluster. May include this node; it is filtered out
    /// when building the peer set.
    pub peers: Vec<NodeId>,
    /// Directory holding the hard-state record and the entry log.
    pub log_path: PathBuf,
    /// Seconds between leader heartbeats.
    pub heartbeat_interval: f64,
    /// Election timeouts are drawn uniformly from this range, in seconds.
    pub election_interval: (f64, f64),
    pub serializer: SerializerKind,
    /// Key material for the encrypted codec.
    pub secret_key: Option<String>,
    pub salt: Option<String>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            id: "127.0.0.1:8000".to_string(),
            peers: Vec::new(),
            log_path: PathBuf::from("data"),
            heartbeat_interval: 0.5,
            election_interval: (2.0, 4.0),
            serializer: SerializerKind::Json,
            secret_key: None,
            salt: None,
        }
    }
}

lazy_static! {
    static ref NODE_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+:\d{1,5}$").unwrap();
}

impl RaftConfig {
    pub fn validate(&self) -> Result<()> {
        if !NODE_ID_RE.is_match(&self.id) {
            return Err(Error::Config(format!("node id `{}` is not host:port", self.id)));
        }
        for peer in &self.peers {
            if !NODE_ID_RE.is_match(peer) {
                return Err(Error::Config(format!("peer id `{}` is not host:port", peer)));
            }
        }
        let (low, high) = self.election_interval;
        if low <= 0.0 || low >= high {
            return Err(Error::Config(format!(
                "election_interval ({}, {}) must be an increasing positive range",
                low, high
            )));
        }
        if self.heartbeat_interval <= 0.0 || self.heartbeat_interval >= low {
            return Err(Error::Config(format!(
                "heartbeat_interval {} must be positive and below election_interval low {}",
                self.heartbeat_interval, low
            )));
        }
        if self.serializer == SerializerKind::Encrypted
            && (self.secret_key.is_none() || self.salt.is_none())
        {
            return Err(Error::Config(
                "encrypted serializer requires secret_key and salt".to_string(),
            ));
        }
        Ok(())
    }

    /// Peers to replicate to: the configured cluster minus this node.
    pub fn remote_peers(&self) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|peer| **peer != self.id)
            .cloned()
            .collect()
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval)
    }

    pub fn election_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.election_interval.0),
            Duration::from_secs_f64(self.election_interval.1),
        )
    }

    /// Build the configured frame codec.
    pub fn serializer(&self) -> Result<Serializer> {
        match self.serializer {
            SerializerKind::Json => Ok(Serializer::Json),
            SerializerKind::Encrypted => {
                let key = self
                    .secret_key
                    .as_ref()
                    .ok_or_else(|| Error::Config("encrypted serializer requires secret_key".to_string()))?;
                let salt = self
                    .salt
                    .as_ref()
                    .ok_or_else(|| Error::Config("encrypted serializer requires salt".to_string()))?;
                Ok(Serializer::Encrypted(Cryptor::new(key.as_bytes(), salt.as_bytes())))
            }
        }
    }
}

/// Load configuration from a file, overlaid with `QUORUM_*` environment
/// variables.
pub fn from_path<P: AsRef<Path>>(config_path: P) -> Result<RaftConfig> {
    let mut settings = config::Config::default();
    settings
        .merge(config::File::from(config_path.as_ref()))
        .map_err(|e| Error::Config(e.to_string()))?
        .merge(config::Environment::with_prefix("QUORUM"))
        .map_err(|e| Error::Config(e.to_string()))?;
    let config: RaftConfig = settings
        .try_into()
        .map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
