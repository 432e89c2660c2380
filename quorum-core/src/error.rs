use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine. Protocol conditions (stale terms, log
/// inconsistencies) are resolved inside the role machine and never appear
/// here; user writes see `NotALeader`, everything else is an operational
/// failure of the node itself.
#[derive(Error, Debug)]
pub enum Error {
    /// The addressed node is not the current leader. Carries the believed
    /// leader id so the caller can redirect, if one is known.
    #[error("not the leader (current leader: {leader:?})")]
    NotALeader { leader: Option<String> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cipher error: {0}")]
    Crypto(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The node shut down while an operation was in flight.
    #[error("operation cancelled")]
    Cancelled,

    #[error("log corrupt: {0}")]
    LogCorrupt(String),
}
