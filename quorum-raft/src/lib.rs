//! An embeddable Raft consensus engine: a fixed cluster of nodes replicating
//! a small set of named values with strong consistency. Writes go through
//! the elected leader and are durable on a majority before they are
//! acknowledged; any minority of nodes can fail and the cluster keeps
//! serving.

#[macro_use]
extern crate slog;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate derivative;

pub mod candidate;
pub mod client;
pub mod codec;
pub mod config;
pub mod election;
pub mod follower;
pub mod fsm;
pub mod leader;
pub mod log;
pub mod progress;
pub mod raft;
pub mod rpc;
pub mod server;
pub mod storage;
pub mod timer;
