use std::collections::HashMap;

use crate::raft::{LogIndex, NodeId};

/// Replication state for one peer, leader-side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeProgress {
    /// Index of the next entry to send this peer.
    pub next_index: LogIndex,
    /// Highest index known replicated on this peer.
    pub match_index: LogIndex,
}

/// Where every peer is in replication. Rebuilt on each election win:
/// `next_index` starts just past the leader's log, `match_index` at zero.
#[derive(Debug)]
pub struct ReplicationProgress {
    progress: HashMap<NodeId, NodeProgress>,
}

impl ReplicationProgress {
    pub fn new(peers: &[NodeId], last_log_index: LogIndex) -> ReplicationProgress {
        let progress = peers
            .iter()
            .map(|peer| {
                (
                    peer.clone(),
                    NodeProgress {
                        next_index: last_log_index + 1,
                        match_index: 0,
                    },
                )
            })
            .collect();
        ReplicationProgress { progress }
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeProgress> {
        self.progress.get(id)
    }

    pub fn next_index(&self, id: &NodeId) -> LogIndex {
        self.progress.get(id).map(|p| p.next_index).unwrap_or(1)
    }

    /// Back off after a consistency rejection. Floors at 1.
    pub fn decrement(&mut self, id: &NodeId) -> LogIndex {
        match self.progress.get_mut(id) {
            Some(p) => {
                if p.next_index > 1 {
                    p.next_index -= 1;
                }
                p.next_index
            }
            None => 1,
        }
    }

    /// A successful append: everything through `last_new_entry_index` is on
    /// the peer. `match_index` never regresses, so a stale duplicate
    /// response cannot walk the commit math backwards.
    pub fn advance(&mut self, id: &NodeId, last_new_entry_index: LogIndex) {
        if let Some(p) = self.progress.get_mut(id) {
            p.next_index = last_new_entry_index + 1;
            p.match_index = p.match_index.max(last_new_entry_index);
        }
    }

    /// How many peers have `match_index >= index`. The leader adds itself
    /// when it checks for a majority.
    pub fn match_count(&self, index: LogIndex) -> usize {
        self.progress
            .values()
            .filter(|p| p.match_index >= index)
            .count()
    }
}
