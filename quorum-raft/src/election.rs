use std::collections::HashMap;

use crate::raft::NodeId;

/// Outcome of an in-flight election.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionStatus {
    /// A strict majority of the cluster granted their vote.
    Elected,
    /// Not decided yet; responses are still outstanding.
    Voting,
    /// Enough denials that a majority is out of reach.
    Defeated,
}

/// Vote tally for a single election, the candidate's own vote included.
/// Votes are keyed by voter, so replayed datagrams cannot inflate the count.
#[derive(Debug)]
pub struct Election {
    cluster_size: usize,
    votes: HashMap<NodeId, bool>,
}

impl Election {
    /// `cluster_size` counts the full cluster: peers plus the candidate.
    pub fn new(cluster_size: usize) -> Election {
        Election {
            cluster_size,
            votes: HashMap::new(),
        }
    }

    pub fn vote(&mut self, id: NodeId, granted: bool) {
        self.votes.insert(id, granted);
    }

    pub fn granted(&self) -> usize {
        self.votes.values().filter(|granted| **granted).count()
    }

    /// Smallest strict majority of the full cluster.
    pub fn majority(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    pub fn status(&self) -> ElectionStatus {
        let granted = self.granted();
        if granted >= self.majority() {
            return ElectionStatus::Elected;
        }
        let outstanding = self.cluster_size - self.votes.len();
        if granted + outstanding < self.majority() {
            return ElectionStatus::Defeated;
        }
        ElectionStatus::Voting
    }

    /// Forget all votes; used when a candidate starts a new election.
    pub fn reset(&mut self) {
        self.votes.clear();
    }
}
