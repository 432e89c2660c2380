use slog::Logger;
use tokio::sync::oneshot;

use quorum_core::error::{Error, Result};

use crate::follower::Follower;
use crate::fsm::Command;
use crate::progress::ReplicationProgress;
use crate::raft::{election_timer, LogIndex, NodeId, Raft, RaftHandle, Role, RoleKind};
use crate::rpc::{Envelope, Message};
use crate::timer::Timer;

/// A client write parked until its entry is applied.
#[derive(Debug)]
pub struct Waiter {
    pub index: LogIndex,
    pub reply: oneshot::Sender<Result<()>>,
}

/// The node driving the cluster: replicating its log, advancing the commit
/// index, and answering client writes.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Leader {
    pub progress: ReplicationProgress,
    pub heartbeat_timer: Timer,
    pub waiters: Vec<Waiter>,
    #[derivative(Debug = "ignore")]
    pub logger: Logger,
}

impl Role for Leader {
    fn kind(&self) -> RoleKind {
        RoleKind::Leader
    }

    fn stop(&mut self) {
        self.heartbeat_timer.stop();
    }
}

impl Raft<Leader> {
    /// Build and queue AppendEntries for one peer or all of them. Each
    /// frame chains onto that peer's `next_index` and carries at most one
    /// entry; an up-to-date peer gets a bare heartbeat.
    pub(crate) fn append_entries(&self, destination: Option<&NodeId>) {
        let targets: Vec<NodeId> = match destination {
            Some(peer) => vec![peer.clone()],
            None => self.peers.clone(),
        };
        let term = self.current_term();
        for peer in targets {
            let next = self.role.progress.next_index(&peer);
            let prev = next - 1;
            let entries = match self.log.get(next) {
                Some(entry) => vec![entry.clone()],
                None => Vec::new(),
            };
            let prev_log_term = if prev >= 1 {
                self.log.get(prev).map(|e| e.term).unwrap_or(0)
            } else {
                0
            };
            self.send(
                &peer,
                Message::AppendEntries {
                    term,
                    leader_id: self.id.clone(),
                    prev_log_index: prev,
                    prev_log_term,
                    commit_index: self.log.commit_index,
                    entries,
                },
            );
        }
    }

    pub(crate) fn receive(mut self, envelope: Envelope) -> Result<RaftHandle> {
        let from = envelope.from;
        match envelope.message {
            Message::AppendEntriesResponse {
                success,
                last_new_entry_index,
                ..
            } => {
                if !success {
                    // walk back one entry and retry straight away
                    let next = self.role.progress.decrement(&from);
                    debug!(self.role.logger, "append rejected, backing off";
                        "peer" => %from, "next_index" => next);
                    self.append_entries(Some(&from));
                    return Ok(RaftHandle::Leader(self));
                }
                if let Some(last_new) = last_new_entry_index {
                    self.role.progress.advance(&from, last_new);
                    self.update_commit_index();
                    // keep pushing while the peer is behind
                    if self.role.progress.next_index(&from) <= self.log.last_log_index() {
                        self.append_entries(Some(&from));
                    }
                }
                Ok(RaftHandle::Leader(self))
            }
            Message::RequestVote { .. } => {
                // we hold this term
                let term = self.current_term();
                self.send(
                    &from,
                    Message::RequestVoteResponse {
                        term,
                        vote_granted: false,
                    },
                );
                Ok(RaftHandle::Leader(self))
            }
            Message::AppendEntries { .. } => {
                // two leaders cannot share a term; only a duplicate of our
                // own traffic could land here
                warn!(self.role.logger, "append_entries at our own term"; "from" => %from);
                Ok(RaftHandle::Leader(self))
            }
            Message::RequestVoteResponse { .. } => Ok(RaftHandle::Leader(self)),
        }
    }

    /// Advance `commit_index` to the largest index replicated on a majority
    /// — counting ourselves — whose entry is from our own term. The scan
    /// stops at the first index lacking a majority; older-term indexes
    /// inside the window commit transitively when a later own-term index
    /// clears.
    fn update_commit_index(&mut self) {
        let mut committed = self.log.commit_index;
        let current = self.current_term();
        for index in (self.log.commit_index + 1)..=self.log.last_log_index() {
            let replicated = self.role.progress.match_count(index) + 1;
            if !self.is_majority(replicated) {
                break;
            }
            if self.log.get(index).map(|e| e.term) == Some(current) {
                committed = index;
            }
        }
        if committed > self.log.commit_index {
            debug!(self.role.logger, "advancing commit index"; "to" => committed);
            self.log.commit_index = committed;
        }
    }

    /// A client write: append to our own log — durable before anything is
    /// sent — replicate it, and park the caller until the entry applies.
    pub(crate) fn execute(
        mut self,
        command: Command,
        reply: oneshot::Sender<Result<()>>,
    ) -> Result<RaftHandle> {
        let term = self.current_term();
        let entry = self.log.append(term, command)?;
        info!(self.role.logger, "accepted write"; "index" => entry.index, "term" => entry.term);
        self.role.waiters.push(Waiter {
            index: entry.index,
            reply,
        });
        self.append_entries(None);
        // a cluster of one commits on its own
        self.update_commit_index();
        Ok(RaftHandle::Leader(self))
    }

    /// Resolve every waiter whose entry has been applied.
    pub(crate) fn complete_waiters(&mut self) {
        let applied = self.log.last_applied;
        if self.role.waiters.iter().all(|w| w.index > applied) {
            return;
        }
        let waiters = std::mem::replace(&mut self.role.waiters, Vec::new());
        for waiter in waiters {
            if waiter.index <= applied {
                let _ = waiter.reply.send(Ok(()));
            } else {
                self.role.waiters.push(waiter);
            }
        }
    }

    /// Fail every pending write with a redirect; used on deposition.
    pub(crate) fn fail_waiters(&mut self, leader: Option<NodeId>) {
        for waiter in self.role.waiters.drain(..) {
            let _ = waiter.reply.send(Err(Error::NotALeader {
                leader: leader.clone(),
            }));
        }
    }

    /// Fail every pending write with a cancellation; used on shutdown.
    pub(crate) fn cancel_waiters(&mut self) {
        for waiter in self.role.waiters.drain(..) {
            let _ = waiter.reply.send(Err(Error::Cancelled));
        }
    }
}

impl From<Raft<Leader>> for Raft<Follower> {
    fn from(mut val: Raft<Leader>) -> Raft<Follower> {
        info!(val.role.logger, "stepping down");
        val.role.stop();
        val.fail_waiters(None);
        let epoch = val.next_epoch();
        let election_timer = election_timer(&val.config, &val.timers, epoch);
        let role_logger = val.logger.new(o!("role" => "follower"));
        Raft {
            id: val.id,
            peers: val.peers,
            storage: val.storage,
            log: val.log,
            fsm: val.fsm,
            outbound: val.outbound,
            timers: val.timers,
            status_tx: val.status_tx,
            epoch: val.epoch,
            logger: val.logger,
            config: val.config,
            role: Follower {
                leader_id: None,
                election_timer,
                logger: role_logger,
            },
        }
    }
}
