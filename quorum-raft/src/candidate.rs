use slog::Logger;

use quorum_core::error::Result;

use crate::election::{Election, ElectionStatus};
use crate::follower::Follower;
use crate::leader::Leader;
use crate::progress::ReplicationProgress;
use crate::raft::{election_timer, heartbeat_timer, Raft, RaftHandle, Role, RoleKind};
use crate::rpc::{Envelope, Message};
use crate::timer::Timer;

/// A node campaigning for leadership of the next term.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Candidate {
    pub election: Election,
    pub election_timer: Timer,
    #[derivative(Debug = "ignore")]
    pub logger: Logger,
}

impl Role for Candidate {
    fn kind(&self) -> RoleKind {
        RoleKind::Candidate
    }

    fn stop(&mut self) {
        self.election_timer.stop();
    }
}

impl Raft<Candidate> {
    /// Start (or restart) an election: bump the term, vote for ourselves —
    /// both durable before anything leaves this node — then ask everyone
    /// else.
    pub(crate) fn seek_election(mut self) -> Result<RaftHandle> {
        let term = self.current_term() + 1;
        self.storage.update(term, Some(self.id.clone()))?;
        self.role.election.reset();
        self.role.election.vote(self.id.clone(), true);
        info!(self.role.logger, "seeking election"; "term" => term);
        self.publish(None);
        self.broadcast(Message::RequestVote {
            term,
            candidate_id: self.id.clone(),
            last_log_index: self.log.last_log_index(),
            last_log_term: self.log.last_log_term(),
        });
        self.role.election_timer.reset();

        // a cluster of one elects itself on the spot
        if self.role.election.status() == ElectionStatus::Elected {
            return Ok(self.into_leader());
        }
        Ok(RaftHandle::Candidate(self))
    }

    fn into_leader(self) -> RaftHandle {
        let leader: Raft<Leader> = Raft::from(self);
        // an immediate heartbeat claims the term before anyone times out
        leader.append_entries(None);
        let id = leader.id.clone();
        leader.publish(Some(id));
        RaftHandle::Leader(leader)
    }

    pub(crate) fn receive(mut self, envelope: Envelope) -> Result<RaftHandle> {
        let from = envelope.from;
        match envelope.message {
            Message::RequestVoteResponse { vote_granted, .. } => {
                self.role.election.vote(from.clone(), vote_granted);
                debug!(self.role.logger, "vote response";
                    "from" => %from, "granted" => vote_granted);
                match self.role.election.status() {
                    ElectionStatus::Elected => Ok(self.into_leader()),
                    ElectionStatus::Voting => Ok(RaftHandle::Candidate(self)),
                    ElectionStatus::Defeated => {
                        info!(self.role.logger, "defeated in election");
                        let raft = Raft::<Follower>::from(self);
                        raft.publish(None);
                        Ok(RaftHandle::Follower(raft))
                    }
                }
            }
            Message::AppendEntries { term, .. } => {
                // An append at our own term means a legitimate leader holds
                // it; step down and let its next heartbeat feed us.
                if term == self.current_term() {
                    info!(self.role.logger, "discovered a leader, stepping down");
                    let raft = Raft::<Follower>::from(self);
                    raft.publish(None);
                    return Ok(RaftHandle::Follower(raft));
                }
                Ok(RaftHandle::Candidate(self))
            }
            Message::RequestVote { .. } => {
                // our vote this term went to ourselves
                let term = self.current_term();
                self.send(
                    &from,
                    Message::RequestVoteResponse {
                        term,
                        vote_granted: false,
                    },
                );
                Ok(RaftHandle::Candidate(self))
            }
            Message::AppendEntriesResponse { .. } => Ok(RaftHandle::Candidate(self)),
        }
    }
}

impl From<Raft<Candidate>> for Raft<Follower> {
    fn from(mut val: Raft<Candidate>) -> Raft<Follower> {
        val.role.stop();
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

impl From<Raft<Candidate>> for Raft<Leader> {
    fn from(mut val: Raft<Candidate>) -> Raft<Leader> {
        info!(val.role.logger, "becoming the leader"; "term" => val.current_term());
        val.role.stop();
        let epoch = val.next_epoch();
        let progress = ReplicationProgress::new(&val.peers, val.log.last_log_index());
        let heartbeat_timer = heartbeat_timer(&val.config, &val.timers, epoch);
        let role_logger = val.logger.new(o!("role" => "leader"));
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
            role: Leader {
                progress,
                heartbeat_timer,
                waiters: Vec::new(),
                logger: role_logger,
            },
        }
    }
}
