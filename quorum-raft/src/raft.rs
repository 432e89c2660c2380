use std::fmt;

use slog::Logger;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

use quorum_core::error::{Error, Result};

use crate::candidate::Candidate;
use crate::client::ClientRequest;
use crate::config::RaftConfig;
use crate::follower::Follower;
use crate::fsm::{Command, StateMachine};
use crate::leader::Leader;
use crate::log::RaftLog;
use crate::rpc::{Envelope, Message, Outbound};
use crate::storage::Storage;
use crate::timer::{Interval, Timer};

/// A node identity, `host:port`. Doubles as the address frames are sent to.
pub type NodeId = String;
/// Election epoch. Non-decreasing; at most one leader exists per term.
pub type Term = u64;
/// Position in the replicated log, 1-based; 0 means "nothing".
pub type LogIndex = u64;

/// Which of the three roles a node currently plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleKind {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RoleKind::Follower => write!(f, "follower"),
            RoleKind::Candidate => write!(f, "candidate"),
            RoleKind::Leader => write!(f, "leader"),
        }
    }
}

/// What the facade can observe of a node: role, term, and believed leader.
/// Published on a watch channel whenever any of it changes.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub role: RoleKind,
    pub term: Term,
    pub leader: Option<NodeId>,
}

impl Default for Status {
    fn default() -> Status {
        Status {
            role: RoleKind::Follower,
            term: 0,
            leader: None,
        }
    }
}

/// Events posted by role timers into the node's event loop. Each carries
/// the role generation that armed the timer; the loop drops stale
/// generations, which makes timer cancellation deterministic.
#[derive(Clone, Copy, Debug)]
pub enum TimerEvent {
    Election { epoch: u64 },
    Heartbeat { epoch: u64 },
}

/// Role-specific state shared behavior.
pub trait Role {
    fn kind(&self) -> RoleKind;
    /// Cancel this role's timers. Idempotent; runs on every transition.
    fn stop(&mut self);
}

/// The consensus state machine, generic over its current role. Transitions
/// consume the value and produce the next role through `From` conversions,
/// which stop the old role's timers before arming the new one's.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Raft<T: Role> {
    pub id: NodeId,
    pub config: RaftConfig,
    #[derivative(Debug = "ignore")]
    pub logger: Logger,
    /// The cluster minus this node.
    pub peers: Vec<NodeId>,
    pub storage: Storage,
    pub log: RaftLog,
    pub fsm: StateMachine,
    pub outbound: UnboundedSender<Outbound>,
    pub timers: UnboundedSender<TimerEvent>,
    pub status_tx: watch::Sender<Status>,
    /// Bumped on every role transition; tags timer events.
    pub epoch: u64,
    pub role: T,
}

impl<T: Role> Raft<T> {
    pub fn current_term(&self) -> Term {
        self.storage.term()
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Strict majority of the full cluster, this node included.
    pub fn is_majority(&self, count: usize) -> bool {
        count > self.cluster_size() / 2
    }

    /// Queue a frame for the transport. Never blocks; a dead transport
    /// surfaces when the node loop exits.
    pub fn send(&self, to: &NodeId, message: Message) {
        let _ = self.outbound.send(Outbound {
            to: to.clone(),
            message,
        });
    }

    /// Queue a frame for every peer.
    pub fn broadcast(&self, message: Message) {
        for peer in &self.peers {
            self.send(peer, message.clone());
        }
    }

    pub(crate) fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Publish role/term/leader to the facade if anything changed.
    pub(crate) fn publish(&self, leader: Option<NodeId>) {
        let status = Status {
            role: self.role.kind(),
            term: self.current_term(),
            leader,
        };
        if *self.status_tx.borrow() != status {
            let _ = self.status_tx.send(status);
        }
    }

    /// Apply every committed-but-unapplied entry, in order, one at a time.
    pub fn apply_committed(&mut self) -> Result<()> {
        while self.log.last_applied < self.log.commit_index {
            let index = self.log.last_applied + 1;
            let entry = self.log.get(index).cloned().ok_or_else(|| {
                Error::LogCorrupt(format!("committed index {} missing from log", index))
            })?;
            self.fsm.apply(&entry.command);
            self.log.last_applied = index;
            debug!(self.logger, "applied entry"; "index" => index, "term" => entry.term);
        }
        Ok(())
    }
}

/// A randomised election timer for role generation `epoch`, already armed.
pub(crate) fn election_timer(
    config: &RaftConfig,
    timers: &UnboundedSender<TimerEvent>,
    epoch: u64,
) -> Timer {
    let (low, high) = config.election_range();
    let timers = timers.clone();
    let mut timer = Timer::new(Interval::Randomized(low, high), move || {
        let _ = timers.send(TimerEvent::Election { epoch });
    });
    timer.start();
    timer
}

/// The leader's fixed-interval heartbeat timer, already armed.
pub(crate) fn heartbeat_timer(
    config: &RaftConfig,
    timers: &UnboundedSender<TimerEvent>,
    epoch: u64,
) -> Timer {
    let timers = timers.clone();
    let mut timer = Timer::new(Interval::Fixed(config.heartbeat()), move || {
        let _ = timers.send(TimerEvent::Heartbeat { epoch });
    });
    timer.start();
    timer
}

/// The state machine in whichever role it currently holds. The node loop
/// owns exactly one of these and threads every event through it.
#[derive(Debug)]
pub enum RaftHandle {
    Follower(Raft<Follower>),
    Candidate(Raft<Candidate>),
    Leader(Raft<Leader>),
}

impl RaftHandle {
    /// Build a node in the initial follower role. A first boot initializes
    /// the persistent term to zero; any later boot keeps what was durable.
    pub fn new(
        config: RaftConfig,
        logger: Logger,
        outbound: UnboundedSender<Outbound>,
        timers: UnboundedSender<TimerEvent>,
        status_tx: watch::Sender<Status>,
    ) -> Result<RaftHandle> {
        config.validate()?;
        let id = config.id.clone();
        let peers = config.remote_peers();
        let mut storage = Storage::open(&config.log_path, &id)?;
        if !storage.exists() {
            storage.update(0, None)?;
        }
        let log = RaftLog::open(&config.log_path, &id, config.serializer()?)?;

        let role = Follower {
            leader_id: None,
            election_timer: election_timer(&config, &timers, 1),
            logger: logger.new(o!("role" => "follower")),
        };
        let raft = Raft {
            id,
            peers,
            storage,
            log,
            fsm: StateMachine::new(),
            outbound,
            timers,
            status_tx,
            epoch: 1,
            logger,
            config,
            role,
        };
        raft.publish(None);
        info!(raft.logger, "started"; "term" => raft.current_term(), "peers" => raft.peers.len());
        Ok(RaftHandle::Follower(raft))
    }

    pub fn current_term(&self) -> Term {
        match self {
            RaftHandle::Follower(raft) => raft.current_term(),
            RaftHandle::Candidate(raft) => raft.current_term(),
            RaftHandle::Leader(raft) => raft.current_term(),
        }
    }

    pub fn epoch(&self) -> u64 {
        match self {
            RaftHandle::Follower(raft) => raft.epoch,
            RaftHandle::Candidate(raft) => raft.epoch,
            RaftHandle::Leader(raft) => raft.epoch,
        }
    }

    pub fn role_kind(&self) -> RoleKind {
        match self {
            RaftHandle::Follower(_) => RoleKind::Follower,
            RaftHandle::Candidate(_) => RoleKind::Candidate,
            RaftHandle::Leader(_) => RoleKind::Leader,
        }
    }

    /// The leader this node currently believes in.
    pub fn leader_hint(&self) -> Option<NodeId> {
        match self {
            RaftHandle::Follower(raft) => raft.role.leader_id.clone(),
            RaftHandle::Candidate(_) => None,
            RaftHandle::Leader(raft) => Some(raft.id.clone()),
        }
    }

    fn fsm(&self) -> &StateMachine {
        match self {
            RaftHandle::Follower(raft) => &raft.fsm,
            RaftHandle::Candidate(raft) => &raft.fsm,
            RaftHandle::Leader(raft) => &raft.fsm,
        }
    }

    fn send(&self, to: &NodeId, message: Message) {
        match self {
            RaftHandle::Follower(raft) => raft.send(to, message),
            RaftHandle::Candidate(raft) => raft.send(to, message),
            RaftHandle::Leader(raft) => raft.send(to, message),
        }
    }

    /// Feed one inbound frame through the common term rule, then the role
    /// handler.
    ///
    /// A higher term always demotes us to follower (clearing the vote); a
    /// stale request is answered with a failure frame and dropped; a stale
    /// response is dropped outright, so a vote from a previous election can
    /// never count toward the current one.
    pub fn receive(self, envelope: Envelope) -> Result<RaftHandle> {
        let term = envelope.message.term();
        let mut handle = self;
        if term > handle.current_term() {
            handle = handle.step_down(term)?;
        }
        if term < handle.current_term() {
            if envelope.message.is_request() {
                handle.reject_stale(&envelope);
            }
            return Ok(handle);
        }
        match handle {
            RaftHandle::Follower(raft) => raft.receive(envelope),
            RaftHandle::Candidate(raft) => raft.receive(envelope),
            RaftHandle::Leader(raft) => raft.receive(envelope),
        }
    }

    /// Adopt a newer term and drop to follower. The vote resets with the
    /// term; persisted before anything else happens.
    fn step_down(self, term: Term) -> Result<RaftHandle> {
        match self {
            RaftHandle::Follower(mut raft) => {
                raft.storage.update(term, None)?;
                raft.role.leader_id = None;
                raft.publish(None);
                Ok(RaftHandle::Follower(raft))
            }
            RaftHandle::Candidate(mut raft) => {
                raft.storage.update(term, None)?;
                let raft = Raft::<Follower>::from(raft);
                raft.publish(None);
                Ok(RaftHandle::Follower(raft))
            }
            RaftHandle::Leader(mut raft) => {
                raft.storage.update(term, None)?;
                let raft = Raft::<Follower>::from(raft);
                raft.publish(None);
                Ok(RaftHandle::Follower(raft))
            }
        }
    }

    fn reject_stale(&self, envelope: &Envelope) {
        let term = self.current_term();
        let reply = match envelope.message {
            Message::RequestVote { .. } => Message::RequestVoteResponse {
                term,
                vote_granted: false,
            },
            Message::AppendEntries { .. } => Message::AppendEntriesResponse {
                term,
                success: false,
                last_new_entry_index: None,
            },
            _ => return,
        };
        self.send(&envelope.from, reply);
    }

    /// A timer fired. Events from a superseded role generation are stale
    /// and ignored.
    pub fn timer_event(self, event: TimerEvent) -> Result<RaftHandle> {
        match event {
            TimerEvent::Election { epoch } => {
                if epoch != self.epoch() {
                    return Ok(self);
                }
                match self {
                    RaftHandle::Follower(raft) => {
                        info!(raft.role.logger, "election timeout");
                        Raft::<Candidate>::from(raft).seek_election()
                    }
                    RaftHandle::Candidate(raft) => {
                        info!(raft.role.logger, "election timed out, starting another");
                        raft.seek_election()
                    }
                    // leaders keep no election timer
                    RaftHandle::Leader(raft) => Ok(RaftHandle::Leader(raft)),
                }
            }
            TimerEvent::Heartbeat { epoch } => {
                if epoch != self.epoch() {
                    return Ok(self);
                }
                match self {
                    RaftHandle::Leader(raft) => {
                        raft.append_entries(None);
                        Ok(RaftHandle::Leader(raft))
                    }
                    other => Ok(other),
                }
            }
        }
    }

    /// Client traffic: reads are local, writes go through the leader.
    pub fn request(self, request: ClientRequest) -> Result<RaftHandle> {
        match request {
            ClientRequest::Get { name, reply } => {
                let value = self.fsm().get(&name).cloned();
                let _ = reply.send(value);
                Ok(self)
            }
            ClientRequest::Set { name, value, reply } => match self {
                RaftHandle::Leader(raft) => raft.execute(Command { name, value }, reply),
                other => {
                    let _ = reply.send(Err(Error::NotALeader {
                        leader: other.leader_hint(),
                    }));
                    Ok(other)
                }
            },
        }
    }

    /// The common apply rule: runs after every event the node loop handles.
    pub fn apply_committed(&mut self) -> Result<()> {
        match self {
            RaftHandle::Follower(raft) => raft.apply_committed(),
            RaftHandle::Candidate(raft) => raft.apply_committed(),
            RaftHandle::Leader(raft) => {
                raft.apply_committed()?;
                raft.complete_waiters();
                Ok(())
            }
        }
    }

    /// Stop the current role: cancel its timers and cancel in-flight
    /// writes.
    pub fn stop(self) {
        match self {
            RaftHandle::Follower(mut raft) => raft.role.stop(),
            RaftHandle::Candidate(mut raft) => raft.role.stop(),
            RaftHandle::Leader(mut raft) => {
                raft.role.stop();
                raft.cancel_waiters();
            }
        }
    }
}
