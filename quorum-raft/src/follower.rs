use slog::Logger;

use quorum_core::error::Result;

use crate::candidate::Candidate;
use crate::election::Election;
use crate::raft::{election_timer, NodeId, Raft, RaftHandle, Role, RoleKind};
use crate::rpc::{Envelope, Message};
use crate::timer::Timer;

/// A node at rest: answering RPCs, feeding its log from the leader, and
/// timing out into candidacy when the leader goes quiet.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Follower {
    /// Learned from the last AppendEntries; the facade's leader hint.
    pub leader_id: Option<NodeId>,
    pub election_timer: Timer,
    #[derivative(Debug = "ignore")]
    pub logger: Logger,
}

impl Role for Follower {
    fn kind(&self) -> RoleKind {
        RoleKind::Follower
    }

    fn stop(&mut self) {
        self.election_timer.stop();
    }
}

impl Raft<Follower> {
    pub(crate) fn receive(mut self, envelope: Envelope) -> Result<RaftHandle> {
        let from = envelope.from;
        match envelope.message {
            Message::AppendEntries {
                leader_id,
                prev_log_index,
                prev_log_term,
                commit_index: leader_commit,
                entries,
                ..
            } => {
                self.role.leader_id = Some(leader_id.clone());
                self.publish(Some(leader_id));

                // Consistency check: our log must hold the entry these new
                // ones chain onto.
                let consistent = prev_log_index <= self.log.last_log_index()
                    && (prev_log_index == 0
                        || self.log.get(prev_log_index).map(|e| e.term) == Some(prev_log_term));
                if !consistent {
                    debug!(self.role.logger, "rejecting append";
                        "prev_log_index" => prev_log_index,
                        "prev_log_term" => prev_log_term,
                        "last_log_index" => self.log.last_log_index());
                    let term = self.current_term();
                    self.send(
                        &from,
                        Message::AppendEntriesResponse {
                            term,
                            success: false,
                            last_new_entry_index: None,
                        },
                    );
                    return Ok(RaftHandle::Follower(self));
                }

                // Walk past entries we already hold; the first term mismatch
                // is a conflict and everything from there on is erased.
                let mut offset = 0;
                while offset < entries.len() {
                    let index = prev_log_index + 1 + offset as u64;
                    let existing_term = match self.log.get(index) {
                        Some(existing) => existing.term,
                        None => break,
                    };
                    if existing_term == entries[offset].term {
                        offset += 1;
                    } else {
                        info!(self.role.logger, "erasing conflicting suffix"; "from" => index);
                        self.log.erase_from(index)?;
                        break;
                    }
                }
                for entry in entries[offset..].iter() {
                    self.log.append(entry.term, entry.command.clone())?;
                }

                // Commit up to what the leader has committed, bounded by
                // what this frame proved we share with it. Never backwards.
                let last_new_entry_index = prev_log_index + entries.len() as u64;
                let reachable = std::cmp::min(leader_commit, last_new_entry_index);
                if reachable > self.log.commit_index {
                    self.log.commit_index = reachable;
                }

                let term = self.current_term();
                self.send(
                    &from,
                    Message::AppendEntriesResponse {
                        term,
                        success: true,
                        last_new_entry_index: Some(last_new_entry_index),
                    },
                );
                self.role.election_timer.reset();
                Ok(RaftHandle::Follower(self))
            }
            Message::RequestVote {
                candidate_id,
                last_log_index,
                last_log_term,
                ..
            } => {
                let free_to_vote = match self.storage.voted_for() {
                    None => true,
                    Some(voted) => *voted == candidate_id,
                };
                // Up-to-date: a later last term wins outright; equal last
                // terms fall back to log length.
                let up_to_date = last_log_term > self.log.last_log_term()
                    || (last_log_term == self.log.last_log_term()
                        && last_log_index >= self.log.last_log_index());
                let granted = free_to_vote && up_to_date;
                if granted {
                    let term = self.current_term();
                    self.storage.update(term, Some(candidate_id.clone()))?;
                }
                info!(self.role.logger, "vote requested";
                    "candidate" => %candidate_id, "granted" => granted);
                let term = self.current_term();
                self.send(
                    &from,
                    Message::RequestVoteResponse {
                        term,
                        vote_granted: granted,
                    },
                );
                Ok(RaftHandle::Follower(self))
            }
            // Followers expect no responses; strays from an earlier
            // candidacy are dropped.
            Message::RequestVoteResponse { .. } | Message::AppendEntriesResponse { .. } => {
                Ok(RaftHandle::Follower(self))
            }
        }
    }
}

impl From<Raft<Follower>> for Raft<Candidate> {
    fn from(mut val: Raft<Follower>) -> Raft<Candidate> {
        val.role.stop();
        let epoch = val.next_epoch();
        let election = Election::new(val.cluster_size());
        let election_timer = election_timer(&val.config, &val.timers, epoch);
        let role_logger = val.logger.new(o!("role" => "candidate"));
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
            role: Candidate {
                election,
                election_timer,
                logger: role_logger,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Command;
    use crate::log::Entry;
    use crate::raft::testing::{node, restart, sent};
    use crate::raft::Term;
    use serde_json::json;

    const SELF: &str = "127.0.0.1:8000";
    const PEER_A: &str = "127.0.0.1:8001";
    const PEER_B: &str = "127.0.0.1:8002";

    fn entry(index: u64, term: Term, name: &str, value: i64) -> Entry {
        Entry {
            index,
            term,
            command: Command {
                name: name.to_string(),
                value: json!(value),
            },
        }
    }

    fn append(
        term: Term,
        prev_log_index: u64,
        prev_log_term: Term,
        commit_index: u64,
        entries: Vec<Entry>,
    ) -> Envelope {
        Envelope {
            from: PEER_A.to_string(),
            message: Message::AppendEntries {
                term,
                leader_id: PEER_A.to_string(),
                prev_log_index,
                prev_log_term,
                commit_index,
                entries,
            },
        }
    }

    fn vote_request(term: Term, candidate: &str, last_log_index: u64, last_log_term: Term) -> Envelope {
        Envelope {
            from: candidate.to_string(),
            message: Message::RequestVote {
                term,
                candidate_id: candidate.to_string(),
                last_log_index,
                last_log_term,
            },
        }
    }

    fn success_reply(frames: &[crate::rpc::Outbound]) -> (Term, bool, Option<u64>) {
        assert_eq!(1, frames.len());
        assert_eq!(PEER_A, frames[0].to);
        match &frames[0].message {
            Message::AppendEntriesResponse {
                term,
                success,
                last_new_entry_index,
            } => (*term, *success, *last_new_entry_index),
            other => panic!("expected append_entries_response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn appends_entries_and_learns_the_leader() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        let handle = handle
            .receive(append(1, 0, 0, 0, vec![entry(1, 1, "x", 42)]))
            .unwrap();

        let (term, success, last_new) = success_reply(&sent(&mut harness));
        assert_eq!((1, true, Some(1)), (term, success, last_new));
        assert_eq!(Some(PEER_A.to_string()), handle.leader_hint());
        match &handle {
            RaftHandle::Follower(raft) => {
                assert_eq!(1, raft.log.last_log_index());
                assert_eq!(0, raft.log.commit_index);
            }
            _ => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn rejects_append_that_skips_entries() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        // leader thinks we have 3 entries; we have none
        let handle = handle
            .receive(append(1, 3, 1, 0, vec![entry(4, 1, "x", 1)]))
            .unwrap();

        let (term, success, last_new) = success_reply(&sent(&mut harness));
        assert_eq!((1, false, None), (term, success, last_new));
        match &handle {
            RaftHandle::Follower(raft) => assert_eq!(0, raft.log.last_log_index()),
            _ => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn rejects_append_with_mismatched_prev_term() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        let handle = handle
            .receive(append(1, 0, 0, 0, vec![entry(1, 1, "x", 1)]))
            .unwrap();
        sent(&mut harness);

        // prev entry exists but with term 1, not 9
        let _handle = handle
            .receive(append(2, 1, 9, 0, vec![entry(2, 2, "y", 2)]))
            .unwrap();
        let (_, success, _) = success_reply(&sent(&mut harness));
        assert!(!success);
    }

    #[tokio::test]
    async fn duplicate_append_is_idempotent() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        let handle = handle
            .receive(append(1, 0, 0, 0, vec![entry(1, 1, "x", 42)]))
            .unwrap();
        sent(&mut harness);

        // the same frame again: no log growth, still success
        let handle = handle
            .receive(append(1, 0, 0, 0, vec![entry(1, 1, "x", 42)]))
            .unwrap();
        let (_, success, last_new) = success_reply(&sent(&mut harness));
        assert!(success);
        assert_eq!(Some(1), last_new);
        match &handle {
            RaftHandle::Follower(raft) => assert_eq!(1, raft.log.last_log_index()),
            _ => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn erases_conflicting_suffix() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        // two entries from a term-1 leader
        let handle = handle
            .receive(append(1, 0, 0, 0, vec![entry(1, 1, "x", 1)]))
            .unwrap();
        let handle = handle
            .receive(append(1, 1, 1, 0, vec![entry(2, 1, "y", 2)]))
            .unwrap();
        sent(&mut harness);

        // a term-2 leader overwrites index 2
        let handle = handle
            .receive(append(2, 1, 1, 0, vec![entry(2, 2, "z", 3)]))
            .unwrap();
        let (_, success, last_new) = success_reply(&sent(&mut harness));
        assert!(success);
        assert_eq!(Some(2), last_new);
        match &handle {
            RaftHandle::Follower(raft) => {
                assert_eq!(2, raft.log.last_log_index());
                assert_eq!(2, raft.log.get(2).unwrap().term);
                assert_eq!("z", raft.log.get(2).unwrap().command.name);
            }
            _ => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn commits_and_applies_up_to_the_leader() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        let handle = handle
            .receive(append(1, 0, 0, 0, vec![entry(1, 1, "x", 42)]))
            .unwrap();
        // leader's commit index covers our new entry
        let mut handle = handle
            .receive(append(1, 1, 1, 1, Vec::new()))
            .unwrap();
        handle.apply_committed().unwrap();
        sent(&mut harness);

        match &handle {
            RaftHandle::Follower(raft) => {
                assert_eq!(1, raft.log.commit_index);
                assert_eq!(1, raft.log.last_applied);
                assert_eq!(Some(&json!(42)), raft.fsm.get("x"));
            }
            _ => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn commit_index_never_regresses() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        let handle = handle
            .receive(append(1, 0, 0, 0, vec![entry(1, 1, "x", 1)]))
            .unwrap();
        let handle = handle
            .receive(append(1, 1, 1, 1, vec![entry(2, 1, "y", 2)]))
            .unwrap();

        // a replayed heartbeat anchored before our commit point
        let handle = handle.receive(append(1, 0, 0, 2, Vec::new())).unwrap();
        sent(&mut harness);
        match &handle {
            RaftHandle::Follower(raft) => assert_eq!(1, raft.log.commit_index),
            _ => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn grants_vote_and_persists_it() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        let handle = handle.receive(vote_request(1, PEER_A, 0, 0)).unwrap();
        let frames = sent(&mut harness);
        assert_eq!(
            Message::RequestVoteResponse {
                term: 1,
                vote_granted: true
            },
            frames[0].message
        );

        // same term, different candidate: refused
        let handle = handle.receive(vote_request(1, PEER_B, 0, 0)).unwrap();
        let frames = sent(&mut harness);
        assert_eq!(
            Message::RequestVoteResponse {
                term: 1,
                vote_granted: false
            },
            frames[0].message
        );

        // the repeated candidate is granted again (idempotent)
        let _handle = handle.receive(vote_request(1, PEER_A, 0, 0)).unwrap();
        let frames = sent(&mut harness);
        assert_eq!(
            Message::RequestVoteResponse {
                term: 1,
                vote_granted: true
            },
            frames[0].message
        );
    }

    #[tokio::test]
    async fn vote_survives_a_restart() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        let handle = handle.receive(vote_request(1, PEER_A, 0, 0)).unwrap();
        sent(&mut harness);
        handle.stop();

        let crate::raft::testing::Harness { dir, config, .. } = harness;
        let (handle, mut harness) = restart(config, dir);
        match &handle {
            RaftHandle::Follower(raft) => {
                assert_eq!(1, raft.current_term());
                assert_eq!(Some(&PEER_A.to_string()), raft.storage.voted_for());
            }
            _ => panic!("expected follower"),
        }

        // still refuses a different candidate for the same term
        let _handle = handle.receive(vote_request(1, PEER_B, 0, 0)).unwrap();
        let frames = sent(&mut harness);
        assert_eq!(
            Message::RequestVoteResponse {
                term: 1,
                vote_granted: false
            },
            frames[0].message
        );
    }

    #[tokio::test]
    async fn refuses_candidate_with_stale_log() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);

        // our log: one entry at term 2
        let handle = handle
            .receive(append(2, 0, 0, 0, vec![entry(1, 2, "x", 1)]))
            .unwrap();
        sent(&mut harness);

        // candidate's last term is older, even though its log is longer
        let handle = handle.receive(vote_request(3, PEER_B, 5, 1)).unwrap();
        let frames = sent(&mut harness);
        assert_eq!(
            Message::RequestVoteResponse {
                term: 3,
                vote_granted: false
            },
            frames[0].message
        );

        // a candidate with the same last term but a shorter log also loses
        let _handle = handle.receive(vote_request(4, PEER_B, 0, 2)).unwrap();
        let frames = sent(&mut harness);
        assert_eq!(
            Message::RequestVoteResponse {
                term: 4,
                vote_granted: false
            },
            frames[0].message
        );
    }

    #[tokio::test]
    async fn election_timeout_starts_a_candidacy() {
        let (handle, mut harness) = node(SELF, &[PEER_A, PEER_B]);
        let epoch = handle.epoch();

        let handle = handle
            .timer_event(crate::raft::TimerEvent::Election { epoch })
            .unwrap();
        assert_eq!(RoleKind::Candidate, handle.role_kind());
        assert_eq!(1, handle.current_term());

        // it asked both peers for their vote
        let frames = sent(&mut harness);
        assert_eq!(2, frames.len());
        for frame in &frames {
            match &frame.message {
                Message::RequestVote { term, candidate_id, .. } => {
                    assert_eq!(1, *term);
                    assert_eq!(SELF, candidate_id);
                }
                other => panic!("expected request_vote, got {:?}", other),
            }
        }
        handle.stop();
    }
}
