use crate::log::Entry;
use crate::raft::{LogIndex, NodeId, Term};

/// Wire frames exchanged between nodes. The codec writes the variant name
/// into a `type` field, so a frame reads as e.g.
/// `{"type": "request_vote", "term": 3, ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    RequestVote {
        term: Term,
        candidate_id: NodeId,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    RequestVoteResponse {
        term: Term,
        vote_granted: bool,
    },
    AppendEntries {
        term: Term,
        leader_id: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        commit_index: LogIndex,
        entries: Vec<Entry>,
    },
    AppendEntriesResponse {
        term: Term,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_new_entry_index: Option<LogIndex>,
    },
}

impl Message {
    /// The term every frame carries; the common term rule keys off it.
    pub fn term(&self) -> Term {
        match self {
            Message::RequestVote { term, .. }
            | Message::RequestVoteResponse { term, .. }
            | Message::AppendEntries { term, .. }
            | Message::AppendEntriesResponse { term, .. } => *term,
        }
    }

    /// Stale requests get a failure reply; stale responses are just dropped.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::RequestVote { .. } | Message::AppendEntries { .. }
        )
    }
}

/// An inbound frame plus the node it came from. The sender is not on the
/// wire; the transport fills it in from the datagram's source address.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub from: NodeId,
    pub message: Message,
}

/// An outbound frame queued for the transport.
#[derive(Clone, Debug)]
pub struct Outbound {
    pub to: NodeId,
    pub message: Message,
}
