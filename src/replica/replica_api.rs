use crate::bridge::ApplyReply;
use crate::replica::{Action, LogEntry, ReplicaId, Term};

#[derive(Debug)]
pub(crate) struct WriteToLogInput {
    pub(crate) action: Action,
    // Receives the apply outcome once the entry is committed and applied on this replica.
    pub(crate) apply_reply: Option<ApplyReply>,
}

#[derive(Debug)]
pub(crate) struct WriteToLogOutput {
    pub(crate) term: Term,
    pub(crate) index: usize,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum WriteToLogError {
    #[error("I'm not leader. Leader is {leader_address:?}")]
    NotLeader { leader_address: Option<String> },
    #[error("Replica actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct RequestVoteInput {
    pub(crate) candidate_term: Term,
    pub(crate) candidate_id: ReplicaId,
    pub(crate) candidate_last_log_entry: Option<(Term, usize)>,
}

#[derive(Debug)]
pub(crate) struct RequestVoteOutput {
    pub(crate) term: Term,
    pub(crate) vote_granted: bool,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum RequestVoteError {
    #[error("Requesting candidate is not in the cluster")]
    CandidateNotInCluster,
    #[error("Requesting candidate's term is out of date")]
    RequestTermOutOfDate(TermOutOfDateInfo),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesInput {
    pub(crate) leader_term: Term,
    pub(crate) leader_id: ReplicaId,
    pub(crate) leader_address: String,
    pub(crate) leader_last_log_entry: Option<(Term, usize)>,
    // The leader's entire log.
    pub(crate) entries: Vec<LogEntry>,
    pub(crate) leader_commit_index: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesOutput {
    pub(crate) term: Term,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum AppendEntriesError {
    #[error("Client is not in cluster")]
    ClientNotInCluster,
    #[error("Client's term is out of date")]
    ClientTermOutOfDate(TermOutOfDateInfo),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct TermOutOfDateInfo {
    pub(crate) current_term: Term,
}

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) result: RequestVoteResult,
}

#[derive(Debug)]
pub(crate) enum RequestVoteResult {
    VoteGranted,
    VoteNotGranted { peer_term: Term },
    // Timeouts and transport errors. Never retried within a term.
    Failure,
}

/// HeartbeatRoundResult summarizes one AppendEntries broadcast to every peer.
#[derive(Debug)]
pub(crate) struct HeartbeatRoundResult {
    pub(crate) term: Term,
    // Length of the log that was sent.
    pub(crate) num_entries_sent: usize,
    pub(crate) num_successes: usize,
    pub(crate) highest_peer_term: Option<Term>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A point in time view of a replica, for tests and operators.
#[derive(Clone, Debug)]
pub struct ReplicaStatus {
    pub replica_id: String,
    pub role: Role,
    pub term: u64,
    pub leader_address: Option<String>,
    pub log_len: usize,
    pub commit_index: Option<usize>,
}
