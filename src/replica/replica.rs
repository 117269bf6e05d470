use crate::actor::WeakActorClient;
use crate::grpc::{ProtoAppendEntriesReq, ProtoLogEntry, ProtoVoteReq};
use crate::replica::election::{ElectionConfig, ElectionState, LeaderInfo};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::peers::{ClusterTracker, Peer};
use crate::replica::replica_api::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, HeartbeatRoundResult, ReplicaStatus,
    RequestVoteError, RequestVoteInput, RequestVoteOutput, RequestVoteReplyFromPeer, RequestVoteResult, Role,
    TermOutOfDateInfo, WriteToLogError, WriteToLogInput, WriteToLogOutput,
};
use crate::replica::replicated_log::{CommitStreamPublisher, LogEntry, ReplicatedLog};
use crate::replica::Clock;
use std::cmp;
use tokio::time::Duration;

pub(crate) struct ReplicaConfig<S, C>
where
    S: PersistentLocalState,
    C: Clock,
{
    pub logger: slog::Logger,
    pub cluster_tracker: ClusterTracker,
    pub local_state: S,
    pub commit_stream_publisher: CommitStreamPublisher,
    pub actor_client: WeakActorClient,
    pub clock: C,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub rpc_timeout: Duration,
}

/// Replica is the Raft role state machine of one server. It is owned by the replica actor, so
/// every method runs to completion without awaiting; network calls are spawned and report back
/// as events.
pub(crate) struct Replica<S, C>
where
    S: PersistentLocalState,
    C: Clock,
{
    logger: slog::Logger,
    cluster_tracker: ClusterTracker,
    local_state: S,
    election_state: ElectionState,
    log: ReplicatedLog,
    actor_client: WeakActorClient,
    clock: C,
    rpc_timeout: Duration,
}

impl<S, C> Replica<S, C>
where
    S: PersistentLocalState,
    C: Clock,
{
    pub(crate) fn new(config: ReplicaConfig<S, C>) -> Self {
        let election_state = ElectionState::new_follower(
            ElectionConfig {
                my_replica_id: config.cluster_tracker.my_replica_id().clone(),
                my_address: config.cluster_tracker.my_address().to_string(),
                election_timeout_min: config.election_timeout_min,
                election_timeout_max: config.election_timeout_max,
            },
            config.clock.now(),
        );
        let log = ReplicatedLog::new(config.logger.clone(), config.commit_stream_publisher);

        Replica {
            logger: config.logger,
            cluster_tracker: config.cluster_tracker,
            local_state: config.local_state,
            election_state,
            log,
            actor_client: config.actor_client,
            clock: config.clock,
            rpc_timeout: config.rpc_timeout,
        }
    }

    pub(crate) fn handle_tick(&mut self) {
        if self.election_state.role() == Role::Leader {
            self.start_heartbeat_round_if_idle();
            return;
        }

        if let Some(deadline) = self.election_state.election_deadline() {
            if self.clock.now() >= deadline {
                self.start_election();
            }
        }
    }

    fn start_election(&mut self) {
        // Write-ahead style: vote for self in local state before transitioning to candidate.
        let new_term = self.local_state.increment_term_and_vote_for_self();
        self.election_state
            .transition_to_candidate_and_vote_for_self(self.clock.now());
        slog::info!(
            self.logger,
            "Election timeout. Starting election for term {:?}. Election state: {:?}",
            new_term,
            self.election_state,
        );

        // A lone replica is its own majority.
        if self.is_majority(1) {
            self.become_leader();
            return;
        }

        let request = self.new_vote_request(new_term);
        for peer in self.cluster_tracker.iter_peers() {
            tokio::task::spawn(peer_calls::request_vote(
                self.logger.new(slog::o!("Peer" => peer.id.to_string())),
                peer.clone(),
                request.clone(),
                self.rpc_timeout,
                self.actor_client.clone(),
                new_term,
            ));
        }
    }

    fn new_vote_request(&self, term: Term) -> ProtoVoteReq {
        let (last_log_index, last_log_term) = match self.log.latest_entry() {
            None => (-1, 0),
            Some((term, index)) => (index as i64, term.as_u64()),
        };

        ProtoVoteReq {
            term: term.as_u64(),
            candidate_id: self.cluster_tracker.my_replica_id().to_string(),
            last_log_index,
            last_log_term,
        }
    }

    fn is_majority(&self, num_votes: usize) -> bool {
        num_votes > self.cluster_tracker.num_servers() / 2
    }

    fn become_leader(&mut self) {
        self.election_state.transition_to_leader();
        slog::info!(
            self.logger,
            "Elected leader for term {:?}.",
            self.local_state.current_term()
        );

        // Assert leadership right away instead of waiting for the next tick.
        self.start_heartbeat_round_if_idle();
    }

    /// Adopt `term` and become a leaderless follower, if `term` is newer than ours.
    /// Returns true if it was newer.
    fn observe_term(&mut self, term: Term) -> bool {
        if !self.local_state.store_term_if_increased(term) {
            return false;
        }

        self.election_state.transition_to_follower(None, self.clock.now());
        slog::info!(
            self.logger,
            "Observed newer term {:?}. Election state: {:?}",
            term,
            self.election_state
        );
        true
    }

    pub(crate) fn handle_request_vote(
        &mut self,
        input: RequestVoteInput,
    ) -> Result<RequestVoteOutput, RequestVoteError> {
        // Ensure candidate is known member.
        if !self.cluster_tracker.contains_member(&input.candidate_id) {
            return Err(RequestVoteError::CandidateNotInCluster);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.candidate_term < current_term {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}. Its term {:?} is out of date.",
                input.candidate_id,
                input.candidate_term
            );
            return Err(RequestVoteError::RequestTermOutOfDate(TermOutOfDateInfo {
                current_term,
            }));
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        self.observe_term(input.candidate_term);

        // Read our local term/vote state as 1 atomic action.
        let (current_term, opt_voted_for) = self.local_state.voted_for_current_term();
        let not_granted = RequestVoteOutput {
            term: current_term,
            vote_granted: false,
        };

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        if let Some(voted_for) = &opt_voted_for {
            if **voted_for != input.candidate_id {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                return Ok(not_granted);
            }
        }

        // Accepting an AppendEntries clears our vote, but not the fact that this term has a leader.
        if self.election_state.has_leader() {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}. Term {:?} already has a leader.",
                input.candidate_id,
                current_term
            );
            return Ok(not_granted);
        }

        if !self.is_candidate_log_gte_mine(input.candidate_last_log_entry) {
            slog::info!(self.logger, "Not granting vote. Candidate log is out of date.");
            return Ok(not_granted);
        }

        let granted = opt_voted_for.is_some()
            || self
                .local_state
                .store_vote_for_term_if_unvoted(current_term, input.candidate_id.clone());
        if !granted {
            return Ok(not_granted);
        }

        slog::info!(self.logger, "Voting for {:?} in term {:?}.", input.candidate_id, current_term);
        self.election_state.reset_deadline_if_follower(self.clock.now());
        Ok(RequestVoteOutput {
            term: current_term,
            vote_granted: true,
        })
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_entry: Option<(Term, usize)>) -> bool {
        // > If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        match (self.log.latest_entry(), candidate_last_entry) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((my_term, my_index)), Some((candidate_term, candidate_index))) => {
                if candidate_term != my_term {
                    return candidate_term > my_term;
                }

                candidate_index >= my_index
            }
        }
    }

    pub(crate) fn handle_request_vote_reply_from_peer(&mut self, reply: RequestVoteReplyFromPeer) {
        if let RequestVoteResult::VoteNotGranted { peer_term } = reply.result {
            if self.observe_term(peer_term) {
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.term {
            slog::debug!(
                self.logger,
                "Received vote reply for outdated term {:?}, current term: {:?}.",
                reply.term,
                current_term,
            );
            return;
        }

        match reply.result {
            RequestVoteResult::VoteGranted => {
                let num_votes_received = match self.election_state.add_vote_if_candidate(reply.peer_id) {
                    Some(v) => v,
                    None => {
                        slog::debug!(
                            self.logger,
                            "Received vote for term {:?} after transitioning to election state: {:?}",
                            reply.term,
                            self.election_state,
                        );
                        return;
                    }
                };

                slog::info!(
                    self.logger,
                    "Received {}/{} votes for term {:?}",
                    num_votes_received,
                    self.cluster_tracker.num_servers(),
                    reply.term,
                );
                if self.is_majority(num_votes_received) {
                    self.become_leader();
                }
            }
            RequestVoteResult::VoteNotGranted { .. } => {
                slog::info!(
                    self.logger,
                    "Vote not granted from {:?} for term {:?}",
                    reply.peer_id,
                    reply.term,
                );
            }
            RequestVoteResult::Failure => {
                // Counts as not granted. The next election timeout starts a fresh round.
                slog::debug!(self.logger, "No vote reply from {:?}", reply.peer_id);
            }
        }
    }

    pub(crate) fn handle_append_entries(
        &mut self,
        input: AppendEntriesInput,
    ) -> Result<AppendEntriesOutput, AppendEntriesError> {
        if !self.cluster_tracker.contains_member(&input.leader_id) {
            return Err(AppendEntriesError::ClientNotInCluster);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.leader_term < current_term {
            return Err(AppendEntriesError::ClientTermOutOfDate(TermOutOfDateInfo {
                current_term,
            }));
        }

        self.local_state.store_term_if_increased(input.leader_term);
        self.local_state.clear_vote();

        if self.election_state.role() == Role::Leader {
            slog::error!(
                self.logger,
                "Received AppendEntries from {:?} while leading term {:?}. Stepping down.",
                input.leader_id,
                input.leader_term
            );
        }
        if self.election_state.leader_address().as_deref() != Some(input.leader_address.as_str()) {
            slog::info!(
                self.logger,
                "Following {:?} at {} for term {:?}",
                input.leader_id,
                input.leader_address,
                input.leader_term
            );
        }
        self.election_state.transition_to_follower(
            Some(LeaderInfo {
                replica_id: input.leader_id,
                address: input.leader_address,
            }),
            self.clock.now(),
        );

        let payload_len = input.entries.len();
        if self.log.latest_entry() != input.leader_last_log_entry {
            self.reconcile_log(input.entries);
        }

        if let Some(leader_commit_index) = input.leader_commit_index {
            let last_new_entry = payload_len.saturating_sub(1);
            self.log
                .ratchet_fwd_commit_index(cmp::min(leader_commit_index, last_new_entry));
        }

        // Followers apply what the leader sent without waiting for it to commit, but never
        // anything beyond the leader's log.
        self.log.publish_up_to(payload_len);

        Ok(AppendEntriesOutput {
            term: self.local_state.current_term(),
        })
    }

    // The leader's entries are its entire log, so position is index.
    fn reconcile_log(&mut self, leader_entries: Vec<LogEntry>) {
        for (index, new_entry) in leader_entries.into_iter().enumerate() {
            // > If an existing entry conflicts with a new one (same index
            // > but different terms), delete the existing entry and all that
            // > follow it (§5.3)
            match self.log.read(index) {
                Some(existing_entry) if existing_entry.term == new_entry.term => continue,
                Some(_) => self.log.truncate(index),
                None => {}
            }

            self.log.append(new_entry, None);
        }
    }

    fn start_heartbeat_round_if_idle(&mut self) {
        let current_term = self.local_state.current_term();
        match self.election_state.leader_state_mut() {
            None => return,
            Some(leader_state) if leader_state.heartbeat_in_flight => return,
            Some(leader_state) => leader_state.heartbeat_in_flight = true,
        }

        let request = self.new_append_entries_request(current_term);
        let peers: Vec<Peer> = self.cluster_tracker.iter_peers().cloned().collect();
        tokio::task::spawn(peer_calls::heartbeat_round(
            self.logger.clone(),
            peers,
            request,
            self.rpc_timeout,
            self.actor_client.clone(),
            current_term,
            self.log.len(),
        ));
    }

    fn new_append_entries_request(&self, term: Term) -> ProtoAppendEntriesReq {
        let (most_recent_log_idx, term_of_recent_log) = match self.log.latest_entry() {
            None => (-1, 0),
            Some((term, index)) => (index as i64, term.as_u64()),
        };
        let leader_commit = match self.log.commit_index() {
            None => -1,
            Some(index) => index as i64,
        };

        ProtoAppendEntriesReq {
            term: term.as_u64(),
            leader_id: self.cluster_tracker.my_replica_id().to_string(),
            leader_address: self.cluster_tracker.my_address().to_string(),
            most_recent_log_idx,
            term_of_recent_log,
            entries: self.log.entries().iter().map(ProtoLogEntry::from).collect(),
            leader_commit,
        }
    }

    pub(crate) fn handle_heartbeat_round_finished(&mut self, result: HeartbeatRoundResult) {
        if let Some(peer_term) = result.highest_peer_term {
            if self.observe_term(peer_term) {
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if result.term != current_term {
            slog::debug!(self.logger, "Heartbeat round for outdated term {:?}", result.term);
            return;
        }
        match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state.heartbeat_in_flight = false,
            None => {
                slog::debug!(self.logger, "Heartbeat round finished but no longer leader");
                return;
            }
        }

        let required_successes = self.cluster_tracker.num_servers() / 2;
        if result.num_successes < required_successes {
            slog::warn!(
                self.logger,
                "Only {}/{} peers acknowledged heartbeat for term {:?}. Stepping down.",
                result.num_successes,
                self.cluster_tracker.num_servers() - 1,
                current_term
            );
            self.election_state.transition_to_follower(None, self.clock.now());
            return;
        }

        // Everything sent in this round is now on a majority.
        if let Some(last_sent_index) = result.num_entries_sent.checked_sub(1) {
            if self
                .log
                .ratchet_fwd_commit_index_if_valid(last_sent_index, current_term)
            {
                slog::debug!(self.logger, "Commit index is now {}", last_sent_index);
            }
        }
        if let Some(commit_index) = self.log.commit_index() {
            self.log.publish_up_to(commit_index + 1);
        }
    }

    pub(crate) fn handle_write_to_log(&mut self, input: WriteToLogInput) -> Result<WriteToLogOutput, WriteToLogError> {
        if self.election_state.role() != Role::Leader {
            return Err(WriteToLogError::NotLeader {
                leader_address: self.election_state.leader_address(),
            });
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let term = self.local_state.current_term();
        let index = self.log.append(
            LogEntry {
                term,
                action: input.action,
            },
            input.apply_reply,
        );
        slog::debug!(self.logger, "Appended log entry {} in term {:?}", index, term);

        // Replicate now rather than on the next tick, if the previous round is done.
        self.start_heartbeat_round_if_idle();

        Ok(WriteToLogOutput { term, index })
    }

    pub(crate) fn leader_address(&self) -> Option<String> {
        self.election_state.leader_address()
    }

    pub(crate) fn status(&self) -> ReplicaStatus {
        ReplicaStatus {
            replica_id: self.cluster_tracker.my_replica_id().to_string(),
            role: self.election_state.role(),
            term: self.local_state.current_term().as_u64(),
            leader_address: self.election_state.leader_address(),
            log_len: self.log.len(),
            commit_index: self.log.commit_index(),
        }
    }
}

mod peer_calls {
    use crate::actor::WeakActorClient;
    use crate::grpc::{ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoVoteReq};
    use crate::replica::peers::Peer;
    use crate::replica::replica_api::{HeartbeatRoundResult, RequestVoteReplyFromPeer, RequestVoteResult};
    use crate::replica::Term;
    use std::cmp;
    use tokio::time::Duration;

    pub(super) async fn request_vote(
        logger: slog::Logger,
        mut peer: Peer,
        rpc_request: ProtoVoteReq,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        term: Term,
    ) {
        slog::debug!(logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = tokio::time::timeout(rpc_timeout, peer.client.vote(rpc_request)).await;
        slog::debug!(logger, "ClientWire - {:?}", rpc_reply);

        let result = match rpc_reply {
            Ok(Ok(reply)) if reply.vote_granted => RequestVoteResult::VoteGranted,
            Ok(Ok(reply)) => RequestVoteResult::VoteNotGranted {
                peer_term: Term::new(reply.term),
            },
            Ok(Err(_)) | Err(_) => RequestVoteResult::Failure,
        };

        callback
            .notify_request_vote_reply_from_peer(RequestVoteReplyFromPeer {
                peer_id: peer.id,
                term,
                result,
            })
            .await;
    }

    /// Send the same AppendEntries to every peer in parallel, then report the tally back.
    pub(super) async fn heartbeat_round(
        logger: slog::Logger,
        peers: Vec<Peer>,
        rpc_request: ProtoAppendEntriesReq,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        term: Term,
        num_entries_sent: usize,
    ) {
        let calls: Vec<_> = peers
            .into_iter()
            .map(|peer| {
                let logger = logger.new(slog::o!("Peer" => peer.id.to_string()));
                tokio::task::spawn(append_entries(logger, peer, rpc_request.clone(), rpc_timeout))
            })
            .collect();

        let mut num_successes = 0;
        let mut highest_peer_term: Option<Term> = None;
        for call in calls {
            match call.await {
                Ok(Some(reply)) => {
                    if reply.success {
                        num_successes += 1;
                    }
                    let peer_term = Term::new(reply.term);
                    highest_peer_term = Some(highest_peer_term.map_or(peer_term, |t| cmp::max(t, peer_term)));
                }
                Ok(None) => {}
                Err(e) => slog::warn!(logger, "AppendEntries task failed: {:?}", e),
            }
        }

        callback
            .notify_heartbeat_round_finished(HeartbeatRoundResult {
                term,
                num_entries_sent,
                num_successes,
                highest_peer_term,
            })
            .await;
    }

    async fn append_entries(
        logger: slog::Logger,
        mut peer: Peer,
        rpc_request: ProtoAppendEntriesReq,
        rpc_timeout: Duration,
    ) -> Option<ProtoAppendEntriesResult> {
        slog::trace!(logger, "ClientWire - AppendEntries with {} entries", rpc_request.entries.len());
        match tokio::time::timeout(rpc_timeout, peer.client.append_entries(rpc_request)).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(status)) => {
                slog::debug!(logger, "AppendEntries failed: {:?}", status);
                None
            }
            Err(_) => {
                slog::debug!(logger, "AppendEntries timed out");
                None
            }
        }
    }
}
