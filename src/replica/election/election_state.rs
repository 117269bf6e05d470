use crate::replica::{ReplicaId, Role};
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use tokio::time::{Duration, Instant};

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_replica_id: ReplicaId,
    pub my_address: String,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
}

impl ElectionConfig {
    fn new_election_deadline(&self, now: Instant) -> Instant {
        let timeout = rand::thread_rng().gen_range(self.election_timeout_min..=self.election_timeout_max);
        now + timeout
    }
}

/// The leader a follower currently recognizes for its term.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LeaderInfo {
    pub(crate) replica_id: ReplicaId,
    pub(crate) address: String,
}

/// ElectionState is responsible for holding state specific to the stage in an election. Its
/// methods are responsible for "what" to do. It is NOT responsible for validating anything
/// specific to logs, terms, peers, etc. or knowing "when" to do something.
pub(crate) struct ElectionState {
    state: State,
    config: ElectionConfig,
}

enum State {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
}

pub(crate) struct LeaderState {
    // Heartbeat rounds never overlap.
    pub(crate) heartbeat_in_flight: bool,
}

struct CandidateState {
    received_votes_from: HashSet<ReplicaId>,
    election_deadline: Instant,
}

struct FollowerState {
    leader: Option<LeaderInfo>,
    election_deadline: Instant,
}

impl ElectionState {
    pub(crate) fn new_follower(config: ElectionConfig, now: Instant) -> Self {
        let election_deadline = config.new_election_deadline(now);

        ElectionState {
            state: State::Follower(FollowerState {
                leader: None,
                election_deadline,
            }),
            config,
        }
    }

    pub(crate) fn transition_to_follower(&mut self, leader: Option<LeaderInfo>, now: Instant) {
        self.state = State::Follower(FollowerState {
            leader,
            election_deadline: self.config.new_election_deadline(now),
        });
    }

    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self, now: Instant) {
        let mut received_votes_from = HashSet::with_capacity(3);
        received_votes_from.insert(self.config.my_replica_id.clone());

        self.state = State::Candidate(CandidateState {
            received_votes_from,
            election_deadline: self.config.new_election_deadline(now),
        });
    }

    pub(crate) fn transition_to_leader(&mut self) {
        self.state = State::Leader(LeaderState {
            heartbeat_in_flight: false,
        });
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: ReplicaId) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            cs.received_votes_from.insert(vote_from);
            Some(cs.received_votes_from.len())
        } else {
            None
        }
    }

    pub(crate) fn reset_deadline_if_follower(&mut self, now: Instant) {
        if let State::Follower(fs) = &mut self.state {
            fs.election_deadline = self.config.new_election_deadline(now);
        }
    }

    /// None for a leader, which never times out.
    pub(crate) fn election_deadline(&self) -> Option<Instant> {
        match &self.state {
            State::Leader(_) => None,
            State::Candidate(cs) => Some(cs.election_deadline),
            State::Follower(fs) => Some(fs.election_deadline),
        }
    }

    pub(crate) fn role(&self) -> Role {
        match &self.state {
            State::Leader(_) => Role::Leader,
            State::Candidate(_) => Role::Candidate,
            State::Follower(_) => Role::Follower,
        }
    }

    /// True if anyone, including me, is known to lead the current term.
    pub(crate) fn has_leader(&self) -> bool {
        match &self.state {
            State::Leader(_) => true,
            State::Candidate(_) => false,
            State::Follower(fs) => fs.leader.is_some(),
        }
    }

    pub(crate) fn leader_address(&self) -> Option<String> {
        match &self.state {
            State::Leader(_) => Some(self.config.my_address.clone()),
            State::Candidate(_) => None,
            State::Follower(fs) => fs.leader.as_ref().map(|leader| leader.address.clone()),
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderState> {
        if let State::Leader(ls) = &mut self.state {
            Some(ls)
        } else {
            None
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(cs) => write!(f, "Candidate(Votes={})", cs.received_votes_from.len()),
            State::Follower(FollowerState {
                leader: Some(leader_info),
                ..
            }) => write!(f, "Follower(Leader={:?})", leader_info.replica_id),
            State::Follower(FollowerState { leader: None, .. }) => write!(f, "Follower(Leader=None)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ElectionConfig {
        ElectionConfig {
            my_replica_id: ReplicaId::for_index(0),
            my_address: "127.0.0.1:1".into(),
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(500),
        }
    }

    #[test]
    fn deadline_within_configured_range() {
        let now = Instant::now();
        for _ in 0..100 {
            let state = ElectionState::new_follower(config(), now);
            let deadline = state.election_deadline().unwrap();
            assert!(deadline >= now + Duration::from_millis(300));
            assert!(deadline <= now + Duration::from_millis(500));
        }
    }

    #[test]
    fn candidate_counts_unique_votes() {
        let mut state = ElectionState::new_follower(config(), Instant::now());
        assert_eq!(state.add_vote_if_candidate(ReplicaId::for_index(1)), None);

        state.transition_to_candidate_and_vote_for_self(Instant::now());
        assert_eq!(state.add_vote_if_candidate(ReplicaId::for_index(1)), Some(2));
        assert_eq!(state.add_vote_if_candidate(ReplicaId::for_index(1)), Some(2));
        assert_eq!(state.add_vote_if_candidate(ReplicaId::for_index(0)), Some(2));
    }

    #[test]
    fn leader_address_per_role() {
        let mut state = ElectionState::new_follower(config(), Instant::now());
        assert_eq!(state.leader_address(), None);
        assert!(!state.has_leader());

        state.transition_to_follower(
            Some(LeaderInfo {
                replica_id: ReplicaId::for_index(2),
                address: "127.0.0.1:3".into(),
            }),
            Instant::now(),
        );
        assert_eq!(state.leader_address().as_deref(), Some("127.0.0.1:3"));
        assert!(state.has_leader());

        state.transition_to_leader();
        assert_eq!(state.leader_address().as_deref(), Some("127.0.0.1:1"));
        assert_eq!(state.election_deadline(), None);
        assert_eq!(state.role(), Role::Leader);
    }
}
