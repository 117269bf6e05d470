mod election;
mod local_state;
mod peer_client;
mod peers;
mod replica;
mod replica_api;
mod replica_wiring;
mod replicated_log;
mod ticker;

pub(crate) use local_state::PersistentLocalState;
pub(crate) use local_state::Term;
pub(crate) use local_state::VolatileLocalState;
pub use peer_client::ConnectError;
pub(crate) use peers::ClusterTracker;
pub use peers::ReplicaId;
pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub(crate) use replica_api::AppendEntriesError;
pub(crate) use replica_api::AppendEntriesInput;
pub(crate) use replica_api::AppendEntriesOutput;
pub(crate) use replica_api::HeartbeatRoundResult;
pub use replica_api::ReplicaStatus;
pub(crate) use replica_api::RequestVoteError;
pub(crate) use replica_api::RequestVoteInput;
pub(crate) use replica_api::RequestVoteOutput;
pub(crate) use replica_api::RequestVoteReplyFromPeer;
#[cfg(test)]
pub(crate) use replica_api::TermOutOfDateInfo;
pub use replica_api::Role;
pub(crate) use replica_api::WriteToLogError;
pub(crate) use replica_api::WriteToLogInput;
pub(crate) use replica_api::WriteToLogOutput;
pub(crate) use replica_wiring::create_replica;
#[cfg(test)]
pub(crate) use replicated_log::new_commit_stream;
#[cfg(test)]
pub(crate) use replicated_log::ReplicatedLog;
pub(crate) use replicated_log::{Action, CommitStream, LogEntry};
pub(crate) use ticker::{Clock, RealClock, Ticker};
