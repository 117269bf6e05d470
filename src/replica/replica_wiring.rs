use crate::actor::WeakActorClient;
use crate::config::RaftOptionsValidated;
use crate::replica::replicated_log::{self, CommitStream};
use crate::replica::{ClusterTracker, RealClock, Replica, ReplicaConfig, VolatileLocalState};

pub(crate) fn create_replica(
    logger: slog::Logger,
    cluster_tracker: ClusterTracker,
    actor_client: WeakActorClient,
    options: &RaftOptionsValidated,
) -> (Replica<VolatileLocalState, RealClock>, CommitStream) {
    let local_state = VolatileLocalState::new(cluster_tracker.my_replica_id().clone());
    let (commit_stream_publisher, commit_stream) = replicated_log::new_commit_stream();

    let replica = Replica::new(ReplicaConfig {
        logger,
        cluster_tracker,
        local_state,
        commit_stream_publisher,
        actor_client,
        clock: RealClock,
        election_timeout_min: options.election_timeout_min,
        election_timeout_max: options.election_timeout_max,
        rpc_timeout: options.rpc_timeout,
    });

    (replica, commit_stream)
}
