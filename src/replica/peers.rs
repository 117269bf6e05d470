use crate::config::ClusterConfig;
use crate::replica::peer_client::{ConnectError, RaftClient};
use std::collections::HashMap;
use std::fmt;

/// ReplicaId is derived from a replica's position in the cluster config, e.g. `replica-0`.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        ReplicaId(id.into())
    }

    pub(crate) fn for_index(index: usize) -> Self {
        ReplicaId(format!("replica-{}", index))
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub(crate) struct Peer {
    pub(crate) id: ReplicaId,
    pub(crate) client: RaftClient,
}

/// ClusterTracker knows the static membership of the cluster and holds an RPC client per peer.
pub(crate) struct ClusterTracker {
    my_replica_id: ReplicaId,
    my_address: String,
    peers: HashMap<ReplicaId, Peer>,
}

impl ClusterTracker {
    pub(crate) fn new(cluster: &ClusterConfig, my_index: usize) -> Result<Self, ConnectError> {
        let mut my_address = String::new();
        let mut peers = HashMap::with_capacity(cluster.num_servers());

        for member in cluster.members() {
            if member.index == my_index {
                my_address = member.address();
                continue;
            }

            let id = ReplicaId::for_index(member.index);
            let client = RaftClient::new(&member.address())?;
            peers.insert(
                id.clone(),
                Peer { id, client },
            );
        }

        Ok(ClusterTracker {
            my_replica_id: ReplicaId::for_index(my_index),
            my_address,
            peers,
        })
    }

    pub(crate) fn my_replica_id(&self) -> &ReplicaId {
        &self.my_replica_id
    }

    pub(crate) fn my_address(&self) -> &str {
        &self.my_address
    }

    pub(crate) fn contains_member(&self, replica_id: &ReplicaId) -> bool {
        self.peers.contains_key(replica_id) || &self.my_replica_id == replica_id
    }

    pub(crate) fn iter_peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Number of servers in the cluster, including me.
    pub(crate) fn num_servers(&self) -> usize {
        self.peers.len() + 1
    }
}
