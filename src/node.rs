use crate::actor::{ActorClient, ActorExited, ReplicaActor};
use crate::bridge::Applier;
use crate::config::{ClusterConfig, ConfigError, RaftOptionsValidated};
use crate::replica::{self, ClusterTracker, ConnectError, ReplicaId, ReplicaStatus, Ticker};
use crate::server::{self, AccountServer, RaftServer, RpcServer, ShutdownHandle};
use crate::store::{AccountStore, StoreError};
use std::convert::TryFrom;
use std::io;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ReplicaNodeConfig {
    pub cluster: ClusterConfig,
    // 0-based position in the cluster config.
    pub my_index: usize,
    pub logger: slog::Logger,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeStartError {
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to open account store: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to listen on {address}: {source}")]
    Bind { address: String, source: io::Error },
    #[error("Invalid peer: {0}")]
    PeerAddress(#[from] ConnectError),
}

/// ReplicaNode is one running replica: the replica actor, its ticker, the applier that feeds its
/// account store, and the RPC server in front of them.
pub struct ReplicaNode {
    logger: slog::Logger,
    address: String,
    // The only strong client. Dropping it stops the replica.
    actor_client: ActorClient,
    shutdown_handle: ShutdownHandle,
    server_task: JoinHandle<()>,
}

pub async fn start_replica_node(config: ReplicaNodeConfig) -> Result<ReplicaNode, NodeStartError> {
    config.cluster.validate()?;
    let identity = config.cluster.identity(config.my_index)?;
    let options =
        RaftOptionsValidated::try_from(config.cluster.raft.clone()).map_err(ConfigError::IllegalOptions)?;
    let logger = config
        .logger
        .new(slog::o!("ReplicaId" => ReplicaId::for_index(identity.index).to_string()));

    let store = AccountStore::open(&identity.db_path).await?;
    let cluster_tracker = ClusterTracker::new(&config.cluster, identity.index)?;

    let address = identity.address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| NodeStartError::Bind {
            address: address.clone(),
            source,
        })?;

    let (actor_client, actor_queue_rx) = ActorClient::new(64);
    let (replica, commit_stream) =
        replica::create_replica(logger.clone(), cluster_tracker, actor_client.weak(), &options);

    let replica_actor = ReplicaActor::new(logger.clone(), actor_queue_rx, replica);
    tokio::spawn(replica_actor.run_event_loop());

    let applier = Applier::new(logger.clone(), commit_stream, store.clone());
    tokio::spawn(applier.run());

    Ticker::spawn(options.tick_interval, actor_client.weak());

    let (shutdown_handle, shutdown_signal) = server::shutdown_signal();
    let raft_server = RaftServer::new(logger.clone(), actor_client.weak());
    let account_server = AccountServer::new(
        logger.clone(),
        actor_client.weak(),
        store,
        shutdown_signal.clone(),
        options.apply_timeout,
    );
    let rpc_server = RpcServer::new(logger.clone(), raft_server, account_server);
    let server_task = tokio::spawn(rpc_server.run(listener, shutdown_signal));

    slog::info!(logger, "Replica started at {} with {:?}", address, options);
    Ok(ReplicaNode {
        logger,
        address,
        actor_client,
        shutdown_handle,
        server_task,
    })
}

impl ReplicaNode {
    /// `host:port` this replica serves on, as it advertises itself when leader.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn status(&self) -> Result<ReplicaStatus, ActorExited> {
        self.actor_client.status().await
    }

    /// Close client sessions, stop serving and stop the replica. Peers see this replica as
    /// crashed.
    pub async fn shutdown(self) {
        let ReplicaNode {
            logger,
            actor_client,
            shutdown_handle,
            mut server_task,
            ..
        } = self;
        slog::info!(logger, "Shutting down");

        drop(shutdown_handle);
        drop(actor_client);

        if tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, &mut server_task)
            .await
            .is_err()
        {
            slog::warn!(logger, "Server did not stop in {:?}. Aborting it.", SERVER_SHUTDOWN_TIMEOUT);
            server_task.abort();
        }
    }
}
