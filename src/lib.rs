mod actor;
mod bridge;
mod client;
mod config;
mod logging;
mod node;
mod replica;
mod server;
mod session;
mod store;
mod grpc {
    include!("../generated/ledger.rs");
}

pub use actor::ActorExited;
pub use client::AccountClient;
pub use client::ClientError;
pub use client::LeaderDiscovery;
pub use config::ClusterConfig;
pub use config::ConfigError;
pub use config::RaftOptions;
pub use config::ServerIdentity;
pub use config::ServersConfig;
pub use logging::file_logger;
pub use logging::terminal_logger;
pub use node::start_replica_node;
pub use node::NodeStartError;
pub use node::ReplicaNode;
pub use node::ReplicaNodeConfig;
pub use replica::ConnectError;
pub use replica::ReplicaStatus;
pub use replica::Role;
pub use store::hash_password;
pub use store::AccountStore;
pub use store::GameKind;
pub use store::GameRecord;
pub use store::StoreError;
pub use store::STARTING_BALANCE;

// The crate root only declares modules and re-exports. Modules are never `pub`; each public
// item is exported on its own line so module internals can move freely.
