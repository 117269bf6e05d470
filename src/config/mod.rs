//! Cluster membership and tuning knobs, loaded from the deployment's JSON config file.
mod cluster_config;
mod options;

pub use cluster_config::ClusterConfig;
pub use cluster_config::ConfigError;
pub use cluster_config::ServerIdentity;
pub use cluster_config::ServersConfig;
pub use options::RaftOptions;

pub(crate) use options::RaftOptionsValidated;
