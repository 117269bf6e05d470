use crate::config::RaftOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{fs, io};

/// ClusterConfig is the static view of the cluster every replica and client starts from. The
/// `servers` lists are parallel arrays, one slot per replica.
#[derive(Clone, Debug, Deserialize)]
pub struct ClusterConfig {
    pub servers: ServersConfig,
    #[serde(default)]
    pub raft: RaftOptions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServersConfig {
    pub hosts: Vec<String>,
    pub ports: Vec<u16>,
    pub log_paths: Vec<PathBuf>,
    pub db_paths: Vec<PathBuf>,
}

/// The fixed identity of one replica.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerIdentity {
    pub index: usize,
    pub host: String,
    pub port: u16,
    pub log_path: PathBuf,
    pub db_path: PathBuf,
}

impl ServerIdentity {
    /// `host:port`, which is also what replicas advertise as the leader address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Malformed config file {path:?}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("Config lists {hosts} hosts, {ports} ports, {log_paths} log paths and {db_paths} db paths")]
    MismatchedServerLists {
        hosts: usize,
        ports: usize,
        log_paths: usize,
        db_paths: usize,
    },
    #[error("Config lists no servers")]
    NoServers,
    #[error("Replica index {index} is out of range for a cluster of {num_servers}")]
    IndexOutOfRange { index: usize, num_servers: usize },
    #[error("Illegal raft options: {0}")]
    IllegalOptions(&'static str),
}

impl ClusterConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ClusterConfig = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let servers = &self.servers;
        let num_hosts = servers.hosts.len();
        if servers.ports.len() != num_hosts
            || servers.log_paths.len() != num_hosts
            || servers.db_paths.len() != num_hosts
        {
            return Err(ConfigError::MismatchedServerLists {
                hosts: num_hosts,
                ports: servers.ports.len(),
                log_paths: servers.log_paths.len(),
                db_paths: servers.db_paths.len(),
            });
        }
        if num_hosts == 0 {
            return Err(ConfigError::NoServers);
        }

        Ok(())
    }

    pub fn num_servers(&self) -> usize {
        self.servers.hosts.len()
    }

    pub fn identity(&self, index: usize) -> Result<ServerIdentity, ConfigError> {
        if index >= self.num_servers() {
            return Err(ConfigError::IndexOutOfRange {
                index,
                num_servers: self.num_servers(),
            });
        }

        Ok(ServerIdentity {
            index,
            host: self.servers.hosts[index].clone(),
            port: self.servers.ports[index],
            log_path: self.servers.log_paths[index].clone(),
            db_path: self.servers.db_paths[index].clone(),
        })
    }

    pub fn members(&self) -> Vec<ServerIdentity> {
        (0..self.num_servers())
            .filter_map(|index| self.identity(index).ok())
            .collect()
    }

    /// Addresses of every replica, in config order. Clients query them in this order.
    pub fn addresses(&self) -> Vec<String> {
        self.members().iter().map(ServerIdentity::address).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SERVERS: &str = r#"{
        "servers": {
            "hosts": ["127.0.0.1", "127.0.0.1"],
            "ports": [50051, 50052],
            "log_paths": ["logs/a.log", "logs/b.log"],
            "db_paths": ["data/a.db", "data/b.db"]
        }
    }"#;

    #[test]
    fn parse_and_lookup_identity() {
        let config: ClusterConfig = serde_json::from_str(TWO_SERVERS).unwrap();
        config.validate().unwrap();

        let identity = config.identity(1).unwrap();
        assert_eq!(identity.address(), "127.0.0.1:50052");
        assert_eq!(identity.db_path, PathBuf::from("data/b.db"));
        assert_eq!(config.addresses(), vec!["127.0.0.1:50051", "127.0.0.1:50052"]);
        assert!(config.raft.tick_interval_ms.is_none());
    }

    #[test]
    fn out_of_range_index() {
        let config: ClusterConfig = serde_json::from_str(TWO_SERVERS).unwrap();
        assert!(matches!(
            config.identity(2),
            Err(ConfigError::IndexOutOfRange {
                index: 2,
                num_servers: 2
            })
        ));
    }

    #[test]
    fn mismatched_lists() {
        let mut config: ClusterConfig = serde_json::from_str(TWO_SERVERS).unwrap();
        config.servers.ports.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MismatchedServerLists { ports: 1, .. })
        ));
    }

    #[test]
    fn missing_file() {
        let result = ClusterConfig::from_file("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
