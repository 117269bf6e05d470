use crate::client::ClientError;
use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::grpc::ProtoGetLeaderReq;
use tokio::time::Duration;
use tonic::transport::Endpoint;

const DEFAULT_MAX_ATTEMPTS: usize = 6;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// LeaderDiscovery asks replicas, in configured order, who the leader is.
#[derive(Clone)]
pub struct LeaderDiscovery {
    logger: slog::Logger,
    replicas: Vec<String>,
    max_attempts: usize,
    backoff: Duration,
    rpc_timeout: Duration,
}

impl LeaderDiscovery {
    pub fn new(logger: slog::Logger, replicas: Vec<String>) -> Self {
        LeaderDiscovery {
            logger,
            replicas,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Returns the first leader address any replica reports. Each attempt walks every replica
    /// once; attempts are separated by the backoff.
    pub async fn discover(&self) -> Result<String, ClientError> {
        for attempt in 1..=self.max_attempts {
            for replica in &self.replicas {
                match self.query(replica).await {
                    Ok(Some(leader_address)) => {
                        slog::info!(self.logger, "{} reports leader {}", replica, leader_address);
                        return Ok(leader_address);
                    }
                    Ok(None) => slog::debug!(self.logger, "{} knows no leader", replica),
                    Err(e) => slog::debug!(self.logger, "{} is unreachable: {}", replica, e),
                }
            }

            if attempt < self.max_attempts {
                slog::info!(
                    self.logger,
                    "No leader found (attempt {}/{}). Retrying in {:?}.",
                    attempt,
                    self.max_attempts,
                    self.backoff
                );
                tokio::time::sleep(self.backoff).await;
            }
        }

        Err(ClientError::NoLeader {
            attempts: self.max_attempts,
        })
    }

    async fn query(&self, replica: &str) -> Result<Option<String>, ClientError> {
        let endpoint = endpoint(replica)?;
        let call = async move {
            let channel = endpoint.connect().await?;
            let reply = GrpcRaftClient::new(channel).get_leader(ProtoGetLeaderReq {}).await?;
            Ok::<_, ClientError>(reply.into_inner().leader_address)
        };

        let leader_address = tokio::time::timeout(self.rpc_timeout, call)
            .await
            .map_err(|_| ClientError::Timeout("GetLeader"))??;

        if leader_address.is_empty() {
            Ok(None)
        } else {
            Ok(Some(leader_address))
        }
    }
}

pub(crate) fn endpoint(address: &str) -> Result<Endpoint, ClientError> {
    Endpoint::from_shared(format!("http://{}", address)).map_err(|source| ClientError::InvalidAddress {
        address: address.to_string(),
        source,
    })
}
