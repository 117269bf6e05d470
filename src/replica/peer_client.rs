use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::grpc::{ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoVoteReq, ProtoVoteResult};
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

/// RaftClient is the outbound half of the replica-to-replica protocol. The underlying channel
/// connects lazily and reconnects on its own, so a peer that is down at startup is not an error.
#[derive(Clone)]
pub(crate) struct RaftClient {
    inner: GrpcRaftClient<Channel>,
}

impl RaftClient {
    pub(crate) fn new(address: &str) -> Result<Self, ConnectError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", address))?;
        let channel = endpoint.connect_lazy()?;

        Ok(RaftClient {
            inner: GrpcRaftClient::new(channel),
        })
    }

    pub(crate) async fn vote(&mut self, request: ProtoVoteReq) -> Result<ProtoVoteResult, Status> {
        self.inner
            .vote(Request::new(request))
            .await
            .map(|response| response.into_inner())
    }

    pub(crate) async fn append_entries(
        &mut self,
        request: ProtoAppendEntriesReq,
    ) -> Result<ProtoAppendEntriesResult, Status> {
        self.inner
            .append_entries(Request::new(request))
            .await
            .map(|response| response.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid peer address: {0}")]
    InvalidUri(#[from] uri::InvalidUri),
    #[error("Failed to create peer channel: {0}")]
    Transport(#[from] tonic::transport::Error),
}
