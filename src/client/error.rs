use tonic::codegen::http::uri::InvalidUri;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid replica address {address:?}: {source}")]
    InvalidAddress { address: String, source: InvalidUri },
    #[error("Transport failure: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("RPC failed: {0}")]
    Status(#[from] tonic::Status),
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("Leader closed the session stream")]
    StreamClosed,
    #[error("No replica reported a leader after {attempts} attempts")]
    NoLeader { attempts: usize },
    #[error("Could not keep a session with the leader after {attempts} attempts")]
    SessionLost { attempts: usize },
}
