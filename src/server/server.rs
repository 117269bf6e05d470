use crate::grpc::grpc_account_server::GrpcAccountServer;
use crate::grpc::grpc_raft_server::GrpcRaftServer;
use crate::server::{AccountServer, RaftServer, ShutdownSignal};
use futures::stream;
use tokio::net::TcpListener;
use tonic::transport::Server;

/// RpcServer serves both the Raft and the client session services on one replica's port.
pub(crate) struct RpcServer {
    logger: slog::Logger,
    raft: RaftServer,
    account: AccountServer,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, raft: RaftServer, account: AccountServer) -> Self {
        RpcServer { logger, raft, account }
    }

    /// The listener is bound by the caller so that a taken port fails startup instead of this task.
    pub(crate) async fn run(self, listener: TcpListener, shutdown_signal: ShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", listener.local_addr());

        let incoming = Box::pin(stream::unfold(listener, |listener| async move {
            let connection = listener.accept().await.map(|(socket, _)| socket);
            Some((connection, listener))
        }));

        let result = Server::builder()
            .add_service(GrpcRaftServer::new(self.raft))
            .add_service(GrpcAccountServer::new(self.account))
            .serve_with_incoming_shutdown(incoming, shutdown_signal.recv())
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }
}
