use crate::actor::WeakActorClient;
use crate::grpc::grpc_account_server::GrpcAccount;
use crate::grpc::{ProtoClientRequest, ProtoClientResponse};
use crate::server::ShutdownSignal;
use crate::session::{ClientRegistry, ClientSession, SessionContext};
use crate::store::AccountStore;
use futures::channel::mpsc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Duration;
use tonic::{Request, Response, Status, Streaming};

/// AccountServer accepts client duplex streams and hands each one to its own session task.
pub(crate) struct AccountServer {
    logger: slog::Logger,
    local_replica: WeakActorClient,
    store: AccountStore,
    registry: ClientRegistry,
    shutdown_signal: ShutdownSignal,
    apply_timeout: Duration,
    next_session_id: AtomicU64,
}

impl AccountServer {
    pub(crate) fn new(
        logger: slog::Logger,
        local_replica: WeakActorClient,
        store: AccountStore,
        shutdown_signal: ShutdownSignal,
        apply_timeout: Duration,
    ) -> Self {
        AccountServer {
            logger,
            local_replica,
            store,
            registry: ClientRegistry::default(),
            shutdown_signal,
            apply_timeout,
            next_session_id: AtomicU64::new(1),
        }
    }
}

#[async_trait::async_trait]
impl GrpcAccount for AccountServer {
    type ClientSessionStream = mpsc::UnboundedReceiver<Result<ProtoClientResponse, Status>>;

    async fn client_session(
        &self,
        rpc_request: Request<Streaming<ProtoClientRequest>>,
    ) -> Result<Response<Self::ClientSessionStream>, Status> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let inbound = rpc_request.into_inner();
        let (outbound_tx, outbound_rx) = mpsc::unbounded();

        let session = ClientSession::new(SessionContext {
            logger: self.logger.new(slog::o!("Session" => session_id)),
            local_replica: self.local_replica.clone(),
            store: self.store.clone(),
            registry: self.registry.clone(),
            outbound: outbound_tx,
            shutdown_signal: self.shutdown_signal.clone(),
            apply_timeout: self.apply_timeout,
        });

        // The reader is attached before the response headers go out, and clients wait for those
        // headers before their first request.
        tokio::task::spawn(session.run(inbound));

        Ok(Response::new(outbound_rx))
    }
}
