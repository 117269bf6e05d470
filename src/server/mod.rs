mod account_server;
mod raft_server;
mod server;
mod shutdown;

pub(crate) use account_server::AccountServer;
pub(crate) use raft_server::RaftServer;
pub(crate) use server::RpcServer;
pub(crate) use shutdown::shutdown_signal;
pub(crate) use shutdown::ShutdownHandle;
pub(crate) use shutdown::ShutdownSignal;
