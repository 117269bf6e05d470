mod registry;
mod session;

pub(crate) use registry::ClientRegistry;
pub(crate) use session::ClientSession;
pub(crate) use session::Outbound;
pub(crate) use session::SessionContext;
