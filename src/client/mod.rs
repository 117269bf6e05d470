mod account_client;
mod discovery;
mod error;

pub use account_client::AccountClient;
pub use discovery::LeaderDiscovery;
pub use error::ClientError;
