mod account_store;
mod game_kind;
mod password;

pub use account_store::AccountStore;
pub use account_store::GameRecord;
pub use account_store::StoreError;
pub use account_store::STARTING_BALANCE;
pub use game_kind::GameKind;
pub use password::hash_password;
