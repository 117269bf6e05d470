use crate::replica::{Action, LogEntry};
use crate::store::{AccountStore, StoreError};
use tokio::sync::oneshot;

/// What applying one log entry did to the account store.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ApplyOutcome {
    Registered,
    AlreadyRegistered,
    Deleted,
    NotDeleted,
    GameSaved { balance: i64 },
    GameNotSaved,
    Informational,
}

pub(crate) type ApplyReply = oneshot::Sender<ApplyOutcome>;

/// Apply a single log entry. Safe to call again with an entry that was already applied: a
/// registration is ignored if the username exists, a deletion needs a matching account and a
/// game result is recorded once per game id.
pub(crate) async fn apply(entry: &LogEntry, store: &AccountStore) -> Result<ApplyOutcome, StoreError> {
    let outcome = match &entry.action {
        Action::Register {
            username,
            password_hash,
        } => {
            if store.register(username, password_hash).await? {
                ApplyOutcome::Registered
            } else {
                ApplyOutcome::AlreadyRegistered
            }
        }
        Action::DeleteAccount {
            username,
            password_hash,
        } => {
            if store.delete_account(username, password_hash).await? {
                ApplyOutcome::Deleted
            } else {
                ApplyOutcome::NotDeleted
            }
        }
        Action::SaveGame {
            game_id,
            username,
            game_kind,
            money_delta,
            played_at_millis,
        } => match store
            .save_game(*game_id, username, *game_kind, *money_delta, *played_at_millis)
            .await?
        {
            Some(balance) => ApplyOutcome::GameSaved { balance },
            None => ApplyOutcome::GameNotSaved,
        },
        Action::Connect { .. } | Action::ConnectLobby { .. } => ApplyOutcome::Informational,
    };

    Ok(outcome)
}
