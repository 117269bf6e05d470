use crate::bridge::apply;
use crate::replica::CommitStream;
use crate::store::AccountStore;

/// Applier drains a replica's commit stream into its account store. Runs until the replica is
/// gone.
pub(crate) struct Applier {
    logger: slog::Logger,
    commit_stream: CommitStream,
    store: AccountStore,
}

impl Applier {
    pub(crate) fn new(logger: slog::Logger, commit_stream: CommitStream, store: AccountStore) -> Self {
        Applier {
            logger,
            commit_stream,
            store,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(committed) = self.commit_stream.recv().await {
            match apply(&committed.entry, &self.store).await {
                Ok(outcome) => {
                    slog::debug!(
                        self.logger,
                        "Applied log entry {} for {:?}: {:?}",
                        committed.index,
                        committed.entry.action.username(),
                        outcome
                    );
                    if let Some(reply) = committed.apply_reply {
                        let _ = reply.send(outcome);
                    }
                }
                Err(e) => {
                    // Dropping the reply tells a waiting session the write failed.
                    slog::error!(
                        self.logger,
                        "Failed to apply log entry {}: {:?}. Entry: {:?}",
                        committed.index,
                        e,
                        committed.entry
                    );
                }
            }
        }

        slog::info!(self.logger, "Commit stream closed. Applier exiting.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ApplyOutcome;
    use crate::replica::{new_commit_stream, Action, LogEntry, ReplicatedLog, Term};
    use crate::store::{hash_password, GameKind};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn outcome_reaches_waiting_session() {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let store = AccountStore::open_in_memory().await.unwrap();
        let (publisher, commit_stream) = new_commit_stream();
        let mut log = ReplicatedLog::new(logger.clone(), publisher);
        let applier_task = tokio::spawn(Applier::new(logger, commit_stream, store.clone()).run());

        let register = LogEntry {
            term: Term::new(1),
            action: Action::Register {
                username: "foo".into(),
                password_hash: hash_password("bar"),
            },
        };
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        log.append(register.clone(), Some(first_tx));
        log.append(register, Some(second_tx));
        log.publish_up_to(log.len());

        assert_eq!(first_rx.await.unwrap(), ApplyOutcome::Registered);
        assert_eq!(second_rx.await.unwrap(), ApplyOutcome::AlreadyRegistered);

        drop(log);
        applier_task.await.unwrap();
        assert!(store.username_exists("foo").await.unwrap());
    }

    // A restarted replica keeps its datastore but rebuilds its log from the leader, so every
    // entry reaches the applier a second time.
    async fn apply_in_fresh_log(store: &AccountStore, entries: &[LogEntry]) {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let (publisher, commit_stream) = new_commit_stream();
        let mut log = ReplicatedLog::new(logger.clone(), publisher);
        let applier_task = tokio::spawn(Applier::new(logger, commit_stream, store.clone()).run());

        for entry in entries {
            log.append(entry.clone(), None);
        }
        log.publish_up_to(log.len());

        drop(log);
        applier_task.await.unwrap();
    }

    #[tokio::test]
    async fn replayed_log_after_restart_leaves_store_unchanged() {
        let store = AccountStore::open_in_memory().await.unwrap();
        let entries = vec![
            LogEntry {
                term: Term::new(1),
                action: Action::Register {
                    username: "foo".into(),
                    password_hash: hash_password("bar"),
                },
            },
            LogEntry {
                term: Term::new(1),
                action: Action::SaveGame {
                    game_id: 77,
                    username: "foo".into(),
                    game_kind: GameKind::TexasHoldEm,
                    money_delta: 100,
                    played_at_millis: 1_000,
                },
            },
        ];

        apply_in_fresh_log(&store, &entries).await;
        assert_eq!(store.balance("foo").await.unwrap(), Some(600));

        apply_in_fresh_log(&store, &entries).await;
        assert_eq!(store.balance("foo").await.unwrap(), Some(600));
        assert_eq!(store.history("foo").await.unwrap().unwrap().len(), 1);
    }
}
