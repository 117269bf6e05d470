use crate::store::GameKind;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::{fs, io};

/// Balance of a freshly registered account.
pub const STARTING_BALANCE: i64 = 500;

const CREATE_ACCOUNTS: &str = "CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    balance INTEGER NOT NULL DEFAULT 500
)";

const CREATE_GAME_HISTORY: &str = "CREATE TABLE IF NOT EXISTS game_history (
    id INTEGER PRIMARY KEY,
    game_id INTEGER UNIQUE NOT NULL,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    game_kind TEXT NOT NULL,
    amount INTEGER NOT NULL,
    played_at INTEGER NOT NULL
)";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Datastore failure: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Failed to create datastore directory: {0}")]
    Io(#[from] io::Error),
    #[error("Unknown game kind {0:?} in game history")]
    UnknownGameKind(String),
}

/// One row of an account's game history.
#[derive(Clone, Debug, PartialEq)]
pub struct GameRecord {
    pub player: String,
    pub game_kind: GameKind,
    pub money_won: i64,
    pub played_at_millis: i64,
}

/// AccountStore is a replica's private datastore of accounts and game history. Mutations only
/// happen while applying log entries; client sessions read from it directly.
#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    /// Open (creating if missing) the datastore at `path`.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        Self::with_pool(pool).await
    }

    /// A private datastore that lives as long as this store. Used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // Every connection to `sqlite::memory:` is its own database, so never let the only
        // connection expire.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(CREATE_ACCOUNTS).execute(&pool).await?;
        sqlx::query(CREATE_GAME_HISTORY).execute(&pool).await?;

        Ok(AccountStore { pool })
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.is_some())
    }

    /// Returns the balance iff the account exists and the hash matches.
    pub async fn verify_login(&self, username: &str, password_hash: &str) -> Result<Option<i64>, StoreError> {
        let balance = sqlx::query_scalar("SELECT balance FROM accounts WHERE username = ? AND password_hash = ?")
            .bind(username)
            .bind(password_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(balance)
    }

    /// Returns false if the username was already taken. Applying the same registration twice
    /// leaves exactly one account.
    pub async fn register(&self, username: &str, password_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO accounts (username, password_hash, balance) VALUES (?, ?, ?)")
            .bind(username)
            .bind(password_hash)
            .bind(STARTING_BALANCE)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns true iff an account with this username and password hash existed and is now gone.
    pub async fn delete_account(&self, username: &str, password_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE username = ? AND password_hash = ?")
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a game result and apply its delta to the balance, atomically. A `game_id` that is
    /// already recorded leaves the account untouched. Returns the balance, or None if there is
    /// no such account.
    pub async fn save_game(
        &self,
        game_id: i64,
        username: &str,
        game_kind: GameKind,
        money_won: i64,
        played_at_millis: i64,
    ) -> Result<Option<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let account_id: Option<i64> = sqlx::query_scalar("SELECT id FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *tx)
            .await?;
        let account_id = match account_id {
            Some(id) => id,
            None => return Ok(None),
        };

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO game_history (game_id, account_id, game_kind, amount, played_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(game_id)
        .bind(account_id)
        .bind(game_kind.label())
        .bind(money_won)
        .bind(played_at_millis)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        if inserted {
            sqlx::query("UPDATE accounts SET balance = balance + ? WHERE id = ?")
                .bind(money_won)
                .bind(account_id)
                .execute(&mut *tx)
                .await?;
        }
        let balance: i64 = sqlx::query_scalar("SELECT balance FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(balance))
    }

    pub async fn balance(&self, username: &str) -> Result<Option<i64>, StoreError> {
        let balance = sqlx::query_scalar("SELECT balance FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(balance)
    }

    /// Game history of an account, newest first. None if there is no such account.
    pub async fn history(&self, username: &str) -> Result<Option<Vec<GameRecord>>, StoreError> {
        if !self.username_exists(username).await? {
            return Ok(None);
        }

        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT h.game_kind, h.amount, h.played_at FROM game_history h
             JOIN accounts a ON a.id = h.account_id
             WHERE a.username = ?
             ORDER BY h.played_at DESC, h.id DESC",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (label, money_won, played_at_millis) in rows {
            let game_kind = GameKind::from_label(&label).ok_or(StoreError::UnknownGameKind(label))?;
            records.push(GameRecord {
                player: username.to_string(),
                game_kind,
                money_won,
                played_at_millis,
            });
        }

        Ok(Some(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::hash_password;

    #[tokio::test]
    async fn register_is_idempotent() {
        let store = AccountStore::open_in_memory().await.unwrap();
        let hash = hash_password("bar");

        assert!(store.register("foo", &hash).await.unwrap());
        assert!(!store.register("foo", &hash).await.unwrap());
        assert!(!store.register("foo", &hash_password("other")).await.unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE username = 'foo'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.balance("foo").await.unwrap(), Some(STARTING_BALANCE));
    }

    #[tokio::test]
    async fn login_checks_hash() {
        let store = AccountStore::open_in_memory().await.unwrap();
        store.register("foo", &hash_password("bar")).await.unwrap();

        assert_eq!(
            store.verify_login("foo", &hash_password("bar")).await.unwrap(),
            Some(STARTING_BALANCE)
        );
        assert_eq!(store.verify_login("foo", &hash_password("wrong")).await.unwrap(), None);
        assert_eq!(store.verify_login("nobody", &hash_password("bar")).await.unwrap(), None);
        assert!(store.username_exists("foo").await.unwrap());
        assert!(!store.username_exists("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn delete_requires_matching_hash() {
        let store = AccountStore::open_in_memory().await.unwrap();
        store.register("foo", &hash_password("bar")).await.unwrap();

        assert!(!store.delete_account("foo", &hash_password("wrong")).await.unwrap());
        assert!(store.username_exists("foo").await.unwrap());

        assert!(store.delete_account("foo", &hash_password("bar")).await.unwrap());
        assert!(!store.username_exists("foo").await.unwrap());
        assert!(!store.delete_account("foo", &hash_password("bar")).await.unwrap());
    }

    #[tokio::test]
    async fn save_game_moves_balance_and_records_history() {
        let store = AccountStore::open_in_memory().await.unwrap();
        store.register("foo", &hash_password("bar")).await.unwrap();

        let balance = store.save_game(1, "foo", GameKind::TexasHoldEm, 100, 1_000).await.unwrap();
        assert_eq!(balance, Some(600));
        let balance = store.save_game(2, "foo", GameKind::FiveCardDraw, -100, 2_000).await.unwrap();
        assert_eq!(balance, Some(500));

        let history = store.history("foo").await.unwrap().unwrap();
        assert_eq!(
            history,
            vec![
                GameRecord {
                    player: "foo".into(),
                    game_kind: GameKind::FiveCardDraw,
                    money_won: -100,
                    played_at_millis: 2_000,
                },
                GameRecord {
                    player: "foo".into(),
                    game_kind: GameKind::TexasHoldEm,
                    money_won: 100,
                    played_at_millis: 1_000,
                },
            ]
        );
    }

    #[tokio::test]
    async fn recorded_game_is_not_counted_again() {
        let store = AccountStore::open_in_memory().await.unwrap();
        store.register("foo", &hash_password("bar")).await.unwrap();

        assert_eq!(
            store.save_game(5, "foo", GameKind::TexasHoldEm, 100, 1_000).await.unwrap(),
            Some(600)
        );
        assert_eq!(
            store.save_game(5, "foo", GameKind::TexasHoldEm, 100, 1_000).await.unwrap(),
            Some(600)
        );
        assert_eq!(store.history("foo").await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_accounts() {
        let store = AccountStore::open_in_memory().await.unwrap();

        assert_eq!(store.save_game(1, "ghost", GameKind::TexasHoldEm, 5, 1).await.unwrap(), None);
        assert_eq!(store.balance("ghost").await.unwrap(), None);
        assert_eq!(store.history("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_account_removes_history() {
        let store = AccountStore::open_in_memory().await.unwrap();
        store.register("foo", &hash_password("bar")).await.unwrap();
        store.save_game(1, "foo", GameKind::TexasHoldEm, 10, 1).await.unwrap();
        store.delete_account("foo", &hash_password("bar")).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM game_history")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn open_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");

        let store = AccountStore::open(&path).await.unwrap();
        store.register("foo", &hash_password("bar")).await.unwrap();
        drop(store);

        let reopened = AccountStore::open(&path).await.unwrap();
        assert!(reopened.username_exists("foo").await.unwrap());
    }
}
