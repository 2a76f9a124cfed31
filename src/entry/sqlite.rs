use crate::entry::model::{Entry, EntryState};
use crate::entry::store::{EntryStore, StoreError, StoreResult};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS entries (
    token      TEXT PRIMARY KEY NOT NULL,
    state      TEXT NOT NULL CHECK (state IN ('PENDING', 'CONSUMED')),
    created_at INTEGER NOT NULL,
    expires_at INTEGER
)";

const INSERT_IF_ABSENT: &str = "INSERT INTO entries (token, state, created_at, expires_at)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(token) DO NOTHING";

const SELECT_ENTRY: &str =
    "SELECT token, state, created_at, expires_at FROM entries WHERE token = ?1";

const CONSUME_IF_PENDING: &str = "UPDATE entries SET state = 'CONSUMED'
    WHERE token = ?1
      AND state = 'PENDING'
      AND (expires_at IS NULL OR expires_at > ?2)";

/// Durable entry store on a local SQLite database.
///
/// Consumption is one conditional `UPDATE`; the row count tells whether this
/// caller flipped the state.
#[derive(Debug, Clone)]
pub struct SqliteEntryStore {
    pool: Pool<Sqlite>,
}

impl SqliteEntryStore {
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::Unavailable(format!("create {}: {error}", parent.display()))
            })?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // One connection: concurrent writers on separate WAL connections can fail
        // with SQLITE_BUSY_SNAPSHOT instead of waiting.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        info!(path = %path.display(), "Opened sqlite entry store");
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    async fn create_if_absent(&self, entry: &Entry) -> StoreResult<bool> {
        let result = sqlx::query(INSERT_IF_ABSENT)
            .bind(entry.token.as_str())
            .bind(entry.state.as_str())
            .bind(entry.created_at)
            .bind(entry.expires_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, token: &str) -> StoreResult<Option<Entry>> {
        let row = sqlx::query_as::<_, (String, String, i64, Option<i64>)>(SELECT_ENTRY)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some((token, state, created_at, expires_at)) = row else {
            return Ok(None);
        };

        let state = state.parse::<EntryState>().map_err(StoreError::Corrupt)?;
        Ok(Some(Entry {
            token,
            state,
            created_at,
            expires_at,
        }))
    }

    async fn consume_if_pending(&self, token: &str, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(CONSUME_IF_PENDING)
            .bind(token)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
