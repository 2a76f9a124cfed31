use crate::entry::model::Entry;
use async_trait::async_trait;
use thiserror::Error;

/// Failures talking to an entry store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entry store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt entry row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store of [`Entry`] records with linearizable single-key operations.
///
/// `consume_if_pending` must be one atomic conditional write on the backend.
/// Reading the entry and then writing it back breaks the one-time guarantee as
/// soon as two validators race on the same token.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Insert `entry` unless its token already exists. Returns true if inserted.
    async fn create_if_absent(&self, entry: &Entry) -> StoreResult<bool>;

    /// Look up an entry by token.
    async fn get(&self, token: &str) -> StoreResult<Option<Entry>>;

    /// Flip `PENDING -> CONSUMED` if the entry exists, is pending and has not
    /// expired at `now`. Returns true iff this call performed the transition.
    async fn consume_if_pending(&self, token: &str, now: i64) -> StoreResult<bool>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}
