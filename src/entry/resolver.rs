use crate::entry::memory::MemoryEntryStore;
use crate::entry::sqlite::SqliteEntryStore;
use crate::entry::store::{EntryStore, StoreError, StoreResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Where the entry store lives
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EntryStoreConfig {
    Memory,
    Sqlite { path: PathBuf },
}

impl EntryStoreConfig {
    pub async fn open(&self) -> StoreResult<Arc<dyn EntryStore>> {
        match self {
            EntryStoreConfig::Memory => Ok(Arc::new(MemoryEntryStore::new())),
            EntryStoreConfig::Sqlite { path } => Ok(Arc::new(SqliteEntryStore::open(path).await?)),
        }
    }
}

/// Lazily opened, process-wide handle to the entry store.
///
/// The first caller opens the backend and every later caller reuses it. A
/// failed open leaves the cell empty, so the next caller tries again.
#[derive(Clone)]
pub struct EntryStoreResolver {
    config: Option<EntryStoreConfig>,
    cell: Arc<OnceCell<Arc<dyn EntryStore>>>,
}

impl EntryStoreResolver {
    pub fn new(config: EntryStoreConfig) -> Self {
        Self {
            config: Some(config),
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Resolver around an already opened store
    pub fn ready(store: Arc<dyn EntryStore>) -> Self {
        Self {
            config: None,
            cell: Arc::new(OnceCell::new_with(Some(store))),
        }
    }

    pub async fn resolve(&self) -> StoreResult<Arc<dyn EntryStore>> {
        let store = self
            .cell
            .get_or_try_init(|| async {
                let Some(config) = &self.config else {
                    return Err(StoreError::Unavailable("no entry store configured".into()));
                };

                config
                    .open()
                    .await
                    .inspect(|store| info!(backend = store.backend(), "Entry store resolved"))
                    .inspect_err(|error| warn!(?error, "Failed to resolve entry store"))
            })
            .await?;

        Ok(store.clone())
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }
}
