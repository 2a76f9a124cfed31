pub mod memory;
pub mod model;
pub mod resolver;
pub mod sqlite;
pub mod store;

// Re-export public types and functions
pub use memory::MemoryEntryStore;
pub use model::{Entry, EntryState, now_unix};
pub use resolver::{EntryStoreConfig, EntryStoreResolver};
pub use sqlite::SqliteEntryStore;
pub use store::{EntryStore, StoreError, StoreResult};
