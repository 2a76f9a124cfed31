use crate::entry::model::{Entry, EntryState};
use crate::entry::store::{EntryStore, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;

/// Process-local entry store.
///
/// Every operation runs under a single lock acquisition, so the check and the
/// write of `consume_if_pending` cannot interleave with another caller.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn create_if_absent(&self, entry: &Entry) -> StoreResult<bool> {
        match self.entries.lock().entry(entry.token.clone()) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(slot) => {
                slot.insert(entry.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, token: &str) -> StoreResult<Option<Entry>> {
        Ok(self.entries.lock().get(token).cloned())
    }

    async fn consume_if_pending(&self, token: &str, now: i64) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        match entries.get_mut(token) {
            Some(entry) if entry.is_redeemable(now) => {
                entry.state = EntryState::Consumed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
