use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{sidecar_key, ConfigStore, ImportConfigRecord};

/// Memoizes sidecar records per asset path so re-selecting a file or running the
/// reimport-conflict check does not reparse the same document.
///
/// Shared between the session thread and the batch-scan worker; the entry map sits
/// behind its own mutex and the store is only consulted outside of it. Lifetime is
/// bounded to one panel-visible session, so there is no eviction beyond
/// `invalidate`/`clear`.
pub struct ConfigCache {
    store: Arc<dyn ConfigStore>,
    entries: Mutex<HashMap<String, ImportConfigRecord>>,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store, entries: Mutex::new(HashMap::new()) }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Returns the record for `path`, loading it on a miss. A failed load means a
    /// missing or malformed sidecar; callers treat that as "skip this path". Failures
    /// are not cached, so a sidecar written later is picked up on the next call.
    pub fn get(&self, path: &str) -> Option<ImportConfigRecord> {
        let key = sidecar_key(path);
        if let Ok(entries) = self.entries.lock() {
            if let Some(record) = entries.get(&key) {
                return Some(record.clone());
            }
        }
        match self.store.load(&key) {
            Ok(record) => {
                if let Ok(mut entries) = self.entries.lock() {
                    entries.insert(key, record.clone());
                }
                Some(record)
            }
            Err(_) => None,
        }
    }

    /// Refresh the entry for `path` after a successful write-back.
    pub fn put(&self, path: &str, record: ImportConfigRecord) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(sidecar_key(path), record);
        }
    }

    pub fn invalidate(&self, path: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&sidecar_key(path));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        loads: AtomicUsize,
        records: HashMap<String, ImportConfigRecord>,
    }

    impl CountingStore {
        fn with_record(path: &str, record: ImportConfigRecord) -> Self {
            let mut records = HashMap::new();
            records.insert(sidecar_key(path), record);
            Self { loads: AtomicUsize::new(0), records }
        }
    }

    impl ConfigStore for CountingStore {
        fn load(&self, key: &str) -> Result<ImportConfigRecord> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.records.get(key).cloned().ok_or_else(|| anyhow!("no record for '{key}'"))
        }

        fn save(&self, _key: &str, _record: &ImportConfigRecord) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn second_get_is_a_cache_hit() {
        let store = Arc::new(CountingStore::with_record("a.png", ImportConfigRecord::new("texture")));
        let cache = ConfigCache::new(store.clone());
        assert!(cache.get("a.png").is_some());
        assert!(cache.get("a.png").is_some());
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_forces_a_reload() {
        let store = Arc::new(CountingStore::with_record("a.png", ImportConfigRecord::new("texture")));
        let cache = ConfigCache::new(store.clone());
        assert!(cache.get("a.png").is_some());
        cache.invalidate("a.png");
        assert!(cache.get("a.png").is_some());
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let store = Arc::new(CountingStore::with_record("a.png", ImportConfigRecord::new("texture")));
        let cache = ConfigCache::new(store.clone());
        assert!(cache.get("missing.png").is_none());
        assert!(cache.get("missing.png").is_none());
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }
}
