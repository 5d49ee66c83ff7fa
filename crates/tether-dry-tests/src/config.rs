// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tether_app_core::config::{ConfigError, ConfigStore};

/// In-memory [`ConfigStore`] with call counters and failure injection.
///
/// Clones share state, so a test can hand one clone to a
/// `ConfigService` and inspect the other.
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    blobs: BTreeMap<String, Vec<u8>>,
    loads: usize,
    saves: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes every subsequent `load_raw` fail with [`ConfigError::Store`].
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Makes every subsequent `save_raw` fail with [`ConfigError::Store`].
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().loads
    }

    /// Number of `save_raw` attempts, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// True when `key` holds a blob.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().blobs.contains_key(key)
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        let mut inner = self.lock();
        inner.loads += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Store("simulated load failure".into()));
        }
        Ok(inner.blobs.get(key).cloned())
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.saves += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Store("simulated save failure".into()));
        }
        inner.blobs.insert(key.to_owned(), data.to_vec());
        Ok(())
    }

    fn remove_raw(&self, key: &str) -> Result<bool, ConfigError> {
        let mut inner = self.lock();
        if inner.fail_on_save {
            return Err(ConfigError::Store("simulated remove failure".into()));
        }
        Ok(inner.blobs.remove(key).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_loads_nothing() {
        let store = InMemoryConfigStore::new();
        assert!(store.load_raw("missing").unwrap().is_none());
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn clones_share_blobs_and_counters() {
        let a = InMemoryConfigStore::new();
        let b = a.clone();
        a.save_raw("k", b"v").unwrap();
        assert_eq!(b.load_raw("k").unwrap().as_deref(), Some(&b"v"[..]));
        assert_eq!(b.save_count(), 1);
        assert_eq!(a.load_count(), 1);
        assert_eq!(b.keys(), vec!["k".to_owned()]);
    }

    #[test]
    fn failed_saves_count_but_store_nothing() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(matches!(store.save_raw("k", b"v"), Err(ConfigError::Store(_))));
        assert_eq!(store.save_count(), 1);
        assert!(!store.contains_key("k"));
    }
}
