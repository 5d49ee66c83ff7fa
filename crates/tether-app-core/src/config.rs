// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted [`CacheOptions`] behind a blob storage port.
//!
//! Options live under one key as camelCase JSON. Fields missing from the
//! stored document take their defaults, so older documents keep loading.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use tether_core::{AdapterRegistry, CacheError, CacheOptions, EntityManager, Schema};

/// Store key holding the cache options document.
pub const CACHE_OPTIONS_KEY: &str = "cache-options";

/// Storage port for raw option documents, keyed by logical name.
pub trait ConfigStore {
    /// Raw document under `key`, or `None` when nothing is stored.
    fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError>;
    /// Replaces the document under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
    /// Deletes the document under `key`; returns whether one existed.
    fn remove_raw(&self, key: &str) -> Result<bool, ConfigError>;
}

/// Errors from loading, saving or applying cache options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(String),
    /// I/O error while reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The stored document under `key` is not valid options JSON.
    #[error("malformed options document '{key}': {source}")]
    Malformed {
        /// Store key of the document.
        key: String,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
    /// Options could not be serialized.
    #[error("cannot encode options: {0}")]
    Encode(#[from] serde_json::Error),
    /// The options were rejected by the cache (unknown adapter name, ...).
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Typed load/save of [`CacheOptions`] over a [`ConfigStore`].
#[derive(Debug)]
pub struct CacheOptionsService<S> {
    store: S,
    key: String,
}

impl<S> CacheOptionsService<S> {
    /// Service storing options under [`CACHE_OPTIONS_KEY`].
    pub fn new(store: S) -> Self {
        Self {
            store,
            key: CACHE_OPTIONS_KEY.to_owned(),
        }
    }

    /// Stores options under `key` instead, e.g. one document per cache.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Store key in use.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Borrow the inner store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S: ConfigStore> CacheOptionsService<S> {
    /// Stored options, or defaults when nothing (or an empty document) is
    /// stored.
    pub fn load(&self) -> Result<CacheOptions, ConfigError> {
        match self.store.load_raw(&self.key)? {
            Some(bytes) if !bytes.is_empty() => {
                serde_json::from_slice(&bytes).map_err(|source| {
                    warn!(key = %self.key, %source, "stored cache options do not parse");
                    ConfigError::Malformed {
                        key: self.key.clone(),
                        source,
                    }
                })
            }
            _ => {
                debug!(key = %self.key, "no stored cache options; using defaults");
                Ok(CacheOptions::default())
            }
        }
    }

    /// Persists `options` as pretty-printed JSON.
    pub fn save(&self, options: &CacheOptions) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(options)?;
        self.store.save_raw(&self.key, &data)?;
        debug!(key = %self.key, bytes = data.len(), "saved cache options");
        Ok(())
    }

    /// Loads, edits and saves the options in one step; returns what was
    /// saved.
    pub fn update(&self, edit: impl FnOnce(&mut CacheOptions)) -> Result<CacheOptions, ConfigError> {
        let mut options = self.load()?;
        edit(&mut options);
        self.save(&options)?;
        Ok(options)
    }

    /// Forgets the stored options so the next load yields defaults.
    pub fn reset(&self) -> Result<bool, ConfigError> {
        self.store.remove_raw(&self.key)
    }

    /// Opens a cache over `schema` with the stored options and the
    /// built-in adapters.
    pub fn open(&self, schema: Arc<Schema>) -> Result<EntityManager, ConfigError> {
        self.open_with(schema, &AdapterRegistry::with_defaults())
    }

    /// Opens a cache over `schema` with the stored options, resolving the
    /// results adapter from `registry`.
    pub fn open_with(
        &self,
        schema: Arc<Schema>,
        registry: &AdapterRegistry,
    ) -> Result<EntityManager, ConfigError> {
        let options = self.load()?;
        Ok(EntityManager::with_registry(schema, options, registry)?)
    }
}
