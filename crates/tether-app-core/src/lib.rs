// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for tether caches.
//! Keeps storage adapters thin: the core crate never touches disk.

pub mod config;

pub use config::{CacheOptionsService, ConfigError, ConfigStore, CACHE_OPTIONS_KEY};
