// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for tether crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`logging`] - Idempotent tracing subscriber for test output
//! - [`northwind`] - Northwind-style schema and seeded caches
//! - [`recorder`] - Captures every notification a cache publishes

pub mod config;
pub mod logging;
pub mod northwind;
pub mod recorder;

// Re-export commonly used items at crate root for convenience
pub use config::InMemoryConfigStore;
pub use logging::init_tracing;
pub use northwind::{northwind_manager, northwind_schema};
pub use recorder::{EventRecorder, Recorded};
