// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cache configuration.
//!
//! These structs are plain data with serde derives behind the `serde`
//! feature; `tether-app-core` persists them through its config port.
use crate::naming::NamingConvention;

/// How incoming server data is reconciled with a cached entity of the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MergeStrategy {
    /// Overwrite only entities without pending changes.
    #[default]
    PreserveChanges,
    /// Always overwrite and mark Unchanged.
    OverwriteChanges,
    /// Keep the cached entity untouched.
    SkipMerge,
    /// Fail when an entity with the same key is already cached.
    Disallowed,
}

/// When validation runs automatically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct ValidationOptions {
    /// Validate entities when they are attached.
    pub validate_on_attach: bool,
    /// Validate pending changes when a save is prepared.
    pub validate_on_save: bool,
    /// Validate entities materialized by a query merge.
    pub validate_on_query: bool,
    /// Validate a property whenever it is written.
    pub validate_on_property_change: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            validate_on_attach: true,
            validate_on_save: true,
            validate_on_query: false,
            validate_on_property_change: true,
        }
    }
}

/// Options for an [`crate::EntityManager`].
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct CacheOptions {
    /// Default strategy for query merges.
    pub merge_strategy: MergeStrategy,
    /// Automatic validation switches.
    pub validation: ValidationOptions,
    /// Naming convention for anonymous projection fields.
    pub naming_convention: NamingConvention,
    /// Name of the results adapter resolved from the adapter registry.
    pub adapter_name: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            merge_strategy: MergeStrategy::default(),
            validation: ValidationOptions::default(),
            naming_convention: NamingConvention::default(),
            adapter_name: "json".to_owned(),
        }
    }
}

/// Per-merge options.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct MergeOptions {
    /// Reconciliation strategy.
    pub merge_strategy: MergeStrategy,
    /// Return locally deleted entities instead of dropping them from results.
    pub include_deleted: bool,
    /// Materialize typed records without tracking them.
    pub no_tracking: bool,
    /// Entity type assumed for top-level nodes without a type annotation.
    pub result_type: Option<String>,
}

impl MergeOptions {
    /// Options using `strategy` and defaults otherwise.
    #[must_use]
    pub fn with_strategy(strategy: MergeStrategy) -> Self {
        Self {
            merge_strategy: strategy,
            ..Self::default()
        }
    }

    /// Sets the assumed top-level result type.
    pub fn result_type(mut self, type_name: impl Into<String>) -> Self {
        self.result_type = Some(type_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_defaults() {
        let v = ValidationOptions::default();
        assert!(v.validate_on_attach && v.validate_on_save && v.validate_on_property_change);
        assert!(!v.validate_on_query);
    }

    #[test]
    fn cache_defaults_use_json_adapter() {
        let o = CacheOptions::default();
        assert_eq!(o.adapter_name, "json");
        assert_eq!(o.merge_strategy, MergeStrategy::PreserveChanges);
    }
}
