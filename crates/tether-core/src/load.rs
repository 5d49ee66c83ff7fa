// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! On-demand navigation loading.
//!
//! The cache never queries anything itself. It describes what it needs as a
//! [`LoadRequest`] and hands it to a caller-supplied [`RelatedEntityLoader`];
//! the payload that comes back is merged like any query result.
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::CacheError;
use crate::ident::EntityRef;
use crate::manager::EntityManager;
use crate::merge::MergedValue;
use crate::options::{MergeOptions, MergeStrategy};
use crate::record::NavigationSlot;
use crate::value::DataValue;

/// Entities to fetch for one navigation: every `entity_type` whose
/// `predicate` properties equal the given values.
#[derive(Clone, PartialEq, Debug)]
pub struct LoadRequest {
    /// Entity whose navigation is being loaded.
    pub owner: EntityRef,
    /// Navigation property name on the owner.
    pub navigation: String,
    /// Entity type to fetch.
    pub entity_type: String,
    /// Property name and required value pairs, all of which must match.
    pub predicate: Vec<(String, DataValue)>,
}

/// Executes load requests against a data source.
pub trait RelatedEntityLoader {
    /// Fetches the entities described by `request` as a raw payload.
    fn load(&mut self, request: &LoadRequest) -> Result<Value, CacheError>;
}

impl EntityManager {
    /// Builds the request that would load navigation `name` of `e`, or
    /// `None` when the foreign key is empty and nothing can be related.
    pub fn load_request(&self, e: EntityRef, name: &str) -> Result<Option<LoadRequest>, CacheError> {
        let nav = self.navigation_index(e, name)?;
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(e)?.entity_type);
        let np = &et.navigation_properties[nav];
        let target = schema.entity_type(np.target);

        let (names, values): (Vec<&str>, Vec<DataValue>) = if np.foreign_keys.is_empty() {
            // Keys live on the related side and mirror `e`'s key.
            let fks = match np.inverse {
                Some(inv) => &target.navigation_properties[inv].foreign_keys,
                None => &np.inv_foreign_keys,
            };
            if fks.is_empty() {
                return Err(CacheError::operation(format!(
                    "'{}.{}' has no foreign keys to load by",
                    et.name, np.name
                )));
            }
            let names = fks
                .iter()
                .map(|ix| target.data_properties[*ix].name.as_str())
                .collect();
            (names, self.key_values(e, &et.key_properties)?)
        } else {
            // Keys live on `e`: fetch the parent by its key.
            let names = target
                .key_properties
                .iter()
                .map(|ix| target.data_properties[*ix].name.as_str())
                .collect();
            (names, self.key_values(e, &np.foreign_keys)?)
        };
        if values.iter().any(DataValue::is_empty_key_part) {
            return Ok(None);
        }
        Ok(Some(LoadRequest {
            owner: e,
            navigation: np.name.clone(),
            entity_type: target.name.clone(),
            predicate: names.into_iter().map(str::to_owned).zip(values).collect(),
        }))
    }

    /// Loads navigation `name` of `e` through `loader`, merges the result
    /// preserving local changes, and marks the navigation loaded. Returns
    /// the entities the loader produced.
    pub fn load_navigation(
        &mut self,
        e: EntityRef,
        name: &str,
        loader: &mut dyn RelatedEntityLoader,
    ) -> Result<Vec<EntityRef>, CacheError> {
        self.check_entity(e)?;
        if !self.is_attached(e) {
            return Err(CacheError::operation(format!(
                "cannot load '{name}' of {e:?}: it is not attached"
            )));
        }
        let nav = self.navigation_index(e, name)?;
        let loaded = match self.load_request(e, name)? {
            Some(request) => {
                let payload = loader.load(&request)?;
                let options = MergeOptions::with_strategy(MergeStrategy::PreserveChanges)
                    .result_type(request.entity_type.clone());
                let merged = self.merge_query_result(&payload, &options)?;
                debug!(entity = ?e, navigation = name, count = merged.len(), "loaded navigation");
                merged.iter().filter_map(MergedValue::as_entity).collect()
            }
            None => Vec::new(),
        };
        self.entity_mut(e)?.aspect.loaded_navigations.insert(nav);
        if let NavigationSlot::Collection(coll) = self.nav_slot_mut(e, nav)? {
            coll.is_loaded = true;
        }
        Ok(loaded)
    }
}
