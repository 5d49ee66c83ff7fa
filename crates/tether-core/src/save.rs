// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Save support: collecting change sets, replacing temporary keys with the
//! keys a server assigned, and folding the server's answer back in.
//!
//! Transport is the caller's business. A save round trip is
//! 1. [`EntityManager::prepare_save`] to collect (and validate) changes,
//! 2. ship them, then
//! 3. [`EntityManager::apply_save_result`] with what came back.
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::CacheError;
use crate::ident::{EntityRef, StructuralRef};
use crate::key::EntityKey;
use crate::manager::EntityManager;
use crate::merge::{MergeContext, MergeMode, MergedValue};
use crate::options::{MergeOptions, MergeStrategy};
use crate::value::DataValue;

/// A temporary key value and the permanent value that replaces it.
#[derive(Clone, PartialEq, Debug)]
pub struct KeyMapping {
    /// Entity type name.
    pub entity_type: String,
    /// Key value generated locally.
    pub temp_value: DataValue,
    /// Key value assigned by the server.
    pub real_value: DataValue,
}

/// What a server returned for a save.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SaveResult {
    /// Temporary keys to replace, applied before anything else.
    pub key_mappings: Vec<KeyMapping>,
    /// Saved entities as a raw payload, merged with overwrite semantics.
    pub entities: Value,
    /// Keys the server reports as deleted.
    pub deleted_keys: Vec<EntityKey>,
}

/// Entities to send in a save.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SaveBundle {
    /// Every entity with pending changes.
    pub entities: Vec<EntityRef>,
    /// Entities that failed validation; a caller normally aborts when this
    /// is non-empty.
    pub invalid: Vec<EntityRef>,
}

impl EntityManager {
    /// Collects pending changes, optionally restricted to `types`, and
    /// validates them when `validate_on_save` is set. Deleted entities are
    /// not validated.
    pub fn prepare_save(&mut self, types: Option<&[&str]>) -> Result<SaveBundle, CacheError> {
        let entities = self.get_changes(types)?;
        let mut invalid = Vec::new();
        if self.options.validation.validate_on_save {
            for e in &entities {
                if !self.state_of(*e).is_deleted() && !self.validate_entity(*e)? {
                    invalid.push(*e);
                }
            }
        }
        Ok(SaveBundle { entities, invalid })
    }

    /// Replaces temporary keys with real ones. Dependents' foreign keys
    /// follow. Returns the entities whose key changed; mappings for keys no
    /// longer cached are skipped.
    pub fn fixup_temporary_keys(&mut self, mappings: &[KeyMapping]) -> Result<Vec<EntityRef>, CacheError> {
        let schema = Arc::clone(&self.schema);
        let mut fixed = Vec::with_capacity(mappings.len());
        for m in mappings {
            let et = schema.entity_type_by_name(&m.entity_type)?;
            let [kp] = et.key_properties[..] else {
                return Err(CacheError::argument(format!(
                    "'{}' has a multi-part key and cannot carry a temporary key",
                    et.name
                )));
            };
            let temp_key = EntityKey::new(et, vec![m.temp_value.clone()])?;
            let Some(e) = self.find_by_key(&temp_key) else {
                trace!(%temp_key, "no cached entity for temporary key");
                continue;
            };
            let real = m.real_value.clone();
            self.with_key_fixup(|this| this.write_data(StructuralRef::Entity(e), kp, real))?;
            self.entity_mut(e)?.aspect.has_temp_key = false;
            debug!(entity = ?e, temp = %m.temp_value, real = %m.real_value, "fixed up temporary key");
            fixed.push(e);
        }
        Ok(fixed)
    }

    /// Folds a save result back into the cache.
    ///
    /// Keys are fixed up first. Returned entities are merged with overwrite
    /// semantics; deleted ones (flagged by the adapter, listed in
    /// `deleted_keys`, or deleted locally) are detached. Every other entity
    /// in `saved` has its changes accepted and its server errors cleared.
    pub fn apply_save_result(
        &mut self,
        saved: &[EntityRef],
        result: SaveResult,
    ) -> Result<Vec<MergedValue>, CacheError> {
        self.fixup_temporary_keys(&result.key_mappings)?;
        let options = MergeOptions {
            include_deleted: true,
            ..MergeOptions::with_strategy(MergeStrategy::OverwriteChanges)
        };
        let merged = self.merge_payload(&result.entities, MergeContext::new(options, MergeMode::Save))?;

        for key in &result.deleted_keys {
            if let Some(e) = self.find_by_key(key) {
                self.detach_entity(e)?;
            }
        }
        for e in saved {
            if !self.is_attached(*e) {
                continue;
            }
            if self.state_of(*e).is_deleted() {
                self.detach_entity(*e)?;
                continue;
            }
            self.clear_server_errors(*e)?;
            if self.state_of(*e).needs_save() {
                self.accept_changes(*e)?;
            }
        }
        debug!(saved = saved.len(), returned = merged.len(), "applied save result");
        Ok(merged)
    }
}
