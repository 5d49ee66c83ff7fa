// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity map for one entity type.
//!
//! Invariants
//! - Every key string in `index_map` points at an occupied slot.
//! - An entity is in at most one slot; the slot is recorded on its aspect.
//! - Freed slots are recycled before the slot vector grows.
use rustc_hash::FxHashMap;

use crate::aspect::EntityAspect;
use crate::error::CacheError;
use crate::ident::{EntityRef, EntityTypeId};
use crate::key::EntityKey;
use crate::state::EntityState;
use crate::value::DataValue;

/// Outcome of [`Group::attach`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum AttachOutcome {
    /// The entity was already in this group under the key; its state was
    /// overwritten.
    Reattached,
    /// The entity took a slot.
    Inserted,
}

/// Per-type identity map: key string → slot → entity handle.
#[derive(Clone, Debug)]
pub struct Group {
    entity_type: EntityTypeId,
    slots: Vec<Option<EntityRef>>,
    index_map: FxHashMap<String, usize>,
    empty_slots: Vec<usize>,
}

impl Group {
    pub(crate) fn new(entity_type: EntityTypeId) -> Self {
        Self {
            entity_type,
            slots: Vec::new(),
            index_map: FxHashMap::default(),
            empty_slots: Vec::new(),
        }
    }

    /// Entity type held by this group.
    #[must_use]
    pub fn entity_type(&self) -> EntityTypeId {
        self.entity_type
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index_map.len()
    }

    /// True when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index_map.is_empty()
    }

    /// Tracked entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = EntityRef> + '_ {
        self.slots.iter().filter_map(|s| *s)
    }

    /// Looks up an entity by key string.
    #[must_use]
    pub fn find_by_key_string(&self, key_string: &str) -> Option<EntityRef> {
        self.index_map
            .get(key_string)
            .and_then(|ix| self.slots.get(*ix).copied().flatten())
    }

    /// Looks up an entity by key.
    #[must_use]
    pub fn find_by_key(&self, key: &EntityKey) -> Option<EntityRef> {
        self.find_by_key_string(key.key_string())
    }

    /// Tracked entities, optionally filtered by state.
    pub(crate) fn entities(
        &self,
        states: Option<&[EntityState]>,
        state_of: impl Fn(EntityRef) -> EntityState,
    ) -> Vec<EntityRef> {
        self.iter()
            .filter(|e| states.is_none_or(|wanted| wanted.contains(&state_of(*e))))
            .collect()
    }

    /// True when any tracked entity needs saving.
    pub(crate) fn has_pending_changes(&self, state_of: impl Fn(EntityRef) -> EntityState) -> bool {
        self.iter().any(|e| state_of(e).needs_save())
    }

    /// Takes a slot for `entity` under `key` and stamps the aspect.
    ///
    /// Re-attaching the same entity under its key only overwrites the state.
    /// A different entity under the same key is an error.
    pub(crate) fn attach(
        &mut self,
        entity: EntityRef,
        key: &EntityKey,
        aspect: &mut EntityAspect,
        state: EntityState,
    ) -> Result<AttachOutcome, CacheError> {
        if let Some(&ix) = self.index_map.get(key.key_string()) {
            if self.slots[ix] == Some(entity) {
                aspect.state = state;
                aspect.slot = Some(ix);
                return Ok(AttachOutcome::Reattached);
            }
            return Err(CacheError::operation(format!(
                "an entity with key {key} is already attached"
            )));
        }
        let ix = match self.empty_slots.pop() {
            Some(ix) => {
                self.slots[ix] = Some(entity);
                ix
            }
            None => {
                self.slots.push(Some(entity));
                self.slots.len() - 1
            }
        };
        self.index_map.insert(key.key_string().to_owned(), ix);
        aspect.slot = Some(ix);
        aspect.state = state;
        aspect.key = Some(key.clone());
        Ok(AttachOutcome::Inserted)
    }

    /// Frees the slot held under `key` and marks the aspect detached.
    pub(crate) fn detach(
        &mut self,
        key: &EntityKey,
        aspect: &mut EntityAspect,
    ) -> Result<usize, CacheError> {
        let ix = self.index_map.remove(key.key_string()).ok_or_else(|| {
            CacheError::consistency(format!("entity {key} is not in its group"))
        })?;
        self.slots[ix] = None;
        self.empty_slots.push(ix);
        aspect.slot = None;
        aspect.state = EntityState::Detached;
        Ok(ix)
    }

    /// Moves the index entry for `old` to `new`; the entity keeps its slot.
    pub(crate) fn rewrite_key(&mut self, old: &str, new: &str) -> Result<(), CacheError> {
        if old == new {
            return Ok(());
        }
        if let Some(existing) = self.find_by_key_string(new) {
            return Err(CacheError::operation(format!(
                "key '{new}' is already used by {existing:?}"
            )));
        }
        let ix = self
            .index_map
            .remove(old)
            .ok_or_else(|| CacheError::consistency(format!("key '{old}' is not in its group")))?;
        self.index_map.insert(new.to_owned(), ix);
        Ok(())
    }

    /// Replaces a temporary single-part key with its permanent value.
    pub(crate) fn fixup_temporary_key(
        &mut self,
        temp: &DataValue,
        real: &DataValue,
    ) -> Result<(), CacheError> {
        let old = EntityKey::key_string_of(std::slice::from_ref(temp));
        let new = EntityKey::key_string_of(std::slice::from_ref(real));
        self.rewrite_key(&old, &new)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.index_map.clear();
        self.empty_slots.clear();
    }
}
