// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Collection mutation: navigation collections, nested value collections and
//! primitive collections.
//!
//! Navigation collection invariants
//! - An entity appears at most once in a collection.
//! - Adding a child points the child's inverse at the owner (or copies the
//!   owner's key into the child's foreign keys for unidirectional
//!   associations); removing it clears that pointer.
//! - Many-to-many collections stay symmetric, and only the side the caller
//!   mutated records the link for save.
use std::sync::Arc;

use crate::aspect::{ComplexParent, Link};
use crate::collection::{CollectionChangedArgs, CollectionId, CollectionItem};
use crate::error::CacheError;
use crate::ident::{ComplexRef, EntityRef, PropertyRef, StructuralRef};
use crate::interceptor::coerce_value;
use crate::manager::EntityManager;
use crate::record::{NavigationSlot, PropertySlot};
use crate::state::EntityState;
use crate::value::DataValue;

fn clamp_range(len: usize, start: usize, delete_count: usize) -> (usize, usize) {
    let start = start.min(len);
    let end = start.saturating_add(delete_count).min(len);
    (start, end)
}

impl EntityManager {
    fn collection_nav(&self, owner: EntityRef, name: &str) -> Result<usize, CacheError> {
        let nav = self.navigation_index(owner, name)?;
        self.relation(owner, nav).map_err(|_| {
            CacheError::argument(format!("'{name}' is not a collection navigation"))
        })?;
        Ok(nav)
    }

    /// Appends `items` to a collection navigation; returns the new length.
    pub fn push(
        &mut self,
        owner: EntityRef,
        name: &str,
        items: &[EntityRef],
    ) -> Result<usize, CacheError> {
        let nav = self.collection_nav(owner, name)?;
        self.push_core(owner, nav, items, true)
    }

    /// Inserts `items` at the front of a collection navigation.
    pub fn unshift(
        &mut self,
        owner: EntityRef,
        name: &str,
        items: &[EntityRef],
    ) -> Result<usize, CacheError> {
        let nav = self.collection_nav(owner, name)?;
        self.splice_relation(owner, nav, 0, 0, items, true)?;
        Ok(self.relation(owner, nav)?.len())
    }

    /// Removes `delete_count` members starting at `start` and inserts
    /// `items` there; returns the removed members.
    pub fn splice(
        &mut self,
        owner: EntityRef,
        name: &str,
        start: usize,
        delete_count: usize,
        items: &[EntityRef],
    ) -> Result<Vec<EntityRef>, CacheError> {
        let nav = self.collection_nav(owner, name)?;
        self.splice_relation(owner, nav, start, delete_count, items, true)
    }

    /// Removes and returns the first member.
    pub fn shift(&mut self, owner: EntityRef, name: &str) -> Result<Option<EntityRef>, CacheError> {
        let nav = self.collection_nav(owner, name)?;
        Ok(self.splice_relation(owner, nav, 0, 1, &[], true)?.pop())
    }

    /// Removes and returns the last member.
    pub fn pop(&mut self, owner: EntityRef, name: &str) -> Result<Option<EntityRef>, CacheError> {
        let nav = self.collection_nav(owner, name)?;
        let len = self.relation(owner, nav)?.len();
        if len == 0 {
            return Ok(None);
        }
        Ok(self.splice_relation(owner, nav, len - 1, 1, &[], true)?.pop())
    }

    /// Removes `item` if present.
    pub fn remove_item(
        &mut self,
        owner: EntityRef,
        name: &str,
        item: EntityRef,
    ) -> Result<bool, CacheError> {
        let nav = self.collection_nav(owner, name)?;
        let Some(ix) = self.relation(owner, nav)?.items.iter().position(|e| *e == item) else {
            return Ok(false);
        };
        Ok(!self.splice_relation(owner, nav, ix, 1, &[], true)?.is_empty())
    }

    /// Appends `items`; returns the collection length afterwards.
    pub(crate) fn push_core(
        &mut self,
        owner: EntityRef,
        nav: usize,
        items: &[EntityRef],
        record_links: bool,
    ) -> Result<usize, CacheError> {
        let len = self.relation(owner, nav)?.len();
        self.splice_relation(owner, nav, len, 0, items, record_links)?;
        Ok(self.relation(owner, nav)?.len())
    }

    fn splice_relation(
        &mut self,
        owner: EntityRef,
        nav: usize,
        start: usize,
        delete_count: usize,
        items: &[EntityRef],
        record_links: bool,
    ) -> Result<Vec<EntityRef>, CacheError> {
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(owner)?.entity_type);
        let np = &et.navigation_properties[nav];
        for item in items {
            let item_type = self.entity(*item)?.entity_type;
            if item_type != np.target {
                return Err(CacheError::argument(format!(
                    "'{}' holds '{}' entities, not '{}'",
                    np.name,
                    schema.entity_type(np.target).name,
                    schema.entity_type(item_type).name
                )));
            }
        }

        let coll = self.relation(owner, nav)?;
        if coll.in_progress {
            return Ok(Vec::new());
        }
        let mut adds: Vec<EntityRef> = Vec::with_capacity(items.len());
        for item in items {
            if !coll.contains(*item) && !coll.adds_in_process.contains(item) && !adds.contains(item)
            {
                adds.push(*item);
            }
        }
        let (start, end) = clamp_range(coll.len(), start, delete_count);
        if adds.is_empty() && start == end {
            return Ok(Vec::new());
        }

        if !self.is_loading && self.is_attached(owner) {
            let detached: Vec<EntityRef> =
                adds.iter().copied().filter(|a| !self.is_attached(*a)).collect();
            if !detached.is_empty() {
                self.relation_mut(owner, nav)?.in_progress = true;
                let attached = detached
                    .into_iter()
                    .try_for_each(|a| self.attach_entity(a, EntityState::Added).map(|_| ()));
                self.relation_mut(owner, nav)?.in_progress = false;
                attached?;
            }
        }

        let removed: Vec<EntityRef> = {
            let coll = self.relation_mut(owner, nav)?;
            let removed = coll.items.splice(start..end, adds.iter().copied()).collect();
            removed
        };

        self.process_adds(owner, nav, &adds, record_links)?;
        self.process_removes(owner, nav, &removed, record_links)?;

        self.publish_collection_changed(CollectionChangedArgs {
            collection: CollectionId {
                owner: StructuralRef::Entity(owner),
                property: PropertyRef::Navigation(nav),
            },
            property_name: np.name.clone(),
            added: adds.into_iter().map(CollectionItem::Entity).collect(),
            removed: removed.iter().copied().map(CollectionItem::Entity).collect(),
        });
        Ok(removed)
    }

    fn process_adds(
        &mut self,
        owner: EntityRef,
        nav: usize,
        adds: &[EntityRef],
        record_links: bool,
    ) -> Result<(), CacheError> {
        if adds.is_empty() {
            return Ok(());
        }
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(owner)?.entity_type);
        let np = &et.navigation_properties[nav];
        let in_process_start = self.relation(owner, nav)?.adds_in_process.len();
        self.relation_mut(owner, nav)?.adds_in_process.extend_from_slice(adds);
        let out = (|| -> Result<(), CacheError> {
            for child in adds {
                match np.inverse {
                    Some(inv) => {
                        let inverse_is_scalar =
                            schema.entity_type(np.target).navigation_properties[inv].is_scalar;
                        if inverse_is_scalar {
                            self.write_navigation(*child, inv, Some(owner))?;
                        } else {
                            self.push_core(*child, inv, &[owner], false)?;
                        }
                    }
                    None if !np.inv_foreign_keys.is_empty() => {
                        let key = self.entity_key(owner)?;
                        for (i, fk) in np.inv_foreign_keys.iter().enumerate() {
                            self.write_data(StructuralRef::Entity(*child), *fk, key.values()[i].clone())?;
                        }
                    }
                    None => {}
                }
            }
            Ok(())
        })();
        self.relation_mut(owner, nav)?.adds_in_process.truncate(in_process_start);
        out?;

        if record_links && self.is_many_to_many(nav, owner)? {
            self.record_links(owner, nav, adds, true)?;
        }
        Ok(())
    }

    fn process_removes(
        &mut self,
        owner: EntityRef,
        nav: usize,
        removed: &[EntityRef],
        record_links: bool,
    ) -> Result<(), CacheError> {
        if removed.is_empty() {
            return Ok(());
        }
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(owner)?.entity_type);
        let np = &et.navigation_properties[nav];
        let target_type = schema.entity_type(np.target);
        for child in removed {
            match np.inverse {
                Some(inv) if target_type.navigation_properties[inv].is_scalar => {
                    if self.scalar_nav(*child, inv)? == Some(owner) {
                        self.write_navigation(*child, inv, None)?;
                    }
                }
                Some(inv) => {
                    self.raw_unlink(*child, inv, owner)?;
                }
                None => {
                    for fk in &np.inv_foreign_keys {
                        let fk_dp = &target_type.data_properties[*fk];
                        if !fk_dp.is_part_of_key {
                            self.write_data(
                                StructuralRef::Entity(*child),
                                *fk,
                                fk_dp.default_value.clone(),
                            )?;
                        }
                    }
                }
            }
        }
        if record_links && self.is_many_to_many(nav, owner)? {
            self.record_links(owner, nav, removed, false)?;
        }
        Ok(())
    }

    fn is_many_to_many(&self, nav: usize, owner: EntityRef) -> Result<bool, CacheError> {
        let et = self.schema.entity_type(self.entity(owner)?.entity_type);
        let np = &et.navigation_properties[nav];
        Ok(!np.is_scalar
            && np.inverse.is_some_and(|inv| {
                !self.schema.entity_type(np.target).navigation_properties[inv].is_scalar
            }))
    }

    /// Many-to-many link bookkeeping; an insert cancels a pending removal of
    /// the same link and vice versa.
    fn record_links(
        &mut self,
        owner: EntityRef,
        nav: usize,
        others: &[EntityRef],
        inserted: bool,
    ) -> Result<(), CacheError> {
        if self.is_loading || !self.is_attached(owner) {
            return Ok(());
        }
        let aspect = &mut self.entity_mut(owner)?.aspect;
        for other in others {
            let link = Link {
                navigation: nav,
                other: *other,
            };
            let (cancel, record) = if inserted {
                (&mut aspect.removed_links, &mut aspect.inserted_links)
            } else {
                (&mut aspect.inserted_links, &mut aspect.removed_links)
            };
            if let Some(ix) = cancel.iter().position(|l| *l == link) {
                cancel.remove(ix);
            } else if !record.contains(&link) {
                record.push(link);
            }
        }
        Ok(())
    }

    /// Points `owner`'s navigation at `item` without inverse wiring.
    pub(crate) fn raw_link(
        &mut self,
        owner: EntityRef,
        nav: usize,
        item: EntityRef,
    ) -> Result<(), CacheError> {
        match self.nav_slot_mut(owner, nav)? {
            NavigationSlot::Scalar(slot) => {
                *slot = Some(item);
                Ok(())
            }
            NavigationSlot::Collection(coll) => {
                if coll.contains(item) {
                    return Ok(());
                }
                coll.items.push(item);
                self.publish_relation_delta(owner, nav, vec![item], Vec::new());
                Ok(())
            }
        }
    }

    /// Removes `item` from `owner`'s navigation without inverse wiring.
    pub(crate) fn raw_unlink(
        &mut self,
        owner: EntityRef,
        nav: usize,
        item: EntityRef,
    ) -> Result<(), CacheError> {
        match self.nav_slot_mut(owner, nav)? {
            NavigationSlot::Scalar(slot) => {
                if *slot == Some(item) {
                    *slot = None;
                }
                Ok(())
            }
            NavigationSlot::Collection(coll) => {
                if coll.remove(item) {
                    self.publish_relation_delta(owner, nav, Vec::new(), vec![item]);
                }
                Ok(())
            }
        }
    }

    fn publish_relation_delta(
        &mut self,
        owner: EntityRef,
        nav: usize,
        added: Vec<EntityRef>,
        removed: Vec<EntityRef>,
    ) {
        let Ok(record) = self.entity(owner) else {
            return;
        };
        let name = self.schema.entity_type(record.entity_type).navigation_properties[nav]
            .name
            .clone();
        self.publish_collection_changed(CollectionChangedArgs {
            collection: CollectionId {
                owner: StructuralRef::Entity(owner),
                property: PropertyRef::Navigation(nav),
            },
            property_name: name,
            added: added.into_iter().map(CollectionItem::Entity).collect(),
            removed: removed.into_iter().map(CollectionItem::Entity).collect(),
        });
    }

    // ── nested value collections ────────────────────────────────────────

    fn collection_data_index(
        &self,
        target: StructuralRef,
        name: &str,
        complex: bool,
    ) -> Result<usize, CacheError> {
        let idx = match self.resolve_property(target, name)? {
            PropertyRef::Data(i) => i,
            PropertyRef::Navigation(_) => {
                return Err(CacheError::argument(format!("'{name}' is a navigation property")))
            }
        };
        match (&self.slots(target)?[idx], complex) {
            (PropertySlot::ComplexCollection(_), true)
            | (PropertySlot::PrimitiveCollection(_), false) => Ok(idx),
            _ => Err(CacheError::argument(format!(
                "'{name}' is not a {} collection property",
                if complex { "complex" } else { "primitive" }
            ))),
        }
    }

    /// Appends nested values to a complex collection property.
    pub fn push_complex(
        &mut self,
        owner: impl Into<StructuralRef>,
        name: &str,
        items: &[ComplexRef],
    ) -> Result<usize, CacheError> {
        let owner = owner.into();
        let idx = self.collection_data_index(owner, name, true)?;
        let len = self.complex_items(owner, idx)?.len();
        self.splice_complex_at(owner, idx, len, 0, items)?;
        Ok(self.complex_items(owner, idx)?.len())
    }

    /// Splices a complex collection property; returns the removed values,
    /// which become standalone.
    pub fn splice_complex(
        &mut self,
        owner: impl Into<StructuralRef>,
        name: &str,
        start: usize,
        delete_count: usize,
        items: &[ComplexRef],
    ) -> Result<Vec<ComplexRef>, CacheError> {
        let owner = owner.into();
        let idx = self.collection_data_index(owner, name, true)?;
        self.splice_complex_at(owner, idx, start, delete_count, items)
    }

    /// Removes one nested value from a complex collection property.
    pub fn remove_complex(
        &mut self,
        owner: impl Into<StructuralRef>,
        name: &str,
        item: ComplexRef,
    ) -> Result<bool, CacheError> {
        let owner = owner.into();
        let idx = self.collection_data_index(owner, name, true)?;
        let Some(ix) = self.complex_items(owner, idx)?.iter().position(|c| *c == item) else {
            return Ok(false);
        };
        Ok(!self.splice_complex_at(owner, idx, ix, 1, &[])?.is_empty())
    }

    fn complex_items(&self, owner: StructuralRef, idx: usize) -> Result<&[ComplexRef], CacheError> {
        match &self.slots(owner)?[idx] {
            PropertySlot::ComplexCollection(c) => Ok(&c.items),
            _ => Err(CacheError::consistency(format!(
                "property {idx} is not a complex collection"
            ))),
        }
    }

    pub(crate) fn splice_complex_at(
        &mut self,
        owner: StructuralRef,
        idx: usize,
        start: usize,
        delete_count: usize,
        items: &[ComplexRef],
    ) -> Result<Vec<ComplexRef>, CacheError> {
        let schema = Arc::clone(&self.schema);
        let st = schema.structural_type(self.structural_type_id(owner)?);
        let dp = &st.data_properties()[idx];
        let here = ComplexParent {
            owner,
            property: idx,
        };
        let existing = self.complex_items(owner, idx)?.to_vec();
        let mut adds: Vec<ComplexRef> = Vec::with_capacity(items.len());
        for item in items {
            let record = self.complex(*item)?;
            if Some(record.complex_type) != dp.complex_type {
                return Err(CacheError::argument(format!(
                    "'{}' holds values of a different complex type",
                    dp.name
                )));
            }
            match record.aspect.parent {
                Some(p) if p != here => {
                    return Err(CacheError::operation(
                        "the value already belongs to another owner; clone it or remove it first",
                    ))
                }
                _ => {}
            }
            if !existing.contains(item) && !adds.contains(item) {
                adds.push(*item);
            }
        }
        let (start, end) = clamp_range(existing.len(), start, delete_count);
        if adds.is_empty() && start == end {
            return Ok(Vec::new());
        }

        let track = !self.is_loading;
        let removed: Vec<ComplexRef> = {
            let PropertySlot::ComplexCollection(coll) = self.slot_mut(owner, idx)? else {
                return Err(CacheError::consistency("complex collection slot changed kind"));
            };
            let removed: Vec<ComplexRef> = coll.items.splice(start..end, adds.iter().copied()).collect();
            if track {
                for r in &removed {
                    coll.note_removed(*r);
                }
                for a in &adds {
                    coll.note_added(*a);
                }
            }
            removed
        };
        for r in &removed {
            self.complex_mut(*r)?.aspect.parent = None;
        }
        for a in &adds {
            self.complex_mut(*a)?.aspect.parent = Some(here);
        }

        let root = self.root_of(owner)?;
        let became_modified = self.touch_root(root)?;
        self.publish_collection_changed(CollectionChangedArgs {
            collection: CollectionId {
                owner,
                property: PropertyRef::Data(idx),
            },
            property_name: dp.name.clone(),
            added: adds.into_iter().map(CollectionItem::Complex).collect(),
            removed: removed.iter().copied().map(CollectionItem::Complex).collect(),
        });
        if let Some(r) = root.filter(|_| became_modified) {
            self.notify_state_change(r, true);
        }
        Ok(removed)
    }

    // ── primitive collections ───────────────────────────────────────────

    /// Appends scalar values to a primitive collection property.
    pub fn push_primitive(
        &mut self,
        owner: impl Into<StructuralRef>,
        name: &str,
        values: Vec<DataValue>,
    ) -> Result<usize, CacheError> {
        let owner = owner.into();
        let idx = self.collection_data_index(owner, name, false)?;
        let len = match &self.slots(owner)?[idx] {
            PropertySlot::PrimitiveCollection(c) => c.items.len(),
            _ => 0,
        };
        self.splice_primitive_at(owner, idx, len, 0, values)?;
        Ok(match &self.slots(owner)?[idx] {
            PropertySlot::PrimitiveCollection(c) => c.items.len(),
            _ => 0,
        })
    }

    /// Splices a primitive collection property; returns the removed values.
    pub fn splice_primitive(
        &mut self,
        owner: impl Into<StructuralRef>,
        name: &str,
        start: usize,
        delete_count: usize,
        values: Vec<DataValue>,
    ) -> Result<Vec<DataValue>, CacheError> {
        let owner = owner.into();
        let idx = self.collection_data_index(owner, name, false)?;
        self.splice_primitive_at(owner, idx, start, delete_count, values)
    }

    pub(crate) fn splice_primitive_at(
        &mut self,
        owner: StructuralRef,
        idx: usize,
        start: usize,
        delete_count: usize,
        values: Vec<DataValue>,
    ) -> Result<Vec<DataValue>, CacheError> {
        let schema = Arc::clone(&self.schema);
        let st = schema.structural_type(self.structural_type_id(owner)?);
        let dp = &st.data_properties()[idx];
        let values: Vec<DataValue> = values.into_iter().map(|v| coerce_value(dp, v)).collect();
        let root = self.root_of(owner)?;
        let snapshot = !self.is_loading
            && root.is_some_and(|r| self.state_of(r).is_unchanged_or_modified());

        let removed: Vec<DataValue> = {
            let PropertySlot::PrimitiveCollection(coll) = self.slot_mut(owner, idx)? else {
                return Err(CacheError::consistency("primitive collection slot changed kind"));
            };
            let (start, end) = clamp_range(coll.items.len(), start, delete_count);
            if values.is_empty() && start == end {
                return Ok(Vec::new());
            }
            if snapshot && coll.original.is_none() {
                coll.original = Some(coll.items.clone());
            }
            coll.items.splice(start..end, values.iter().cloned()).collect()
        };

        let became_modified = self.touch_root(root)?;
        self.publish_collection_changed(CollectionChangedArgs {
            collection: CollectionId {
                owner,
                property: PropertyRef::Data(idx),
            },
            property_name: dp.name.clone(),
            added: values.into_iter().map(CollectionItem::Value).collect(),
            removed: removed.iter().cloned().map(CollectionItem::Value).collect(),
        });
        if let Some(r) = root.filter(|_| became_modified) {
            self.notify_state_change(r, true);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::clamp_range;

    #[test]
    fn splice_ranges_clamp_to_length() {
        assert_eq!(clamp_range(3, 1, 1), (1, 2));
        assert_eq!(clamp_range(3, 5, 1), (3, 3));
        assert_eq!(clamp_range(3, 2, usize::MAX), (2, 3));
        assert_eq!(clamp_range(0, 0, 1), (0, 0));
    }
}
