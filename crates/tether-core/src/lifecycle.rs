// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Entity lifecycle: attach, detach, delete, accept and reject.
//!
//! State machine
//! - `Detached → Added | Unchanged | Modified | Deleted` on attach.
//! - `Unchanged → Modified` on any non-no-op write (see `interceptor`).
//! - `Added → Detached` on delete: a never-saved entity is discarded.
//! - `Unchanged | Modified → Deleted` on delete, unlinking relationships.
//! - `any attached → Unchanged` on accept.
//! - `any attached → Detached` on detach.
use std::sync::Arc;

use tracing::{debug, trace};

use crate::collection::{CollectionChangedArgs, CollectionId, CollectionItem};
use crate::error::CacheError;
use crate::ident::{EntityRef, EntityTypeId, PropertyRef, StructuralRef};
use crate::key::EntityKey;
use crate::manager::EntityManager;
use crate::metadata::EntityType;
use crate::notifications::PropertyChangedArgs;
use crate::options::MergeStrategy;
use crate::record::{NavigationSlot, PropertySlot};
use crate::state::{EntityAction, EntityState};
use crate::value::DataValue;

/// A navigation property on a given entity type.
///
/// For child-side registrations this is the child's scalar navigation (the
/// one carrying foreign keys); for unidirectional registrations it is the
/// parent's navigation whose inverse foreign keys live on the child.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct NavTarget {
    pub(crate) entity_type: EntityTypeId,
    pub(crate) navigation: usize,
}

/// Children whose parent (identified by the map key) is not tracked yet.
#[derive(Clone, Debug)]
pub(crate) struct UnattachedChildren {
    pub(crate) target: NavTarget,
    pub(crate) children: Vec<EntityRef>,
}

impl EntityManager {
    fn require_attached(&self, e: EntityRef, operation: &str) -> Result<(), CacheError> {
        self.check_entity(e)?;
        if self.is_attached(e) {
            Ok(())
        } else {
            Err(CacheError::operation(format!(
                "cannot {operation} {e:?}: it is not attached to this EntityManager"
            )))
        }
    }

    // ── unattached children ─────────────────────────────────────────────

    pub(crate) fn register_unattached(&mut self, parent_key: EntityKey, target: NavTarget, child: EntityRef) {
        let waiting = self.unattached.entry(parent_key).or_default();
        match waiting.iter_mut().find(|w| w.target == target) {
            Some(w) => {
                if !w.children.contains(&child) {
                    w.children.push(child);
                }
            }
            None => waiting.push(UnattachedChildren {
                target,
                children: vec![child],
            }),
        }
    }

    pub(crate) fn unregister_unattached(&mut self, parent_key: &EntityKey, target: NavTarget, child: EntityRef) {
        let Some(waiting) = self.unattached.get_mut(parent_key) else {
            return;
        };
        for w in waiting.iter_mut().filter(|w| w.target == target) {
            w.children.retain(|c| *c != child);
        }
        waiting.retain(|w| !w.children.is_empty());
        if waiting.is_empty() {
            self.unattached.remove(parent_key);
        }
    }

    pub(crate) fn key_values(&self, e: EntityRef, props: &[usize]) -> Result<Vec<DataValue>, CacheError> {
        props
            .iter()
            .map(|ix| self.raw_value(StructuralRef::Entity(e), *ix))
            .collect()
    }

    /// Key of the parent that `e`'s foreign keys for `nav` point at.
    pub(crate) fn foreign_key_of(&self, e: EntityRef, nav: usize) -> Result<Option<EntityKey>, CacheError> {
        let et = self.schema.entity_type(self.entity(e)?.entity_type);
        let np = &et.navigation_properties[nav];
        if np.foreign_keys.is_empty() {
            return Ok(None);
        }
        let values = self.key_values(e, &np.foreign_keys)?;
        if values.iter().any(DataValue::is_empty_key_part) {
            return Ok(None);
        }
        EntityKey::new(self.schema.entity_type(np.target), values).map(Some)
    }

    // ── attach ──────────────────────────────────────────────────────────

    /// Attaches `e` (and its detached graph) in `state`; a key collision
    /// fails.
    pub fn attach_entity(&mut self, e: EntityRef, state: EntityState) -> Result<EntityRef, CacheError> {
        self.attach_entity_with(e, state, MergeStrategy::Disallowed)
    }

    /// Attaches `e` as Added, generating a temporary key when the type's
    /// keys are auto-generated.
    pub fn add_entity(&mut self, e: EntityRef) -> Result<EntityRef, CacheError> {
        self.attach_entity(e, EntityState::Added)
    }

    /// Attaches `e` in `state`. When another entity already holds the key,
    /// `strategy` decides: `Disallowed` fails; `OverwriteChanges` (or
    /// `PreserveChanges` against an Unchanged target) copies `e`'s values
    /// onto the tracked entity; otherwise the tracked entity wins. The
    /// tracked entity is returned in every non-failing collision case.
    pub fn attach_entity_with(
        &mut self,
        e: EntityRef,
        state: EntityState,
        strategy: MergeStrategy,
    ) -> Result<EntityRef, CacheError> {
        self.check_entity(e)?;
        if state.is_detached() {
            return Err(CacheError::argument("cannot attach an entity as Detached"));
        }
        if self.is_attached(e) && self.state_of(e) == state {
            return Ok(e);
        }
        let attached = self.with_loading(|this| this.attach_entity_core(e, state, strategy))?;
        if attached != e {
            return Ok(attached);
        }
        if self.options.validation.validate_on_attach {
            self.validate_entity(e)?;
        }
        if !state.is_unchanged() {
            self.notify_state_change(e, true);
        }
        self.publish_entity_changed(EntityAction::Attach, Some(e), None);
        Ok(e)
    }

    fn attach_entity_core(
        &mut self,
        e: EntityRef,
        state: EntityState,
        strategy: MergeStrategy,
    ) -> Result<EntityRef, CacheError> {
        if self.is_attached(e) {
            if self.state_of(e) != state {
                let key = match &self.entity(e)?.aspect.key {
                    Some(k) => k.clone(),
                    None => self.entity_key(e)?,
                };
                let (group, aspect) = self.group_mut_and_aspect(e)?;
                group.attach(e, &key, aspect, state)?;
            }
            return Ok(e);
        }
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(e)?.entity_type);
        if state.is_added() {
            self.ensure_key(e, et)?;
        }
        let key = self.entity_key(e)?;
        if key.has_empty_part() {
            return Err(CacheError::operation(format!(
                "cannot attach a '{}' with an empty key {key}",
                et.name
            )));
        }
        if let Some(existing) = self.find_by_key(&key) {
            return self.attach_collision(existing, e, &key, strategy);
        }
        let (group, aspect) = self.group_mut_and_aspect(e)?;
        group.attach(e, &key, aspect, state)?;
        trace!(entity = ?e, %key, ?state, "attached");
        self.link_related_entities(e)?;
        self.attach_related_entities(e, state, strategy)?;
        Ok(e)
    }

    /// Generates a temporary key when `e` still carries a default key.
    fn ensure_key(&mut self, e: EntityRef, et: &EntityType) -> Result<(), CacheError> {
        let values = self.key_values(e, &et.key_properties)?;
        if !values.iter().all(DataValue::is_default_key_value) {
            return Ok(());
        }
        if et.auto_generated_key == crate::metadata::AutoGeneratedKeyType::None {
            return Err(CacheError::operation(format!(
                "cannot add a '{}' without a key: set the key or declare it auto-generated",
                et.name
            )));
        }
        let [kp] = et.key_properties[..] else {
            return Err(CacheError::operation(format!(
                "'{}' has a multi-part key; temporary keys need a single key property",
                et.name
            )));
        };
        let data_type = et.data_properties[kp].data_type;
        let value = self.key_generator.generate_temp_key_value(et, data_type)?;
        debug!(entity_type = %et.name, %value, "generated temporary key");
        *self.slot_mut(StructuralRef::Entity(e), kp)? = PropertySlot::Value(value);
        self.entity_mut(e)?.aspect.has_temp_key = true;
        Ok(())
    }

    fn attach_collision(
        &mut self,
        existing: EntityRef,
        incoming: EntityRef,
        key: &EntityKey,
        strategy: MergeStrategy,
    ) -> Result<EntityRef, CacheError> {
        let overwrite = match strategy {
            MergeStrategy::Disallowed => {
                return Err(CacheError::operation(format!(
                    "an entity with key {key} is already attached"
                )))
            }
            MergeStrategy::OverwriteChanges => true,
            MergeStrategy::PreserveChanges => self.state_of(existing).is_unchanged(),
            MergeStrategy::SkipMerge => false,
        };
        if !overwrite {
            return Ok(existing);
        }
        let slots = self.entity(incoming)?.data.clone();
        for (ix, slot) in slots.into_iter().enumerate() {
            if let PropertySlot::Value(v) = slot {
                self.write_data(StructuralRef::Entity(existing), ix, v)?;
            }
        }
        self.set_unchanged(existing)?;
        self.publish_property_changed(PropertyChangedArgs::whole_entity(existing));
        self.publish_entity_changed(EntityAction::MergeOnImport, Some(existing), None);
        Ok(existing)
    }

    /// Attaches a freshly materialized entity as Unchanged inside a bulk
    /// load. Notifications are the caller's job.
    pub(crate) fn attach_loaded(&mut self, e: EntityRef) -> Result<(), CacheError> {
        let key = self.entity_key(e)?;
        let (group, aspect) = self.group_mut_and_aspect(e)?;
        group.attach(e, &key, aspect, EntityState::Unchanged)?;
        aspect.was_loaded = true;
        self.link_related_entities(e)
    }

    fn attach_related_entities(
        &mut self,
        e: EntityRef,
        state: EntityState,
        strategy: MergeStrategy,
    ) -> Result<(), CacheError> {
        let related: Vec<EntityRef> = self
            .entity(e)?
            .navigation
            .iter()
            .flat_map(|slot| match slot {
                NavigationSlot::Scalar(v) => v.iter().copied().collect::<Vec<_>>(),
                NavigationSlot::Collection(c) => c.items.clone(),
            })
            .collect();
        for r in related {
            if !self.is_attached(r) {
                self.attach_entity_core(r, state, strategy)?;
            }
        }
        Ok(())
    }

    /// Wires `e` to tracked relatives through foreign keys, in both
    /// directions, and resolves children that were waiting for `e`.
    pub(crate) fn link_related_entities(&mut self, e: EntityRef) -> Result<(), CacheError> {
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(e)?.entity_type);
        let key = self.entity_key(e)?;

        if let Some(waiting) = self.unattached.remove(&key) {
            for w in waiting {
                let np = &schema.entity_type(w.target.entity_type).navigation_properties
                    [w.target.navigation];
                for child in w.children {
                    if !self.is_attached(child) {
                        continue;
                    }
                    if np.foreign_keys.is_empty() {
                        self.raw_link(e, w.target.navigation, child)?;
                    } else if self.foreign_key_of(child, w.target.navigation)?.as_ref() == Some(&key)
                        && self.scalar_nav(child, w.target.navigation)?.is_none()
                    {
                        self.write_navigation(child, w.target.navigation, Some(e))?;
                    }
                }
            }
        }

        for (ni, np) in et.navigation_properties.iter().enumerate() {
            if np.is_scalar && !np.foreign_keys.is_empty() {
                if self.scalar_nav(e, ni)?.is_some() {
                    continue;
                }
                let Some(parent_key) = self.foreign_key_of(e, ni)? else {
                    continue;
                };
                match self.find_by_key(&parent_key) {
                    Some(parent) => self.write_navigation(e, ni, Some(parent))?,
                    None => self.register_unattached(
                        parent_key,
                        NavTarget {
                            entity_type: et.id,
                            navigation: ni,
                        },
                        e,
                    ),
                }
            } else if np.inverse.is_none() && !np.inv_foreign_keys.is_empty() {
                let candidates: Vec<EntityRef> = self.groups[np.target.0 as usize].iter().collect();
                for child in candidates {
                    let values = self.key_values(child, &np.inv_foreign_keys)?;
                    let points_here = values
                        .iter()
                        .zip(key.values())
                        .all(|(a, b)| a.behaviorally_eq(b));
                    if points_here {
                        self.raw_link(e, ni, child)?;
                    }
                }
            }
        }

        for (parent_type, parent_nav) in et.unidirectional_parents.iter().copied() {
            let pt = schema.entity_type(parent_type);
            let values = self.key_values(e, &pt.navigation_properties[parent_nav].inv_foreign_keys)?;
            if values.iter().any(DataValue::is_empty_key_part) {
                continue;
            }
            let parent_key = EntityKey::new(pt, values)?;
            match self.find_by_key(&parent_key) {
                Some(parent) => self.raw_link(parent, parent_nav, e)?,
                None => self.register_unattached(
                    parent_key,
                    NavTarget {
                        entity_type: parent_type,
                        navigation: parent_nav,
                    },
                    e,
                ),
            }
        }
        Ok(())
    }

    // ── detach / delete ─────────────────────────────────────────────────

    /// Stops tracking `e`. Returns `false` if it was not attached.
    pub fn detach_entity(&mut self, e: EntityRef) -> Result<bool, CacheError> {
        self.check_entity(e)?;
        if !self.is_attached(e) {
            return Ok(false);
        }
        self.detach_core(e, false)?;
        Ok(true)
    }

    /// Alias of [`EntityManager::detach_entity`].
    pub fn set_detached(&mut self, e: EntityRef) -> Result<bool, CacheError> {
        self.detach_entity(e)
    }

    fn detach_core(&mut self, e: EntityRef, deleted: bool) -> Result<(), CacheError> {
        let was = self.state_of(e);
        let key = match &self.entity(e)?.aspect.key {
            Some(k) => k.clone(),
            None => self.entity_key(e)?,
        };
        let unlink = |this: &mut Self| -> Result<(), CacheError> {
            let (group, aspect) = this.group_mut_and_aspect(e)?;
            group.detach(&key, aspect)?;
            this.remove_from_relations(e, deleted)
        };
        if deleted {
            unlink(self)?;
        } else {
            self.with_loading(unlink)?;
        }
        self.publish_entity_changed(EntityAction::Detach, Some(e), None);
        let record = self.entity_mut(e)?;
        record.aspect.reset();
        let complexes = self.owned_complexes(StructuralRef::Entity(e))?;
        let mut owners = vec![StructuralRef::Entity(e)];
        for c in complexes {
            self.complex_mut(c)?.aspect.original_values.clear();
            owners.push(StructuralRef::Complex(c));
        }
        self.drop_collection_channels(&owners);
        if was.needs_save() {
            self.update_has_changes();
        }
        debug!(entity = ?e, deleted, "detached");
        Ok(())
    }

    /// Marks `e` for deletion. An Added entity is discarded instead.
    pub fn set_deleted(&mut self, e: EntityRef) -> Result<(), CacheError> {
        self.require_attached(e, "delete")?;
        match self.state_of(e) {
            EntityState::Deleted => Ok(()),
            EntityState::Added => self.detach_core(e, true),
            _ => {
                self.entity_mut(e)?.aspect.state = EntityState::Deleted;
                self.remove_from_relations(e, true)?;
                self.notify_state_change(e, true);
                Ok(())
            }
        }
    }

    /// Unlinks `e` from every relationship. `deleted` selects the cascade
    /// policy; otherwise the far side's foreign keys are left untouched.
    pub(crate) fn remove_from_relations(&mut self, e: EntityRef, deleted: bool) -> Result<(), CacheError> {
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(e)?.entity_type);
        for (ni, np) in et.navigation_properties.iter().enumerate() {
            let target_type = schema.entity_type(np.target);
            match (np.is_scalar, np.inverse) {
                (true, inverse) => {
                    let Some(related) = self.scalar_nav(e, ni)? else {
                        continue;
                    };
                    match inverse {
                        Some(inv) if target_type.navigation_properties[inv].is_scalar => {
                            self.release_child(related, inv, deleted)?;
                        }
                        Some(inv) => self.raw_unlink(related, inv, e)?,
                        None => {}
                    }
                    *self.nav_slot_mut(e, ni)? = NavigationSlot::Scalar(None);
                }
                (false, Some(inv)) => {
                    let items = self.relation(e, ni)?.items.clone();
                    let inverse_is_scalar = target_type.navigation_properties[inv].is_scalar;
                    for related in items {
                        if inverse_is_scalar {
                            self.release_child(related, inv, deleted)?;
                        } else {
                            self.raw_unlink(related, inv, e)?;
                        }
                    }
                    self.truncate_relation(e, ni)?;
                }
                (false, None) => {
                    if deleted {
                        let items = self.relation(e, ni)?.items.clone();
                        for related in items {
                            self.release_unidirectional_child(related, &np.inv_foreign_keys)?;
                        }
                    }
                    self.truncate_relation(e, ni)?;
                }
            }
        }
        Ok(())
    }

    /// Clears `child`'s pointer (`nav`) at a parent that is going away.
    fn release_child(&mut self, child: EntityRef, nav: usize, deleted: bool) -> Result<(), CacheError> {
        if !deleted {
            // The parent is already out of its group, so the navigation write
            // leaves the child's foreign keys alone.
            let schema = Arc::clone(&self.schema);
            let fks = schema.entity_type(self.entity(child)?.entity_type).navigation_properties
                [nav]
                .foreign_keys
                .clone();
            let saved = self.key_values(child, &fks)?;
            self.write_navigation(child, nav, None)?;
            for (fk, value) in fks.into_iter().zip(saved) {
                if !self.raw_value(StructuralRef::Entity(child), fk)?.behaviorally_eq(&value) {
                    *self.slot_mut(StructuralRef::Entity(child), fk)? = PropertySlot::Value(value);
                }
            }
            return Ok(());
        }
        if self.state_of(child).is_deleted() {
            return self.write_navigation(child, nav, None);
        }
        let schema = Arc::clone(&self.schema);
        let ct = schema.entity_type(self.entity(child)?.entity_type);
        let fks = &ct.navigation_properties[nav].foreign_keys;
        if fks.iter().any(|fk| !ct.data_properties[*fk].is_nullable) {
            debug!(child = ?child, "cascade-detaching child of a deleted parent");
            if self.is_attached(child) {
                return self.detach_core(child, false);
            }
            return self.write_navigation(child, nav, None);
        }
        self.write_navigation(child, nav, None)?;
        for fk in fks {
            let dp = &ct.data_properties[*fk];
            if !dp.is_part_of_key {
                self.write_data(StructuralRef::Entity(child), *fk, DataValue::Null)?;
            }
        }
        Ok(())
    }

    fn release_unidirectional_child(&mut self, child: EntityRef, fks: &[usize]) -> Result<(), CacheError> {
        if self.state_of(child).is_deleted() || !self.is_attached(child) {
            return Ok(());
        }
        let schema = Arc::clone(&self.schema);
        let ct = schema.entity_type(self.entity(child)?.entity_type);
        if fks.iter().any(|fk| !ct.data_properties[*fk].is_nullable) {
            return self.detach_core(child, false);
        }
        for fk in fks {
            if !ct.data_properties[*fk].is_part_of_key {
                self.write_data(StructuralRef::Entity(child), *fk, DataValue::Null)?;
            }
        }
        Ok(())
    }

    fn truncate_relation(&mut self, e: EntityRef, nav: usize) -> Result<(), CacheError> {
        let removed = std::mem::take(&mut self.relation_mut(e, nav)?.items);
        if removed.is_empty() {
            return Ok(());
        }
        let name = self.entity_type(e)?.navigation_properties[nav].name.clone();
        self.publish_collection_changed(CollectionChangedArgs {
            collection: CollectionId {
                owner: StructuralRef::Entity(e),
                property: PropertyRef::Navigation(nav),
            },
            property_name: name,
            added: Vec::new(),
            removed: removed.into_iter().map(CollectionItem::Entity).collect(),
        });
        Ok(())
    }

    // ── accept / reject ─────────────────────────────────────────────────

    /// Nested values reachable from `target`, depth first.
    pub(crate) fn owned_complexes(&self, target: StructuralRef) -> Result<Vec<crate::ident::ComplexRef>, CacheError> {
        let mut out = Vec::new();
        let mut stack = vec![target];
        while let Some(t) = stack.pop() {
            for slot in self.slots(t)? {
                match slot {
                    PropertySlot::Complex(c) => {
                        out.push(*c);
                        stack.push(StructuralRef::Complex(*c));
                    }
                    PropertySlot::ComplexCollection(coll) => {
                        for c in &coll.items {
                            out.push(*c);
                            stack.push(StructuralRef::Complex(*c));
                        }
                    }
                    PropertySlot::Value(_) | PropertySlot::PrimitiveCollection(_) => {}
                }
            }
        }
        Ok(out)
    }

    /// Forgets every tracked change on `e` and its nested values.
    fn clear_tracking(&mut self, e: EntityRef) -> Result<(), CacheError> {
        let mut targets = vec![StructuralRef::Entity(e)];
        targets.extend(
            self.owned_complexes(StructuralRef::Entity(e))?
                .into_iter()
                .map(StructuralRef::Complex),
        );
        for t in targets {
            self.original_values_mut(t)?.clear();
            let len = self.slots(t)?.len();
            for ix in 0..len {
                match self.slot_mut(t, ix)? {
                    PropertySlot::ComplexCollection(coll) => coll.clear_deltas(),
                    PropertySlot::PrimitiveCollection(coll) => coll.original = None,
                    PropertySlot::Value(_) | PropertySlot::Complex(_) => {}
                }
            }
        }
        let aspect = &mut self.entity_mut(e)?.aspect;
        aspect.inserted_links.clear();
        aspect.removed_links.clear();
        aspect.has_temp_key = false;
        Ok(())
    }

    /// Transitions `e` to Unchanged and forgets its tracked changes.
    pub fn set_unchanged(&mut self, e: EntityRef) -> Result<(), CacheError> {
        self.require_attached(e, "mark unchanged")?;
        self.clear_tracking(e)?;
        let prev = std::mem::replace(&mut self.entity_mut(e)?.aspect.state, EntityState::Unchanged);
        if prev != EntityState::Unchanged {
            self.notify_state_change(e, false);
        }
        Ok(())
    }

    /// Transitions `e` to Modified.
    pub fn set_modified(&mut self, e: EntityRef) -> Result<(), CacheError> {
        self.require_attached(e, "mark modified")?;
        let prev = std::mem::replace(&mut self.entity_mut(e)?.aspect.state, EntityState::Modified);
        if prev != EntityState::Modified {
            self.notify_state_change(e, true);
        }
        Ok(())
    }

    /// Accepts pending changes: `e` becomes Unchanged with no originals.
    pub fn accept_changes(&mut self, e: EntityRef) -> Result<(), CacheError> {
        self.set_unchanged(e)?;
        self.publish_entity_changed(EntityAction::AcceptChanges, Some(e), None);
        Ok(())
    }

    /// Rolls back pending changes. Added entities are detached; Deleted
    /// entities are relinked; everything else ends Unchanged.
    pub fn reject_changes(&mut self, e: EntityRef) -> Result<(), CacheError> {
        self.require_attached(e, "reject changes on")?;
        let state = self.state_of(e);
        self.with_rejecting(|this| this.restore_originals(e))?;
        if state.is_added() {
            self.detach_core(e, false)?;
            self.publish_entity_changed(EntityAction::RejectChanges, Some(e), None);
            return Ok(());
        }
        if state.is_deleted() {
            self.with_loading(|this| this.link_related_entities(e))?;
        }
        self.set_unchanged(e)?;
        self.publish_property_changed(PropertyChangedArgs::whole_entity(e));
        self.publish_entity_changed(EntityAction::RejectChanges, Some(e), None);
        Ok(())
    }

    /// Accepts pending changes on every attached entity. Returns how many
    /// entities had changes.
    pub fn accept_all_changes(&mut self) -> Result<usize, CacheError> {
        let pending = self.get_changes(None)?;
        for e in &pending {
            self.accept_changes(*e)?;
        }
        Ok(pending.len())
    }

    /// Rolls back pending changes on every attached entity. Returns how
    /// many entities had changes.
    pub fn reject_all_changes(&mut self) -> Result<usize, CacheError> {
        let pending = self.get_changes(None)?;
        for e in &pending {
            // An earlier rollback may already have detached it.
            if self.is_attached(*e) {
                self.reject_changes(*e)?;
            }
        }
        Ok(pending.len())
    }

    fn restore_originals(&mut self, e: EntityRef) -> Result<(), CacheError> {
        let mut targets = vec![StructuralRef::Entity(e)];
        targets.extend(
            self.owned_complexes(StructuralRef::Entity(e))?
                .into_iter()
                .map(StructuralRef::Complex),
        );
        for t in targets {
            let originals = std::mem::take(self.original_values_mut(t)?);
            for (ix, value) in originals {
                self.write_data(t, ix, value)?;
            }
            self.restore_collections(t)?;
        }

        let (inserted, removed) = {
            let aspect = &mut self.entity_mut(e)?.aspect;
            (
                std::mem::take(&mut aspect.inserted_links),
                std::mem::take(&mut aspect.removed_links),
            )
        };
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(e)?.entity_type);
        for link in inserted {
            if let Some(inv) = et.navigation_properties[link.navigation].inverse {
                self.raw_unlink(e, link.navigation, link.other)?;
                self.raw_unlink(link.other, inv, e)?;
            }
        }
        for link in removed {
            if let Some(inv) = et.navigation_properties[link.navigation].inverse {
                self.raw_link(e, link.navigation, link.other)?;
                self.raw_link(link.other, inv, e)?;
            }
        }
        Ok(())
    }

    fn restore_collections(&mut self, t: StructuralRef) -> Result<(), CacheError> {
        let len = self.slots(t)?.len();
        for ix in 0..len {
            let mut reparent = Vec::new();
            let mut orphan = Vec::new();
            match self.slot_mut(t, ix)? {
                PropertySlot::PrimitiveCollection(coll) => {
                    if let Some(original) = coll.original.take() {
                        coll.items = original;
                    }
                }
                PropertySlot::ComplexCollection(coll) => {
                    let added = std::mem::take(&mut coll.pending_added);
                    let removed = std::mem::take(&mut coll.pending_removed);
                    coll.items.retain(|c| !added.contains(c));
                    coll.items.extend(removed.iter().copied());
                    orphan = added;
                    reparent = removed;
                }
                PropertySlot::Value(_) | PropertySlot::Complex(_) => continue,
            }
            for c in orphan {
                self.complex_mut(c)?.aspect.parent = None;
            }
            for c in reparent {
                self.complex_mut(c)?.aspect.parent = Some(crate::aspect::ComplexParent {
                    owner: t,
                    property: ix,
                });
            }
        }
        Ok(())
    }
}
