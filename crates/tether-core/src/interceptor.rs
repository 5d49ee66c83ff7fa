// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The property write path.
//!
//! Every assignment (data, navigation, nested value) funnels through
//! [`EntityManager::set_property`]. One write performs, in order:
//! 1. coercion to the declared data type (best effort),
//! 2. a no-op check,
//! 3. a per-root re-entrancy guard keyed on (object, property),
//! 4. relationship wiring (inverse navigations, foreign keys, identity
//!    map key rewrites),
//! 5. original-value capture,
//! 6. the raw store, state transition, validation and key propagation
//!    to dependents,
//! 7. notifications.
//!
//! Writes on one side of a relationship cascade into writes on the other;
//! the guard stops the cascade when it comes back around to a write that is
//! already running.
use std::sync::Arc;

use tracing::warn;

use crate::aspect::InFlight;
use crate::error::CacheError;
use crate::ident::{ComplexRef, EntityRef, PropertyRef, StructuralRef};
use crate::key::EntityKey;
use crate::lifecycle::NavTarget;
use crate::manager::EntityManager;
use crate::metadata::{DataProperty, EntityType, Schema};
use crate::notifications::PropertyChangedArgs;
use crate::record::{NavigationSlot, PropertySlot};
use crate::state::{EntityAction, EntityState};
use crate::value::DataValue;

/// A value assignable through [`EntityManager::set_property`].
#[derive(Clone, PartialEq, Debug)]
pub enum PropertyValue {
    /// Scalar data value.
    Data(DataValue),
    /// Single-valued navigation target (or none).
    Entity(Option<EntityRef>),
    /// Nested value; its fields are copied into the existing nested value.
    Complex(ComplexRef),
}

impl From<DataValue> for PropertyValue {
    fn from(value: DataValue) -> Self {
        Self::Data(value)
    }
}

impl From<Option<EntityRef>> for PropertyValue {
    fn from(value: Option<EntityRef>) -> Self {
        Self::Entity(value)
    }
}

impl From<EntityRef> for PropertyValue {
    fn from(value: EntityRef) -> Self {
        Self::Entity(Some(value))
    }
}

impl From<ComplexRef> for PropertyValue {
    fn from(value: ComplexRef) -> Self {
        Self::Complex(value)
    }
}

/// Parses `value` into `dp`'s declared type; unparseable values are kept raw.
pub(crate) fn coerce_value(dp: &DataProperty, value: DataValue) -> DataValue {
    match dp.data_type.parse(&value) {
        Some(parsed) => parsed,
        None => {
            warn!(
                property = %dp.name,
                data_type = ?dp.data_type,
                value = %value,
                "value does not parse as the declared type; keeping raw value"
            );
            value
        }
    }
}

impl EntityManager {
    /// Assigns any property by name. This is the single write entry point.
    pub fn set_property(
        &mut self,
        target: impl Into<StructuralRef>,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), CacheError> {
        let target = target.into();
        match (self.resolve_property(target, name)?, value) {
            (PropertyRef::Data(idx), PropertyValue::Data(v)) => self.write_data(target, idx, v),
            (PropertyRef::Data(idx), PropertyValue::Complex(c)) => {
                self.write_complex(target, idx, c)
            }
            (PropertyRef::Navigation(nav), PropertyValue::Entity(v)) => match target {
                StructuralRef::Entity(e) => self.write_navigation(e, nav, v),
                StructuralRef::Complex(_) => Err(CacheError::consistency(
                    "navigation property resolved on a complex value",
                )),
            },
            (_, v) => Err(CacheError::argument(format!(
                "cannot assign {v:?} to property '{name}'"
            ))),
        }
    }

    /// Assigns a scalar data property.
    pub fn set_value(
        &mut self,
        target: impl Into<StructuralRef>,
        name: &str,
        value: impl Into<DataValue>,
    ) -> Result<(), CacheError> {
        self.set_property(target, name, PropertyValue::Data(value.into()))
    }

    /// Assigns a single-valued navigation property.
    pub fn set_navigation(
        &mut self,
        entity: EntityRef,
        name: &str,
        value: Option<EntityRef>,
    ) -> Result<(), CacheError> {
        self.set_property(entity, name, PropertyValue::Entity(value))
    }

    /// Copies `value`'s fields into the nested value held by `name`.
    pub fn set_complex(
        &mut self,
        target: impl Into<StructuralRef>,
        name: &str,
        value: ComplexRef,
    ) -> Result<(), CacheError> {
        self.set_property(target, name, PropertyValue::Complex(value))
    }

    // ── guard ───────────────────────────────────────────────────────────

    /// Registers `guard` on `root`. Returns `false` when the same write is
    /// already running.
    fn enter(&mut self, root: Option<EntityRef>, guard: InFlight) -> Result<bool, CacheError> {
        let Some(root) = root else {
            return Ok(true);
        };
        let aspect = &mut self.entity_mut(root)?.aspect;
        if aspect.is_in_flight(guard) {
            return Ok(false);
        }
        aspect.in_flight.push(guard);
        Ok(true)
    }

    fn leave(&mut self, root: Option<EntityRef>, guard: InFlight) {
        if let Some(root) = root {
            if let Ok(record) = self.entity_mut(root) {
                if let Some(ix) = record.aspect.in_flight.iter().rposition(|g| *g == guard) {
                    record.aspect.in_flight.remove(ix);
                }
            }
        }
    }

    /// Unchanged → Modified on the root, outside bulk load. Returns whether
    /// the transition happened; the caller reports it after the property
    /// notifications.
    pub(crate) fn touch_root(&mut self, root: Option<EntityRef>) -> Result<bool, CacheError> {
        let Some(root) = root else {
            return Ok(false);
        };
        if self.is_loading {
            return Ok(false);
        }
        let aspect = &mut self.entity_mut(root)?.aspect;
        if aspect.state.is_unchanged() {
            aspect.state = EntityState::Modified;
            return Ok(true);
        }
        Ok(false)
    }

    fn notify_write(
        &mut self,
        root: Option<EntityRef>,
        args: PropertyChangedArgs,
        became_modified: bool,
    ) {
        if !self.is_loading && !self.is_rejecting {
            self.publish_property_changed(args.clone());
            if let Some(r) = root.filter(|r| self.is_attached(*r)) {
                self.publish_entity_changed(EntityAction::PropertyChange, Some(r), Some(args));
            }
        }
        if let Some(r) = root.filter(|_| became_modified) {
            self.notify_state_change(r, true);
        }
    }

    // ── data properties ─────────────────────────────────────────────────

    pub(crate) fn write_data(
        &mut self,
        target: StructuralRef,
        idx: usize,
        value: DataValue,
    ) -> Result<(), CacheError> {
        let schema = Arc::clone(&self.schema);
        let st = schema.structural_type(self.structural_type_id(target)?);
        let dp = st.data_properties().get(idx).ok_or_else(|| {
            CacheError::consistency(format!("'{}' has no data property {idx}", st.name()))
        })?;
        if dp.is_complex() {
            return Err(CacheError::operation(format!(
                "'{}' holds a nested value; assign a complex value instead",
                dp.name
            )));
        }
        if !dp.is_scalar {
            return Err(CacheError::operation(format!(
                "collection property '{}' cannot be assigned; mutate the collection instead",
                dp.name
            )));
        }
        let new_value = coerce_value(dp, value);
        let old_value = self.raw_value(target, idx)?;
        if old_value.behaviorally_eq(&new_value) {
            return Ok(());
        }
        let root = self.root_of(target)?;
        let guard = InFlight {
            target,
            property: PropertyRef::Data(idx),
        };
        if !self.enter(root, guard)? {
            return Ok(());
        }
        let out = self.write_data_core(&schema, dp, target, root, idx, old_value, new_value);
        self.leave(root, guard);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn write_data_core(
        &mut self,
        schema: &Schema,
        dp: &DataProperty,
        target: StructuralRef,
        root: Option<EntityRef>,
        idx: usize,
        old_value: DataValue,
        new_value: DataValue,
    ) -> Result<(), CacheError> {
        let root_state = root.map(|r| self.state_of(r));
        if let StructuralRef::Entity(e) = target {
            if self.is_attached(e) {
                let et = schema.entity_type(self.entity(e)?.entity_type);
                if dp.is_part_of_key {
                    self.rekey(e, et, idx, &new_value)?;
                }
                if let Some(nav) = dp.related_navigation {
                    self.sync_navigation_from_foreign_key(schema, e, et, nav, idx, &new_value)?;
                } else if let Some((parent_type, parent_nav)) = dp.inverse_navigation {
                    if !self.in_key_fixup {
                        self.move_between_parents(
                            schema,
                            e,
                            idx,
                            NavTarget {
                                entity_type: parent_type,
                                navigation: parent_nav,
                            },
                            &old_value,
                            &new_value,
                        )?;
                    }
                }
            }
        }

        // Captured after wiring so a rejected key change leaves no trace.
        if !self.is_loading && root_state.is_some_and(EntityState::is_unchanged_or_modified) {
            self.original_values_mut(target)?
                .entry(idx)
                .or_insert_with(|| old_value.clone());
        }
        *self.slot_mut(target, idx)? = PropertySlot::Value(new_value.clone());
        let became_modified = self.touch_root(root)?;
        if let Some(r) = root {
            if self.is_attached(r)
                && !self.is_loading
                && self.options.validation.validate_on_property_change
            {
                self.validate_slot(r, target, idx)?;
            }
        }

        if let StructuralRef::Entity(e) = target {
            if dp.is_part_of_key {
                self.propagate_key_change(schema, e, idx, &new_value)?;
                if self.is_attached(e) {
                    let key = self.entity_key(e)?;
                    self.entity_mut(e)?.aspect.key = Some(key);
                }
            }
        }

        let args = PropertyChangedArgs {
            entity: root,
            target,
            property_name: Some(dp.name.clone()),
            property_path: Some(self.property_path(target, &dp.name)?),
            old_value: Some(PropertyValue::Data(old_value)),
            new_value: Some(PropertyValue::Data(new_value)),
        };
        self.notify_write(root, args, became_modified);
        Ok(())
    }

    /// Moves `e` to its new key in the identity map, rejecting collisions.
    fn rekey(
        &mut self,
        e: EntityRef,
        et: &EntityType,
        idx: usize,
        new_value: &DataValue,
    ) -> Result<(), CacheError> {
        let Some(pos) = et.key_position(idx) else {
            return Ok(());
        };
        let old_key = match &self.entity(e)?.aspect.key {
            Some(k) => k.clone(),
            None => self.entity_key(e)?,
        };
        let mut values = old_key.values().to_vec();
        values[pos] = new_value.clone();
        let new_key = EntityKey::new(et, values)?;
        if let Some(other) = self.find_by_key(&new_key) {
            if other != e {
                return Err(CacheError::operation(format!(
                    "cannot change key to {new_key}: another entity already uses it"
                )));
            }
        }
        let in_key_fixup = self.in_key_fixup;
        let (group, aspect) = self.group_mut_and_aspect(e)?;
        match (old_key.values(), new_key.values()) {
            ([temp], [real]) if in_key_fixup => group.fixup_temporary_key(temp, real)?,
            _ => group.rewrite_key(old_key.key_string(), new_key.key_string())?,
        }
        aspect.key = Some(new_key);
        if !in_key_fixup {
            aspect.has_temp_key = false;
        }
        Ok(())
    }

    /// A foreign key changed: point the related navigation at the matching
    /// tracked parent, or park `e` as an unattached child of that key.
    fn sync_navigation_from_foreign_key(
        &mut self,
        schema: &Schema,
        e: EntityRef,
        et: &EntityType,
        nav: usize,
        idx: usize,
        new_value: &DataValue,
    ) -> Result<(), CacheError> {
        let np = &et.navigation_properties[nav];
        if new_value.is_null() {
            return self.write_navigation_inner(e, nav, None, false);
        }
        let mut values = Vec::with_capacity(np.foreign_keys.len());
        for fk in &np.foreign_keys {
            values.push(if *fk == idx {
                new_value.clone()
            } else {
                self.raw_value(StructuralRef::Entity(e), *fk)?
            });
        }
        let parent_key = EntityKey::new(schema.entity_type(np.target), values)?;
        if parent_key.has_empty_part() {
            return self.write_navigation_inner(e, nav, None, false);
        }
        match self.find_by_key(&parent_key) {
            Some(parent) => self.write_navigation_inner(e, nav, Some(parent), false),
            None => {
                self.register_unattached(
                    parent_key,
                    NavTarget {
                        entity_type: et.id,
                        navigation: nav,
                    },
                    e,
                );
                self.write_navigation_inner(e, nav, None, false)
            }
        }
    }

    /// Unidirectional association keyed on this side: take `e` out of the
    /// old parent's navigation and put it into the new parent's.
    fn move_between_parents(
        &mut self,
        schema: &Schema,
        e: EntityRef,
        idx: usize,
        parent: NavTarget,
        old_value: &DataValue,
        new_value: &DataValue,
    ) -> Result<(), CacheError> {
        let parent_type = schema.entity_type(parent.entity_type);
        let pnp = &parent_type.navigation_properties[parent.navigation];
        let key_with = |this: &Self, v: &DataValue| -> Result<EntityKey, CacheError> {
            let mut values = Vec::with_capacity(pnp.inv_foreign_keys.len());
            for fk in &pnp.inv_foreign_keys {
                values.push(if *fk == idx {
                    v.clone()
                } else {
                    this.raw_value(StructuralRef::Entity(e), *fk)?
                });
            }
            EntityKey::new(parent_type, values)
        };
        if !old_value.is_null() {
            let old_key = key_with(self, old_value)?;
            if let Some(old_parent) = self.find_by_key(&old_key) {
                self.raw_unlink(old_parent, parent.navigation, e)?;
            }
            self.unregister_unattached(&old_key, parent, e);
        }
        if !new_value.is_null() {
            let new_key = key_with(self, new_value)?;
            match self.find_by_key(&new_key) {
                Some(new_parent) => self.raw_link(new_parent, parent.navigation, e)?,
                None => self.register_unattached(new_key, parent, e),
            }
        }
        Ok(())
    }

    /// Pushes a changed key value into the foreign keys of every dependent
    /// reachable through `e`'s navigations.
    fn propagate_key_change(
        &mut self,
        schema: &Schema,
        e: EntityRef,
        idx: usize,
        new_value: &DataValue,
    ) -> Result<(), CacheError> {
        let et = schema.entity_type(self.entity(e)?.entity_type);
        let Some(pos) = et.key_position(idx) else {
            return Ok(());
        };
        for (ni, np) in et.navigation_properties.iter().enumerate() {
            let fks = match np.inverse {
                Some(inv) => &schema.entity_type(np.target).navigation_properties[inv].foreign_keys,
                None => &np.inv_foreign_keys,
            };
            let Some(fk) = fks.get(pos).copied() else {
                continue;
            };
            let related: Vec<EntityRef> = match self.nav_slot(e, ni)? {
                NavigationSlot::Scalar(Some(r)) => vec![*r],
                NavigationSlot::Scalar(None) => Vec::new(),
                NavigationSlot::Collection(c) => c.items.clone(),
            };
            for r in related {
                self.write_data(StructuralRef::Entity(r), fk, new_value.clone())?;
            }
        }
        Ok(())
    }

    // ── navigation properties ───────────────────────────────────────────

    pub(crate) fn write_navigation(
        &mut self,
        e: EntityRef,
        nav: usize,
        value: Option<EntityRef>,
    ) -> Result<(), CacheError> {
        self.write_navigation_inner(e, nav, value, true)
    }

    /// `sync_fks` is false when the write is itself driven by a foreign key
    /// change; the key is authoritative then.
    pub(crate) fn write_navigation_inner(
        &mut self,
        e: EntityRef,
        nav: usize,
        value: Option<EntityRef>,
        sync_fks: bool,
    ) -> Result<(), CacheError> {
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(self.entity(e)?.entity_type);
        let np = et.navigation_properties.get(nav).ok_or_else(|| {
            CacheError::consistency(format!("'{}' has no navigation {nav}", et.name))
        })?;
        if !np.is_scalar {
            return Err(CacheError::operation(format!(
                "collection navigation '{}' cannot be assigned; use push or splice",
                np.name
            )));
        }
        if let Some(n) = value {
            let target_type = self.entity(n)?.entity_type;
            if target_type != np.target {
                return Err(CacheError::argument(format!(
                    "'{}' expects a '{}' but got a '{}'",
                    np.name,
                    schema.entity_type(np.target).name,
                    schema.entity_type(target_type).name
                )));
            }
        }
        let old = self.scalar_nav(e, nav)?;
        if old == value {
            return Ok(());
        }
        let guard = InFlight {
            target: StructuralRef::Entity(e),
            property: PropertyRef::Navigation(nav),
        };
        if !self.enter(Some(e), guard)? {
            return Ok(());
        }
        let out = self.write_navigation_core(&schema, et, e, nav, old, value, sync_fks);
        self.leave(Some(e), guard);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn write_navigation_core(
        &mut self,
        schema: &Schema,
        et: &EntityType,
        e: EntityRef,
        nav: usize,
        old: Option<EntityRef>,
        new: Option<EntityRef>,
        sync_fks: bool,
    ) -> Result<(), CacheError> {
        let np = &et.navigation_properties[nav];
        if let Some(n) = new {
            if !self.is_loading {
                if self.is_attached(e) {
                    if !self.is_attached(n) {
                        self.attach_entity(n, EntityState::Added)?;
                    }
                } else if self.is_attached(n) {
                    self.attach_entity(e, EntityState::Added)?;
                }
            }
        }

        let target_type = schema.entity_type(np.target);
        if let Some(inv) = np.inverse {
            let inp = &target_type.navigation_properties[inv];
            if inp.is_scalar {
                if let Some(o) = old {
                    self.write_navigation_inner(o, inv, None, true)?;
                }
                if let Some(n) = new {
                    self.write_navigation_inner(n, inv, Some(e), true)?;
                }
            } else {
                if let Some(o) = old {
                    self.raw_unlink(o, inv, e)?;
                }
                if let Some(n) = new {
                    self.push_core(n, inv, &[e], false)?;
                }
            }
        } else if !np.inv_foreign_keys.is_empty() && self.is_attached(e) && !self.in_key_fixup {
            if let Some(n) = new {
                let key = self.entity_key(e)?;
                for (i, fk) in np.inv_foreign_keys.iter().enumerate() {
                    self.write_data(StructuralRef::Entity(n), *fk, key.values()[i].clone())?;
                }
            } else if let Some(o) = old {
                for fk in &np.inv_foreign_keys {
                    let fk_dp = &target_type.data_properties[*fk];
                    if !fk_dp.is_part_of_key {
                        self.write_data(StructuralRef::Entity(o), *fk, fk_dp.default_value.clone())?;
                    }
                }
            }
        }

        *self.nav_slot_mut(e, nav)? = NavigationSlot::Scalar(new);
        let became_modified = self.touch_root(Some(e))?;
        if self.is_attached(e)
            && !self.is_loading
            && self.options.validation.validate_on_property_change
        {
            self.validate_navigation_slot(e, nav)?;
        }

        if sync_fks && !np.foreign_keys.is_empty() {
            let state = self.state_of(e);
            let skip = state.is_deleted()
                || (new.is_none()
                    && (state.is_detached() || old.is_some_and(|o| self.state_of(o).is_detached())));
            if !skip {
                let parent_key = match new {
                    Some(n) => Some(self.entity_key(n)?),
                    None => None,
                };
                for (i, fk) in np.foreign_keys.iter().enumerate() {
                    let fk_dp = &et.data_properties[*fk];
                    // Key components stay put: the navigation never rekeys `e`.
                    if fk_dp.is_part_of_key {
                        continue;
                    }
                    let value = match &parent_key {
                        Some(k) => k.values()[i].clone(),
                        None => fk_dp.default_value.clone(),
                    };
                    self.write_data(StructuralRef::Entity(e), *fk, value)?;
                }
            }
        }

        let args = PropertyChangedArgs {
            entity: Some(e),
            target: StructuralRef::Entity(e),
            property_name: Some(np.name.clone()),
            property_path: Some(np.name.clone()),
            old_value: Some(PropertyValue::Entity(old)),
            new_value: Some(PropertyValue::Entity(new)),
        };
        self.notify_write(Some(e), args, became_modified);
        Ok(())
    }

    // ── nested values ───────────────────────────────────────────────────

    pub(crate) fn write_complex(
        &mut self,
        target: StructuralRef,
        idx: usize,
        value: ComplexRef,
    ) -> Result<(), CacheError> {
        let schema = Arc::clone(&self.schema);
        let st = schema.structural_type(self.structural_type_id(target)?);
        let dp = &st.data_properties()[idx];
        let Some(ct) = dp.complex_type else {
            return Err(CacheError::argument(format!(
                "'{}' is not a complex property",
                dp.name
            )));
        };
        if !dp.is_scalar {
            return Err(CacheError::operation(format!(
                "complex collection '{}' cannot be assigned; mutate the collection instead",
                dp.name
            )));
        }
        if self.complex(value)?.complex_type != ct {
            return Err(CacheError::argument(format!(
                "'{}' expects a '{}' value",
                dp.name,
                schema.complex_type(ct).name
            )));
        }
        let PropertySlot::Complex(existing) = self.slots(target)?[idx] else {
            return Err(CacheError::consistency(format!(
                "complex property '{}' has no nested value",
                dp.name
            )));
        };
        if existing == value {
            return Ok(());
        }
        self.copy_complex_into(value, existing)
    }

    /// Writes every field of `src` into `dst` through the interceptor.
    fn copy_complex_into(&mut self, src: ComplexRef, dst: ComplexRef) -> Result<(), CacheError> {
        let src_slots = self.complex(src)?.data.clone();
        for (i, slot) in src_slots.into_iter().enumerate() {
            match slot {
                PropertySlot::Value(v) => self.write_data(StructuralRef::Complex(dst), i, v)?,
                PropertySlot::Complex(inner_src) => {
                    if let PropertySlot::Complex(inner_dst) = self.complex(dst)?.data[i] {
                        self.copy_complex_into(inner_src, inner_dst)?;
                    }
                }
                PropertySlot::PrimitiveCollection(items) => {
                    let len = match &self.complex(dst)?.data[i] {
                        PropertySlot::PrimitiveCollection(c) => c.items.len(),
                        _ => 0,
                    };
                    self.splice_primitive_at(StructuralRef::Complex(dst), i, 0, len, items.items)?;
                }
                PropertySlot::ComplexCollection(items) => {
                    let len = match &self.complex(dst)?.data[i] {
                        PropertySlot::ComplexCollection(c) => c.items.len(),
                        _ => 0,
                    };
                    let mut copies = Vec::with_capacity(items.items.len());
                    for item in items.items {
                        copies.push(self.clone_complex(item)?);
                    }
                    self.splice_complex_at(StructuralRef::Complex(dst), i, 0, len, &copies)?;
                }
            }
        }
        Ok(())
    }

    /// Deep copy of a nested value as a new standalone value.
    pub fn clone_complex(&mut self, src: ComplexRef) -> Result<ComplexRef, CacheError> {
        let ct = self.complex(src)?.complex_type;
        let copy = self.alloc_complex(ct, None);
        let src_slots = self.complex(src)?.data.clone();
        for (i, slot) in src_slots.into_iter().enumerate() {
            let new_slot = match slot {
                PropertySlot::Value(v) => PropertySlot::Value(v),
                PropertySlot::PrimitiveCollection(c) => {
                    PropertySlot::PrimitiveCollection(crate::collection::PrimitiveCollection {
                        items: c.items,
                        original: None,
                    })
                }
                PropertySlot::Complex(inner) => {
                    let inner_copy = self.clone_complex(inner)?;
                    self.complex_mut(inner_copy)?.aspect.parent = Some(crate::aspect::ComplexParent {
                        owner: StructuralRef::Complex(copy),
                        property: i,
                    });
                    PropertySlot::Complex(inner_copy)
                }
                PropertySlot::ComplexCollection(c) => {
                    let mut items = Vec::with_capacity(c.items.len());
                    for item in c.items {
                        let item_copy = self.clone_complex(item)?;
                        self.complex_mut(item_copy)?.aspect.parent =
                            Some(crate::aspect::ComplexParent {
                                owner: StructuralRef::Complex(copy),
                                property: i,
                            });
                        items.push(item_copy);
                    }
                    PropertySlot::ComplexCollection(crate::collection::ComplexCollection {
                        items,
                        ..Default::default()
                    })
                }
            };
            self.complex_mut(copy)?.data[i] = new_slot;
        }
        Ok(copy)
    }
}
