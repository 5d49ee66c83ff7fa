// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The entity manager: arenas, identity groups, and notification plumbing.
//!
//! Behaviour is split across sibling modules, each adding an
//! `impl EntityManager` block:
//! - `interceptor`: the single property write path,
//! - `relation`: navigation/complex/primitive collection mutation,
//! - `lifecycle`: attach, detach, delete, accept, reject,
//! - `validate`: validation entry points,
//! - `merge`: query/import result merging,
//! - `save`: temporary key fixup and save result application,
//! - `load`: navigation loading through a caller-supplied loader.
use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::aspect::{ComplexAspect, ComplexParent, EntityAspect};
use crate::collection::{
    CollectionChangedArgs, CollectionId, ComplexCollection, PendingPubs, PrimitiveCollection,
    RelationCollection,
};
use crate::error::CacheError;
use crate::event::{Event, EventSwitches, PublishMode, SubscriptionToken};
use crate::group::Group;
use crate::ident::{
    CacheId, ComplexRef, ComplexTypeId, EntityRef, PropertyRef, StructuralRef, StructuralTypeId,
};
use crate::interceptor::coerce_value;
use crate::key::EntityKey;
use crate::key_generator::{DefaultKeyGenerator, KeyGenerator};
use crate::lifecycle::UnattachedChildren;
use crate::merge::adapter::{AdapterRegistry, DefaultJsonAdapter, JsonResultsAdapter};
use crate::metadata::{DataProperty, EntityType, Schema, StructuralType};
use crate::notifications::{
    new_switches, CacheEvents, EntityChangedArgs, EventScope, HasChangesChangedArgs,
    PropertyChangedArgs, ValidationErrorsChangedArgs, COLLECTION_CHANGED, ENTITY_CHANGED,
    HAS_CHANGES_CHANGED, PROPERTY_CHANGED, VALIDATION_ERRORS_CHANGED,
};
use crate::options::CacheOptions;
use crate::record::{ComplexRecord, EntityRecord, NavigationSlot, PropertySlot};
use crate::state::{EntityAction, EntityState};
use crate::validation::ValidationError;
use crate::value::DataValue;

/// Identity-mapped, change-tracked cache of entities.
pub struct EntityManager {
    pub(crate) id: CacheId,
    pub(crate) schema: Arc<Schema>,
    pub(crate) options: CacheOptions,
    pub(crate) adapter: Box<dyn JsonResultsAdapter>,
    pub(crate) key_generator: Box<dyn KeyGenerator>,
    pub(crate) entities: Vec<EntityRecord>,
    pub(crate) complexes: Vec<ComplexRecord>,
    free_entities: Vec<u32>,
    free_complexes: Vec<u32>,
    pub(crate) groups: Vec<Group>,
    pub(crate) unattached: FxHashMap<EntityKey, Vec<UnattachedChildren>>,
    /// Bulk-load flag: suppresses state transitions, original-value capture,
    /// and property notifications.
    pub(crate) is_loading: bool,
    pub(crate) is_rejecting: bool,
    pub(crate) in_key_fixup: bool,
    pub(crate) pending_pubs: Option<PendingPubs>,
    pub(crate) has_changes: bool,
    publish_mode: PublishMode,
    events: CacheEvents,
    collection_channels: FxHashMap<CollectionId, Event<CollectionChangedArgs>>,
    switches: EventSwitches<EventScope>,
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("id", &self.id)
            .field("entities", &(self.entities.len() - self.free_entities.len()))
            .field("attached", &self.groups.iter().map(Group::len).sum::<usize>())
            .field("has_changes", &self.has_changes)
            .finish_non_exhaustive()
    }
}

impl EntityManager {
    /// Creates an empty cache over `schema` with default options.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::build(schema, CacheOptions::default(), Box::new(DefaultJsonAdapter))
    }

    /// Creates an empty cache, resolving the results adapter by name from
    /// the built-in registry.
    pub fn with_options(schema: Arc<Schema>, options: CacheOptions) -> Result<Self, CacheError> {
        Self::with_registry(schema, options, &AdapterRegistry::with_defaults())
    }

    /// Creates an empty cache, resolving the results adapter from `registry`.
    pub fn with_registry(
        schema: Arc<Schema>,
        options: CacheOptions,
        registry: &AdapterRegistry,
    ) -> Result<Self, CacheError> {
        let adapter = registry.resolve(&options.adapter_name)?;
        Ok(Self::build(schema, options, adapter))
    }

    fn build(
        schema: Arc<Schema>,
        options: CacheOptions,
        adapter: Box<dyn JsonResultsAdapter>,
    ) -> Self {
        let groups = schema.entity_types().map(|t| Group::new(t.id)).collect();
        Self {
            id: CacheId::fresh(),
            schema,
            options,
            adapter,
            key_generator: Box::new(DefaultKeyGenerator::default()),
            entities: Vec::new(),
            complexes: Vec::new(),
            free_entities: Vec::new(),
            free_complexes: Vec::new(),
            groups,
            unattached: FxHashMap::default(),
            is_loading: false,
            is_rejecting: false,
            in_key_fixup: false,
            pending_pubs: None,
            has_changes: false,
            publish_mode: PublishMode::Sync,
            events: CacheEvents::default(),
            collection_channels: FxHashMap::default(),
            switches: new_switches(),
        }
    }

    /// Identity of this cache.
    #[must_use]
    pub fn id(&self) -> CacheId {
        self.id
    }

    /// Schema shared by every entity in this cache.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Active options.
    #[must_use]
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Replaces the key generator used for temporary keys.
    pub fn set_key_generator(&mut self, generator: Box<dyn KeyGenerator>) {
        self.key_generator = generator;
    }

    /// True while a bulk load (attach, detach, merge) is running.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    // ── handle validation ───────────────────────────────────────────────

    pub(crate) fn check_entity(&self, e: EntityRef) -> Result<usize, CacheError> {
        if e.cache != self.id {
            return Err(CacheError::operation(format!(
                "{e:?} belongs to a different EntityManager"
            )));
        }
        let ix = e.index as usize;
        match self.entities.get(ix) {
            None => Err(CacheError::argument(format!("{e:?} is not a known entity"))),
            Some(r) if r.released || r.generation != e.generation => {
                Err(CacheError::argument(format!("{e:?} was released")))
            }
            Some(_) => Ok(ix),
        }
    }

    pub(crate) fn check_complex(&self, c: ComplexRef) -> Result<usize, CacheError> {
        if c.cache != self.id {
            return Err(CacheError::operation(format!(
                "{c:?} belongs to a different EntityManager"
            )));
        }
        let ix = c.index as usize;
        match self.complexes.get(ix) {
            None => Err(CacheError::argument(format!("{c:?} is not a known complex value"))),
            Some(r) if r.released || r.generation != c.generation => {
                Err(CacheError::argument(format!("{c:?} was released")))
            }
            Some(_) => Ok(ix),
        }
    }

    pub(crate) fn entity(&self, e: EntityRef) -> Result<&EntityRecord, CacheError> {
        let ix = self.check_entity(e)?;
        Ok(&self.entities[ix])
    }

    pub(crate) fn entity_mut(&mut self, e: EntityRef) -> Result<&mut EntityRecord, CacheError> {
        let ix = self.check_entity(e)?;
        Ok(&mut self.entities[ix])
    }

    pub(crate) fn complex(&self, c: ComplexRef) -> Result<&ComplexRecord, CacheError> {
        let ix = self.check_complex(c)?;
        Ok(&self.complexes[ix])
    }

    pub(crate) fn complex_mut(&mut self, c: ComplexRef) -> Result<&mut ComplexRecord, CacheError> {
        let ix = self.check_complex(c)?;
        Ok(&mut self.complexes[ix])
    }

    /// State of an already validated handle.
    pub(crate) fn state_of(&self, e: EntityRef) -> EntityState {
        self.entities
            .get(e.index as usize)
            .filter(|r| r.generation == e.generation)
            .map_or(EntityState::Detached, |r| r.aspect.state)
    }

    pub(crate) fn is_attached(&self, e: EntityRef) -> bool {
        self.entities
            .get(e.index as usize)
            .is_some_and(|r| r.generation == e.generation && r.aspect.slot.is_some())
    }

    pub(crate) fn structural_type_id(
        &self,
        target: StructuralRef,
    ) -> Result<StructuralTypeId, CacheError> {
        Ok(match target {
            StructuralRef::Entity(e) => StructuralTypeId::Entity(self.entity(e)?.entity_type),
            StructuralRef::Complex(c) => StructuralTypeId::Complex(self.complex(c)?.complex_type),
        })
    }

    pub(crate) fn slots(&self, target: StructuralRef) -> Result<&[PropertySlot], CacheError> {
        Ok(match target {
            StructuralRef::Entity(e) => &self.entity(e)?.data,
            StructuralRef::Complex(c) => &self.complex(c)?.data,
        })
    }

    pub(crate) fn slot_mut(
        &mut self,
        target: StructuralRef,
        idx: usize,
    ) -> Result<&mut PropertySlot, CacheError> {
        let data = match target {
            StructuralRef::Entity(e) => &mut self.entity_mut(e)?.data,
            StructuralRef::Complex(c) => &mut self.complex_mut(c)?.data,
        };
        data.get_mut(idx)
            .ok_or_else(|| CacheError::consistency(format!("property slot {idx} missing")))
    }

    pub(crate) fn original_values_mut(
        &mut self,
        target: StructuralRef,
    ) -> Result<&mut BTreeMap<usize, DataValue>, CacheError> {
        Ok(match target {
            StructuralRef::Entity(e) => &mut self.entity_mut(e)?.aspect.original_values,
            StructuralRef::Complex(c) => &mut self.complex_mut(c)?.aspect.original_values,
        })
    }

    /// Scalar value in a data slot (`Null` for non-value slots).
    pub(crate) fn raw_value(&self, target: StructuralRef, idx: usize) -> Result<DataValue, CacheError> {
        match self.slots(target)?.get(idx) {
            Some(PropertySlot::Value(v)) => Ok(v.clone()),
            Some(_) => Ok(DataValue::Null),
            None => Err(CacheError::consistency(format!("property slot {idx} missing"))),
        }
    }

    pub(crate) fn nav_slot(&self, e: EntityRef, nav: usize) -> Result<&NavigationSlot, CacheError> {
        self.entity(e)?
            .navigation
            .get(nav)
            .ok_or_else(|| CacheError::consistency(format!("navigation slot {nav} missing")))
    }

    pub(crate) fn nav_slot_mut(
        &mut self,
        e: EntityRef,
        nav: usize,
    ) -> Result<&mut NavigationSlot, CacheError> {
        self.entity_mut(e)?
            .navigation
            .get_mut(nav)
            .ok_or_else(|| CacheError::consistency(format!("navigation slot {nav} missing")))
    }

    pub(crate) fn scalar_nav(&self, e: EntityRef, nav: usize) -> Result<Option<EntityRef>, CacheError> {
        match self.nav_slot(e, nav)? {
            NavigationSlot::Scalar(v) => Ok(*v),
            NavigationSlot::Collection(_) => Err(CacheError::consistency(format!(
                "navigation {nav} is not scalar"
            ))),
        }
    }

    pub(crate) fn relation(&self, e: EntityRef, nav: usize) -> Result<&RelationCollection, CacheError> {
        match self.nav_slot(e, nav)? {
            NavigationSlot::Collection(c) => Ok(c),
            NavigationSlot::Scalar(_) => Err(CacheError::consistency(format!(
                "navigation {nav} is not a collection"
            ))),
        }
    }

    pub(crate) fn relation_mut(
        &mut self,
        e: EntityRef,
        nav: usize,
    ) -> Result<&mut RelationCollection, CacheError> {
        match self.nav_slot_mut(e, nav)? {
            NavigationSlot::Collection(c) => Ok(c),
            NavigationSlot::Scalar(_) => Err(CacheError::consistency(format!(
                "navigation {nav} is not a collection"
            ))),
        }
    }

    /// Entity at the top of a nested value's parent chain.
    pub(crate) fn root_of(&self, target: StructuralRef) -> Result<Option<EntityRef>, CacheError> {
        let mut current = target;
        loop {
            match current {
                StructuralRef::Entity(e) => {
                    self.check_entity(e)?;
                    return Ok(Some(e));
                }
                StructuralRef::Complex(c) => match self.complex(c)?.aspect.parent {
                    Some(parent) => current = parent.owner,
                    None => return Ok(None),
                },
            }
        }
    }

    /// Dotted path from the root entity to `name` on `target`.
    pub(crate) fn property_path(&self, target: StructuralRef, name: &str) -> Result<String, CacheError> {
        let mut parts = vec![name.to_owned()];
        let mut current = target;
        while let StructuralRef::Complex(c) = current {
            let Some(parent) = self.complex(c)?.aspect.parent else {
                break;
            };
            let owner_type = self.structural_type_id(parent.owner)?;
            let prop = &self.schema.structural_type(owner_type).data_properties()[parent.property];
            parts.push(prop.name.clone());
            current = parent.owner;
        }
        parts.reverse();
        Ok(parts.join("."))
    }

    // ── arena allocation ────────────────────────────────────────────────

    pub(crate) fn alloc_entity(&mut self, et: &EntityType) -> EntityRef {
        let e = match self.free_entities.pop() {
            Some(index) => EntityRef {
                cache: self.id,
                index,
                generation: self.entities[index as usize].generation,
            },
            None => EntityRef {
                cache: self.id,
                index: self.entities.len() as u32,
                generation: 0,
            },
        };
        let data = et
            .data_properties
            .iter()
            .enumerate()
            .map(|(i, dp)| {
                self.alloc_slot(
                    dp,
                    ComplexParent {
                        owner: StructuralRef::Entity(e),
                        property: i,
                    },
                )
            })
            .collect();
        let navigation = et
            .navigation_properties
            .iter()
            .map(|np| {
                if np.is_scalar {
                    NavigationSlot::Scalar(None)
                } else {
                    NavigationSlot::Collection(RelationCollection::default())
                }
            })
            .collect();
        let record = EntityRecord {
            entity_type: et.id,
            data,
            navigation,
            aspect: EntityAspect::default(),
            generation: e.generation,
            released: false,
        };
        match self.entities.get_mut(e.index as usize) {
            Some(slot) => *slot = record,
            None => self.entities.push(record),
        }
        e
    }

    pub(crate) fn alloc_complex(
        &mut self,
        complex_type: ComplexTypeId,
        parent: Option<ComplexParent>,
    ) -> ComplexRef {
        let c = match self.free_complexes.pop() {
            Some(index) => ComplexRef {
                cache: self.id,
                index,
                generation: self.complexes[index as usize].generation,
            },
            None => ComplexRef {
                cache: self.id,
                index: self.complexes.len() as u32,
                generation: 0,
            },
        };
        // Claim the index before allocating nested children.
        let record = ComplexRecord {
            complex_type,
            data: Vec::new(),
            aspect: ComplexAspect {
                parent,
                original_values: BTreeMap::new(),
            },
            generation: c.generation,
            released: false,
        };
        match self.complexes.get_mut(c.index as usize) {
            Some(slot) => *slot = record,
            None => self.complexes.push(record),
        }
        let schema = Arc::clone(&self.schema);
        let data = schema
            .complex_type(complex_type)
            .data_properties
            .iter()
            .enumerate()
            .map(|(i, dp)| {
                self.alloc_slot(
                    dp,
                    ComplexParent {
                        owner: StructuralRef::Complex(c),
                        property: i,
                    },
                )
            })
            .collect();
        self.complexes[c.index as usize].data = data;
        c
    }

    /// Returns `c` and every nested value under it to the free list.
    pub(crate) fn free_complex(&mut self, c: ComplexRef) {
        let mut stack = vec![c];
        while let Some(c) = stack.pop() {
            let Some(record) = self.complexes.get_mut(c.index as usize) else {
                continue;
            };
            if record.released || record.generation != c.generation {
                continue;
            }
            for slot in std::mem::take(&mut record.data) {
                match slot {
                    PropertySlot::Complex(child) => stack.push(child),
                    PropertySlot::ComplexCollection(col) => stack.extend(col.items),
                    PropertySlot::Value(_) | PropertySlot::PrimitiveCollection(_) => {}
                }
            }
            record.aspect = ComplexAspect::default();
            record.released = true;
            record.generation = record.generation.wrapping_add(1);
            self.free_complexes.push(c.index);
        }
    }

    /// Drops the collection channels of every collection owned by `owners`.
    pub(crate) fn drop_collection_channels(&mut self, owners: &[StructuralRef]) {
        self.collection_channels
            .retain(|id, _| !owners.contains(&id.owner));
    }

    /// Returns a detached entity's slot, and its nested values, to the
    /// arena. `e` and every handle to its nested values become invalid.
    ///
    /// Entities returned by no-tracking merges are never attached; callers
    /// release them once done.
    pub fn release_entity(&mut self, e: EntityRef) -> Result<(), CacheError> {
        let ix = self.check_entity(e)?;
        if self.is_attached(e) {
            return Err(CacheError::operation(format!(
                "{e:?} is attached; detach it before releasing"
            )));
        }
        self.with_loading(|this| this.remove_from_relations(e, false))?;
        let complexes = self.owned_complexes(StructuralRef::Entity(e))?;
        let mut owners = vec![StructuralRef::Entity(e)];
        owners.extend(complexes.iter().copied().map(StructuralRef::Complex));
        self.drop_collection_channels(&owners);
        for c in complexes {
            self.free_complex(c);
        }
        self.unattached.retain(|_, waiting| {
            for w in waiting.iter_mut() {
                w.children.retain(|child| *child != e);
            }
            waiting.retain(|w| !w.children.is_empty());
            !waiting.is_empty()
        });
        let record = &mut self.entities[ix];
        record.data.clear();
        record.navigation.clear();
        record.aspect.reset();
        record.released = true;
        record.generation = record.generation.wrapping_add(1);
        self.free_entities.push(e.index);
        debug!(entity = ?e, "released");
        Ok(())
    }

    /// Returns a standalone nested value, and everything nested under it,
    /// to the arena.
    pub fn release_complex(&mut self, c: ComplexRef) -> Result<(), CacheError> {
        if self.complex(c)?.aspect.parent.is_some() {
            return Err(CacheError::operation(format!(
                "{c:?} belongs to an owner; remove it before releasing"
            )));
        }
        let mut owners = vec![StructuralRef::Complex(c)];
        owners.extend(
            self.owned_complexes(StructuralRef::Complex(c))?
                .into_iter()
                .map(StructuralRef::Complex),
        );
        self.drop_collection_channels(&owners);
        self.free_complex(c);
        Ok(())
    }

    fn alloc_slot(&mut self, dp: &DataProperty, parent: ComplexParent) -> PropertySlot {
        match (dp.complex_type, dp.is_scalar) {
            (Some(ct), true) => PropertySlot::Complex(self.alloc_complex(ct, Some(parent))),
            (Some(_), false) => PropertySlot::ComplexCollection(ComplexCollection::default()),
            (None, false) => PropertySlot::PrimitiveCollection(PrimitiveCollection::default()),
            (None, true) => PropertySlot::Value(dp.default_value.clone()),
        }
    }

    fn apply_initial_values(
        &mut self,
        target: StructuralRef,
        values: &[(&str, DataValue)],
    ) -> Result<(), CacheError> {
        let schema = Arc::clone(&self.schema);
        let st = schema.structural_type(self.structural_type_id(target)?);
        for (name, value) in values {
            let (idx, dp) = st.data_property(name).ok_or_else(|| {
                CacheError::argument(format!("'{}' has no data property '{name}'", st.name()))
            })?;
            if dp.is_complex() || !dp.is_scalar {
                return Err(CacheError::argument(format!(
                    "'{name}' is not a scalar data property"
                )));
            }
            *self.slot_mut(target, idx)? = PropertySlot::Value(coerce_value(dp, value.clone()));
        }
        Ok(())
    }

    /// Creates a detached entity of `type_name` with defaults, then applies
    /// `values` to scalar data properties.
    pub fn create_entity(
        &mut self,
        type_name: &str,
        values: &[(&str, DataValue)],
    ) -> Result<EntityRef, CacheError> {
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type_by_name(type_name)?;
        let e = self.alloc_entity(et);
        self.apply_initial_values(StructuralRef::Entity(e), values)?;
        Ok(e)
    }

    /// Creates a standalone nested value of `type_name`.
    pub fn create_complex(
        &mut self,
        type_name: &str,
        values: &[(&str, DataValue)],
    ) -> Result<ComplexRef, CacheError> {
        let schema = Arc::clone(&self.schema);
        let ct = schema.complex_type_by_name(type_name)?;
        let c = self.alloc_complex(ct.id, None);
        self.apply_initial_values(StructuralRef::Complex(c), values)?;
        Ok(c)
    }

    // ── read API ────────────────────────────────────────────────────────

    /// Entity type of `e`.
    pub fn entity_type(&self, e: EntityRef) -> Result<&EntityType, CacheError> {
        Ok(self.schema.entity_type(self.entity(e)?.entity_type))
    }

    /// Structural type of any object.
    pub fn structural_type(&self, target: impl Into<StructuralRef>) -> Result<StructuralType<'_>, CacheError> {
        Ok(self.schema.structural_type(self.structural_type_id(target.into())?))
    }

    /// Change tracking aspect of `e`.
    pub fn aspect(&self, e: EntityRef) -> Result<&EntityAspect, CacheError> {
        Ok(&self.entity(e)?.aspect)
    }

    /// Change tracking aspect of a nested value.
    pub fn complex_aspect(&self, c: ComplexRef) -> Result<&ComplexAspect, CacheError> {
        Ok(&self.complex(c)?.aspect)
    }

    /// Lifecycle state of `e`.
    pub fn entity_state(&self, e: EntityRef) -> Result<EntityState, CacheError> {
        Ok(self.entity(e)?.aspect.state)
    }

    /// Root entity of any object (`None` for standalone nested values).
    pub fn root_entity(&self, target: impl Into<StructuralRef>) -> Result<Option<EntityRef>, CacheError> {
        self.root_of(target.into())
    }

    /// Resolves a property name on any object.
    pub fn resolve_property(
        &self,
        target: StructuralRef,
        name: &str,
    ) -> Result<PropertyRef, CacheError> {
        let st = self.structural_type_id(target)?;
        let found = match st {
            StructuralTypeId::Entity(id) => self.schema.entity_type(id).property(name),
            StructuralTypeId::Complex(id) => self
                .schema
                .complex_type(id)
                .data_property(name)
                .map(|(i, _)| PropertyRef::Data(i)),
        };
        found.ok_or_else(|| {
            CacheError::argument(format!(
                "'{}' has no property '{name}'",
                self.schema.structural_type(st).name()
            ))
        })
    }

    fn data_index(&self, target: StructuralRef, name: &str) -> Result<usize, CacheError> {
        match self.resolve_property(target, name)? {
            PropertyRef::Data(i) => Ok(i),
            PropertyRef::Navigation(_) => Err(CacheError::argument(format!(
                "'{name}' is a navigation property"
            ))),
        }
    }

    pub(crate) fn navigation_index(&self, e: EntityRef, name: &str) -> Result<usize, CacheError> {
        match self.resolve_property(StructuralRef::Entity(e), name)? {
            PropertyRef::Navigation(i) => Ok(i),
            PropertyRef::Data(_) => Err(CacheError::argument(format!(
                "'{name}' is a data property"
            ))),
        }
    }

    /// Scalar data value.
    pub fn get_value(&self, target: impl Into<StructuralRef>, name: &str) -> Result<DataValue, CacheError> {
        let target = target.into();
        let idx = self.data_index(target, name)?;
        match &self.slots(target)?[idx] {
            PropertySlot::Value(v) => Ok(v.clone()),
            _ => Err(CacheError::argument(format!("'{name}' is not a scalar data property"))),
        }
    }

    /// Single-valued navigation.
    pub fn get_navigation(&self, e: EntityRef, name: &str) -> Result<Option<EntityRef>, CacheError> {
        let nav = self.navigation_index(e, name)?;
        match self.nav_slot(e, nav)? {
            NavigationSlot::Scalar(v) => Ok(*v),
            NavigationSlot::Collection(_) => Err(CacheError::argument(format!(
                "'{name}' is a collection navigation"
            ))),
        }
    }

    /// Collection navigation.
    pub fn get_collection(&self, e: EntityRef, name: &str) -> Result<&RelationCollection, CacheError> {
        let nav = self.navigation_index(e, name)?;
        match self.nav_slot(e, nav)? {
            NavigationSlot::Collection(c) => Ok(c),
            NavigationSlot::Scalar(_) => Err(CacheError::argument(format!(
                "'{name}' is a scalar navigation"
            ))),
        }
    }

    /// Nested value held by a scalar complex property.
    pub fn get_complex(&self, target: impl Into<StructuralRef>, name: &str) -> Result<ComplexRef, CacheError> {
        let target = target.into();
        let idx = self.data_index(target, name)?;
        match &self.slots(target)?[idx] {
            PropertySlot::Complex(c) => Ok(*c),
            _ => Err(CacheError::argument(format!("'{name}' is not a complex property"))),
        }
    }

    /// Nested values held by a complex collection property.
    pub fn get_complex_collection(
        &self,
        target: impl Into<StructuralRef>,
        name: &str,
    ) -> Result<&ComplexCollection, CacheError> {
        let target = target.into();
        let idx = self.data_index(target, name)?;
        match &self.slots(target)?[idx] {
            PropertySlot::ComplexCollection(c) => Ok(c),
            _ => Err(CacheError::argument(format!(
                "'{name}' is not a complex collection property"
            ))),
        }
    }

    /// Scalar values held by a primitive collection property.
    pub fn get_primitive_collection(
        &self,
        target: impl Into<StructuralRef>,
        name: &str,
    ) -> Result<&PrimitiveCollection, CacheError> {
        let target = target.into();
        let idx = self.data_index(target, name)?;
        match &self.slots(target)?[idx] {
            PropertySlot::PrimitiveCollection(c) => Ok(c),
            _ => Err(CacheError::argument(format!(
                "'{name}' is not a primitive collection property"
            ))),
        }
    }

    /// Original values captured since the last accept, by property name.
    pub fn original_values(
        &self,
        target: impl Into<StructuralRef>,
    ) -> Result<BTreeMap<String, DataValue>, CacheError> {
        let target = target.into();
        let originals = match target {
            StructuralRef::Entity(e) => &self.entity(e)?.aspect.original_values,
            StructuralRef::Complex(c) => &self.complex(c)?.aspect.original_values,
        };
        let st = self.schema.structural_type(self.structural_type_id(target)?);
        Ok(originals
            .iter()
            .map(|(ix, v)| (st.data_properties()[*ix].name.clone(), v.clone()))
            .collect())
    }

    /// Original value of one property, if it changed since the last accept.
    pub fn original_value(
        &self,
        target: impl Into<StructuralRef>,
        name: &str,
    ) -> Result<Option<DataValue>, CacheError> {
        let target = target.into();
        let idx = self.data_index(target, name)?;
        let originals = match target {
            StructuralRef::Entity(e) => &self.entity(e)?.aspect.original_values,
            StructuralRef::Complex(c) => &self.complex(c)?.aspect.original_values,
        };
        Ok(originals.get(&idx).cloned())
    }

    /// Key of `e` computed from its current key property values.
    pub fn entity_key(&self, e: EntityRef) -> Result<EntityKey, CacheError> {
        let record = self.entity(e)?;
        let et = self.schema.entity_type(record.entity_type);
        let values = et
            .key_properties
            .iter()
            .map(|ix| match &record.data[*ix] {
                PropertySlot::Value(v) => v.clone(),
                _ => DataValue::Null,
            })
            .collect();
        EntityKey::new(et, values)
    }

    /// Cached key of `e`, recomputed when missing or when `force_refresh`.
    pub fn get_key(&mut self, e: EntityRef, force_refresh: bool) -> Result<EntityKey, CacheError> {
        if !force_refresh {
            if let Some(k) = &self.entity(e)?.aspect.key {
                return Ok(k.clone());
            }
        }
        let key = self.entity_key(e)?;
        self.entity_mut(e)?.aspect.key = Some(key.clone());
        Ok(key)
    }

    /// Attached entity with `key`, if any.
    #[must_use]
    pub fn find_by_key(&self, key: &EntityKey) -> Option<EntityRef> {
        self.groups
            .get(key.entity_type().0 as usize)
            .and_then(|g| g.find_by_key(key))
    }

    /// Attached entity of `type_name` with key `values`, if any.
    pub fn find_by_key_values(
        &self,
        type_name: &str,
        values: Vec<DataValue>,
    ) -> Result<Option<EntityRef>, CacheError> {
        let key = EntityKey::for_type_name(&self.schema, type_name, values)?;
        Ok(self.find_by_key(&key))
    }

    /// Identity group for an entity type.
    pub fn group(&self, type_name: &str) -> Result<&Group, CacheError> {
        let id = self.schema.entity_type_by_name(type_name)?.id;
        Ok(&self.groups[id.0 as usize])
    }

    pub(crate) fn group_mut_and_aspect(
        &mut self,
        e: EntityRef,
    ) -> Result<(&mut Group, &mut EntityAspect), CacheError> {
        let ix = self.check_entity(e)?;
        let record = &mut self.entities[ix];
        let group = &mut self.groups[record.entity_type.0 as usize];
        Ok((group, &mut record.aspect))
    }

    fn selected_groups(&self, types: Option<&[&str]>) -> Result<Vec<&Group>, CacheError> {
        match types {
            None => Ok(self.groups.iter().collect()),
            Some(names) => names.iter().map(|n| self.group(n)).collect(),
        }
    }

    /// Attached entities, optionally filtered by type names and states.
    pub fn get_entities(
        &self,
        types: Option<&[&str]>,
        states: Option<&[EntityState]>,
    ) -> Result<Vec<EntityRef>, CacheError> {
        Ok(self
            .selected_groups(types)?
            .into_iter()
            .flat_map(|g| g.entities(states, |e| self.state_of(e)))
            .collect())
    }

    /// Attached entities with pending changes.
    pub fn get_changes(&self, types: Option<&[&str]>) -> Result<Vec<EntityRef>, CacheError> {
        self.get_entities(
            types,
            Some(&[EntityState::Added, EntityState::Modified, EntityState::Deleted]),
        )
    }

    /// True when any selected entity has pending changes.
    pub fn has_changes(&self, types: Option<&[&str]>) -> Result<bool, CacheError> {
        Ok(self
            .selected_groups(types)?
            .into_iter()
            .any(|g| g.has_pending_changes(|e| self.state_of(e))))
    }

    // ── notifications ───────────────────────────────────────────────────

    /// Notification channels, for subscribing.
    pub fn events_mut(&mut self) -> &mut CacheEvents {
        &mut self.events
    }

    /// Enable switches for the notification channels.
    pub fn switches_mut(&mut self) -> &mut EventSwitches<EventScope> {
        &mut self.switches
    }

    /// Delivery mode for subsequent notifications.
    pub fn set_publish_mode(&mut self, mode: PublishMode) {
        self.publish_mode = mode;
    }

    /// Delivers deferred notifications; returns how many ran.
    pub fn run_deferred_notifications(&mut self) -> usize {
        let mut delivered = self.events.flush_deferred();
        for ch in self.collection_channels.values_mut() {
            delivered += ch.flush_deferred();
        }
        delivered
    }

    /// Subscribes to changes of one collection property.
    pub fn subscribe_collection_changed(
        &mut self,
        owner: impl Into<StructuralRef>,
        property: &str,
        callback: impl FnMut(&CollectionChangedArgs) + Send + 'static,
    ) -> Result<SubscriptionToken, CacheError> {
        let owner = owner.into();
        let property = self.resolve_property(owner, property)?;
        let id = CollectionId { owner, property };
        Ok(self
            .collection_channels
            .entry(id)
            .or_insert_with(|| Event::new(COLLECTION_CHANGED))
            .subscribe(callback))
    }

    /// Removes a per-collection subscription.
    pub fn unsubscribe_collection_changed(
        &mut self,
        owner: impl Into<StructuralRef>,
        property: &str,
        token: SubscriptionToken,
    ) -> Result<bool, CacheError> {
        let owner = owner.into();
        let property = self.resolve_property(owner, property)?;
        let id = CollectionId { owner, property };
        Ok(self
            .collection_channels
            .get_mut(&id)
            .is_some_and(|ch| ch.unsubscribe(token)))
    }

    fn scope_of(entity: Option<EntityRef>) -> EventScope {
        entity.map_or(EventScope::Cache, EventScope::Entity)
    }

    pub(crate) fn publish_entity_changed(
        &mut self,
        action: EntityAction,
        entity: Option<EntityRef>,
        property: Option<PropertyChangedArgs>,
    ) {
        if !self.switches.is_enabled(ENTITY_CHANGED, &Self::scope_of(entity)) {
            return;
        }
        self.events.entity_changed.publish(
            EntityChangedArgs {
                action,
                entity,
                property,
            },
            self.publish_mode,
        );
    }

    pub(crate) fn publish_property_changed(&mut self, args: PropertyChangedArgs) {
        if !self.switches.is_enabled(PROPERTY_CHANGED, &Self::scope_of(args.entity)) {
            return;
        }
        self.events.property_changed.publish(args, self.publish_mode);
    }

    pub(crate) fn publish_validation_change(
        &mut self,
        entity: EntityRef,
        added: Vec<ValidationError>,
        removed: Vec<ValidationError>,
    ) {
        if added.is_empty() && removed.is_empty() {
            return;
        }
        if !self
            .switches
            .is_enabled(VALIDATION_ERRORS_CHANGED, &EventScope::Entity(entity))
        {
            return;
        }
        self.events.validation_errors_changed.publish(
            ValidationErrorsChangedArgs {
                entity,
                added,
                removed,
            },
            self.publish_mode,
        );
    }

    /// Routes a collection change: folded while a bulk merge is running,
    /// delivered otherwise.
    pub(crate) fn publish_collection_changed(&mut self, args: CollectionChangedArgs) {
        if args.added.is_empty() && args.removed.is_empty() {
            return;
        }
        if let Some(pending) = &mut self.pending_pubs {
            pending.fold(args);
            return;
        }
        self.deliver_collection_changed(args);
    }

    pub(crate) fn deliver_collection_changed(&mut self, args: CollectionChangedArgs) {
        let root = self.root_of(args.collection.owner).ok().flatten();
        if !self.switches.is_enabled(COLLECTION_CHANGED, &Self::scope_of(root)) {
            return;
        }
        if let Some(ch) = self.collection_channels.get_mut(&args.collection) {
            ch.publish(args.clone(), self.publish_mode);
        }
        self.events.collection_changed.publish(args, self.publish_mode);
    }

    /// Reports a lifecycle state change and keeps the aggregate flag current.
    pub(crate) fn notify_state_change(&mut self, e: EntityRef, needs_save: bool) {
        self.publish_entity_changed(EntityAction::EntityStateChange, Some(e), None);
        if needs_save {
            if !self.has_changes {
                self.set_has_changes(true);
            }
        } else if self.has_changes {
            self.update_has_changes();
        }
    }

    /// Recomputes the aggregate flag and publishes when it flipped.
    pub(crate) fn update_has_changes(&mut self) {
        let now = self
            .groups
            .iter()
            .any(|g| g.has_pending_changes(|e| self.state_of(e)));
        if now != self.has_changes {
            self.set_has_changes(now);
        }
    }

    fn set_has_changes(&mut self, value: bool) {
        self.has_changes = value;
        debug!(has_changes = value, "aggregate change flag flipped");
        if self.switches.is_enabled(HAS_CHANGES_CHANGED, &EventScope::Cache) {
            self.events
                .has_changes_changed
                .publish(HasChangesChangedArgs { has_changes: value }, self.publish_mode);
        }
    }

    // ── scoped flags ────────────────────────────────────────────────────

    /// Runs `f` with the bulk-load flag set, restoring the previous value.
    pub(crate) fn with_loading<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let prev = std::mem::replace(&mut self.is_loading, true);
        let out = f(self);
        self.is_loading = prev;
        out
    }

    pub(crate) fn with_rejecting<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let prev = std::mem::replace(&mut self.is_rejecting, true);
        let out = f(self);
        self.is_rejecting = prev;
        out
    }

    pub(crate) fn with_key_fixup<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let prev = std::mem::replace(&mut self.in_key_fixup, true);
        let out = f(self);
        self.in_key_fixup = prev;
        out
    }

    /// Runs `f` as a bulk operation: collection notifications are folded and
    /// flushed once `f` finishes, even on error.
    pub(crate) fn with_bulk_operation<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let outer = self.pending_pubs.is_some();
        if !outer {
            self.pending_pubs = Some(PendingPubs::default());
        }
        let out = self.with_loading(f);
        if !outer {
            if let Some(pending) = self.pending_pubs.take() {
                for args in pending.drain() {
                    self.deliver_collection_changed(args);
                }
            }
        }
        out
    }

    /// Detaches everything and resets the cache. Handles stay valid but
    /// refer to detached entities with no related entities.
    pub fn clear(&mut self) {
        for group in &mut self.groups {
            group.clear();
        }
        for record in &mut self.entities {
            record.aspect.reset();
            for slot in &mut record.navigation {
                slot.reset();
            }
        }
        for record in &mut self.complexes {
            record.aspect.original_values.clear();
        }
        self.unattached.clear();
        self.collection_channels.clear();
        self.publish_entity_changed(EntityAction::Clear, None, None);
        if self.has_changes {
            self.set_has_changes(false);
        }
    }
}
