// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Arena records for entities and nested values.

use crate::aspect::{ComplexAspect, EntityAspect};
use crate::collection::{ComplexCollection, PrimitiveCollection, RelationCollection};
use crate::ident::{ComplexRef, ComplexTypeId, EntityRef, EntityTypeId};
use crate::value::DataValue;

/// Storage for one data property.
#[derive(Clone, Debug)]
pub(crate) enum PropertySlot {
    Value(DataValue),
    Complex(ComplexRef),
    ComplexCollection(ComplexCollection),
    PrimitiveCollection(PrimitiveCollection),
}

/// Storage for one navigation property.
#[derive(Clone, Debug)]
pub(crate) enum NavigationSlot {
    Scalar(Option<EntityRef>),
    Collection(RelationCollection),
}

impl NavigationSlot {
    /// Drops every link, keeping the slot's shape.
    pub(crate) fn reset(&mut self) {
        match self {
            Self::Scalar(v) => *v = None,
            Self::Collection(c) => *c = RelationCollection::default(),
        }
    }
}

/// Materialised entity.
///
/// Invariants
/// - `data` and `navigation` are index-aligned with the entity type's
///   property lists.
/// - The entity's key is derived from `data`, never stored separately except
///   as the aspect's cache.
/// - A released record is empty and waits on the manager's free list; its
///   `generation` has moved past every handle issued for it.
#[derive(Clone, Debug)]
pub(crate) struct EntityRecord {
    pub(crate) entity_type: EntityTypeId,
    pub(crate) data: Vec<PropertySlot>,
    pub(crate) navigation: Vec<NavigationSlot>,
    pub(crate) aspect: EntityAspect,
    pub(crate) generation: u32,
    pub(crate) released: bool,
}

/// Materialised nested value.
///
/// Invariants
/// - `data` is index-aligned with the complex type's properties.
/// - A value has at most one parent at a time.
/// - Released records follow the same rules as entity records.
#[derive(Clone, Debug)]
pub(crate) struct ComplexRecord {
    pub(crate) complex_type: ComplexTypeId,
    pub(crate) data: Vec<PropertySlot>,
    pub(crate) aspect: ComplexAspect,
    pub(crate) generation: u32,
    pub(crate) released: bool,
}
