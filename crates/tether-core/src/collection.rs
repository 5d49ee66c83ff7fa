// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Observable collection storage and change-notification payloads.
//!
//! The storage types here are plain data. Mutation goes through the manager
//! (`push`, `splice`, `push_complex`, ...) so inverse wiring, state
//! transitions and notifications stay in one place.
use rustc_hash::FxHashMap;

use crate::ident::{ComplexRef, EntityRef, StructuralRef};
use crate::value::DataValue;

/// Navigation collection: the "many" end of a relationship.
#[derive(Clone, Debug, Default)]
pub struct RelationCollection {
    pub(crate) items: Vec<EntityRef>,
    /// Set while this collection is being mutated; re-entrant pushes return
    /// early.
    pub(crate) in_progress: bool,
    /// Items whose inverse wiring is currently running.
    pub(crate) adds_in_process: Vec<EntityRef>,
    pub(crate) is_loaded: bool,
}

impl RelationCollection {
    /// Members in insertion order.
    #[must_use]
    pub fn items(&self) -> &[EntityRef] {
        &self.items
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Membership test by handle identity.
    #[must_use]
    pub fn contains(&self, entity: EntityRef) -> bool {
        self.items.contains(&entity)
    }

    /// True once the collection was populated from a server result.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub(crate) fn remove(&mut self, entity: EntityRef) -> bool {
        match self.items.iter().position(|e| *e == entity) {
            Some(ix) => {
                self.items.remove(ix);
                true
            }
            None => false,
        }
    }
}

/// Collection of nested values owned by one property.
#[derive(Clone, Debug, Default)]
pub struct ComplexCollection {
    pub(crate) items: Vec<ComplexRef>,
    pub(crate) pending_added: Vec<ComplexRef>,
    pub(crate) pending_removed: Vec<ComplexRef>,
}

impl ComplexCollection {
    /// Members in order.
    #[must_use]
    pub fn items(&self) -> &[ComplexRef] {
        &self.items
    }

    /// Values added since the last accept.
    #[must_use]
    pub fn pending_added(&self) -> &[ComplexRef] {
        &self.pending_added
    }

    /// Values removed since the last accept.
    #[must_use]
    pub fn pending_removed(&self) -> &[ComplexRef] {
        &self.pending_removed
    }

    pub(crate) fn note_added(&mut self, value: ComplexRef) {
        if let Some(ix) = self.pending_removed.iter().position(|c| *c == value) {
            self.pending_removed.remove(ix);
        } else {
            self.pending_added.push(value);
        }
    }

    pub(crate) fn note_removed(&mut self, value: ComplexRef) {
        if let Some(ix) = self.pending_added.iter().position(|c| *c == value) {
            self.pending_added.remove(ix);
        } else {
            self.pending_removed.push(value);
        }
    }

    pub(crate) fn clear_deltas(&mut self) {
        self.pending_added.clear();
        self.pending_removed.clear();
    }
}

/// Collection of scalar values owned by one property.
#[derive(Clone, Debug, Default)]
pub struct PrimitiveCollection {
    pub(crate) items: Vec<DataValue>,
    /// Contents before the first tracked change.
    pub(crate) original: Option<Vec<DataValue>>,
}

impl PrimitiveCollection {
    /// Members in order.
    #[must_use]
    pub fn items(&self) -> &[DataValue] {
        &self.items
    }

    /// Contents before the first tracked change, if any change happened.
    #[must_use]
    pub fn original(&self) -> Option<&[DataValue]> {
        self.original.as_deref()
    }
}

/// Element reported in a collection change.
#[derive(Clone, PartialEq, Debug)]
pub enum CollectionItem {
    /// Navigation collection member.
    Entity(EntityRef),
    /// Nested value member.
    Complex(ComplexRef),
    /// Scalar member.
    Value(DataValue),
}

/// Identity of one collection: an owner and a property.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CollectionId {
    /// Owning object.
    pub owner: StructuralRef,
    /// Navigation index (for relation collections) or data property index.
    pub property: crate::ident::PropertyRef,
}

/// Payload of a collection change notification.
#[derive(Clone, PartialEq, Debug)]
pub struct CollectionChangedArgs {
    /// Which collection changed.
    pub collection: CollectionId,
    /// Property name on the owner.
    pub property_name: String,
    /// Members added.
    pub added: Vec<CollectionItem>,
    /// Members removed.
    pub removed: Vec<CollectionItem>,
}

/// Collection notifications parked during a bulk merge, folded per
/// collection and flushed once at the end.
#[derive(Debug, Default)]
pub(crate) struct PendingPubs {
    order: Vec<CollectionChangedArgs>,
    index: FxHashMap<CollectionId, usize>,
}

impl PendingPubs {
    pub(crate) fn fold(&mut self, args: CollectionChangedArgs) {
        match self.index.get(&args.collection) {
            Some(&ix) => {
                let existing = &mut self.order[ix];
                existing.added.extend(args.added);
                existing.removed.extend(args.removed);
            }
            None => {
                self.index.insert(args.collection, self.order.len());
                self.order.push(args);
            }
        }
    }

    pub(crate) fn drain(self) -> Vec<CollectionChangedArgs> {
        self.order
    }
}
