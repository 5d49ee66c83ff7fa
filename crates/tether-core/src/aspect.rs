// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-object change-tracking bookkeeping.
use std::collections::{BTreeMap, BTreeSet};

use crate::ident::{EntityRef, PropertyRef, StructuralRef};
use crate::key::EntityKey;
use crate::state::EntityState;
use crate::validation::{ValidationError, ValidationKey};
use crate::value::DataValue;

/// A many-to-many link recorded for save bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Link {
    /// Navigation index on the owning entity.
    pub navigation: usize,
    /// The other end of the link.
    pub other: EntityRef,
}

/// A property write currently executing on some object under this root.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct InFlight {
    pub(crate) target: StructuralRef,
    pub(crate) property: PropertyRef,
}

/// Change tracking state attached to every entity.
#[derive(Clone, Debug, Default)]
pub struct EntityAspect {
    pub(crate) state: EntityState,
    /// Slot in the owning group; `None` while detached.
    pub(crate) slot: Option<usize>,
    pub(crate) original_values: BTreeMap<usize, DataValue>,
    pub(crate) validation_errors: BTreeMap<ValidationKey, ValidationError>,
    pub(crate) inserted_links: Vec<Link>,
    pub(crate) removed_links: Vec<Link>,
    pub(crate) key: Option<EntityKey>,
    pub(crate) has_temp_key: bool,
    pub(crate) was_loaded: bool,
    pub(crate) in_flight: Vec<InFlight>,
    pub(crate) loaded_navigations: BTreeSet<usize>,
}

impl EntityAspect {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// True while a group tracks the entity.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.slot.is_some()
    }

    /// True while the key is a locally generated placeholder.
    #[must_use]
    pub fn has_temp_key(&self) -> bool {
        self.has_temp_key
    }

    /// True once the entity was materialized from a query or save result.
    #[must_use]
    pub fn was_loaded(&self) -> bool {
        self.was_loaded
    }

    /// True when any validation error is filed.
    #[must_use]
    pub fn has_validation_errors(&self) -> bool {
        !self.validation_errors.is_empty()
    }

    /// Filed validation errors in key order.
    pub fn validation_errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.validation_errors.values()
    }

    /// Many-to-many links added since the last accept.
    #[must_use]
    pub fn inserted_links(&self) -> &[Link] {
        &self.inserted_links
    }

    /// Many-to-many links removed since the last accept.
    #[must_use]
    pub fn removed_links(&self) -> &[Link] {
        &self.removed_links
    }

    /// True if the navigation at `index` was loaded from the server.
    #[must_use]
    pub fn is_navigation_loaded(&self, index: usize) -> bool {
        self.loaded_navigations.contains(&index)
    }

    pub(crate) fn is_in_flight(&self, guard: InFlight) -> bool {
        self.in_flight.contains(&guard)
    }

    /// Resets to the freshly created (detached) state. Values are kept.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Where a nested value lives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComplexParent {
    /// Owning entity or nested value.
    pub owner: StructuralRef,
    /// Data property index on the owner.
    pub property: usize,
}

/// Change tracking state attached to every nested value.
///
/// Nested values carry no lifecycle state of their own; their root entity's
/// aspect is the authority.
#[derive(Clone, Debug, Default)]
pub struct ComplexAspect {
    pub(crate) parent: Option<ComplexParent>,
    pub(crate) original_values: BTreeMap<usize, DataValue>,
}

impl ComplexAspect {
    /// Owner of this value, or `None` for a standalone value.
    #[must_use]
    pub fn parent(&self) -> Option<ComplexParent> {
        self.parent
    }
}
