// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Notification channels exposed by the manager and their payloads.
//!
//! Ordering within one property write: `property_changed`, then
//! `entity_changed(PropertyChange)`, then `entity_changed(EntityStateChange)`
//! when the write moved the entity out of Unchanged, then
//! `has_changes_changed` when the aggregate flag flipped.
use crate::collection::CollectionChangedArgs;
use crate::event::{Event, EventSwitches};
use crate::ident::{EntityRef, StructuralRef};
use crate::interceptor::PropertyValue;
use crate::state::EntityAction;
use crate::validation::ValidationError;

/// Channel name for entity changes.
pub const ENTITY_CHANGED: &str = "entityChanged";
/// Channel name for property changes.
pub const PROPERTY_CHANGED: &str = "propertyChanged";
/// Channel name for the aggregate has-changes flag.
pub const HAS_CHANGES_CHANGED: &str = "hasChangesChanged";
/// Channel name for validation error changes.
pub const VALIDATION_ERRORS_CHANGED: &str = "validationErrorsChanged";
/// Channel name for collection changes.
pub const COLLECTION_CHANGED: &str = "collectionChanged";

/// Scope at which enable switches are evaluated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EventScope {
    /// The whole cache.
    Cache,
    /// A single entity (defers to [`EventScope::Cache`]).
    Entity(EntityRef),
}

impl EventScope {
    pub(crate) fn parent(&self) -> Option<Self> {
        match self {
            Self::Cache => None,
            Self::Entity(_) => Some(Self::Cache),
        }
    }
}

/// Payload of `entity_changed`.
#[derive(Clone, PartialEq, Debug)]
pub struct EntityChangedArgs {
    /// What happened.
    pub action: EntityAction,
    /// Affected entity (`None` for [`EntityAction::Clear`]).
    pub entity: Option<EntityRef>,
    /// Property details for [`EntityAction::PropertyChange`].
    pub property: Option<PropertyChangedArgs>,
}

/// Payload of `property_changed`.
///
/// A `property_name` of `None` means "many properties changed at once"
/// (merges and rejects).
#[derive(Clone, PartialEq, Debug)]
pub struct PropertyChangedArgs {
    /// Root entity of the written object (`None` for standalone values).
    pub entity: Option<EntityRef>,
    /// Object that owns the property.
    pub target: StructuralRef,
    /// Property name on the target.
    pub property_name: Option<String>,
    /// Dotted path from the root entity.
    pub property_path: Option<String>,
    /// Value before the write.
    pub old_value: Option<PropertyValue>,
    /// Value after the write.
    pub new_value: Option<PropertyValue>,
}

impl PropertyChangedArgs {
    /// "Every property of `e` may have changed" (merges and rejects).
    pub(crate) fn whole_entity(e: EntityRef) -> Self {
        Self {
            entity: Some(e),
            target: StructuralRef::Entity(e),
            property_name: None,
            property_path: None,
            old_value: None,
            new_value: None,
        }
    }
}

/// Payload of `has_changes_changed`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HasChangesChangedArgs {
    /// Whether any tracked entity has pending changes.
    pub has_changes: bool,
}

/// Payload of `validation_errors_changed`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ValidationErrorsChangedArgs {
    /// Entity whose errors changed.
    pub entity: EntityRef,
    /// Errors filed.
    pub added: Vec<ValidationError>,
    /// Errors withdrawn.
    pub removed: Vec<ValidationError>,
}

/// The manager's notification channels.
#[derive(Debug)]
pub struct CacheEvents {
    /// Entity lifecycle and property changes.
    pub entity_changed: Event<EntityChangedArgs>,
    /// Fine grained property writes.
    pub property_changed: Event<PropertyChangedArgs>,
    /// Aggregate has-changes flag flips.
    pub has_changes_changed: Event<HasChangesChangedArgs>,
    /// Validation errors filed or withdrawn.
    pub validation_errors_changed: Event<ValidationErrorsChangedArgs>,
    /// Every collection mutation in the cache.
    pub collection_changed: Event<CollectionChangedArgs>,
}

impl Default for CacheEvents {
    fn default() -> Self {
        Self {
            entity_changed: Event::new(ENTITY_CHANGED),
            property_changed: Event::new(PROPERTY_CHANGED),
            has_changes_changed: Event::new(HAS_CHANGES_CHANGED),
            validation_errors_changed: Event::new(VALIDATION_ERRORS_CHANGED),
            collection_changed: Event::new(COLLECTION_CHANGED),
        }
    }
}

impl CacheEvents {
    pub(crate) fn flush_deferred(&mut self) -> usize {
        self.property_changed.flush_deferred()
            + self.entity_changed.flush_deferred()
            + self.has_changes_changed.flush_deferred()
            + self.validation_errors_changed.flush_deferred()
            + self.collection_changed.flush_deferred()
    }
}

pub(crate) fn new_switches() -> EventSwitches<EventScope> {
    EventSwitches::new(EventScope::parent)
}
