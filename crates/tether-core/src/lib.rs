// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tether-core: identity-mapped entity cache with change tracking.
//!
//! An [`EntityManager`] owns every entity and complex object it tracks and
//! hands out small copyable handles ([`EntityRef`], [`ComplexRef`]). All
//! mutation goes through the manager, which keeps the identity map, the
//! navigation graph, the original-value snapshots and the notification
//! stream consistent with each other.
//!
//! Raw query and save payloads (JSON graphs) are folded in with
//! [`EntityManager::merge_query_result`] and
//! [`EntityManager::apply_save_result`]; transport stays outside the crate.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]

mod aspect;
mod collection;
mod error;
mod event;
mod group;
mod ident;
mod interceptor;
mod key;
mod key_generator;
mod lifecycle;
mod load;
mod manager;
mod merge;
mod metadata;
mod naming;
mod notifications;
mod options;
mod record;
mod relation;
mod save;
mod state;
mod validate;
mod validation;
mod value;

// Re-exports for stable public API
/// Per-entity and per-complex-object bookkeeping.
pub use aspect::{ComplexAspect, ComplexParent, EntityAspect, Link};
/// Collection views and collection-change notifications.
pub use collection::{
    CollectionChangedArgs, CollectionId, CollectionItem, ComplexCollection, PrimitiveCollection,
    RelationCollection,
};
/// Error taxonomy.
pub use error::{CacheError, ErrorKind};
/// Generic publish/subscribe events with scoped enablement.
pub use event::{Enablement, Event, EventSwitches, PublishMode, SubscriptionToken};
/// Identity map for one entity type.
pub use group::Group;
/// Handles and type identifiers.
pub use ident::{
    CacheId, ComplexRef, ComplexTypeId, EntityRef, EntityTypeId, PropertyRef, StructuralRef,
    StructuralTypeId,
};
/// Property writes.
pub use interceptor::PropertyValue;
/// Entity keys.
pub use key::{EntityKey, KEY_DELIMITER};
/// Temporary key generation.
pub use key_generator::{DefaultKeyGenerator, KeyGenerator};
/// On-demand navigation loading.
pub use load::{LoadRequest, RelatedEntityLoader};
/// The cache itself.
pub use manager::EntityManager;
/// Payload adapters.
pub use merge::adapter::{
    AdapterFactory, AdapterRegistry, DefaultJsonAdapter, JsonResultsAdapter, NodeContext, NodeKind,
    NodeMeta,
};
/// Merge results.
pub use merge::{MergedRecord, MergedValue};
/// Schema model and builders.
pub use metadata::{
    AutoGeneratedKeyType, ComplexType, ComplexTypeDef, DataProperty, DataPropertyDef, EntityType,
    EntityTypeDef, NavigationDef, NavigationProperty, Schema, SchemaBuilder, StructuralType,
};
/// Server/client property name mapping.
pub use naming::NamingConvention;
/// Notification payloads and event names.
pub use notifications::{
    CacheEvents, EntityChangedArgs, EventScope, HasChangesChangedArgs, PropertyChangedArgs,
    ValidationErrorsChangedArgs, COLLECTION_CHANGED, ENTITY_CHANGED, HAS_CHANGES_CHANGED,
    PROPERTY_CHANGED, VALIDATION_ERRORS_CHANGED,
};
/// Cache and merge options.
pub use options::{CacheOptions, MergeOptions, MergeStrategy, ValidationOptions};
/// Save round trips.
pub use save::{KeyMapping, SaveBundle, SaveResult};
/// Entity states and change actions.
pub use state::{EntityAction, EntityState};
/// Validators and their registry.
pub use validation::{
    handle, DataTypeValidator, FnValidator, GuidValidator, MaxLengthValidator, ObjectView,
    RangeValidator, RequiredValidator, StringLengthValidator, ValidationContext, ValidationError,
    ValidationKey, ValidationSubject, Validator, ValidatorFactory, ValidatorHandle,
    ValidatorRegistry,
};
/// Typed values.
pub use value::{DataType, DataValue};
