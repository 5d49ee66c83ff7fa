// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Merging externally sourced entity graphs into the cache.
//!
//! A merge walks one raw JSON payload depth first. Every object node is
//! classified by the manager's [`adapter::JsonResultsAdapter`] and then
//! - resolved through the ref map when it only points at another node,
//! - materialized or reconciled with the cached entity of the same key,
//! - copied into nested values, or
//! - rebuilt as a plain [`MergedRecord`] when it has no known type.
//!
//! References to nodes that appear later in the payload are queued and
//! assigned once the whole payload has been visited. The walk runs as one
//! bulk operation: collection notifications are folded per collection and
//! entity notifications are published after the walk.
pub mod adapter;

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::CacheError;
use crate::ident::{ComplexRef, EntityRef, EntityTypeId, StructuralRef, StructuralTypeId};
use crate::key::EntityKey;
use crate::manager::EntityManager;
use crate::metadata::{DataProperty, EntityType};
use crate::notifications::PropertyChangedArgs;
use crate::options::{MergeOptions, MergeStrategy};
use crate::record::PropertySlot;
use crate::state::EntityAction;
use crate::value::DataValue;
use adapter::{NodeContext, NodeKind, NodeMeta};

/// One merged result.
#[derive(Clone, PartialEq, Debug)]
pub enum MergedValue {
    /// Absent, ignored, or an unresolvable reference.
    Null,
    /// A cached (or, without tracking, detached) entity.
    Entity(EntityRef),
    /// A standalone nested value.
    Complex(ComplexRef),
    /// A raw scalar from an anonymous projection.
    Value(Value),
    /// A list from an anonymous projection.
    List(Vec<MergedValue>),
    /// An anonymous projection.
    Record(MergedRecord),
}

impl MergedValue {
    /// The entity, if this is one.
    #[must_use]
    pub fn as_entity(&self) -> Option<EntityRef> {
        match self {
            Self::Entity(e) => Some(*e),
            _ => None,
        }
    }
}

/// Fields of an anonymous projection, renamed to client names.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct MergedRecord {
    /// Field values by client name.
    pub fields: BTreeMap<String, MergedValue>,
}

/// Query results reconcile per strategy; save results always overwrite and
/// detach deletions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum MergeMode {
    Query,
    Save,
}

/// Result of visiting a node, before forward references are resolved.
#[derive(Clone, Debug)]
enum Draft {
    Null,
    Entity(EntityRef),
    Complex(ComplexRef),
    Value(Value),
    List(Vec<Draft>),
    Record(BTreeMap<String, Draft>),
    Pending(String),
}

#[derive(Clone, Copy, Debug)]
enum DeferredSlot {
    Scalar { owner: EntityRef, nav: usize },
    Collection { owner: EntityRef, nav: usize },
}

/// A navigation assignment waiting for a node that had not been visited.
#[derive(Clone, Debug)]
struct Deferred {
    ref_id: String,
    slot: DeferredSlot,
}

/// Per-call merge state. Dropping it abandons the merge; entities it
/// already attached stay attached.
#[derive(Debug)]
pub(crate) struct MergeContext {
    options: MergeOptions,
    mode: MergeMode,
    ref_map: FxHashMap<String, Draft>,
    deferred: Vec<Deferred>,
    untracked: FxHashMap<EntityKey, EntityRef>,
    visited: FxHashSet<EntityRef>,
    touched: Vec<(EntityRef, EntityAction)>,
}

impl MergeContext {
    pub(crate) fn new(options: MergeOptions, mode: MergeMode) -> Self {
        Self {
            options,
            mode,
            ref_map: FxHashMap::default(),
            deferred: Vec::new(),
            untracked: FxHashMap::default(),
            visited: FxHashSet::default(),
            touched: Vec::new(),
        }
    }

    fn register(&mut self, meta: &NodeMeta, draft: Draft) {
        if let Some(id) = &meta.node_id {
            self.ref_map.insert(id.clone(), draft);
        }
    }

    fn merge_action(&self) -> EntityAction {
        match self.mode {
            MergeMode::Query => EntityAction::MergeOnQuery,
            MergeMode::Save => EntityAction::MergeOnSave,
        }
    }

    /// Replaces forward references with what they resolved to.
    fn finish(&self, draft: Draft) -> MergedValue {
        match draft {
            Draft::Null => MergedValue::Null,
            Draft::Entity(e) => MergedValue::Entity(e),
            Draft::Complex(c) => MergedValue::Complex(c),
            Draft::Value(v) => MergedValue::Value(v),
            Draft::List(items) => MergedValue::List(items.into_iter().map(|d| self.finish(d)).collect()),
            Draft::Record(fields) => MergedValue::Record(MergedRecord {
                fields: fields.into_iter().map(|(k, d)| (k, self.finish(d))).collect(),
            }),
            Draft::Pending(id) => match self.ref_map.get(&id) {
                Some(Draft::Entity(e)) => MergedValue::Entity(*e),
                Some(Draft::Complex(c)) => MergedValue::Complex(*c),
                _ => MergedValue::Null,
            },
        }
    }
}

/// Raw value of `dp` in a payload object, by server name first.
fn raw_field<'a>(map: &'a Map<String, Value>, dp: &DataProperty) -> Option<&'a Value> {
    map.get(&dp.name_on_server).or_else(|| map.get(&dp.name))
}

impl EntityManager {
    /// Merges a query response into the cache and returns its top-level
    /// results.
    ///
    /// Entities without a cached counterpart are attached as Unchanged;
    /// cached ones are reconciled according to `options.merge_strategy`.
    /// Locally deleted entities are dropped from the results unless
    /// `options.include_deleted` is set.
    pub fn merge_query_result(
        &mut self,
        payload: &Value,
        options: &MergeOptions,
    ) -> Result<Vec<MergedValue>, CacheError> {
        self.merge_payload(payload, MergeContext::new(options.clone(), MergeMode::Query))
    }

    pub(crate) fn merge_payload(
        &mut self,
        payload: &Value,
        mut ctx: MergeContext,
    ) -> Result<Vec<MergedValue>, CacheError> {
        let drafts = self.with_bulk_operation(|this| {
            let results = this.adapter.extract_results(payload);
            let nodes: Vec<&Value> = match results {
                Value::Array(items) => items.iter().collect(),
                Value::Null => Vec::new(),
                other => vec![other],
            };
            let result_type = ctx.options.result_type.clone();
            let root = NodeContext::root(result_type.as_deref());
            let mut drafts = Vec::with_capacity(nodes.len());
            for node in nodes {
                drafts.push(this.visit(&mut ctx, node, &root)?);
            }
            this.run_deferred(&mut ctx)?;
            Ok(drafts)
        })?;

        self.publish_merge_notifications(&ctx)?;
        debug!(
            results = drafts.len(),
            entities = ctx.touched.len(),
            refs = ctx.ref_map.len(),
            mode = ?ctx.mode,
            "merged payload"
        );
        let include_deleted = ctx.options.include_deleted;
        Ok(drafts
            .into_iter()
            .map(|d| ctx.finish(d))
            .filter(|v| match v {
                MergedValue::Entity(e) => include_deleted || !self.state_of(*e).is_deleted(),
                _ => true,
            })
            .collect())
    }

    fn publish_merge_notifications(&mut self, ctx: &MergeContext) -> Result<(), CacheError> {
        for (e, action) in &ctx.touched {
            if !self.is_attached(*e) {
                continue;
            }
            if !action.is_attach() {
                self.publish_property_changed(PropertyChangedArgs::whole_entity(*e));
            }
            self.publish_entity_changed(*action, Some(*e), None);
        }
        if ctx.mode == MergeMode::Query && self.options.validation.validate_on_query {
            for (e, _) in &ctx.touched {
                if self.is_attached(*e) {
                    self.validate_entity(*e)?;
                }
            }
        }
        Ok(())
    }

    // ── node visit ──────────────────────────────────────────────────────

    fn visit(
        &mut self,
        ctx: &mut MergeContext,
        node: &Value,
        nc: &NodeContext<'_>,
    ) -> Result<Draft, CacheError> {
        let map = match node {
            Value::Object(map) => map,
            Value::Null => return Ok(Draft::Null),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.visit(ctx, item, nc)?);
                }
                return Ok(Draft::List(out));
            }
            other => return Ok(Draft::Value(other.clone())),
        };
        let meta = self.adapter.visit_node(node, nc);
        if meta.ignore {
            return Ok(Draft::Null);
        }
        if let Some(id) = meta.node_ref_id {
            return Ok(ctx.ref_map.get(&id).cloned().unwrap_or(Draft::Pending(id)));
        }
        let resolved = meta.entity_type.as_deref().and_then(|name| {
            let found = self.schema.resolve(name);
            if found.is_none() {
                trace!(type_name = name, "unknown type; merging as a plain record");
            }
            found
        });
        match resolved {
            Some(StructuralTypeId::Entity(id)) => self.merge_entity_node(ctx, map, &meta, id),
            Some(StructuralTypeId::Complex(id)) => {
                let c = self.alloc_complex(id, None);
                ctx.register(&meta, Draft::Complex(c));
                self.merge_data_fields(StructuralRef::Complex(c), map)?;
                Ok(Draft::Complex(c))
            }
            None => self.merge_anonymous(ctx, map),
        }
    }

    fn merge_anonymous(
        &mut self,
        ctx: &mut MergeContext,
        map: &Map<String, Value>,
    ) -> Result<Draft, CacheError> {
        let naming = self.options.naming_convention;
        let mut fields = BTreeMap::new();
        for (name, value) in map {
            if self.adapter.is_metadata_field(name) {
                continue;
            }
            let nc = NodeContext {
                kind: NodeKind::AnonymousProperty,
                property_name: Some(name),
                navigation_target: None,
                result_type: None,
            };
            fields.insert(naming.server_to_client(name), self.visit(ctx, value, &nc)?);
        }
        Ok(Draft::Record(fields))
    }

    // ── entities ────────────────────────────────────────────────────────

    fn merge_entity_node(
        &mut self,
        ctx: &mut MergeContext,
        map: &Map<String, Value>,
        meta: &NodeMeta,
        type_id: EntityTypeId,
    ) -> Result<Draft, CacheError> {
        let schema = Arc::clone(&self.schema);
        let et = schema.entity_type(type_id);
        let values = et
            .key_properties
            .iter()
            .map(|ix| {
                let dp = &et.data_properties[*ix];
                raw_field(map, dp).map_or(DataValue::Null, |v| DataValue::from_json(v, dp.data_type))
            })
            .collect();
        let key = EntityKey::new(et, values)?;
        if key.has_empty_part() {
            return Err(CacheError::operation(format!(
                "cannot merge a '{}' node without its key values",
                et.name
            )));
        }
        let existing = if ctx.options.no_tracking {
            ctx.untracked.get(&key).copied()
        } else {
            self.find_by_key(&key)
        };
        match existing {
            None if ctx.mode == MergeMode::Save && meta.deleted => Ok(Draft::Null),
            None => self.materialize(ctx, map, meta, et, key),
            Some(e) => self.merge_existing(ctx, map, meta, et, e),
        }
    }

    fn materialize(
        &mut self,
        ctx: &mut MergeContext,
        map: &Map<String, Value>,
        meta: &NodeMeta,
        et: &EntityType,
        key: EntityKey,
    ) -> Result<Draft, CacheError> {
        let e = self.alloc_entity(et);
        // Registered before the fields so cycles back to `e` resolve at once.
        ctx.register(meta, Draft::Entity(e));
        ctx.visited.insert(e);
        self.merge_data_fields(StructuralRef::Entity(e), map)?;
        if ctx.options.no_tracking {
            ctx.untracked.insert(key, e);
        } else {
            self.attach_loaded(e)?;
            ctx.touched.push((e, EntityAction::AttachOnQuery));
            trace!(entity = ?e, %key, "materialized");
        }
        self.merge_navigations(ctx, e, et, map, true)?;
        Ok(Draft::Entity(e))
    }

    fn merge_existing(
        &mut self,
        ctx: &mut MergeContext,
        map: &Map<String, Value>,
        meta: &NodeMeta,
        et: &EntityType,
        e: EntityRef,
    ) -> Result<Draft, CacheError> {
        if !ctx.visited.insert(e) {
            ctx.register(meta, Draft::Entity(e));
            return Ok(Draft::Entity(e));
        }
        let state = self.state_of(e);
        if ctx.mode == MergeMode::Save && (meta.deleted || state.is_deleted()) {
            self.detach_entity(e)?;
            trace!(entity = ?e, "detached deleted entity from save result");
            return Ok(Draft::Null);
        }
        ctx.register(meta, Draft::Entity(e));
        let strategy = match ctx.mode {
            MergeMode::Query => ctx.options.merge_strategy,
            MergeMode::Save => MergeStrategy::OverwriteChanges,
        };
        match strategy {
            MergeStrategy::Disallowed => {
                return Err(CacheError::operation(format!(
                    "a '{}' with key {} is already cached and merging is disallowed",
                    et.name,
                    self.entity_key(e)?
                )))
            }
            MergeStrategy::SkipMerge => {
                trace!(entity = ?e, "skipped merge");
            }
            MergeStrategy::PreserveChanges if !state.is_unchanged() => {
                // Local edits win; related sub-graphs are still merged.
                trace!(entity = ?e, ?state, "preserved local changes");
                self.merge_navigations(ctx, e, et, map, false)?;
            }
            MergeStrategy::PreserveChanges | MergeStrategy::OverwriteChanges => {
                self.merge_data_fields(StructuralRef::Entity(e), map)?;
                self.merge_navigations(ctx, e, et, map, true)?;
                if self.is_attached(e) {
                    if state.is_deleted() {
                        self.link_related_entities(e)?;
                    }
                    self.set_unchanged(e)?;
                    let action = ctx.merge_action();
                    ctx.touched.push((e, action));
                }
            }
        }
        Ok(Draft::Entity(e))
    }

    /// Copies scalar, collection and nested fields of `map` onto `target`.
    fn merge_data_fields(
        &mut self,
        target: StructuralRef,
        map: &Map<String, Value>,
    ) -> Result<(), CacheError> {
        let schema = Arc::clone(&self.schema);
        let st = schema.structural_type(self.structural_type_id(target)?);
        for (idx, dp) in st.data_properties().iter().enumerate() {
            let Some(raw) = raw_field(map, dp) else {
                continue;
            };
            match (dp.complex_type, dp.is_scalar) {
                (None, true) => self.write_data(target, idx, DataValue::from_json(raw, dp.data_type))?,
                (None, false) => {
                    let Some(items) = raw.as_array() else {
                        continue;
                    };
                    let values: Vec<DataValue> =
                        items.iter().map(|v| DataValue::from_json(v, dp.data_type)).collect();
                    let PropertySlot::PrimitiveCollection(current) = &self.slots(target)?[idx] else {
                        return Err(CacheError::consistency("primitive collection slot changed kind"));
                    };
                    let unchanged = current.items.len() == values.len()
                        && current.items.iter().zip(&values).all(|(a, b)| a.behaviorally_eq(b));
                    if !unchanged {
                        let len = current.items.len();
                        self.splice_primitive_at(target, idx, 0, len, values)?;
                    }
                }
                (Some(_), true) => {
                    let Value::Object(inner) = raw else {
                        continue;
                    };
                    let PropertySlot::Complex(c) = self.slots(target)?[idx] else {
                        return Err(CacheError::consistency("complex slot changed kind"));
                    };
                    self.merge_data_fields(StructuralRef::Complex(c), inner)?;
                }
                (Some(ct), false) => {
                    let Some(items) = raw.as_array() else {
                        continue;
                    };
                    let incoming: Vec<&Map<String, Value>> =
                        items.iter().filter_map(Value::as_object).collect();
                    let current = match &self.slots(target)?[idx] {
                        PropertySlot::ComplexCollection(coll) => coll.items.clone(),
                        _ => return Err(CacheError::consistency("complex collection slot changed kind")),
                    };
                    // Existing values are reconciled in place; only the
                    // length difference is spliced.
                    for (c, inner) in current.iter().zip(&incoming) {
                        self.merge_data_fields(StructuralRef::Complex(*c), inner)?;
                    }
                    if incoming.len() > current.len() {
                        let mut extra = Vec::with_capacity(incoming.len() - current.len());
                        for inner in &incoming[current.len()..] {
                            let c = self.alloc_complex(ct, None);
                            self.merge_data_fields(StructuralRef::Complex(c), inner)?;
                            extra.push(c);
                        }
                        self.splice_complex_at(target, idx, current.len(), 0, &extra)?;
                    } else if incoming.len() < current.len() {
                        let count = current.len() - incoming.len();
                        let removed = self.splice_complex_at(target, idx, incoming.len(), count, &[])?;
                        if self.is_loading {
                            for c in removed {
                                self.free_complex(c);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Merges related sub-graphs. With `wire` unset the related entities
    /// are merged but not assigned to `e`'s navigations.
    fn merge_navigations(
        &mut self,
        ctx: &mut MergeContext,
        e: EntityRef,
        et: &EntityType,
        map: &Map<String, Value>,
        wire: bool,
    ) -> Result<(), CacheError> {
        let schema = Arc::clone(&self.schema);
        for (ni, np) in et.navigation_properties.iter().enumerate() {
            let Some(raw) = map.get(&np.name_on_server).or_else(|| map.get(&np.name)) else {
                continue;
            };
            let target_name = schema.entity_type(np.target).name.as_str();
            if np.is_scalar {
                let nc = NodeContext {
                    kind: NodeKind::NavigationProperty,
                    property_name: Some(&np.name),
                    navigation_target: Some(target_name),
                    result_type: None,
                };
                match self.visit(ctx, raw, &nc)? {
                    Draft::Entity(r) if wire => self.write_navigation(e, ni, Some(r))?,
                    Draft::Pending(ref_id) if wire => ctx.deferred.push(Deferred {
                        ref_id,
                        slot: DeferredSlot::Scalar { owner: e, nav: ni },
                    }),
                    _ => continue,
                }
            } else {
                let Some(items) = self.adapter.extract_partial_collection(raw) else {
                    continue;
                };
                let nc = NodeContext {
                    kind: NodeKind::NavigationPropertyItem,
                    property_name: Some(&np.name),
                    navigation_target: Some(target_name),
                    result_type: None,
                };
                let mut related = Vec::with_capacity(items.len());
                for item in items {
                    match self.visit(ctx, item, &nc)? {
                        Draft::Entity(r) => related.push(r),
                        Draft::Pending(ref_id) if wire => ctx.deferred.push(Deferred {
                            ref_id,
                            slot: DeferredSlot::Collection { owner: e, nav: ni },
                        }),
                        _ => {}
                    }
                }
                if !wire {
                    continue;
                }
                self.push_core(e, ni, &related, false)?;
                self.relation_mut(e, ni)?.is_loaded = true;
            }
            self.entity_mut(e)?.aspect.loaded_navigations.insert(ni);
        }
        Ok(())
    }

    /// Assigns queued forward references, once, after the full walk.
    fn run_deferred(&mut self, ctx: &mut MergeContext) -> Result<(), CacheError> {
        for d in std::mem::take(&mut ctx.deferred) {
            let Some(Draft::Entity(r)) = ctx.ref_map.get(&d.ref_id).cloned() else {
                trace!(ref_id = %d.ref_id, "dangling reference left unassigned");
                continue;
            };
            match d.slot {
                DeferredSlot::Scalar { owner, nav } => self.write_navigation(owner, nav, Some(r))?,
                DeferredSlot::Collection { owner, nav } => {
                    self.push_core(owner, nav, &[r], false)?;
                }
            }
        }
        Ok(())
    }
}
