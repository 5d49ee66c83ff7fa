// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Result-shape adapters: how a data source lays out entity graphs in JSON.
//!
//! The merge walks raw `serde_json::Value` graphs and asks the adapter to
//! classify every node. Adapters are resolved by name from an explicit
//! [`AdapterRegistry`] when the manager is built.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::CacheError;

/// Where a node sits in the payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeKind {
    /// A top-level result.
    Root,
    /// The value of a scalar navigation property.
    NavigationProperty,
    /// One element of a collection navigation property.
    NavigationPropertyItem,
    /// The value of a nested-value property.
    ComplexProperty,
    /// A field of an anonymous projection.
    AnonymousProperty,
}

/// Context passed to [`JsonResultsAdapter::visit_node`].
#[derive(Clone, Copy, Debug)]
pub struct NodeContext<'a> {
    /// Position of the node.
    pub kind: NodeKind,
    /// Client name of the property holding the node, if any.
    pub property_name: Option<&'a str>,
    /// Entity type the holding navigation points to, if any.
    pub navigation_target: Option<&'a str>,
    /// Type assumed for top-level results.
    pub result_type: Option<&'a str>,
}

impl<'a> NodeContext<'a> {
    /// Context of a top-level result.
    #[must_use]
    pub fn root(result_type: Option<&'a str>) -> Self {
        Self {
            kind: NodeKind::Root,
            property_name: None,
            navigation_target: None,
            result_type,
        }
    }
}

/// Classification of one raw node.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct NodeMeta {
    /// Structural type name (entity or complex); `None` for anonymous nodes.
    pub entity_type: Option<String>,
    /// Id under which later nodes may refer back to this one.
    pub node_id: Option<String>,
    /// Set when the node only points at another node.
    pub node_ref_id: Option<String>,
    /// Transport artifact; skip it.
    pub ignore: bool,
    /// The node reports a server-side deletion (save results).
    pub deleted: bool,
}

/// Classifies raw JSON nodes and unwraps provider envelopes.
pub trait JsonResultsAdapter: fmt::Debug + Send {
    /// Registry name.
    fn name(&self) -> &str;

    /// Top-level results inside a response envelope.
    fn extract_results<'a>(&self, payload: &'a Value) -> &'a Value;

    /// Elements of a collection navigation payload, or `None` when the
    /// payload carries no related entities.
    fn extract_partial_collection<'a>(&self, value: &'a Value) -> Option<&'a [Value]>;

    /// Classifies `node`.
    fn visit_node(&self, node: &Value, ctx: &NodeContext<'_>) -> NodeMeta;

    /// True for fields that are adapter bookkeeping rather than data.
    fn is_metadata_field(&self, name: &str) -> bool {
        name.starts_with('$') || name.starts_with("__")
    }
}

/// Adapter for plain JSON with `$id`/`$ref`/`$type` annotations.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultJsonAdapter;

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl JsonResultsAdapter for DefaultJsonAdapter {
    fn name(&self) -> &str {
        "json"
    }

    fn extract_results<'a>(&self, payload: &'a Value) -> &'a Value {
        match payload {
            Value::Object(map) => map
                .get("results")
                .or_else(|| map.get("value"))
                .unwrap_or(payload),
            _ => payload,
        }
    }

    fn extract_partial_collection<'a>(&self, value: &'a Value) -> Option<&'a [Value]> {
        match value {
            Value::Array(items) => Some(items),
            Value::Object(map) => map.get("results").and_then(Value::as_array).map(Vec::as_slice),
            _ => None,
        }
    }

    fn visit_node(&self, node: &Value, ctx: &NodeContext<'_>) -> NodeMeta {
        let Value::Object(map) = node else {
            return NodeMeta::default();
        };
        if map.contains_key("__deferred") {
            return NodeMeta {
                ignore: true,
                ..NodeMeta::default()
            };
        }
        if let Some(r) = map.get("$ref").and_then(id_string) {
            return NodeMeta {
                node_ref_id: Some(r),
                ..NodeMeta::default()
            };
        }
        // "Ns.Order, Assembly" names the CLR assembly after the comma.
        let annotated = map
            .get("$type")
            .and_then(Value::as_str)
            .map(|t| t.split(',').next().unwrap_or(t).trim().to_owned());
        let entity_type = annotated.or_else(|| match ctx.kind {
            NodeKind::Root => ctx.result_type.map(str::to_owned),
            NodeKind::NavigationProperty | NodeKind::NavigationPropertyItem => {
                ctx.navigation_target.map(str::to_owned)
            }
            NodeKind::ComplexProperty | NodeKind::AnonymousProperty => None,
        });
        NodeMeta {
            entity_type,
            node_id: map.get("$id").and_then(id_string),
            node_ref_id: None,
            ignore: false,
            deleted: map.get("$deleted").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

/// Builds a fresh adapter instance.
pub type AdapterFactory = Arc<dyn Fn() -> Box<dyn JsonResultsAdapter> + Send + Sync>;

/// Adapters addressable by name.
#[derive(Clone)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AdapterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding the `"json"` adapter.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.factories
            .insert("json".to_owned(), Arc::new(|| Box::new(DefaultJsonAdapter)));
        reg
    }

    /// Registers a factory under `name`.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidArgument`] if `name` is already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn JsonResultsAdapter> + Send + Sync + 'static,
    ) -> Result<(), CacheError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(CacheError::argument(format!(
                "an adapter named '{name}' is already registered"
            )));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Instantiates the adapter registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn JsonResultsAdapter>, CacheError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| CacheError::argument(format!("unknown results adapter '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nav_ctx(target: &str) -> NodeContext<'_> {
        NodeContext {
            kind: NodeKind::NavigationPropertyItem,
            property_name: Some("OrderDetails"),
            navigation_target: Some(target),
            result_type: None,
        }
    }

    #[test]
    fn classifies_ids_refs_and_types() {
        let a = DefaultJsonAdapter;
        let meta = a.visit_node(
            &json!({ "$id": "1", "$type": "Northwind.Order, Northwind.Model", "OrderID": 7 }),
            &NodeContext::root(None),
        );
        assert_eq!(meta.entity_type.as_deref(), Some("Northwind.Order"));
        assert_eq!(meta.node_id.as_deref(), Some("1"));

        let back = a.visit_node(&json!({ "$ref": 1 }), &NodeContext::root(None));
        assert_eq!(back.node_ref_id.as_deref(), Some("1"));
        assert!(back.entity_type.is_none());
    }

    #[test]
    fn falls_back_to_navigation_target_and_ignores_deferred() {
        let a = DefaultJsonAdapter;
        let meta = a.visit_node(&json!({ "OrderID": 7 }), &nav_ctx("OrderDetail"));
        assert_eq!(meta.entity_type.as_deref(), Some("OrderDetail"));
        let deferred = a.visit_node(&json!({ "__deferred": { "uri": "x" } }), &nav_ctx("OrderDetail"));
        assert!(deferred.ignore);
    }

    #[test]
    fn unwraps_envelopes_and_partial_collections() {
        let a = DefaultJsonAdapter;
        let payload = json!({ "value": [1, 2] });
        assert_eq!(a.extract_results(&payload), &json!([1, 2]));
        let wrapped = json!({ "results": [{ "OrderID": 1 }] });
        assert_eq!(a.extract_partial_collection(&wrapped).map(<[Value]>::len), Some(1));
        assert!(a.extract_partial_collection(&json!({ "__deferred": {} })).is_none());
        assert!(a.extract_partial_collection(&Value::Null).is_none());
    }

    #[test]
    fn registry_resolves_by_name_and_rejects_duplicates() {
        let mut reg = AdapterRegistry::with_defaults();
        assert_eq!(reg.resolve("json").map(|a| a.name().to_owned()), Ok("json".to_owned()));
        assert!(matches!(reg.resolve("odata"), Err(CacheError::InvalidArgument(_))));
        assert!(reg.register("json", || Box::new(DefaultJsonAdapter)).is_err());
    }
}
