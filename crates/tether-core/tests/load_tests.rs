// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{find, guid, manager, merge, seed_alfki, BONAP};
use serde_json::{json, Value};
use tether_core::{
    CacheError, DataValue, EntityState, ErrorKind, LoadRequest, RelatedEntityLoader,
};

/// Answers every request with the same payload and remembers what it was
/// asked.
#[derive(Default)]
struct FakeLoader {
    response: Value,
    requests: Vec<LoadRequest>,
    fail: bool,
}

impl FakeLoader {
    fn answering(response: Value) -> Self {
        Self {
            response,
            ..Self::default()
        }
    }
}

impl RelatedEntityLoader for FakeLoader {
    fn load(&mut self, request: &LoadRequest) -> Result<Value, CacheError> {
        self.requests.push(request.clone());
        if self.fail {
            return Err(CacheError::InvalidOperation("data source unavailable".to_owned()));
        }
        Ok(self.response.clone())
    }
}

#[test]
fn collection_navigation_loads_children_by_parent_key() {
    let mut em = manager();
    let bonap = merge(
        &mut em,
        &json!({ "$type": "Customer", "CustomerID": BONAP, "CompanyName": "Bon app'" }),
    )[0];
    let mut loader = FakeLoader::answering(json!([
        { "OrderID": 30, "CustomerID": BONAP },
        { "OrderID": 31, "CustomerID": BONAP }
    ]));

    let loaded = em.load_navigation(bonap, "Orders", &mut loader).unwrap();
    assert_eq!(loader.requests.len(), 1);
    let request = &loader.requests[0];
    assert_eq!(request.owner, bonap);
    assert_eq!(request.entity_type, "Order");
    assert_eq!(request.predicate, vec![("CustomerID".to_owned(), guid(BONAP))]);

    assert_eq!(loaded, vec![find(&em, "Order", 30), find(&em, "Order", 31)]);
    let orders = em.get_collection(bonap, "Orders").unwrap();
    assert_eq!(orders.items(), loaded.as_slice());
    assert!(orders.is_loaded());
    let ix = em.entity_type(bonap).unwrap().navigation_property("Orders").unwrap().0;
    assert!(em.aspect(bonap).unwrap().is_navigation_loaded(ix));
}

#[test]
fn scalar_navigation_loads_the_parent_by_foreign_key() {
    let mut em = manager();
    let order = merge(
        &mut em,
        &json!({ "$type": "Order", "OrderID": 20, "CustomerID": BONAP }),
    )[0];
    assert_eq!(em.get_navigation(order, "Customer").unwrap(), None);

    let request = em.load_request(order, "Customer").unwrap().unwrap();
    assert_eq!(request.entity_type, "Customer");
    assert_eq!(request.predicate, vec![("CustomerID".to_owned(), guid(BONAP))]);

    let mut loader = FakeLoader::answering(json!([
        { "CustomerID": BONAP, "CompanyName": "Bon app'" }
    ]));
    let loaded = em.load_navigation(order, "Customer", &mut loader).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(em.get_navigation(order, "Customer").unwrap(), Some(loaded[0]));
    assert_eq!(em.entity_state(order).unwrap(), EntityState::Unchanged);
}

#[test]
fn unidirectional_navigations_build_requests_from_their_keys() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let detail = em.get_collection(o7, "OrderDetails").unwrap().items()[0];
    let request = em.load_request(detail, "Product").unwrap().unwrap();
    assert_eq!(request.entity_type, "Product");
    assert_eq!(request.predicate, vec![("ProductID".to_owned(), DataValue::Int(11))]);

    let region = merge(&mut em, &json!({ "$type": "Region", "RegionID": 4 }))[0];
    let request = em.load_request(region, "Territories").unwrap().unwrap();
    assert_eq!(request.entity_type, "Territory");
    assert_eq!(request.predicate, vec![("RegionID".to_owned(), DataValue::Int(4))]);

    let err = em.load_request(o7, "Tags").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn empty_foreign_keys_skip_the_loader() {
    let mut em = manager();
    let order = merge(&mut em, &json!({ "$type": "Order", "OrderID": 21 }))[0];
    let mut loader = FakeLoader::default();

    assert!(em.load_request(order, "Customer").unwrap().is_none());
    let loaded = em.load_navigation(order, "Customer", &mut loader).unwrap();
    assert!(loaded.is_empty());
    assert!(loader.requests.is_empty());
    let ix = em.entity_type(order).unwrap().navigation_property("Customer").unwrap().0;
    assert!(em.aspect(order).unwrap().is_navigation_loaded(ix));
}

#[test]
fn loading_requires_an_attached_owner() {
    let mut em = manager();
    let order = em.create_entity("Order", &[("OrderID", DataValue::Int(5))]).unwrap();
    let mut loader = FakeLoader::default();
    let err = em.load_navigation(order, "Customer", &mut loader).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert!(loader.requests.is_empty());
}

#[test]
fn loader_failures_propagate_without_marking_loaded() {
    let mut em = manager();
    let bonap = merge(
        &mut em,
        &json!({ "$type": "Customer", "CustomerID": BONAP, "CompanyName": "Bon app'" }),
    )[0];
    let mut loader = FakeLoader {
        fail: true,
        ..FakeLoader::default()
    };
    let err = em.load_navigation(bonap, "Orders", &mut loader).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(loader.requests.len(), 1);
    let ix = em.entity_type(bonap).unwrap().navigation_property("Orders").unwrap().0;
    assert!(!em.aspect(bonap).unwrap().is_navigation_loaded(ix));
    assert!(!em.get_collection(bonap, "Orders").unwrap().is_loaded());
}
