// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use serde_json::{json, Value};
use tether_core::{DataValue, EntityManager, EntityRef, MergeOptions, MergedValue};
use tether_dry_tests::{init_tracing, northwind_manager};

pub const ALFKI: &str = "6f9619ff-8b86-d011-b42d-00c04fc964ff";
pub const BONAP: &str = "0b1a4e6c-5d2f-4c8a-9e07-1f2d3c4b5a69";

/// Fresh Northwind cache with test logging installed.
pub fn manager() -> EntityManager {
    init_tracing();
    northwind_manager().expect("northwind fixture builds")
}

/// Merges `payload` with default options and returns the top-level entities.
pub fn merge(em: &mut EntityManager, payload: &Value) -> Vec<EntityRef> {
    merge_with(em, payload, &MergeOptions::default())
}

pub fn merge_with(em: &mut EntityManager, payload: &Value, options: &MergeOptions) -> Vec<EntityRef> {
    em.merge_query_result(payload, options)
        .expect("merge succeeds")
        .iter()
        .filter_map(MergedValue::as_entity)
        .collect()
}

/// Customer ALFKI with orders 7 (two detail lines) and 8.
pub fn alfki_graph() -> Value {
    json!({
        "$type": "Customer",
        "$id": "1",
        "CustomerID": ALFKI,
        "CompanyName": "Alfreds Futterkiste",
        "Orders": [
            {
                "$id": "2",
                "OrderID": 7,
                "ShipName": "Alfreds",
                "Customer": { "$ref": "1" },
                "OrderDetails": [
                    { "OrderID": 7, "ProductID": 11, "Quantity": 3, "UnitPrice": 14.0 },
                    { "OrderID": 7, "ProductID": 42, "Quantity": 1, "UnitPrice": 9.8 }
                ]
            },
            { "$id": "3", "OrderID": 8, "ShipName": "Alfreds 2" }
        ]
    })
}

/// Merges [`alfki_graph`] and returns `(customer, order 7, order 8)`.
pub fn seed_alfki(em: &mut EntityManager) -> (EntityRef, EntityRef, EntityRef) {
    let customer = merge(em, &alfki_graph())[0];
    let o7 = find(em, "Order", 7);
    let o8 = find(em, "Order", 8);
    (customer, o7, o8)
}

pub fn find(em: &EntityManager, type_name: &str, id: i64) -> EntityRef {
    em.find_by_key_values(type_name, vec![DataValue::Int(id)])
        .expect("type exists")
        .expect("entity is cached")
}

pub fn guid(s: &str) -> DataValue {
    DataValue::Guid(s.parse().expect("valid guid"))
}
