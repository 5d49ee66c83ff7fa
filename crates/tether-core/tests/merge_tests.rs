// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{find, guid, manager, merge, merge_with, seed_alfki, ALFKI, BONAP};
use serde_json::json;
use tether_core::{
    CacheOptions, DataValue, EntityAction, EntityState, ErrorKind, MergeOptions, MergeStrategy,
    MergedValue, NamingConvention,
};
use tether_dry_tests::northwind::northwind_manager_with;
use tether_dry_tests::EventRecorder;

#[test]
fn query_graph_materializes_as_unchanged_with_both_sides_wired() {
    let mut em = manager();
    let (customer, o7, o8) = seed_alfki(&mut em);

    for e in [customer, o7, o8] {
        assert_eq!(em.entity_state(e).unwrap(), EntityState::Unchanged);
        assert!(em.aspect(e).unwrap().was_loaded());
    }
    assert_eq!(em.get_value(o7, "OrderID").unwrap(), DataValue::Int(7));
    assert_eq!(em.get_value(o7, "ShipName").unwrap(), DataValue::from("Alfreds"));
    assert_eq!(em.get_navigation(o7, "Customer").unwrap(), Some(customer));
    assert_eq!(em.get_navigation(o8, "Customer").unwrap(), Some(customer));
    assert_eq!(em.get_value(o8, "CustomerID").unwrap(), guid(ALFKI));
    assert_eq!(em.get_collection(customer, "Orders").unwrap().items(), &[o7, o8]);

    let details = em.get_collection(o7, "OrderDetails").unwrap();
    assert_eq!(details.len(), 2);
    assert!(details.is_loaded());
    for d in details.items().to_vec() {
        assert_eq!(em.get_navigation(d, "Order").unwrap(), Some(o7));
    }
    assert!(!em.has_changes(None).unwrap());
}

#[test]
fn merging_the_same_payload_twice_keeps_one_identity() {
    let mut em = manager();
    let (customer, o7, _) = seed_alfki(&mut em);
    let again = merge(&mut em, &common::alfki_graph());
    assert_eq!(again, vec![customer]);
    assert_eq!(find(&em, "Order", 7), o7);
    assert_eq!(em.group("Order").unwrap().len(), 2);
    assert_eq!(em.group("OrderDetail").unwrap().len(), 2);
    assert_eq!(em.get_collection(customer, "Orders").unwrap().len(), 2);
}

#[test]
fn preserve_changes_keeps_local_edits_and_overwrite_discards_them() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    em.set_value(o7, "ShipName", "Local").unwrap();
    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Modified);

    let server = json!([{ "$type": "Order", "OrderID": 7, "ShipName": "Server" }]);
    merge(&mut em, &server);
    assert_eq!(em.get_value(o7, "ShipName").unwrap(), DataValue::from("Local"));
    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Modified);
    assert_eq!(
        em.original_value(o7, "ShipName").unwrap(),
        Some(DataValue::from("Alfreds"))
    );

    let recorder = EventRecorder::attach(&mut em);
    merge_with(&mut em, &server, &MergeOptions::with_strategy(MergeStrategy::OverwriteChanges));
    assert_eq!(em.get_value(o7, "ShipName").unwrap(), DataValue::from("Server"));
    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Unchanged);
    assert!(em.original_values(o7).unwrap().is_empty());
    assert_eq!(recorder.actions_for(o7).last(), Some(&EntityAction::MergeOnQuery));
    assert!(recorder
        .property_changes()
        .iter()
        .any(|p| p.entity == Some(o7) && p.property_name.is_none()));
    assert_eq!(recorder.has_changes_flips(), vec![false]);
}

#[test]
fn preserve_changes_overwrites_unchanged_entities() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    merge(&mut em, &json!([{ "$type": "Order", "OrderID": 7, "ShipName": "Fresh" }]));
    assert_eq!(em.get_value(o7, "ShipName").unwrap(), DataValue::from("Fresh"));
    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Unchanged);
}

#[test]
fn skip_merge_leaves_cached_values_alone() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let out = merge_with(
        &mut em,
        &json!([{ "$type": "Order", "OrderID": 7, "ShipName": "Ignored" }]),
        &MergeOptions::with_strategy(MergeStrategy::SkipMerge),
    );
    assert_eq!(out, vec![o7]);
    assert_eq!(em.get_value(o7, "ShipName").unwrap(), DataValue::from("Alfreds"));
}

#[test]
fn disallowed_merge_fails_on_a_cached_key() {
    let mut em = manager();
    seed_alfki(&mut em);
    let err = em
        .merge_query_result(
            &json!([{ "$type": "Order", "OrderID": 7 }]),
            &MergeOptions::with_strategy(MergeStrategy::Disallowed),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn forward_references_resolve_after_the_walk() {
    let mut em = manager();
    let payload = json!([
        { "$type": "Order", "$id": "1", "OrderID": 1, "Customer": { "$ref": "2" } },
        { "$type": "Customer", "$id": "2", "CustomerID": BONAP, "CompanyName": "Bon app'" }
    ]);
    let out = merge(&mut em, &payload);
    assert_eq!(out.len(), 2);
    let (order, customer) = (out[0], out[1]);
    assert_eq!(em.get_navigation(order, "Customer").unwrap(), Some(customer));
    assert_eq!(em.get_value(order, "CustomerID").unwrap(), guid(BONAP));
    assert!(em.get_collection(customer, "Orders").unwrap().contains(order));
    assert_eq!(em.entity_state(order).unwrap(), EntityState::Unchanged);
}

#[test]
fn dangling_references_become_null_results() {
    let mut em = manager();
    let out = em
        .merge_query_result(&json!([{ "$ref": "99" }]), &MergeOptions::default())
        .unwrap();
    assert_eq!(out, vec![MergedValue::Null]);
}

#[test]
fn results_wrapper_and_result_type_name_untyped_nodes() {
    let mut em = manager();
    let out = merge_with(
        &mut em,
        &json!({ "results": [{ "OrderID": 3 }, { "OrderID": 4 }] }),
        &MergeOptions::default().result_type("Order"),
    );
    assert_eq!(out, vec![find(&em, "Order", 3), find(&em, "Order", 4)]);
}

#[test]
fn anonymous_projections_are_renamed_and_carry_entities() {
    init();
    let options = CacheOptions {
        naming_convention: NamingConvention::CamelCase,
        ..CacheOptions::default()
    };
    let mut em = northwind_manager_with(options).unwrap();
    let out = em
        .merge_query_result(
            &json!([{ "OrderCount": 3, "TopOrder": { "$type": "Order", "OrderID": 5 } }]),
            &MergeOptions::default(),
        )
        .unwrap();
    let MergedValue::Record(record) = &out[0] else {
        unreachable!("anonymous node merges as a record: {out:?}");
    };
    assert_eq!(record.fields["orderCount"], MergedValue::Value(json!(3)));
    assert_eq!(record.fields["topOrder"], MergedValue::Entity(find(&em, "Order", 5)));
}

#[test]
fn unknown_types_merge_as_plain_records() {
    let mut em = manager();
    let out = em
        .merge_query_result(&json!({ "$type": "Nope", "A": [1, 2] }), &MergeOptions::default())
        .unwrap();
    let MergedValue::Record(record) = &out[0] else {
        unreachable!("unknown type merges as a record: {out:?}");
    };
    assert_eq!(record.fields.len(), 1);
    assert_eq!(
        record.fields["A"],
        MergedValue::List(vec![MergedValue::Value(json!(1)), MergedValue::Value(json!(2))])
    );
}

#[test]
fn nodes_without_key_values_are_rejected() {
    let mut em = manager();
    let err = em
        .merge_query_result(&json!([{ "$type": "Order", "ShipName": "x" }]), &MergeOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn partial_collections_load_and_deferred_ones_do_not() {
    let mut em = manager();
    let payload = json!([
        {
            "$type": "Customer",
            "CustomerID": ALFKI,
            "CompanyName": "Alfreds",
            "Orders": { "results": [{ "OrderID": 11 }, { "OrderID": 12 }] }
        },
        {
            "$type": "Employee",
            "EmployeeID": 1,
            "LastName": "Davolio",
            "Orders": { "__deferred": { "uri": "Employees(1)/Orders" } }
        }
    ]);
    let out = merge(&mut em, &payload);
    let (customer, employee) = (out[0], out[1]);
    let orders = em.get_collection(customer, "Orders").unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.is_loaded());
    let orders_ix = em
        .entity_type(customer)
        .unwrap()
        .navigation_property("Orders")
        .unwrap()
        .0;
    assert!(em.aspect(customer).unwrap().is_navigation_loaded(orders_ix));
    assert_eq!(em.get_value(find(&em, "Order", 12), "CustomerID").unwrap(), guid(ALFKI));

    let employee_orders = em.get_collection(employee, "Orders").unwrap();
    assert!(employee_orders.is_empty());
    assert!(!employee_orders.is_loaded());
}

#[test]
fn collection_notifications_are_folded_per_merge() {
    let mut em = manager();
    let recorder = EventRecorder::attach(&mut em);
    let payload = json!([
        { "$type": "Customer", "$id": "c", "CustomerID": ALFKI, "CompanyName": "Alfreds" },
        { "$type": "Order", "OrderID": 1, "Customer": { "$ref": "c" } },
        { "$type": "Order", "OrderID": 2, "Customer": { "$ref": "c" } },
        { "$type": "Order", "OrderID": 3, "Customer": { "$ref": "c" } }
    ]);
    let out = merge(&mut em, &payload);

    let changes = recorder.collection_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].property_name, "Orders");
    assert_eq!(changes[0].added.len(), 3);
    assert_eq!(em.get_collection(out[0], "Orders").unwrap().len(), 3);
    let attaches = recorder
        .entity_actions()
        .into_iter()
        .filter(|(a, _)| *a == EntityAction::AttachOnQuery)
        .count();
    assert_eq!(attaches, 4);
}

#[test]
fn no_tracking_returns_detached_entities_deduplicated_by_key() {
    let mut em = manager();
    let options = MergeOptions {
        no_tracking: true,
        ..MergeOptions::default()
    };
    let out = merge_with(
        &mut em,
        &json!([
            { "$type": "Order", "OrderID": 8, "ShipName": "x" },
            { "$type": "Order", "OrderID": 8 }
        ]),
        &options,
    );
    assert_eq!(out.len(), 2);
    assert_eq!(out[0], out[1]);
    assert_eq!(em.entity_state(out[0]).unwrap(), EntityState::Detached);
    assert_eq!(em.get_value(out[0], "ShipName").unwrap(), DataValue::from("x"));
    assert!(em.group("Order").unwrap().is_empty());
}

#[test]
fn deleted_entities_are_dropped_unless_requested() {
    let mut em = manager();
    let (_, _, o8) = seed_alfki(&mut em);
    em.set_deleted(o8).unwrap();
    let payload = json!([{ "$type": "Order", "OrderID": 8 }]);
    assert!(merge(&mut em, &payload).is_empty());
    let options = MergeOptions {
        include_deleted: true,
        ..MergeOptions::default()
    };
    assert_eq!(merge_with(&mut em, &payload, &options), vec![o8]);
    assert_eq!(em.entity_state(o8).unwrap(), EntityState::Deleted);
}

#[test]
fn complex_and_primitive_fields_merge_into_nested_values() {
    let mut em = manager();
    let payload = json!({
        "$type": "Customer",
        "CustomerID": ALFKI,
        "CompanyName": "Alfreds",
        "Address": { "City": "Berlin", "PostalCode": "12209" },
        "Aliases": ["AF", "Alfreds"]
    });
    let customer = merge(&mut em, &payload)[0];
    let address = em.get_complex(customer, "Address").unwrap();
    assert_eq!(em.get_value(address, "City").unwrap(), DataValue::from("Berlin"));
    assert_eq!(em.root_entity(address).unwrap(), Some(customer));
    assert_eq!(
        em.get_primitive_collection(customer, "Aliases").unwrap().items(),
        &[DataValue::from("AF"), DataValue::from("Alfreds")]
    );
    assert_eq!(em.entity_state(customer).unwrap(), EntityState::Unchanged);
}

#[test]
fn nested_collections_merge_in_place() {
    let mut em = manager();
    let employee = |addresses: serde_json::Value| {
        json!({
            "$type": "Employee",
            "EmployeeID": 1,
            "LastName": "Davolio",
            "Addresses": addresses
        })
    };
    let two = employee(json!([{ "City": "Seattle" }, { "City": "Tacoma" }]));
    let davolio = merge(&mut em, &two)[0];
    let items = em.get_complex_collection(davolio, "Addresses").unwrap().items().to_vec();
    assert_eq!(items.len(), 2);

    let recorder = EventRecorder::attach(&mut em);
    for _ in 0..100 {
        merge(&mut em, &two);
    }
    assert!(recorder.collection_changes().is_empty());
    assert_eq!(em.get_complex_collection(davolio, "Addresses").unwrap().items(), &items[..]);

    merge(&mut em, &employee(json!([{ "City": "Redmond" }])));
    assert_eq!(em.get_complex_collection(davolio, "Addresses").unwrap().items(), &items[..1]);
    assert_eq!(em.get_value(items[0], "City").unwrap(), DataValue::from("Redmond"));
    let err = em.get_value(items[1], "City").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let changes = recorder.collection_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].removed.len(), 1);

    merge(&mut em, &employee(json!([{ "City": "Redmond" }, { "City": "Kirkland" }])));
    let grown = em.get_complex_collection(davolio, "Addresses").unwrap().items().to_vec();
    assert_eq!(grown.len(), 2);
    assert_eq!(grown[0], items[0]);
    assert_ne!(grown[1], items[1]);
    assert_eq!(em.get_value(grown[1], "City").unwrap(), DataValue::from("Kirkland"));
    assert!(em.get_value(items[1], "City").is_err());
    assert_eq!(em.entity_state(davolio).unwrap(), EntityState::Unchanged);
}

fn init() {
    tether_dry_tests::init_tracing();
}
