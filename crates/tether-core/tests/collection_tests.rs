// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, Mutex};

use common::{guid, manager, merge, seed_alfki, ALFKI, BONAP};
use serde_json::json;
use tether_core::{
    CollectionItem, DataValue, EntityManager, EntityRef, EntityState, ErrorKind, Link,
};
use tether_dry_tests::EventRecorder;

fn tag(em: &mut EntityManager, id: i64, name: &str) -> EntityRef {
    merge(em, &json!({ "$type": "Tag", "TagID": id, "Name": name }))[0]
}

fn nav_index(em: &EntityManager, e: EntityRef, name: &str) -> usize {
    em.entity_type(e).unwrap().navigation_property(name).unwrap().0
}

#[test]
fn pushing_a_detached_entity_adds_and_wires_it() {
    let mut em = manager();
    let (alfki, o7, o8) = seed_alfki(&mut em);
    let order = em.create_entity("Order", &[]).unwrap();

    assert_eq!(em.push(alfki, "Orders", &[order]).unwrap(), 3);
    assert_eq!(em.entity_state(order).unwrap(), EntityState::Added);
    assert_eq!(em.get_navigation(order, "Customer").unwrap(), Some(alfki));
    assert_eq!(em.get_value(order, "CustomerID").unwrap(), guid(ALFKI));
    assert_eq!(em.get_collection(alfki, "Orders").unwrap().items(), &[o7, o8, order]);
    // The one-to-many owner itself is not modified.
    assert_eq!(em.entity_state(alfki).unwrap(), EntityState::Unchanged);
}

#[test]
fn duplicate_members_are_ignored_silently() {
    let mut em = manager();
    let (alfki, o7, _) = seed_alfki(&mut em);
    let recorder = EventRecorder::attach(&mut em);
    assert_eq!(em.push(alfki, "Orders", &[o7, o7]).unwrap(), 2);
    assert!(recorder.collection_changes().is_empty());
    assert!(recorder.all().is_empty());
}

#[test]
fn pushing_onto_another_parent_moves_the_child() {
    let mut em = manager();
    let (alfki, o7, o8) = seed_alfki(&mut em);
    let bonap = merge(
        &mut em,
        &json!({ "$type": "Customer", "CustomerID": BONAP, "CompanyName": "Bon app'" }),
    )[0];

    em.push(bonap, "Orders", &[o8]).unwrap();
    assert_eq!(em.get_navigation(o8, "Customer").unwrap(), Some(bonap));
    assert_eq!(em.get_value(o8, "CustomerID").unwrap(), guid(BONAP));
    assert_eq!(em.get_collection(alfki, "Orders").unwrap().items(), &[o7]);
    assert_eq!(em.get_collection(bonap, "Orders").unwrap().items(), &[o8]);
}

#[test]
fn removing_a_member_clears_the_child_side() {
    let mut em = manager();
    let (alfki, o7, o8) = seed_alfki(&mut em);
    let recorder = EventRecorder::attach(&mut em);

    assert_eq!(em.shift(alfki, "Orders").unwrap(), Some(o7));
    assert_eq!(em.get_navigation(o7, "Customer").unwrap(), None);
    assert_eq!(em.get_value(o7, "CustomerID").unwrap(), DataValue::Null);
    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Modified);

    let changes = recorder.collection_changes();
    let orders_change = changes
        .iter()
        .find(|c| c.property_name == "Orders")
        .expect("Orders change published");
    assert_eq!(orders_change.removed, vec![CollectionItem::Entity(o7)]);

    assert!(em.remove_item(alfki, "Orders", o8).unwrap());
    assert!(!em.remove_item(alfki, "Orders", o8).unwrap());
    assert_eq!(em.pop(alfki, "Orders").unwrap(), None);
}

#[test]
fn splice_replaces_a_range() {
    let mut em = manager();
    let (alfki, o7, o8) = seed_alfki(&mut em);
    let fresh = em.create_entity("Order", &[]).unwrap();

    let removed = em.splice(alfki, "Orders", 0, 1, &[fresh]).unwrap();
    assert_eq!(removed, vec![o7]);
    assert_eq!(em.get_collection(alfki, "Orders").unwrap().items(), &[fresh, o8]);
    assert_eq!(em.unshift(alfki, "Orders", &[o7]).unwrap(), 3);
    assert_eq!(em.get_collection(alfki, "Orders").unwrap().items()[0], o7);
    assert_eq!(em.get_navigation(o7, "Customer").unwrap(), Some(alfki));
}

#[test]
fn members_must_match_the_navigation_type() {
    let mut em = manager();
    let (alfki, o7, _) = seed_alfki(&mut em);
    let t = tag(&mut em, 1, "rush");
    let err = em.push(alfki, "Orders", &[t]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = em.push(o7, "Customer", &[alfki]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn many_to_many_keeps_both_sides_and_records_links() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let rush = tag(&mut em, 1, "rush");
    let tags_ix = nav_index(&em, o7, "Tags");

    em.push(o7, "Tags", &[rush]).unwrap();
    assert!(em.get_collection(rush, "Orders").unwrap().contains(o7));
    assert_eq!(
        em.aspect(o7).unwrap().inserted_links(),
        &[Link {
            navigation: tags_ix,
            other: rush
        }]
    );
    assert!(em.aspect(rush).unwrap().inserted_links().is_empty());

    // Removing an inserted link cancels it out.
    assert!(em.remove_item(o7, "Tags", rush).unwrap());
    assert!(!em.get_collection(rush, "Orders").unwrap().contains(o7));
    assert!(em.aspect(o7).unwrap().inserted_links().is_empty());
    assert!(em.aspect(o7).unwrap().removed_links().is_empty());
}

#[test]
fn rejecting_undoes_many_to_many_links() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let rush = tag(&mut em, 1, "rush");
    let bulk = tag(&mut em, 2, "bulk");
    em.push(o7, "Tags", &[rush]).unwrap();
    em.accept_changes(o7).unwrap();

    em.push(o7, "Tags", &[bulk]).unwrap();
    em.remove_item(o7, "Tags", rush).unwrap();
    assert_eq!(em.aspect(o7).unwrap().removed_links().len(), 1);

    em.reject_changes(o7).unwrap();
    assert_eq!(em.get_collection(o7, "Tags").unwrap().items(), &[rush]);
    assert!(em.get_collection(rush, "Orders").unwrap().contains(o7));
    assert!(!em.get_collection(bulk, "Orders").unwrap().contains(o7));
}

#[test]
fn per_collection_subscribers_see_only_their_collection() {
    let mut em = manager();
    let (alfki, o7, _) = seed_alfki(&mut em);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let token = em
        .subscribe_collection_changed(alfki, "Orders", move |args| {
            sink.lock().unwrap().push(args.added.len());
        })
        .unwrap();

    let rush = tag(&mut em, 1, "rush");
    em.push(o7, "Tags", &[rush]).unwrap();
    let order = em.create_entity("Order", &[]).unwrap();
    em.push(alfki, "Orders", &[order]).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1]);

    assert!(em.unsubscribe_collection_changed(alfki, "Orders", token).unwrap());
    em.shift(alfki, "Orders").unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn complex_collections_track_pending_members_and_roll_back() {
    let mut em = manager();
    let employee = merge(
        &mut em,
        &json!({
            "$type": "Employee",
            "EmployeeID": 1,
            "LastName": "Davolio",
            "Addresses": [{ "City": "Seattle" }]
        }),
    )[0];
    let original = em.get_complex_collection(employee, "Addresses").unwrap().items().to_vec();
    assert_eq!(original.len(), 1);
    assert!(em
        .get_complex_collection(employee, "Addresses")
        .unwrap()
        .pending_added()
        .is_empty());

    let tacoma = em
        .create_complex("Location", &[("City", DataValue::from("Tacoma"))])
        .unwrap();
    assert_eq!(em.push_complex(employee, "Addresses", &[tacoma]).unwrap(), 2);
    assert_eq!(em.entity_state(employee).unwrap(), EntityState::Modified);
    assert_eq!(em.root_entity(tacoma).unwrap(), Some(employee));
    assert_eq!(
        em.get_complex_collection(employee, "Addresses").unwrap().pending_added(),
        &[tacoma]
    );

    em.reject_changes(employee).unwrap();
    assert_eq!(
        em.get_complex_collection(employee, "Addresses").unwrap().items(),
        original.as_slice()
    );
    assert_eq!(em.root_entity(tacoma).unwrap(), None);
}

#[test]
fn complex_values_belong_to_one_owner() {
    let mut em = manager();
    let out = merge(
        &mut em,
        &json!([
            { "$type": "Employee", "EmployeeID": 1, "LastName": "A", "Addresses": [{ "City": "X" }] },
            { "$type": "Employee", "EmployeeID": 2, "LastName": "B" }
        ]),
    );
    let owned = em.get_complex_collection(out[0], "Addresses").unwrap().items()[0];
    let err = em.push_complex(out[1], "Addresses", &[owned]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);

    let copy = em.clone_complex(owned).unwrap();
    em.push_complex(out[1], "Addresses", &[copy]).unwrap();
    assert_eq!(em.get_value(copy, "City").unwrap(), DataValue::from("X"));
    assert!(em.remove_complex(out[1], "Addresses", copy).unwrap());
    assert_eq!(em.root_entity(copy).unwrap(), None);
}

#[test]
fn primitive_collections_snapshot_and_coerce() {
    let mut em = manager();
    let (alfki, _, _) = seed_alfki(&mut em);
    let recorder = EventRecorder::attach(&mut em);

    em.push_primitive(alfki, "Aliases", vec![DataValue::from("AF"), DataValue::Int(5)])
        .unwrap();
    let aliases = em.get_primitive_collection(alfki, "Aliases").unwrap();
    assert_eq!(aliases.items(), &[DataValue::from("AF"), DataValue::from("5")]);
    assert_eq!(aliases.original(), Some(&[][..]));
    assert_eq!(em.entity_state(alfki).unwrap(), EntityState::Modified);
    assert_eq!(recorder.collection_changes()[0].added.len(), 2);

    let removed = em.splice_primitive(alfki, "Aliases", 0, 1, Vec::new()).unwrap();
    assert_eq!(removed, vec![DataValue::from("AF")]);

    em.reject_changes(alfki).unwrap();
    let aliases = em.get_primitive_collection(alfki, "Aliases").unwrap();
    assert!(aliases.items().is_empty());
    assert_eq!(aliases.original(), None);
}
