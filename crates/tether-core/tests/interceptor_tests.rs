// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{find, guid, manager, merge, seed_alfki, ALFKI, BONAP};
use serde_json::json;
use tether_core::{
    DataValue, EntityAction, EntityManager, EntityRef, EntityState, ErrorKind, PropertyValue,
};
use tether_dry_tests::{EventRecorder, Recorded};

fn bonap(em: &mut EntityManager) -> EntityRef {
    merge(
        em,
        &json!({ "$type": "Customer", "CustomerID": BONAP, "CompanyName": "Bon app'" }),
    )[0]
}

fn find_detail(em: &EntityManager, order: i64, product: i64) -> EntityRef {
    em.find_by_key_values("OrderDetail", vec![DataValue::Int(order), DataValue::Int(product)])
        .unwrap()
        .unwrap()
}

#[test]
fn data_write_captures_original_and_marks_modified() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    em.set_value(o7, "ShipName", "First").unwrap();
    em.set_value(o7, "ShipName", "Second").unwrap();

    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Modified);
    assert_eq!(em.get_value(o7, "ShipName").unwrap(), DataValue::from("Second"));
    // The first original wins until changes are accepted.
    assert_eq!(
        em.original_value(o7, "ShipName").unwrap(),
        Some(DataValue::from("Alfreds"))
    );
    assert!(em.has_changes(None).unwrap());
}

#[test]
fn notifications_follow_the_write_in_order() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let recorder = EventRecorder::attach(&mut em);
    em.set_value(o7, "ShipName", "Renamed").unwrap();

    let log = recorder.all();
    assert_eq!(log.len(), 4, "{log:#?}");
    let Recorded::Property(p) = &log[0] else {
        unreachable!("property change first: {log:#?}");
    };
    assert_eq!(p.property_name.as_deref(), Some("ShipName"));
    assert_eq!(p.old_value, Some(PropertyValue::Data(DataValue::from("Alfreds"))));
    assert_eq!(p.new_value, Some(PropertyValue::Data(DataValue::from("Renamed"))));
    assert!(matches!(&log[1], Recorded::Entity(a) if a.action == EntityAction::PropertyChange));
    assert!(matches!(&log[2], Recorded::Entity(a) if a.action == EntityAction::EntityStateChange));
    assert_eq!(log[3], Recorded::HasChanges(true));

    recorder.clear();
    em.set_value(o7, "ShipName", "Again").unwrap();
    assert_eq!(recorder.entity_actions().len(), 1);
    assert!(recorder.has_changes_flips().is_empty());
}

#[test]
fn writing_the_current_value_is_silent() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let recorder = EventRecorder::attach(&mut em);
    em.set_value(o7, "ShipName", "Alfreds").unwrap();
    assert!(recorder.all().is_empty());
    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Unchanged);
}

#[test]
fn values_are_coerced_to_the_declared_type() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    em.set_value(o7, "Freight", "12.5").unwrap();
    assert_eq!(em.get_value(o7, "Freight").unwrap(), DataValue::Double(12.5));
    em.set_value(o7, "EmployeeID", " 3 ").unwrap();
    assert_eq!(em.get_value(o7, "EmployeeID").unwrap(), DataValue::Int(3));
}

#[test]
fn key_change_moves_identity_and_cascades_to_dependents() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    em.set_value(o7, "OrderID", 42).unwrap();

    assert_eq!(find(&em, "Order", 42), o7);
    assert!(em
        .find_by_key_values("Order", vec![DataValue::Int(7)])
        .unwrap()
        .is_none());
    assert_eq!(em.entity_key(o7).unwrap().to_string(), "Order:42");

    let details = em.get_collection(o7, "OrderDetails").unwrap().items().to_vec();
    assert_eq!(details.len(), 2);
    for d in details {
        assert_eq!(em.get_value(d, "OrderID").unwrap(), DataValue::Int(42));
        assert_eq!(em.get_navigation(d, "Order").unwrap(), Some(o7));
        assert_eq!(em.entity_state(d).unwrap(), EntityState::Modified);
    }
    let moved = em
        .find_by_key_values("OrderDetail", vec![DataValue::Int(42), DataValue::Int(11)])
        .unwrap();
    assert!(moved.is_some());
}

#[test]
fn key_collision_is_rejected_without_side_effects() {
    let mut em = manager();
    let (_, _, o8) = seed_alfki(&mut em);
    let err = em.set_value(o8, "OrderID", 7).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(em.get_value(o8, "OrderID").unwrap(), DataValue::Int(8));
    assert_eq!(em.entity_state(o8).unwrap(), EntityState::Unchanged);
    assert!(em.original_values(o8).unwrap().is_empty());
}

#[test]
fn foreign_key_write_moves_the_entity_between_parents() {
    let mut em = manager();
    let (alfki, o7, o8) = seed_alfki(&mut em);
    let bonap = bonap(&mut em);

    em.set_value(o8, "CustomerID", guid(BONAP)).unwrap();
    assert_eq!(em.get_navigation(o8, "Customer").unwrap(), Some(bonap));
    assert_eq!(em.get_collection(alfki, "Orders").unwrap().items(), &[o7]);
    assert_eq!(em.get_collection(bonap, "Orders").unwrap().items(), &[o8]);
}

#[test]
fn navigation_write_updates_the_foreign_key() {
    let mut em = manager();
    let (alfki, _, o8) = seed_alfki(&mut em);
    let bonap = bonap(&mut em);

    em.set_navigation(o8, "Customer", Some(bonap)).unwrap();
    assert_eq!(em.get_value(o8, "CustomerID").unwrap(), guid(BONAP));
    assert!(!em.get_collection(alfki, "Orders").unwrap().contains(o8));
    assert!(em.get_collection(bonap, "Orders").unwrap().contains(o8));

    em.set_navigation(o8, "Customer", None).unwrap();
    assert_eq!(em.get_value(o8, "CustomerID").unwrap(), DataValue::Null);
    assert!(!em.get_collection(bonap, "Orders").unwrap().contains(o8));
    assert_eq!(em.entity_state(o8).unwrap(), EntityState::Modified);
}

#[test]
fn foreign_key_to_an_uncached_parent_wires_up_when_it_arrives() {
    let mut em = manager();
    let (alfki, _, o8) = seed_alfki(&mut em);
    em.set_value(o8, "CustomerID", guid(BONAP)).unwrap();
    assert_eq!(em.get_navigation(o8, "Customer").unwrap(), None);
    assert!(!em.get_collection(alfki, "Orders").unwrap().contains(o8));

    let bonap = bonap(&mut em);
    assert_eq!(em.get_navigation(o8, "Customer").unwrap(), Some(bonap));
    assert!(em.get_collection(bonap, "Orders").unwrap().contains(o8));
}

#[test]
fn relating_a_detached_entity_adds_it_with_a_temporary_key() {
    let mut em = manager();
    let (alfki, _, _) = seed_alfki(&mut em);
    let order = em
        .create_entity("Order", &[("ShipName", DataValue::from("New"))])
        .unwrap();
    assert_eq!(em.entity_state(order).unwrap(), EntityState::Detached);

    em.set_navigation(order, "Customer", Some(alfki)).unwrap();
    assert_eq!(em.entity_state(order).unwrap(), EntityState::Added);
    assert!(em.aspect(order).unwrap().has_temp_key());
    assert!(matches!(em.get_value(order, "OrderID").unwrap(), DataValue::Int(i) if i < 0));
    assert_eq!(em.get_value(order, "CustomerID").unwrap(), guid(ALFKI));
    assert!(em.get_collection(alfki, "Orders").unwrap().contains(order));
}

#[test]
fn navigation_rejects_the_wrong_entity_type() {
    let mut em = manager();
    let (alfki, o7, _) = seed_alfki(&mut em);
    let err = em.set_navigation(o7, "Customer", Some(o7)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(em.get_navigation(o7, "Customer").unwrap(), Some(alfki));

    let err = em.set_navigation(alfki, "Orders", Some(o7)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    let err = em.set_value(o7, "NoSuchProperty", 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn nested_value_writes_mark_the_owning_entity() {
    let mut em = manager();
    let (alfki, _, _) = seed_alfki(&mut em);
    let address = em.get_complex(alfki, "Address").unwrap();
    let recorder = EventRecorder::attach(&mut em);

    em.set_value(address, "City", "Berlin").unwrap();
    assert_eq!(em.entity_state(alfki).unwrap(), EntityState::Modified);
    assert_eq!(em.original_value(address, "City").unwrap(), Some(DataValue::Null));
    let change = &recorder.property_changes()[0];
    assert_eq!(change.entity, Some(alfki));
    assert_eq!(change.property_path.as_deref(), Some("Address.City"));
}

#[test]
fn assigning_a_nested_value_copies_its_fields() {
    let mut em = manager();
    let (alfki, o7, _) = seed_alfki(&mut em);
    let standalone = em
        .create_complex("Location", &[("City", DataValue::from("Lyon"))])
        .unwrap();
    em.set_complex(o7, "ShipTo", standalone).unwrap();

    let ship_to = em.get_complex(o7, "ShipTo").unwrap();
    assert_ne!(ship_to, standalone);
    assert_eq!(em.get_value(ship_to, "City").unwrap(), DataValue::from("Lyon"));
    assert_eq!(em.root_entity(ship_to).unwrap(), Some(o7));
    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Modified);
    assert_eq!(em.entity_state(alfki).unwrap(), EntityState::Unchanged);
}

#[test]
fn reassigning_a_parent_keeps_the_child_key() {
    let mut em = manager();
    let (_, o7, o8) = seed_alfki(&mut em);
    let detail = find_detail(&em, 7, 11);

    em.set_navigation(detail, "Order", Some(o8)).unwrap();
    assert_eq!(em.get_value(detail, "OrderID").unwrap(), DataValue::Int(7));
    assert_eq!(em.entity_key(detail).unwrap().to_string(), "OrderDetail:7:11");
    assert_eq!(find_detail(&em, 7, 11), detail);
    assert_eq!(em.get_navigation(detail, "Order").unwrap(), Some(o8));
    assert!(em.get_collection(o8, "OrderDetails").unwrap().contains(detail));
    assert!(!em.get_collection(o7, "OrderDetails").unwrap().contains(detail));

    // Clearing the navigation leaves the key part alone as well.
    em.set_navigation(detail, "Order", None).unwrap();
    assert_eq!(em.get_value(detail, "OrderID").unwrap(), DataValue::Int(7));
}

#[test]
fn entities_from_another_manager_are_rejected() {
    let mut em = manager();
    let (alfki, o7, _) = seed_alfki(&mut em);
    let mut other = manager();
    let stranger = bonap(&mut other);
    let foreign_order = merge(&mut other, &json!({ "$type": "Order", "OrderID": 99 }))[0];

    let err = em.set_navigation(o7, "Customer", Some(stranger)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(em.get_navigation(o7, "Customer").unwrap(), Some(alfki));

    let err = em.push(alfki, "Orders", &[foreign_order]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(em.get_collection(alfki, "Orders").unwrap().len(), 2);
    assert_eq!(other.get_navigation(foreign_order, "Customer").unwrap(), None);
}

#[test]
fn nested_values_cannot_be_cleared() {
    let mut em = manager();
    let (alfki, _, _) = seed_alfki(&mut em);
    let address = em.get_complex(alfki, "Address").unwrap();

    let err = em
        .set_property(alfki, "Address", PropertyValue::Data(DataValue::Null))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(em.get_complex(alfki, "Address").unwrap(), address);
    assert_eq!(em.entity_state(alfki).unwrap(), EntityState::Unchanged);
}
