// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{manager, seed_alfki};
use tether_core::{
    handle, CacheOptions, DataPropertyDef, DataType, DataValue, EntityManager, EntityState,
    EntityTypeDef, FnValidator, NavigationDef, RequiredValidator, SaveResult, SchemaBuilder,
    ValidationError, ValidationKey, ValidationOptions, ValidationSubject,
};
use tether_dry_tests::northwind::northwind_manager_with;
use tether_dry_tests::EventRecorder;

const LONG_NAME: &str = "A ship name that is far too long to fit the column";

#[test]
fn writes_are_validated_as_they_happen() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let recorder = EventRecorder::attach(&mut em);

    em.set_value(o7, "ShipName", LONG_NAME).unwrap();
    let errors = em.validation_errors(o7, Some("ShipName")).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].validator, "maxLength");
    assert!(errors[0].message.contains("40"));
    assert!(em.aspect(o7).unwrap().has_validation_errors());

    em.set_value(o7, "ShipName", "Short").unwrap();
    assert!(em.validation_errors(o7, None).unwrap().is_empty());

    let changes = recorder.validation_changes();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].entity, o7);
    assert_eq!(changes[0].added.len(), 1);
    assert_eq!(changes[1].removed.len(), 1);
}

#[test]
fn unparseable_values_are_kept_and_flagged() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    em.set_value(o7, "EmployeeID", "abc").unwrap();
    assert_eq!(em.get_value(o7, "EmployeeID").unwrap(), DataValue::from("abc"));
    let errors = em.validation_errors(o7, Some("EmployeeID")).unwrap();
    assert_eq!(errors[0].validator, "dataType");
}

#[test]
fn required_properties_are_checked_on_attach() {
    let mut em = manager();
    let customer = em.create_entity("Customer", &[]).unwrap();
    em.add_entity(customer).unwrap();
    assert_eq!(em.entity_state(customer).unwrap(), EntityState::Added);
    let errors = em.validation_errors(customer, Some("CompanyName")).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].validator, "required");

    // Blank strings count as missing.
    em.set_value(customer, "CompanyName", "   ").unwrap();
    assert_eq!(em.validation_errors(customer, Some("CompanyName")).unwrap().len(), 1);
    em.set_value(customer, "CompanyName", "Chop-suey Chinese").unwrap();
    assert!(em.validation_errors(customer, None).unwrap().is_empty());
}

#[test]
fn nested_values_file_errors_on_the_owner() {
    let mut em = manager();
    let (alfki, _, _) = seed_alfki(&mut em);
    let address = em.get_complex(alfki, "Address").unwrap();
    em.set_value(address, "City", "Llanfairpwllgwyngyll").unwrap();

    let errors = em.validation_errors(alfki, Some("Address.City")).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].validator, "maxLength");
    assert!(!em.validate_property(alfki, "Address.City").unwrap());
    assert!(em.validate_property(alfki, "CompanyName").unwrap());
}

#[test]
fn validate_entity_covers_every_property() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let options = ValidationOptions {
        validate_on_property_change: false,
        ..ValidationOptions::default()
    };
    let mut quiet = northwind_manager_with(CacheOptions {
        validation: options,
        ..CacheOptions::default()
    })
    .unwrap();
    let (_, q7, _) = seed_alfki(&mut quiet);
    quiet.set_value(q7, "ShipName", LONG_NAME).unwrap();
    assert!(quiet.validation_errors(q7, None).unwrap().is_empty());
    assert!(!quiet.validate_entity(q7).unwrap());
    assert_eq!(quiet.validation_errors(q7, None).unwrap().len(), 1);

    assert!(em.validate_entity(o7).unwrap());
}

#[test]
fn prepare_save_reports_invalid_entities() {
    let mut em = manager();
    let (_, o7, o8) = seed_alfki(&mut em);
    em.set_value(o7, "ShipName", LONG_NAME).unwrap();
    em.set_value(o8, "ShipName", "Fine").unwrap();

    let bundle = em.prepare_save(None).unwrap();
    assert_eq!(bundle.entities.len(), 2);
    assert_eq!(bundle.invalid, vec![o7]);
}

#[test]
fn entity_level_validators_see_the_whole_object() {
    let schema = SchemaBuilder::new()
        .entity_type(
            EntityTypeDef::new("Shipment")
                .key(DataPropertyDef::new("Id", DataType::Int32))
                .property(DataPropertyDef::new("Weight", DataType::Double))
                .validator(handle(FnValidator::new(
                    "maxWeight",
                    "{name} is overweight",
                    |subject| match subject {
                        ValidationSubject::Object(view) => {
                            !matches!(view.get("Weight"), Some(DataValue::Double(w)) if *w > 100.0)
                        }
                        ValidationSubject::Value(_) | ValidationSubject::Related(_) => true,
                    },
                ))),
        )
        .build()
        .unwrap();
    let mut em = EntityManager::new(Arc::clone(&schema));
    let heavy = em
        .create_entity(
            "Shipment",
            &[("Id", DataValue::Int(1)), ("Weight", DataValue::Double(250.0))],
        )
        .unwrap();
    em.attach_entity(heavy, EntityState::Unchanged).unwrap();

    let errors = em.validation_errors(heavy, None).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].validator, "maxWeight");
    assert_eq!(errors[0].property_path, None);
    assert_eq!(errors[0].message, "Shipment is overweight");

    em.set_value(heavy, "Weight", 10.0).unwrap();
    assert!(em.validate_entity(heavy).unwrap());
}

#[test]
fn manual_errors_can_be_filed_and_withdrawn() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    let recorder = EventRecorder::attach(&mut em);
    let error = ValidationError::new("custom", Some("Freight".to_owned()), "check freight");
    em.add_validation_error(o7, error.clone()).unwrap();
    // Re-filing an identical error is not a change.
    em.add_validation_error(o7, error.clone()).unwrap();
    assert_eq!(recorder.validation_changes().len(), 1);

    let key = ValidationKey {
        validator: "custom".to_owned(),
        property_path: Some("Freight".to_owned()),
    };
    assert!(em.remove_validation_error(o7, &key).unwrap());
    assert!(!em.remove_validation_error(o7, &key).unwrap());

    em.add_validation_error(o7, error).unwrap();
    em.clear_validation_errors(o7).unwrap();
    assert!(em.validation_errors(o7, None).unwrap().is_empty());
}

#[test]
fn save_results_clear_server_errors_only() {
    let mut em = manager();
    let (_, o7, _) = seed_alfki(&mut em);
    em.set_value(o7, "ShipName", "Saving").unwrap();
    let server = ValidationError {
        is_server_error: true,
        ..ValidationError::new("server", None, "rejected by server")
    };
    em.add_validation_error(o7, server).unwrap();
    em.add_validation_error(o7, ValidationError::new("local", None, "local rule"))
        .unwrap();

    em.apply_save_result(&[o7], SaveResult::default()).unwrap();
    let left = em.validation_errors(o7, None).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].validator, "local");
    assert_eq!(em.entity_state(o7).unwrap(), EntityState::Unchanged);
}

#[test]
fn navigation_validators_follow_assignments() {
    let schema = SchemaBuilder::new()
        .entity_type(
            EntityTypeDef::new("Team")
                .key(DataPropertyDef::new("Id", DataType::Int32))
                .navigation(NavigationDef::collection("Players", "Player").association("Team_Players")),
        )
        .entity_type(
            EntityTypeDef::new("Player")
                .key(DataPropertyDef::new("Id", DataType::Int32))
                .property(DataPropertyDef::new("TeamId", DataType::Int32))
                .navigation(
                    NavigationDef::scalar("Team", "Team")
                        .association("Team_Players")
                        .foreign_keys(["TeamId"])
                        .validator(handle(RequiredValidator::default())),
                ),
        )
        .build()
        .unwrap();
    let mut em = EntityManager::new(schema);
    let team = em.create_entity("Team", &[("Id", DataValue::Int(1))]).unwrap();
    em.attach_entity(team, EntityState::Unchanged).unwrap();
    let player = em.create_entity("Player", &[("Id", DataValue::Int(10))]).unwrap();
    em.attach_entity(player, EntityState::Unchanged).unwrap();

    let errors = em.validation_errors(player, Some("Team")).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].validator, "required");
    assert_eq!(errors[0].message, "'Team' is required");

    em.set_navigation(player, "Team", Some(team)).unwrap();
    assert!(em.validation_errors(player, None).unwrap().is_empty());
    assert!(em.validate_property(player, "Team").unwrap());

    em.set_navigation(player, "Team", None).unwrap();
    assert_eq!(em.validation_errors(player, Some("Team")).unwrap().len(), 1);
    assert!(!em.validate_property(player, "Team").unwrap());
    assert!(!em.validate_entity(player).unwrap());
}
