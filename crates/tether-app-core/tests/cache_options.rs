// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use tether_app_core::{CacheOptionsService, ConfigError, ConfigStore, CACHE_OPTIONS_KEY};
use tether_core::{
    AdapterRegistry, CacheOptions, DefaultJsonAdapter, ErrorKind, MergeStrategy, NamingConvention,
};
use tether_dry_tests::{northwind_schema, InMemoryConfigStore};

fn service() -> (InMemoryConfigStore, CacheOptionsService<InMemoryConfigStore>) {
    tether_dry_tests::init_tracing();
    let store = InMemoryConfigStore::new();
    (store.clone(), CacheOptionsService::new(store))
}

#[test]
fn missing_options_fall_back_to_defaults() {
    let (store, service) = service();
    assert_eq!(service.load().unwrap(), CacheOptions::default());
    assert_eq!(store.load_count(), 1);
    assert_eq!(store.save_count(), 0);
}

#[test]
fn saved_options_load_back() {
    let (store, service) = service();
    let mut options = CacheOptions {
        merge_strategy: MergeStrategy::OverwriteChanges,
        naming_convention: NamingConvention::CamelCase,
        ..CacheOptions::default()
    };
    options.validation.validate_on_query = true;
    service.save(&options).unwrap();

    assert!(store.contains_key(CACHE_OPTIONS_KEY));
    assert_eq!(service.load().unwrap(), options);
}

#[test]
fn partial_document_keeps_defaults_for_missing_fields() {
    let (store, service) = service();
    store
        .save_raw(CACHE_OPTIONS_KEY, br#"{ "adapterName": "odata" }"#)
        .unwrap();
    let options = service.load().unwrap();
    assert_eq!(options.adapter_name, "odata");
    assert_eq!(options.merge_strategy, MergeStrategy::PreserveChanges);
    assert!(options.validation.validate_on_save);
}

#[test]
fn empty_document_is_treated_as_missing() {
    let (store, service) = service();
    store.save_raw(CACHE_OPTIONS_KEY, b"").unwrap();
    assert_eq!(service.load().unwrap(), CacheOptions::default());
}

#[test]
fn malformed_document_names_its_key() {
    let (store, service) = service();
    store.save_raw(CACHE_OPTIONS_KEY, b"{ not json").unwrap();
    let err = service.load().unwrap_err();
    assert!(matches!(&err, ConfigError::Malformed { key, .. } if key == CACHE_OPTIONS_KEY));
    assert!(err.to_string().contains(CACHE_OPTIONS_KEY));
}

#[test]
fn update_edits_the_stored_document() {
    let (store, service) = service();
    let saved = service
        .update(|o| o.merge_strategy = MergeStrategy::SkipMerge)
        .unwrap();
    assert_eq!(saved.merge_strategy, MergeStrategy::SkipMerge);
    assert_eq!(service.load().unwrap(), saved);
    assert_eq!(store.save_count(), 1);

    assert!(service.reset().unwrap());
    assert!(!service.reset().unwrap());
    assert_eq!(service.load().unwrap(), CacheOptions::default());
}

#[test]
fn store_failures_propagate() {
    let (store, service) = service();
    store.set_fail_on_load(true);
    assert!(matches!(service.load(), Err(ConfigError::Store(_))));
    assert!(matches!(
        service.update(|o| o.adapter_name = "json".into()),
        Err(ConfigError::Store(_))
    ));
    assert_eq!(store.save_count(), 0);

    store.set_fail_on_load(false);
    store.set_fail_on_save(true);
    let err = service.save(&CacheOptions::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Store(_)));
    assert!(!store.contains_key(CACHE_OPTIONS_KEY));
}

#[test]
fn opened_caches_use_the_stored_options() {
    let (_, service) = service();
    service
        .update(|o| o.merge_strategy = MergeStrategy::OverwriteChanges)
        .unwrap();
    let em = service.open(northwind_schema().unwrap()).unwrap();
    assert_eq!(em.options().merge_strategy, MergeStrategy::OverwriteChanges);
}

#[test]
fn unknown_adapters_fail_to_open() {
    let (_, service) = service();
    service.update(|o| o.adapter_name = "odata".into()).unwrap();
    let err = service.open(northwind_schema().unwrap()).unwrap_err();
    assert!(matches!(&err, ConfigError::Cache(e) if e.kind() == ErrorKind::InvalidArgument));

    let mut registry = AdapterRegistry::with_defaults();
    registry
        .register("odata", || Box::new(DefaultJsonAdapter))
        .unwrap();
    let em = service.open_with(northwind_schema().unwrap(), &registry).unwrap();
    assert_eq!(em.options().adapter_name, "odata");
}
