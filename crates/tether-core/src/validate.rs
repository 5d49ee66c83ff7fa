// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Running validators against tracked entities.
//!
//! Every validator run either files an error (replacing any error with the
//! same validator and property path) or withdraws one. Adds and removes from
//! one entry point are reported together in a single
//! `validation_errors_changed` notification.
use std::sync::Arc;

use crate::error::CacheError;
use crate::ident::{EntityRef, PropertyRef, StructuralRef};
use crate::manager::EntityManager;
use crate::record::{NavigationSlot, PropertySlot};
use crate::validation::{
    ObjectView, ValidationContext, ValidationError, ValidationKey, ValidationSubject,
    ValidatorHandle,
};
use crate::value::DataType;

#[derive(Debug, Default)]
struct ErrorDelta {
    added: Vec<ValidationError>,
    removed: Vec<ValidationError>,
}

impl EntityManager {
    /// Runs every property, nested value and entity-level validator on `e`.
    /// Returns `true` when no validator failed.
    pub fn validate_entity(&mut self, e: EntityRef) -> Result<bool, CacheError> {
        let mut delta = ErrorDelta::default();
        let ok = self.validate_object(e, StructuralRef::Entity(e), &mut delta)?;
        self.publish_validation_change(e, delta.added, delta.removed);
        Ok(ok)
    }

    /// Validates one property of `e`; `path` may be dotted through nested
    /// values (`"Address.City"`) or name a navigation property.
    pub fn validate_property(&mut self, e: EntityRef, path: &str) -> Result<bool, CacheError> {
        match self.resolve_path(e, path)? {
            (target, PropertyRef::Data(idx)) => self.validate_slot(e, target, idx),
            (_, PropertyRef::Navigation(nav)) => self.validate_navigation_slot(e, nav),
        }
    }

    /// Validates the data property `idx` of `target`, filing results on
    /// `root`.
    pub(crate) fn validate_slot(
        &mut self,
        root: EntityRef,
        target: StructuralRef,
        idx: usize,
    ) -> Result<bool, CacheError> {
        let mut delta = ErrorDelta::default();
        let ok = self.validate_data_property(root, target, idx, &mut delta)?;
        self.publish_validation_change(root, delta.added, delta.removed);
        Ok(ok)
    }

    /// Validates the navigation `nav` of `e`.
    pub(crate) fn validate_navigation_slot(&mut self, e: EntityRef, nav: usize) -> Result<bool, CacheError> {
        let mut delta = ErrorDelta::default();
        let ok = self.validate_navigation(e, nav, &mut delta)?;
        self.publish_validation_change(e, delta.added, delta.removed);
        Ok(ok)
    }

    fn resolve_path(&self, e: EntityRef, path: &str) -> Result<(StructuralRef, PropertyRef), CacheError> {
        let mut target = StructuralRef::Entity(e);
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let property = self.resolve_property(target, segment)?;
            if segments.peek().is_none() {
                return Ok((target, property));
            }
            let PropertyRef::Data(idx) = property else {
                return Err(CacheError::argument(format!(
                    "'{segment}' in '{path}' is a navigation; paths only cross nested values"
                )));
            };
            match self.slots(target)?[idx] {
                PropertySlot::Complex(c) => target = StructuralRef::Complex(c),
                _ => {
                    return Err(CacheError::argument(format!(
                        "'{segment}' in '{path}' is not a nested value"
                    )))
                }
            }
        }
        Err(CacheError::argument("empty property path"))
    }

    fn validate_object(
        &mut self,
        root: EntityRef,
        target: StructuralRef,
        delta: &mut ErrorDelta,
    ) -> Result<bool, CacheError> {
        let mut ok = true;
        let len = self.slots(target)?.len();
        for idx in 0..len {
            ok &= self.validate_data_property(root, target, idx, delta)?;
        }
        let schema = Arc::clone(&self.schema);
        let st = schema.structural_type(self.structural_type_id(target)?);
        if let StructuralRef::Entity(e) = target {
            for nav in 0..self.entity(e)?.navigation.len() {
                ok &= self.validate_navigation(e, nav, delta)?;
            }
        }
        let path = match target {
            StructuralRef::Entity(_) => None,
            StructuralRef::Complex(c) => match self.complex(c)?.aspect.parent {
                Some(parent) => {
                    let owner_type = self.structural_type_id(parent.owner)?;
                    let name = &schema.structural_type(owner_type).data_properties()[parent.property].name;
                    Some(self.property_path(parent.owner, name)?)
                }
                None => None,
            },
        };
        let view = self.object_view(target)?;
        ok &= self.run_validators(
            root,
            st.validators(),
            &ValidationSubject::Object(&view),
            st.name(),
            path,
            None,
            delta,
        )?;
        Ok(ok)
    }

    fn validate_data_property(
        &mut self,
        root: EntityRef,
        target: StructuralRef,
        idx: usize,
        delta: &mut ErrorDelta,
    ) -> Result<bool, CacheError> {
        let schema = Arc::clone(&self.schema);
        let st = schema.structural_type(self.structural_type_id(target)?);
        let dp = &st.data_properties()[idx];
        let path = self.property_path(target, &dp.name)?;
        match self.slots(target)?[idx].clone() {
            PropertySlot::Value(value) => self.run_validators(
                root,
                &dp.validators,
                &ValidationSubject::Value(&value),
                &dp.name,
                Some(path),
                Some(dp.data_type),
                delta,
            ),
            PropertySlot::PrimitiveCollection(coll) => {
                // The first failing element decides the filed error.
                let ctx = context(&dp.name, Some(&path), Some(dp.data_type));
                let failing = coll.items.iter().find(|&v| {
                    dp.validators
                        .iter()
                        .any(|val| val.validate(&ValidationSubject::Value(v), &ctx).is_some())
                });
                let Some(probe) = failing.or_else(|| coll.items.first()).cloned() else {
                    for validator in &dp.validators {
                        let key = ValidationKey {
                            validator: validator.name().to_owned(),
                            property_path: Some(path.clone()),
                        };
                        self.file_outcome(root, key, None, delta)?;
                    }
                    return Ok(true);
                };
                self.run_validators(
                    root,
                    &dp.validators,
                    &ValidationSubject::Value(&probe),
                    &dp.name,
                    Some(path),
                    Some(dp.data_type),
                    delta,
                )
            }
            PropertySlot::Complex(c) => {
                let view = self.object_view(StructuralRef::Complex(c))?;
                let mut ok = self.run_validators(
                    root,
                    &dp.validators,
                    &ValidationSubject::Object(&view),
                    &dp.name,
                    Some(path),
                    None,
                    delta,
                )?;
                ok &= self.validate_object(root, StructuralRef::Complex(c), delta)?;
                Ok(ok)
            }
            PropertySlot::ComplexCollection(coll) => {
                let mut ok = true;
                for c in coll.items {
                    ok &= self.validate_object(root, StructuralRef::Complex(c), delta)?;
                }
                Ok(ok)
            }
        }
    }

    fn validate_navigation(
        &mut self,
        e: EntityRef,
        nav: usize,
        delta: &mut ErrorDelta,
    ) -> Result<bool, CacheError> {
        let schema = Arc::clone(&self.schema);
        let np = &schema.entity_type(self.entity(e)?.entity_type).navigation_properties[nav];
        if np.validators.is_empty() {
            return Ok(true);
        }
        let related: Vec<EntityRef> = match self.nav_slot(e, nav)? {
            NavigationSlot::Scalar(v) => v.iter().copied().collect(),
            NavigationSlot::Collection(c) => c.items.clone(),
        };
        self.run_validators(
            e,
            &np.validators,
            &ValidationSubject::Related(&related),
            &np.name,
            Some(np.name.clone()),
            None,
            delta,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn run_validators(
        &mut self,
        root: EntityRef,
        validators: &[ValidatorHandle],
        subject: &ValidationSubject<'_>,
        display_name: &str,
        path: Option<String>,
        data_type: Option<DataType>,
        delta: &mut ErrorDelta,
    ) -> Result<bool, CacheError> {
        let mut ok = true;
        for validator in validators {
            let ctx = context(display_name, path.as_deref(), data_type);
            let key = ValidationKey {
                validator: validator.name().to_owned(),
                property_path: path.clone(),
            };
            let outcome = validator
                .validate(subject, &ctx)
                .map(|message| ValidationError::new(validator.name(), path.clone(), message));
            ok &= outcome.is_none();
            self.file_outcome(root, key, outcome, delta)?;
        }
        Ok(ok)
    }

    fn file_outcome(
        &mut self,
        root: EntityRef,
        key: ValidationKey,
        outcome: Option<ValidationError>,
        delta: &mut ErrorDelta,
    ) -> Result<(), CacheError> {
        let errors = &mut self.entity_mut(root)?.aspect.validation_errors;
        match outcome {
            Some(error) => {
                if let Some(prev) = errors.insert(key, error.clone()) {
                    if prev == error {
                        return Ok(());
                    }
                    delta.removed.push(prev);
                }
                delta.added.push(error);
            }
            None => {
                if let Some(prev) = errors.remove(&key) {
                    delta.removed.push(prev);
                }
            }
        }
        Ok(())
    }

    fn object_view(&self, target: StructuralRef) -> Result<ObjectView, CacheError> {
        let st = self.schema.structural_type(self.structural_type_id(target)?);
        let values = st
            .data_properties()
            .iter()
            .zip(self.slots(target)?)
            .filter_map(|(dp, slot)| match slot {
                PropertySlot::Value(v) => Some((dp.name.clone(), v.clone())),
                _ => None,
            })
            .collect();
        Ok(ObjectView {
            type_name: st.name().to_owned(),
            values,
        })
    }

    /// Filed validation errors, optionally restricted to one property path.
    pub fn validation_errors(
        &self,
        e: EntityRef,
        property_path: Option<&str>,
    ) -> Result<Vec<ValidationError>, CacheError> {
        Ok(self
            .entity(e)?
            .aspect
            .validation_errors
            .values()
            .filter(|err| property_path.is_none() || err.property_path.as_deref() == property_path)
            .cloned()
            .collect())
    }

    /// Files an externally produced error (server errors, custom checks).
    pub fn add_validation_error(&mut self, e: EntityRef, error: ValidationError) -> Result<(), CacheError> {
        let mut delta = ErrorDelta::default();
        self.file_outcome(e, error.key(), Some(error), &mut delta)?;
        self.publish_validation_change(e, delta.added, delta.removed);
        Ok(())
    }

    /// Withdraws the error filed under `key`. Returns whether one existed.
    pub fn remove_validation_error(&mut self, e: EntityRef, key: &ValidationKey) -> Result<bool, CacheError> {
        let removed = self.entity_mut(e)?.aspect.validation_errors.remove(key);
        let existed = removed.is_some();
        self.publish_validation_change(e, Vec::new(), removed.into_iter().collect());
        Ok(existed)
    }

    /// Withdraws every filed error.
    pub fn clear_validation_errors(&mut self, e: EntityRef) -> Result<(), CacheError> {
        let removed = std::mem::take(&mut self.entity_mut(e)?.aspect.validation_errors);
        self.publish_validation_change(e, Vec::new(), removed.into_values().collect());
        Ok(())
    }

    /// Withdraws errors reported by a remote service.
    pub(crate) fn clear_server_errors(&mut self, e: EntityRef) -> Result<(), CacheError> {
        let errors = &mut self.entity_mut(e)?.aspect.validation_errors;
        let keys: Vec<ValidationKey> = errors
            .iter()
            .filter(|(_, err)| err.is_server_error)
            .map(|(k, _)| k.clone())
            .collect();
        let removed: Vec<ValidationError> = keys.iter().filter_map(|k| errors.remove(k)).collect();
        self.publish_validation_change(e, Vec::new(), removed);
        Ok(())
    }
}

fn context<'a>(
    display_name: &'a str,
    property_path: Option<&'a str>,
    data_type: Option<DataType>,
) -> ValidationContext<'a> {
    ValidationContext {
        display_name,
        property_path,
        data_type,
    }
}
