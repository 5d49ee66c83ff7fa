// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema metadata: entity types, complex types and their properties.
//!
//! A [`Schema`] is built once through [`SchemaBuilder`] and shared by
//! `Arc`. Building resolves every name (navigation targets, foreign keys,
//! inverse navigations via association names) into indices so the property
//! interceptor never does string lookups on the hot path.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CacheError;
use crate::ident::{ComplexTypeId, EntityTypeId, PropertyRef, StructuralTypeId};
use crate::naming::NamingConvention;
use crate::validation::{
    handle, DataTypeValidator, MaxLengthValidator, RequiredValidator, ValidatorHandle,
};
use crate::value::{DataType, DataValue};

/// How new entities of a type obtain key values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AutoGeneratedKeyType {
    /// The caller supplies keys.
    #[default]
    None,
    /// The server assigns keys; the cache uses temporary keys until save.
    Identity,
    /// A client-side key generator assigns keys.
    KeyGenerator,
}

/// A scalar, nested-value, or primitive-collection property.
#[derive(Clone, Debug)]
pub struct DataProperty {
    /// Client name.
    pub name: String,
    /// Name used in server payloads.
    pub name_on_server: String,
    /// Declared type (`Undefined` for nested values).
    pub data_type: DataType,
    /// Whether null is an acceptable value.
    pub is_nullable: bool,
    /// Value given to freshly created objects.
    pub default_value: DataValue,
    /// Member of the owning entity type's key.
    pub is_part_of_key: bool,
    /// `false` for collection properties.
    pub is_scalar: bool,
    /// Nested value type, for complex properties.
    pub complex_type: Option<ComplexTypeId>,
    /// Maximum string length, when declared.
    pub max_length: Option<usize>,
    /// Property-level validators (auto-generated ones first).
    pub validators: Vec<ValidatorHandle>,
    /// For foreign keys: the scalar navigation on the same type that the key
    /// describes.
    pub related_navigation: Option<usize>,
    /// For foreign keys of a unidirectional association: the navigation on
    /// the parent type that points at this type.
    pub inverse_navigation: Option<(EntityTypeId, usize)>,
}

impl DataProperty {
    /// True for nested value (complex) properties.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        self.complex_type.is_some()
    }
}

/// A relationship from one entity type to another.
#[derive(Clone, Debug)]
pub struct NavigationProperty {
    /// Client name.
    pub name: String,
    /// Name used in server payloads.
    pub name_on_server: String,
    /// Related entity type.
    pub target: EntityTypeId,
    /// Single reference (`true`) or collection (`false`).
    pub is_scalar: bool,
    /// Association name shared with the inverse navigation.
    pub association: Option<String>,
    /// Index of the inverse navigation on the target type.
    pub inverse: Option<usize>,
    /// Foreign key data properties on this type (child side).
    pub foreign_keys: Vec<usize>,
    /// Foreign key data properties on the target type (parent side).
    pub inv_foreign_keys: Vec<usize>,
    /// Validators run against the related entities.
    pub validators: Vec<ValidatorHandle>,
}

/// A keyed, independently tracked type.
#[derive(Clone, Debug)]
pub struct EntityType {
    /// Identifier within the schema.
    pub id: EntityTypeId,
    /// Short name.
    pub name: String,
    /// Optional namespace.
    pub namespace: Option<String>,
    /// Data properties in declaration order.
    pub data_properties: Vec<DataProperty>,
    /// Navigation properties in declaration order.
    pub navigation_properties: Vec<NavigationProperty>,
    /// Indices of the key properties, in key order.
    pub key_properties: Vec<usize>,
    /// Key generation policy.
    pub auto_generated_key: AutoGeneratedKeyType,
    /// Entity-level validators.
    pub validators: Vec<ValidatorHandle>,
    /// Unidirectional navigations on other types whose inverse foreign keys
    /// live on this type.
    pub unidirectional_parents: Vec<(EntityTypeId, usize)>,
}

impl EntityType {
    /// Data property by client name.
    #[must_use]
    pub fn data_property(&self, name: &str) -> Option<(usize, &DataProperty)> {
        self.data_properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    /// Navigation property by client name.
    #[must_use]
    pub fn navigation_property(&self, name: &str) -> Option<(usize, &NavigationProperty)> {
        self.navigation_properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    /// Either kind of property by client name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<PropertyRef> {
        self.data_property(name)
            .map(|(i, _)| PropertyRef::Data(i))
            .or_else(|| {
                self.navigation_property(name)
                    .map(|(i, _)| PropertyRef::Navigation(i))
            })
    }

    /// `Namespace.Name`, or the short name without a namespace.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualify(self.namespace.as_deref(), &self.name)
    }

    /// Position of data property `idx` in the key, if it is a key member.
    #[must_use]
    pub fn key_position(&self, idx: usize) -> Option<usize> {
        self.key_properties.iter().position(|k| *k == idx)
    }
}

/// A keyless nested value type.
#[derive(Clone, Debug)]
pub struct ComplexType {
    /// Identifier within the schema.
    pub id: ComplexTypeId,
    /// Short name.
    pub name: String,
    /// Optional namespace.
    pub namespace: Option<String>,
    /// Data properties in declaration order.
    pub data_properties: Vec<DataProperty>,
    /// Object-level validators.
    pub validators: Vec<ValidatorHandle>,
}

impl ComplexType {
    /// Data property by client name.
    #[must_use]
    pub fn data_property(&self, name: &str) -> Option<(usize, &DataProperty)> {
        self.data_properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }
}

/// Borrowed view over either structural type.
#[derive(Clone, Copy, Debug)]
pub enum StructuralType<'a> {
    /// Entity type.
    Entity(&'a EntityType),
    /// Complex type.
    Complex(&'a ComplexType),
}

impl<'a> StructuralType<'a> {
    /// Short name.
    #[must_use]
    pub fn name(&self) -> &'a str {
        match self {
            Self::Entity(t) => &t.name,
            Self::Complex(t) => &t.name,
        }
    }

    /// Data properties.
    #[must_use]
    pub fn data_properties(&self) -> &'a [DataProperty] {
        match self {
            Self::Entity(t) => &t.data_properties,
            Self::Complex(t) => &t.data_properties,
        }
    }

    /// Object-level validators.
    #[must_use]
    pub fn validators(&self) -> &'a [ValidatorHandle] {
        match self {
            Self::Entity(t) => &t.validators,
            Self::Complex(t) => &t.validators,
        }
    }

    /// Data property by client name.
    #[must_use]
    pub fn data_property(&self, name: &str) -> Option<(usize, &'a DataProperty)> {
        self.data_properties()
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }
}

/// Immutable set of types known to a cache.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    entity_types: Vec<EntityType>,
    complex_types: Vec<ComplexType>,
    names: BTreeMap<String, StructuralTypeId>,
}

impl Schema {
    /// Entity type by id.
    ///
    /// Ids are only minted by the builder of this schema, so lookups cannot
    /// miss for ids obtained from it.
    #[must_use]
    pub fn entity_type(&self, id: EntityTypeId) -> &EntityType {
        &self.entity_types[id.0 as usize]
    }

    /// Complex type by id.
    #[must_use]
    pub fn complex_type(&self, id: ComplexTypeId) -> &ComplexType {
        &self.complex_types[id.0 as usize]
    }

    /// Either structural type by id.
    #[must_use]
    pub fn structural_type(&self, id: StructuralTypeId) -> StructuralType<'_> {
        match id {
            StructuralTypeId::Entity(e) => StructuralType::Entity(self.entity_type(e)),
            StructuralTypeId::Complex(c) => StructuralType::Complex(self.complex_type(c)),
        }
    }

    /// All entity types in id order.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.iter()
    }

    /// Resolves a type name: short (`Order`), dotted (`Ns.Order`), or
    /// server-qualified (`Order:#Ns`).
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<StructuralTypeId> {
        if let Some(id) = self.names.get(name) {
            return Some(*id);
        }
        let (short, ns) = name.split_once(":#")?;
        self.names.get(&qualify(Some(ns), short)).copied()
    }

    /// Entity type by name.
    pub fn entity_type_by_name(&self, name: &str) -> Result<&EntityType, CacheError> {
        match self.resolve(name) {
            Some(StructuralTypeId::Entity(id)) => Ok(self.entity_type(id)),
            Some(StructuralTypeId::Complex(_)) => Err(CacheError::argument(format!(
                "'{name}' is a complex type, not an entity type"
            ))),
            None => Err(CacheError::argument(format!("unknown entity type '{name}'"))),
        }
    }

    /// Complex type by name.
    pub fn complex_type_by_name(&self, name: &str) -> Result<&ComplexType, CacheError> {
        match self.resolve(name) {
            Some(StructuralTypeId::Complex(id)) => Ok(self.complex_type(id)),
            Some(StructuralTypeId::Entity(_)) => Err(CacheError::argument(format!(
                "'{name}' is an entity type, not a complex type"
            ))),
            None => Err(CacheError::argument(format!("unknown complex type '{name}'"))),
        }
    }
}

fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}.{name}"),
        _ => name.to_owned(),
    }
}

/// Declaration of a data property.
#[derive(Clone, Debug)]
pub struct DataPropertyDef {
    name: String,
    name_on_server: Option<String>,
    data_type: DataType,
    nullable: bool,
    default_value: Option<DataValue>,
    part_of_key: bool,
    is_scalar: bool,
    complex_type: Option<String>,
    max_length: Option<usize>,
    validators: Vec<ValidatorHandle>,
}

impl DataPropertyDef {
    /// Nullable scalar property of `data_type`.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            name_on_server: None,
            data_type,
            nullable: true,
            default_value: None,
            part_of_key: false,
            is_scalar: true,
            complex_type: None,
            max_length: None,
            validators: Vec::new(),
        }
    }

    /// Nested value property of the named complex type.
    pub fn complex(name: impl Into<String>, complex_type: impl Into<String>) -> Self {
        let mut def = Self::new(name, DataType::Undefined);
        def.complex_type = Some(complex_type.into());
        def.nullable = false;
        def
    }

    /// Sets nullability.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Sets the default value for new objects.
    pub fn default_value(mut self, value: impl Into<DataValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Declares a maximum string length (adds a `maxLength` validator).
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Makes this a collection property.
    pub fn collection(mut self) -> Self {
        self.is_scalar = false;
        self
    }

    /// Overrides the server-side name.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.name_on_server = Some(name.into());
        self
    }

    /// Adds a custom validator.
    pub fn validator(mut self, validator: ValidatorHandle) -> Self {
        self.validators.push(validator);
        self
    }
}

/// Declaration of a navigation property.
#[derive(Clone, Debug)]
pub struct NavigationDef {
    name: String,
    name_on_server: Option<String>,
    target: String,
    is_scalar: bool,
    association: Option<String>,
    foreign_keys: Vec<String>,
    inv_foreign_keys: Vec<String>,
    validators: Vec<ValidatorHandle>,
}

impl NavigationDef {
    /// Single-valued navigation to `target`.
    pub fn scalar(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name.into(), target.into(), true)
    }

    /// Collection navigation to `target`.
    pub fn collection(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name.into(), target.into(), false)
    }

    fn new(name: String, target: String, is_scalar: bool) -> Self {
        Self {
            name,
            name_on_server: None,
            target,
            is_scalar,
            association: None,
            foreign_keys: Vec::new(),
            inv_foreign_keys: Vec::new(),
            validators: Vec::new(),
        }
    }

    /// Association name; two navigations sharing it are inverses.
    pub fn association(mut self, name: impl Into<String>) -> Self {
        self.association = Some(name.into());
        self
    }

    /// Foreign key properties on the declaring type.
    pub fn foreign_keys<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_keys = names.into_iter().map(Into::into).collect();
        self
    }

    /// Foreign key properties on the target type (unidirectional parent side).
    pub fn inv_foreign_keys<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inv_foreign_keys = names.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the server-side name.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.name_on_server = Some(name.into());
        self
    }

    /// Adds a validator. It sees the related entities as
    /// [`ValidationSubject::Related`](crate::ValidationSubject::Related).
    pub fn validator(mut self, validator: ValidatorHandle) -> Self {
        self.validators.push(validator);
        self
    }
}

/// Declaration of an entity type.
#[derive(Clone, Debug)]
pub struct EntityTypeDef {
    name: String,
    namespace: Option<String>,
    properties: Vec<DataPropertyDef>,
    navigations: Vec<NavigationDef>,
    auto_generated_key: AutoGeneratedKeyType,
    validators: Vec<ValidatorHandle>,
}

impl EntityTypeDef {
    /// New entity type declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            properties: Vec::new(),
            navigations: Vec::new(),
            auto_generated_key: AutoGeneratedKeyType::None,
            validators: Vec::new(),
        }
    }

    /// Sets the namespace.
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Adds a key property (non-nullable).
    pub fn key(mut self, mut prop: DataPropertyDef) -> Self {
        prop.part_of_key = true;
        prop.nullable = false;
        self.properties.push(prop);
        self
    }

    /// Adds a data property.
    pub fn property(mut self, prop: DataPropertyDef) -> Self {
        self.properties.push(prop);
        self
    }

    /// Adds a navigation property.
    pub fn navigation(mut self, nav: NavigationDef) -> Self {
        self.navigations.push(nav);
        self
    }

    /// Sets the key generation policy.
    pub fn auto_generated_key(mut self, kind: AutoGeneratedKeyType) -> Self {
        self.auto_generated_key = kind;
        self
    }

    /// Adds an entity-level validator.
    pub fn validator(mut self, validator: ValidatorHandle) -> Self {
        self.validators.push(validator);
        self
    }
}

/// Declaration of a complex type.
#[derive(Clone, Debug)]
pub struct ComplexTypeDef {
    name: String,
    namespace: Option<String>,
    properties: Vec<DataPropertyDef>,
    validators: Vec<ValidatorHandle>,
}

impl ComplexTypeDef {
    /// New complex type declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            properties: Vec::new(),
            validators: Vec::new(),
        }
    }

    /// Sets the namespace.
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Adds a data property.
    pub fn property(mut self, prop: DataPropertyDef) -> Self {
        self.properties.push(prop);
        self
    }

    /// Adds an object-level validator.
    pub fn validator(mut self, validator: ValidatorHandle) -> Self {
        self.validators.push(validator);
        self
    }
}

/// Builds a [`Schema`], resolving names into indices.
#[derive(Clone, Debug, Default)]
pub struct SchemaBuilder {
    entity_defs: Vec<EntityTypeDef>,
    complex_defs: Vec<ComplexTypeDef>,
    naming: NamingConvention,
}

impl SchemaBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convention used to derive server names not set explicitly.
    pub fn naming_convention(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    /// Adds an entity type.
    pub fn entity_type(mut self, def: EntityTypeDef) -> Self {
        self.entity_defs.push(def);
        self
    }

    /// Adds a complex type.
    pub fn complex_type(mut self, def: ComplexTypeDef) -> Self {
        self.complex_defs.push(def);
        self
    }

    /// Resolves all declarations into a shared schema.
    pub fn build(self) -> Result<Arc<Schema>, CacheError> {
        let mut names = BTreeMap::new();
        let mut register = |short: &str, ns: Option<&str>, id: StructuralTypeId| {
            let mut keys = vec![short.to_owned()];
            let qualified = qualify(ns, short);
            if qualified != short {
                keys.push(qualified);
            }
            for key in keys {
                if names.insert(key.clone(), id).is_some() {
                    return Err(CacheError::argument(format!("duplicate type name '{key}'")));
                }
            }
            Ok(())
        };
        for (i, def) in self.complex_defs.iter().enumerate() {
            register(
                &def.name,
                def.namespace.as_deref(),
                StructuralTypeId::Complex(ComplexTypeId(i as u32)),
            )?;
        }
        for (i, def) in self.entity_defs.iter().enumerate() {
            register(
                &def.name,
                def.namespace.as_deref(),
                StructuralTypeId::Entity(EntityTypeId(i as u32)),
            )?;
        }

        let naming = self.naming;
        let mut complex_types = Vec::with_capacity(self.complex_defs.len());
        for (i, def) in self.complex_defs.into_iter().enumerate() {
            complex_types.push(ComplexType {
                id: ComplexTypeId(i as u32),
                data_properties: build_data_properties(&def.properties, &names, naming)?,
                name: def.name,
                namespace: def.namespace,
                validators: def.validators,
            });
        }

        let mut entity_types = Vec::with_capacity(self.entity_defs.len());
        for (i, def) in self.entity_defs.iter().enumerate() {
            let data_properties = build_data_properties(&def.properties, &names, naming)?;
            let key_properties: Vec<usize> = data_properties
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_part_of_key)
                .map(|(i, _)| i)
                .collect();
            if key_properties.is_empty() {
                return Err(CacheError::argument(format!(
                    "entity type '{}' declares no key",
                    def.name
                )));
            }
            let mut navigation_properties = Vec::with_capacity(def.navigations.len());
            for nav in &def.navigations {
                let target = match names.get(&nav.target) {
                    Some(StructuralTypeId::Entity(id)) => *id,
                    _ => {
                        return Err(CacheError::argument(format!(
                            "navigation '{}.{}' targets unknown entity type '{}'",
                            def.name, nav.name, nav.target
                        )))
                    }
                };
                let foreign_keys = nav
                    .foreign_keys
                    .iter()
                    .map(|fk| {
                        data_properties
                            .iter()
                            .position(|p| &p.name == fk)
                            .ok_or_else(|| {
                                CacheError::argument(format!(
                                    "foreign key '{fk}' not found on '{}'",
                                    def.name
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                navigation_properties.push(NavigationProperty {
                    name: nav.name.clone(),
                    name_on_server: nav
                        .name_on_server
                        .clone()
                        .unwrap_or_else(|| naming.client_to_server(&nav.name)),
                    target,
                    is_scalar: nav.is_scalar,
                    association: nav.association.clone(),
                    inverse: None,
                    foreign_keys,
                    inv_foreign_keys: Vec::new(),
                    validators: nav.validators.clone(),
                });
            }
            entity_types.push(EntityType {
                id: EntityTypeId(i as u32),
                name: def.name.clone(),
                namespace: def.namespace.clone(),
                data_properties,
                navigation_properties,
                key_properties,
                auto_generated_key: def.auto_generated_key,
                validators: def.validators.clone(),
                unidirectional_parents: Vec::new(),
            });
        }

        // Explicit inverse foreign keys name properties on the target type.
        for (ti, def) in self.entity_defs.iter().enumerate() {
            for (ni, nav) in def.navigations.iter().enumerate() {
                if nav.inv_foreign_keys.is_empty() {
                    continue;
                }
                let target = entity_types[ti].navigation_properties[ni].target;
                let target_type = &entity_types[target.0 as usize];
                let inv = nav
                    .inv_foreign_keys
                    .iter()
                    .map(|fk| {
                        target_type
                            .data_properties
                            .iter()
                            .position(|p| &p.name == fk)
                            .ok_or_else(|| {
                                CacheError::argument(format!(
                                    "inverse foreign key '{fk}' not found on '{}'",
                                    target_type.name
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                entity_types[ti].navigation_properties[ni].inv_foreign_keys = inv;
            }
        }

        link_associations(&mut entity_types)?;
        link_foreign_keys(&mut entity_types)?;

        Ok(Arc::new(Schema {
            entity_types,
            complex_types,
            names,
        }))
    }
}

fn build_data_properties(
    defs: &[DataPropertyDef],
    names: &BTreeMap<String, StructuralTypeId>,
    naming: NamingConvention,
) -> Result<Vec<DataProperty>, CacheError> {
    defs.iter()
        .map(|def| {
            let complex_type = match &def.complex_type {
                None => None,
                Some(name) => match names.get(name) {
                    Some(StructuralTypeId::Complex(id)) => Some(*id),
                    _ => {
                        return Err(CacheError::argument(format!(
                            "property '{}' references unknown complex type '{name}'",
                            def.name
                        )))
                    }
                },
            };
            let mut validators = Vec::new();
            if complex_type.is_none() && def.is_scalar {
                if !def.nullable {
                    validators.push(handle(RequiredValidator::default()));
                }
                if def.data_type != DataType::Undefined {
                    validators.push(handle(DataTypeValidator {
                        data_type: def.data_type,
                    }));
                }
                if let Some(max_length) = def.max_length {
                    validators.push(handle(MaxLengthValidator { max_length }));
                }
            }
            validators.extend(def.validators.iter().cloned());
            let default_value = match (&def.default_value, complex_type) {
                (_, Some(_)) => DataValue::Null,
                (Some(v), None) => v.clone(),
                (None, None) if def.nullable || !def.is_scalar => DataValue::Null,
                (None, None) => def.data_type.default_value(),
            };
            Ok(DataProperty {
                name: def.name.clone(),
                name_on_server: def
                    .name_on_server
                    .clone()
                    .unwrap_or_else(|| naming.client_to_server(&def.name)),
                data_type: def.data_type,
                is_nullable: def.nullable,
                default_value,
                is_part_of_key: def.part_of_key,
                is_scalar: def.is_scalar,
                complex_type,
                max_length: def.max_length,
                validators,
                related_navigation: None,
                inverse_navigation: None,
            })
        })
        .collect()
}

/// Pairs navigations sharing an association name as inverses.
fn link_associations(types: &mut [EntityType]) -> Result<(), CacheError> {
    let mut by_association: BTreeMap<String, Vec<(usize, usize)>> = BTreeMap::new();
    for (ti, t) in types.iter().enumerate() {
        for (ni, nav) in t.navigation_properties.iter().enumerate() {
            if let Some(assoc) = &nav.association {
                by_association.entry(assoc.clone()).or_default().push((ti, ni));
            }
        }
    }
    for (assoc, ends) in by_association {
        match ends.as_slice() {
            [_] => {}
            [(ta, na), (tb, nb)] => {
                let (ta, na, tb, nb) = (*ta, *na, *tb, *nb);
                if types[ta].navigation_properties[na].target.0 as usize != tb
                    || types[tb].navigation_properties[nb].target.0 as usize != ta
                {
                    return Err(CacheError::argument(format!(
                        "association '{assoc}' ends do not target each other"
                    )));
                }
                types[ta].navigation_properties[na].inverse = Some(nb);
                types[tb].navigation_properties[nb].inverse = Some(na);
            }
            _ => {
                return Err(CacheError::argument(format!(
                    "association '{assoc}' has more than two ends"
                )))
            }
        }
    }
    Ok(())
}

/// Derives parent-side foreign keys, key arity checks, and the per-property
/// back links used by the interceptor.
fn link_foreign_keys(types: &mut [EntityType]) -> Result<(), CacheError> {
    for ti in 0..types.len() {
        for ni in 0..types[ti].navigation_properties.len() {
            let nav = &types[ti].navigation_properties[ni];
            let target = nav.target.0 as usize;
            if let Some(inv) = nav.inverse {
                if nav.inv_foreign_keys.is_empty() && nav.foreign_keys.is_empty() {
                    let inv_fks = types[target].navigation_properties[inv].foreign_keys.clone();
                    types[ti].navigation_properties[ni].inv_foreign_keys = inv_fks;
                }
            }
            let nav = &types[ti].navigation_properties[ni];
            if !nav.foreign_keys.is_empty() && nav.foreign_keys.len() != types[target].key_properties.len() {
                return Err(CacheError::argument(format!(
                    "navigation '{}.{}' has {} foreign keys but '{}' has a {}-part key",
                    types[ti].name,
                    nav.name,
                    nav.foreign_keys.len(),
                    types[target].name,
                    types[target].key_properties.len()
                )));
            }
            if !nav.inv_foreign_keys.is_empty()
                && nav.inv_foreign_keys.len() != types[ti].key_properties.len()
            {
                return Err(CacheError::argument(format!(
                    "navigation '{}.{}' inverse foreign keys do not match the key arity",
                    types[ti].name, nav.name
                )));
            }
        }
    }
    for ti in 0..types.len() {
        for ni in 0..types[ti].navigation_properties.len() {
            let nav = types[ti].navigation_properties[ni].clone();
            if nav.is_scalar {
                for fk in &nav.foreign_keys {
                    types[ti].data_properties[*fk].related_navigation = Some(ni);
                }
            }
            if nav.inverse.is_none() && !nav.inv_foreign_keys.is_empty() {
                let target = nav.target.0 as usize;
                for fk in &nav.inv_foreign_keys {
                    types[target].data_properties[*fk].inverse_navigation =
                        Some((EntityTypeId(ti as u32), ni));
                }
                types[target]
                    .unidirectional_parents
                    .push((EntityTypeId(ti as u32), ni));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn northwind() -> Result<Arc<Schema>, CacheError> {
        SchemaBuilder::new()
            .complex_type(
                ComplexTypeDef::new("Location")
                    .property(DataPropertyDef::new("City", DataType::String)),
            )
            .entity_type(
                EntityTypeDef::new("Customer")
                    .namespace("Northwind")
                    .key(DataPropertyDef::new("CustomerID", DataType::Int32))
                    .property(DataPropertyDef::complex("Address", "Location"))
                    .navigation(
                        NavigationDef::collection("Orders", "Order").association("Customer_Orders"),
                    ),
            )
            .entity_type(
                EntityTypeDef::new("Order")
                    .key(DataPropertyDef::new("OrderID", DataType::Int32))
                    .property(DataPropertyDef::new("CustomerID", DataType::Int32))
                    .property(DataPropertyDef::new("ShipName", DataType::String).max_length(5))
                    .navigation(
                        NavigationDef::scalar("Customer", "Customer")
                            .association("Customer_Orders")
                            .foreign_keys(["CustomerID"]),
                    ),
            )
            .entity_type(
                EntityTypeDef::new("Region")
                    .key(DataPropertyDef::new("RegionID", DataType::Int32))
                    .navigation(
                        NavigationDef::collection("Territories", "Territory")
                            .inv_foreign_keys(["RegionID"]),
                    ),
            )
            .entity_type(
                EntityTypeDef::new("Territory")
                    .key(DataPropertyDef::new("TerritoryID", DataType::Int32))
                    .property(DataPropertyDef::new("RegionID", DataType::Int32)),
            )
            .build()
    }

    #[test]
    fn associations_resolve_inverses_and_parent_side_keys() -> Result<(), CacheError> {
        let schema = northwind()?;
        let customer = schema.entity_type_by_name("Customer")?;
        let order = schema.entity_type_by_name("Order")?;
        let (orders_ix, orders) = customer
            .navigation_property("Orders")
            .ok_or_else(|| CacheError::argument("Orders"))?;
        let (customer_ix, nav) = order
            .navigation_property("Customer")
            .ok_or_else(|| CacheError::argument("Customer"))?;
        assert_eq!(orders.inverse, Some(customer_ix));
        assert_eq!(nav.inverse, Some(orders_ix));
        assert_eq!(orders.inv_foreign_keys, nav.foreign_keys);
        let (fk_ix, fk) = order
            .data_property("CustomerID")
            .ok_or_else(|| CacheError::argument("CustomerID"))?;
        assert_eq!(fk.related_navigation, Some(customer_ix));
        assert_eq!(nav.foreign_keys, vec![fk_ix]);
        Ok(())
    }

    #[test]
    fn unidirectional_inverse_keys_point_back_to_parent() -> Result<(), CacheError> {
        let schema = northwind()?;
        let region = schema.entity_type_by_name("Region")?;
        let territory = schema.entity_type_by_name("Territory")?;
        let (_, fk) = territory
            .data_property("RegionID")
            .ok_or_else(|| CacheError::argument("RegionID"))?;
        assert_eq!(fk.inverse_navigation, Some((region.id, 0)));
        assert_eq!(territory.unidirectional_parents, vec![(region.id, 0)]);
        Ok(())
    }

    #[test]
    fn names_resolve_in_all_forms() -> Result<(), CacheError> {
        let schema = northwind()?;
        let id = schema.entity_type_by_name("Customer")?.id;
        assert_eq!(schema.resolve("Northwind.Customer"), Some(StructuralTypeId::Entity(id)));
        assert_eq!(schema.resolve("Customer:#Northwind"), Some(StructuralTypeId::Entity(id)));
        assert!(schema.entity_type_by_name("Location").is_err());
        assert!(schema.complex_type_by_name("Location").is_ok());
        Ok(())
    }

    #[test]
    fn auto_validators_follow_declared_facets() -> Result<(), CacheError> {
        let schema = northwind()?;
        let order = schema.entity_type_by_name("Order")?;
        let names = |p: &str| {
            order
                .data_property(p)
                .map(|(_, dp)| dp.validators.iter().map(|v| v.name().to_owned()).collect::<Vec<_>>())
                .unwrap_or_default()
        };
        assert_eq!(names("OrderID"), vec!["required", "dataType"]);
        assert_eq!(names("ShipName"), vec!["dataType", "maxLength"]);
        Ok(())
    }

    #[test]
    fn missing_key_and_bad_targets_are_rejected() {
        let no_key = SchemaBuilder::new()
            .entity_type(EntityTypeDef::new("Thing"))
            .build();
        assert!(matches!(no_key, Err(CacheError::InvalidArgument(_))));
        let bad_target = SchemaBuilder::new()
            .entity_type(
                EntityTypeDef::new("Thing")
                    .key(DataPropertyDef::new("Id", DataType::Int32))
                    .navigation(NavigationDef::scalar("Other", "Missing")),
            )
            .build();
        assert!(matches!(bad_target, Err(CacheError::InvalidArgument(_))));
    }
}
