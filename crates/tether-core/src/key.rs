// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Entity keys: the identity of an entity within its type.
use std::fmt;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

use crate::error::CacheError;
use crate::ident::EntityTypeId;
use crate::metadata::{EntityType, Schema};
use crate::value::{DataType, DataValue};

/// Separator between key components in a key string.
pub const KEY_DELIMITER: &str = ":::";

/// Immutable (entity type, key values) pair.
///
/// Two keys are equal iff they name the same type and their value arrays are
/// element-wise equal. GUID components are case-normalized at construction.
#[derive(Clone)]
pub struct EntityKey {
    entity_type: EntityTypeId,
    type_name: String,
    values: Vec<DataValue>,
    key_string: String,
}

impl EntityKey {
    /// Builds a key for `entity_type` from values in key order.
    pub fn new(entity_type: &EntityType, values: Vec<DataValue>) -> Result<Self, CacheError> {
        if values.len() != entity_type.key_properties.len() {
            return Err(CacheError::argument(format!(
                "'{}' has a {}-part key but {} values were supplied",
                entity_type.name,
                entity_type.key_properties.len(),
                values.len()
            )));
        }
        let values: Vec<DataValue> = values
            .into_iter()
            .zip(&entity_type.key_properties)
            .map(|(v, ix)| normalize(v, entity_type.data_properties[*ix].data_type))
            .collect();
        let key_string = Self::key_string_of(&values);
        Ok(Self {
            entity_type: entity_type.id,
            type_name: entity_type.name.clone(),
            values,
            key_string,
        })
    }

    /// Builds a key from a type name; fails unless the name resolves to an
    /// entity type.
    pub fn for_type_name(
        schema: &Schema,
        type_name: &str,
        values: Vec<DataValue>,
    ) -> Result<Self, CacheError> {
        Self::new(schema.entity_type_by_name(type_name)?, values)
    }

    /// Entity type this key belongs to.
    #[must_use]
    pub fn entity_type(&self) -> EntityTypeId {
        self.entity_type
    }

    /// Short name of the entity type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Key values in key order.
    #[must_use]
    pub fn values(&self) -> &[DataValue] {
        &self.values
    }

    /// Delimited value string used to index entities within a group.
    #[must_use]
    pub fn key_string(&self) -> &str {
        &self.key_string
    }

    /// True when every component is null or empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(DataValue::is_empty_key_part)
    }

    /// True when any component is null or empty.
    #[must_use]
    pub fn has_empty_part(&self) -> bool {
        self.values.iter().any(DataValue::is_empty_key_part)
    }

    /// Composes the delimited key string for a value array.
    #[must_use]
    pub fn key_string_of(values: &[DataValue]) -> String {
        values
            .iter()
            .map(DataValue::key_fragment)
            .collect::<Vec<_>>()
            .join(KEY_DELIMITER)
    }
}

fn normalize(value: DataValue, data_type: DataType) -> DataValue {
    match (data_type, value) {
        (DataType::Guid, DataValue::String(s)) => Uuid::parse_str(&s)
            .map_or_else(|_| DataValue::String(s.to_lowercase()), DataValue::Guid),
        (dt, v) => dt.parse(&v).unwrap_or(v),
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a == b)
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_type.hash(state);
        self.key_string.hash(state);
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({self})")
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name)?;
        for v in &self.values {
            write!(f, ":{v}")?;
        }
        Ok(())
    }
}
