// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Temporary key values for entities whose keys are assigned on save.
use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use crate::error::CacheError;
use crate::ident::EntityTypeId;
use crate::metadata::EntityType;
use crate::value::{DataType, DataValue};

/// Produces placeholder key values for newly added entities.
pub trait KeyGenerator: fmt::Debug + Send {
    /// Returns a value for the (single) key property of `entity_type`.
    fn generate_temp_key_value(
        &mut self,
        entity_type: &EntityType,
        data_type: DataType,
    ) -> Result<DataValue, CacheError>;
}

/// Negative integers per type, fresh v4 GUIDs, and `~tmp:N` strings.
#[derive(Debug, Default)]
pub struct DefaultKeyGenerator {
    next_int: BTreeMap<EntityTypeId, i64>,
    next_string: u64,
}

impl KeyGenerator for DefaultKeyGenerator {
    fn generate_temp_key_value(
        &mut self,
        entity_type: &EntityType,
        data_type: DataType,
    ) -> Result<DataValue, CacheError> {
        match data_type {
            dt if dt.is_integer() => {
                let next = self.next_int.entry(entity_type.id).or_insert(0);
                *next -= 1;
                Ok(DataValue::Int(*next))
            }
            DataType::Guid => Ok(DataValue::Guid(Uuid::new_v4())),
            DataType::String => {
                self.next_string += 1;
                Ok(DataValue::String(format!("~tmp:{}", self.next_string)))
            }
            other => Err(CacheError::operation(format!(
                "cannot generate a temporary key of type {other:?} for '{}'",
                entity_type.name
            ))),
        }
    }
}
