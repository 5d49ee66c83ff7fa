// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Validators and the accumulated validation error model.
//!
//! Validation never fails an operation. Each validator either passes or
//! yields a message; the manager files the resulting [`ValidationError`]
//! on the owning entity's aspect, keyed by validator name and property path,
//! and reports adds/removes on the `validation_errors_changed` channel.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::CacheError;
use crate::ident::EntityRef;
use crate::value::{DataType, DataValue};

/// Identity of a validation error on one entity: re-validating with the same
/// validator on the same property replaces the previous error.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ValidationKey {
    /// Name of the validator that produced the error.
    pub validator: String,
    /// Dotted property path (`None` for entity-level validators).
    pub property_path: Option<String>,
}

/// One failed validation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ValidationError {
    /// Name of the validator that produced the error.
    pub validator: String,
    /// Dotted property path (`None` for entity-level errors).
    pub property_path: Option<String>,
    /// Human readable message.
    pub message: String,
    /// Errors reported by a remote service rather than a local validator.
    pub is_server_error: bool,
}

impl ValidationError {
    /// Builds a locally produced error.
    #[must_use]
    pub fn new(
        validator: impl Into<String>,
        property_path: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            validator: validator.into(),
            property_path,
            message: message.into(),
            is_server_error: false,
        }
    }

    /// Key under which the error is filed.
    #[must_use]
    pub fn key(&self) -> ValidationKey {
        ValidationKey {
            validator: self.validator.clone(),
            property_path: self.property_path.clone(),
        }
    }
}

/// Snapshot of an object's data values handed to object-level validators.
#[derive(Clone, Debug, Default)]
pub struct ObjectView {
    /// Short type name of the validated object.
    pub type_name: String,
    /// Data values by client property name.
    pub values: BTreeMap<String, DataValue>,
}

impl ObjectView {
    /// Value of a data property, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.values.get(name)
    }
}

/// What a validator is looking at.
#[derive(Clone, Copy, Debug)]
pub enum ValidationSubject<'a> {
    /// A single property value.
    Value(&'a DataValue),
    /// A whole entity or complex value.
    Object(&'a ObjectView),
    /// The entities behind a navigation property (at most one for a
    /// single-valued navigation).
    Related(&'a [EntityRef]),
}

/// Ambient information for message formatting.
#[derive(Clone, Copy, Debug)]
pub struct ValidationContext<'a> {
    /// Name shown in messages (property name or type name).
    pub display_name: &'a str,
    /// Dotted property path, when validating a property.
    pub property_path: Option<&'a str>,
    /// Declared type of the property, when validating a property.
    pub data_type: Option<DataType>,
}

/// A single validation rule.
pub trait Validator: fmt::Debug + Send + Sync {
    /// Stable validator name (part of the error key).
    fn name(&self) -> &str;

    /// Returns `Some(message)` when the subject is invalid.
    fn validate(
        &self,
        subject: &ValidationSubject<'_>,
        ctx: &ValidationContext<'_>,
    ) -> Option<String>;
}

/// Shared handle to a validator.
pub type ValidatorHandle = Arc<dyn Validator>;

/// Non-null (and, unless allowed, non-empty string) values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredValidator {
    /// Accept `""` as present.
    pub allow_empty_strings: bool,
}

impl Validator for RequiredValidator {
    fn name(&self) -> &str {
        "required"
    }

    fn validate(
        &self,
        subject: &ValidationSubject<'_>,
        ctx: &ValidationContext<'_>,
    ) -> Option<String> {
        let missing = match subject {
            ValidationSubject::Value(DataValue::Null) => true,
            ValidationSubject::Value(DataValue::String(s)) => {
                !self.allow_empty_strings && s.trim().is_empty()
            }
            ValidationSubject::Related(related) => related.is_empty(),
            ValidationSubject::Value(_) | ValidationSubject::Object(_) => false,
        };
        missing.then(|| format!("'{}' is required", ctx.display_name))
    }
}

/// Upper bound on string length.
#[derive(Debug, Clone, Copy)]
pub struct MaxLengthValidator {
    /// Maximum number of characters.
    pub max_length: usize,
}

impl Validator for MaxLengthValidator {
    fn name(&self) -> &str {
        "maxLength"
    }

    fn validate(
        &self,
        subject: &ValidationSubject<'_>,
        ctx: &ValidationContext<'_>,
    ) -> Option<String> {
        let ValidationSubject::Value(DataValue::String(s)) = subject else {
            return None;
        };
        (s.chars().count() > self.max_length).then(|| {
            format!(
                "'{}' must be a string with {} characters or less",
                ctx.display_name, self.max_length
            )
        })
    }
}

/// Inclusive bounds on string length.
#[derive(Debug, Clone, Copy)]
pub struct StringLengthValidator {
    /// Minimum number of characters.
    pub min_length: usize,
    /// Maximum number of characters.
    pub max_length: usize,
}

impl Validator for StringLengthValidator {
    fn name(&self) -> &str {
        "stringLength"
    }

    fn validate(
        &self,
        subject: &ValidationSubject<'_>,
        ctx: &ValidationContext<'_>,
    ) -> Option<String> {
        let ValidationSubject::Value(DataValue::String(s)) = subject else {
            return None;
        };
        let len = s.chars().count();
        (len < self.min_length || len > self.max_length).then(|| {
            format!(
                "'{}' must be a string with between {} and {} characters",
                ctx.display_name, self.min_length, self.max_length
            )
        })
    }
}

/// Inclusive numeric bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeValidator {
    /// Lower bound.
    pub min: Option<f64>,
    /// Upper bound.
    pub max: Option<f64>,
}

impl Validator for RangeValidator {
    fn name(&self) -> &str {
        "range"
    }

    fn validate(
        &self,
        subject: &ValidationSubject<'_>,
        ctx: &ValidationContext<'_>,
    ) -> Option<String> {
        let ValidationSubject::Value(value) = subject else {
            return None;
        };
        let n = value.as_f64()?;
        let below = self.min.is_some_and(|min| n < min);
        let above = self.max.is_some_and(|max| n > max);
        (below || above).then(|| match (self.min, self.max) {
            (Some(min), Some(max)) => {
                format!("'{}' must be between {min} and {max}", ctx.display_name)
            }
            (Some(min), None) => format!("'{}' must be at least {min}", ctx.display_name),
            (None, _) => format!(
                "'{}' must be at most {}",
                ctx.display_name,
                self.max.unwrap_or_default()
            ),
        })
    }
}

/// Strings (or GUID values) that parse as a GUID.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuidValidator;

impl Validator for GuidValidator {
    fn name(&self) -> &str {
        "guid"
    }

    fn validate(
        &self,
        subject: &ValidationSubject<'_>,
        ctx: &ValidationContext<'_>,
    ) -> Option<String> {
        match subject {
            ValidationSubject::Value(DataValue::String(s)) => Uuid::parse_str(s)
                .is_err()
                .then(|| format!("'{}' must be a GUID", ctx.display_name)),
            ValidationSubject::Value(DataValue::Null | DataValue::Guid(_))
            | ValidationSubject::Object(_)
            | ValidationSubject::Related(_) => None,
            ValidationSubject::Value(_) => {
                Some(format!("'{}' must be a GUID", ctx.display_name))
            }
        }
    }
}

/// Values that fit the declared data type (integer ranges, text, ...).
///
/// The property interceptor keeps unparseable raw values; this validator is
/// what surfaces them.
#[derive(Debug, Clone, Copy)]
pub struct DataTypeValidator {
    /// Type the value must conform to.
    pub data_type: DataType,
}

impl Validator for DataTypeValidator {
    fn name(&self) -> &str {
        "dataType"
    }

    fn validate(
        &self,
        subject: &ValidationSubject<'_>,
        ctx: &ValidationContext<'_>,
    ) -> Option<String> {
        let ValidationSubject::Value(value) = subject else {
            return None;
        };
        let fits = match (self.data_type, value) {
            (_, DataValue::Null) | (DataType::Undefined, _) => true,
            (DataType::String, DataValue::String(_))
            | (DataType::Boolean, DataValue::Bool(_))
            | (DataType::DateTime, DataValue::DateTime(_))
            | (DataType::Guid, DataValue::Guid(_))
            | (DataType::Binary, DataValue::Binary(_))
            | (DataType::Double | DataType::Single | DataType::Decimal, DataValue::Double(_)) => {
                true
            }
            (dt, DataValue::Int(i)) if dt.is_integer() => dt
                .integer_range()
                .is_some_and(|(lo, hi)| (lo..=hi).contains(i)),
            (DataType::Double | DataType::Single | DataType::Decimal, DataValue::Int(_)) => true,
            _ => false,
        };
        (!fits).then(|| format!("'{}' must be of type {:?}", ctx.display_name, self.data_type))
    }
}

type Predicate = dyn Fn(&ValidationSubject<'_>) -> bool + Send + Sync;

/// Validator backed by a predicate closure.
#[derive(Clone)]
pub struct FnValidator {
    name: String,
    message: String,
    predicate: Arc<Predicate>,
}

impl FnValidator {
    /// `message` may contain `{name}`, replaced by the display name.
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        predicate: impl Fn(&ValidationSubject<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for FnValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Validator for FnValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(
        &self,
        subject: &ValidationSubject<'_>,
        ctx: &ValidationContext<'_>,
    ) -> Option<String> {
        (!(self.predicate)(subject)).then(|| self.message.replace("{name}", ctx.display_name))
    }
}

/// Factory that builds a validator from JSON parameters.
pub type ValidatorFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<ValidatorHandle, CacheError> + Send + Sync>;

/// Validators addressable by name, so schema descriptions can reference them
/// as `{ "name": "maxLength", "maxLength": 30 }`.
#[derive(Clone)]
pub struct ValidatorRegistry {
    factories: BTreeMap<String, ValidatorFactory>,
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Wraps a validator into a shared handle.
pub fn handle(validator: impl Validator + 'static) -> ValidatorHandle {
    Arc::new(validator)
}

fn usize_param(params: &serde_json::Value, key: &str) -> Result<usize, CacheError> {
    params
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CacheError::argument(format!("validator parameter '{key}' is required")))
}

impl ValidatorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry pre-populated with the built-in validators.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register("required", |params| {
            let allow_empty_strings = params
                .get("allowEmptyStrings")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            Ok(handle(RequiredValidator {
                allow_empty_strings,
            }))
        });
        reg.register("maxLength", |params| {
            Ok(handle(MaxLengthValidator {
                max_length: usize_param(params, "maxLength")?,
            }))
        });
        reg.register("stringLength", |params| {
            Ok(handle(StringLengthValidator {
                min_length: usize_param(params, "minLength").unwrap_or(0),
                max_length: usize_param(params, "maxLength")?,
            }))
        });
        reg.register("range", |params| {
            Ok(handle(RangeValidator {
                min: params.get("min").and_then(serde_json::Value::as_f64),
                max: params.get("max").and_then(serde_json::Value::as_f64),
            }))
        });
        reg.register("guid", |_| Ok(handle(GuidValidator)));
        reg.register("dataType", |params| {
            let name = params
                .get("dataType")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| CacheError::argument("validator parameter 'dataType' is required"))?;
            let data_type = name.parse::<DataType>()?;
            Ok(handle(DataTypeValidator { data_type }))
        });
        reg
    }

    /// Registers (or replaces) a factory.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&serde_json::Value) -> Result<ValidatorHandle, CacheError>
            + Send
            + Sync
            + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// True if a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Builds a validator by name.
    pub fn create(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<ValidatorHandle, CacheError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CacheError::argument(format!("unknown validator '{name}'")))?;
        factory(params)
    }

    /// Builds a validator from a JSON description carrying a `name` field.
    pub fn from_json(&self, description: &serde_json::Value) -> Result<ValidatorHandle, CacheError> {
        let name = description
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CacheError::argument("validator description has no 'name'"))?;
        self.create(name, description)
    }
}
