//! Resource schema declarations
//!
//! Each resource type declares its configurable and computed fields once.
//! The schema validates planned configuration before any remote call is
//! made and fills in declared defaults.

use crate::error::{CloudError, Result};
use crate::timeouts::TIMEOUTS_KEY;
use serde_json::{Map, Value};

/// Value type of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
    /// Ordered list
    List(Box<FieldType>),
    /// List without duplicates, order is not significant
    Set(Box<FieldType>),
    /// String-keyed map
    Map(Box<FieldType>),
    /// Nested object with its own fields
    Object(Vec<Field>),
}

impl FieldType {
    fn describe(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "integer",
            FieldType::Float => "number",
            FieldType::String => "string",
            FieldType::List(_) => "list",
            FieldType::Set(_) => "set",
            FieldType::Map(_) => "map",
            FieldType::Object(_) => "object",
        }
    }
}

/// Who sets the field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    /// Set by the provider only
    Computed,
    /// Set by the user, or by the provider when omitted
    OptionalComputed,
}

/// Extra value checks
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    OneOf(&'static [&'static str]),
    IntRange(i64, i64),
    /// A duration string such as `"30s"`
    Duration,
    NonEmpty,
}

/// A single schema field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
    pub presence: Presence,
    pub default: Option<Value>,
    /// Changing the field requires replacing the resource
    pub force_new: bool,
    pub sensitive: bool,
    pub conflicts_with: Vec<&'static str>,
    pub validation: Option<Validation>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    /// Natural key of block-list elements, used to pair stored and
    /// configured elements
    pub key: Vec<&'static str>,
    pub description: &'static str,
}

impl Field {
    pub fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            presence: Presence::Optional,
            default: None,
            force_new: false,
            sensitive: false,
            conflicts_with: Vec::new(),
            validation: None,
            min_items: None,
            max_items: None,
            key: Vec::new(),
            description: "",
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub fn float(name: &'static str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn bool(name: &'static str) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn list(name: &'static str, elem: FieldType) -> Self {
        Self::new(name, FieldType::List(Box::new(elem)))
    }

    pub fn set(name: &'static str, elem: FieldType) -> Self {
        Self::new(name, FieldType::Set(Box::new(elem)))
    }

    pub fn map(name: &'static str, elem: FieldType) -> Self {
        Self::new(name, FieldType::Map(Box::new(elem)))
    }

    pub fn object(name: &'static str, fields: Vec<Field>) -> Self {
        Self::new(name, FieldType::Object(fields))
    }

    /// Repeated nested objects
    pub fn blocks(name: &'static str, fields: Vec<Field>) -> Self {
        Self::list(name, FieldType::Object(fields))
    }

    /// String labels map, present on most resources
    pub fn labels() -> Self {
        Self::map("labels", FieldType::String).describe("Key/value labels")
    }

    pub fn required(mut self) -> Self {
        self.presence = Presence::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.presence = Presence::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.presence = Presence::OptionalComputed;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn conflicts_with(mut self, fields: &[&'static str]) -> Self {
        self.conflicts_with.extend_from_slice(fields);
        self
    }

    pub fn keyed_by(mut self, fields: &[&'static str]) -> Self {
        self.key.extend_from_slice(fields);
        self
    }

    pub fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.validation = Some(Validation::OneOf(values));
        self
    }

    pub fn int_range(mut self, min: i64, max: i64) -> Self {
        self.validation = Some(Validation::IntRange(min, max));
        self
    }

    pub fn duration(mut self) -> Self {
        self.validation = Some(Validation::Duration);
        self
    }

    pub fn non_empty(mut self) -> Self {
        self.validation = Some(Validation::NonEmpty);
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    fn user_settable(&self) -> bool {
        self.presence != Presence::Computed
    }
}

/// Schema of one resource type
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub version: u32,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { version: 0, fields }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Top-level fields whose change forces replacement
    pub fn force_new_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.force_new)
            .map(|f| f.name)
            .collect()
    }

    /// Fill declared defaults for absent fields, including inside nested
    /// objects
    pub fn apply_defaults(&self, config: &mut Map<String, Value>) {
        apply_defaults(&self.fields, config);
    }

    /// Keep the stored value of optional-computed fields the configuration
    /// leaves unset, so that omitting them is not seen as a change. Nested
    /// objects are handled too. Elements of a block list only inherit from
    /// the stored element with the same natural key ([`Field::keyed_by`]);
    /// lists without a key inherit nothing.
    pub fn carry_over(&self, prior: &Map<String, Value>, config: &mut Map<String, Value>) {
        carry_over(&self.fields, prior, config);
    }

    /// Remove provider-set fields, leaving what a configuration can hold
    pub fn strip_computed(&self, state: &mut Map<String, Value>) {
        strip_computed(&self.fields, state);
    }

    /// Validate a planned configuration. All problems are reported at once.
    pub fn validate(&self, config: &Map<String, Value>) -> Result<()> {
        let mut errors = Vec::new();
        validate_object(&self.fields, config, "", &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CloudError::InvalidConfig(errors.join("; ")))
        }
    }
}

fn is_set(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_null())
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn apply_defaults(fields: &[Field], config: &mut Map<String, Value>) {
    for field in fields {
        if !is_set(config.get(field.name)) {
            if let Some(default) = &field.default {
                config.insert(field.name.to_string(), default.clone());
            }
        }

        match (&field.ty, config.get_mut(field.name)) {
            (FieldType::Object(nested), Some(Value::Object(inner))) => {
                apply_defaults(nested, inner);
            }
            (FieldType::List(elem), Some(Value::Array(items))) => {
                if let FieldType::Object(nested) = elem.as_ref() {
                    for item in items.iter_mut() {
                        if let Value::Object(inner) = item {
                            apply_defaults(nested, inner);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn nested_fields(ty: &FieldType) -> Option<&[Field]> {
    match ty {
        FieldType::Object(fields) => Some(fields),
        FieldType::List(elem) | FieldType::Set(elem) => match elem.as_ref() {
            FieldType::Object(fields) => Some(fields),
            _ => None,
        },
        _ => None,
    }
}

fn carry_over(fields: &[Field], prior: &Map<String, Value>, config: &mut Map<String, Value>) {
    for field in fields {
        let Some(before) = prior.get(field.name).filter(|v| !v.is_null()) else {
            continue;
        };
        if !is_set(config.get(field.name)) {
            if field.presence == Presence::OptionalComputed {
                config.insert(field.name.to_string(), before.clone());
            }
            continue;
        }

        let Some(nested) = nested_fields(&field.ty) else {
            continue;
        };
        match (before, config.get_mut(field.name)) {
            (Value::Object(before), Some(Value::Object(after))) => {
                carry_over(nested, before, after);
            }
            (Value::Array(before), Some(Value::Array(after))) if !field.key.is_empty() => {
                let mut claimed = vec![false; before.len()];
                for item in after.iter_mut() {
                    let Value::Object(item) = item else { continue };
                    let Some(i) = paired_element(&field.key, before, &claimed, item) else {
                        continue;
                    };
                    claimed[i] = true;
                    if let Value::Object(stored) = &before[i] {
                        carry_over(nested, stored, item);
                    }
                }
            }
            _ => {}
        }
    }
}

/// First unclaimed stored element agreeing with `item` on every key field
/// the configuration sets. An element that sets no key field pairs with
/// nothing.
fn paired_element(
    key: &[&str],
    before: &[Value],
    claimed: &[bool],
    item: &Map<String, Value>,
) -> Option<usize> {
    let set: Vec<(&str, &Value)> = key
        .iter()
        .filter_map(|k| item.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
        .collect();
    if set.is_empty() {
        return None;
    }

    before.iter().zip(claimed).position(|(stored, taken)| {
        !taken
            && stored
                .as_object()
                .is_some_and(|stored| set.iter().all(|(k, v)| stored.get(*k) == Some(*v)))
    })
}

fn strip_computed(fields: &[Field], state: &mut Map<String, Value>) {
    for field in fields {
        if field.presence == Presence::Computed {
            state.remove(field.name);
            continue;
        }
        let Some(nested) = nested_fields(&field.ty) else {
            continue;
        };
        match state.get_mut(field.name) {
            Some(Value::Object(inner)) => strip_computed(nested, inner),
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Object(inner) = item {
                        strip_computed(nested, inner);
                    }
                }
            }
            _ => {}
        }
    }
}

fn validate_object(
    fields: &[Field],
    config: &Map<String, Value>,
    prefix: &str,
    errors: &mut Vec<String>,
) {
    for key in config.keys() {
        if prefix.is_empty() && key == TIMEOUTS_KEY {
            continue;
        }
        if !fields.iter().any(|f| f.name == key) {
            errors.push(format!("{}: unknown field", join_path(prefix, key)));
        }
    }

    for field in fields {
        let path = join_path(prefix, field.name);
        let value = config.get(field.name).filter(|v| !v.is_null());

        match (value, field.presence) {
            (None, Presence::Required) => {
                errors.push(format!("{path}: required field is missing"));
            }
            (Some(_), Presence::Computed) => {
                errors.push(format!("{path}: computed field cannot be set"));
            }
            (Some(value), _) => {
                validate_value(field, value, &path, errors);
                for other in &field.conflicts_with {
                    if is_set(config.get(*other)) {
                        errors.push(format!(
                            "{path}: conflicts with {}",
                            join_path(prefix, other)
                        ));
                    }
                }
            }
            (None, _) => {}
        }
    }
}

fn validate_value(field: &Field, value: &Value, path: &str, errors: &mut Vec<String>) {
    if !check_type(&field.ty, value, path, errors) {
        return;
    }

    if let Some(items) = value.as_array() {
        if let Some(min) = field.min_items {
            if items.len() < min {
                errors.push(format!("{path}: expected at least {min} item(s)"));
            }
        }
        if let Some(max) = field.max_items {
            if items.len() > max {
                errors.push(format!("{path}: expected at most {max} item(s)"));
            }
        }
    }

    if field.user_settable() {
        if let Some(validation) = &field.validation {
            check_validation(validation, value, path, errors);
        }
    }
}

/// Returns false when the value has the wrong shape
fn check_type(ty: &FieldType, value: &Value, path: &str, errors: &mut Vec<String>) -> bool {
    let ok = match ty {
        FieldType::Bool => value.is_boolean(),
        FieldType::Int => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_number(),
        FieldType::String => value.is_string(),
        FieldType::List(elem) | FieldType::Set(elem) => match value.as_array() {
            Some(items) => {
                for (idx, item) in items.iter().enumerate() {
                    check_type(elem, item, &format!("{path}.{idx}"), errors);
                }
                if matches!(ty, FieldType::Set(_)) {
                    for (idx, item) in items.iter().enumerate() {
                        if items[..idx].contains(item) {
                            errors.push(format!("{path}: duplicate element {item}"));
                        }
                    }
                }
                true
            }
            None => false,
        },
        FieldType::Map(elem) => match value.as_object() {
            Some(entries) => {
                for (key, item) in entries {
                    check_type(elem, item, &format!("{path}.{key}"), errors);
                }
                true
            }
            None => false,
        },
        FieldType::Object(fields) => match value.as_object() {
            Some(inner) => {
                validate_object(fields, inner, path, errors);
                true
            }
            None => false,
        },
    };

    if !ok {
        errors.push(format!("{path}: expected {}", ty.describe()));
    }
    ok
}

fn check_validation(validation: &Validation, value: &Value, path: &str, errors: &mut Vec<String>) {
    match validation {
        Validation::OneOf(allowed) => {
            if let Some(text) = value.as_str() {
                if !allowed.contains(&text) {
                    errors.push(format!(
                        "{path}: '{text}' is not one of {}",
                        allowed.join(", ")
                    ));
                }
            }
        }
        Validation::IntRange(min, max) => {
            if let Some(n) = value.as_i64() {
                if n < *min || n > *max {
                    errors.push(format!("{path}: {n} is outside [{min}, {max}]"));
                }
            }
        }
        Validation::Duration => {
            if let Some(text) = value.as_str() {
                if let Err(e) = humantime::parse_duration(text.trim()) {
                    errors.push(format!("{path}: malformed duration '{text}': {e}"));
                }
            }
        }
        Validation::NonEmpty => {
            let empty = match value {
                Value::String(s) => s.trim().is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(entries) => entries.is_empty(),
                _ => false,
            };
            if empty {
                errors.push(format!("{path}: must not be empty"));
            }
        }
    }
}
