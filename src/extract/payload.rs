//! Validation of model output against a schema descriptor.
//!
//! Optional fields the model leaves out become explicit [`FieldValue::Absent`]
//! entries instead of failing the whole result. Required fields must be
//! present with the declared type; nothing is coerced.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use super::schema::{FieldDef, FieldType, SchemaDescriptor};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Present(Value),
    Absent,
}

impl FieldValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Present(v) => Some(v),
            FieldValue::Absent => None,
        }
    }
}

/// Schema-conformant structured result, fields in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    fields: Vec<(&'static str, FieldValue)>,
}

impl Payload {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.field(name).and_then(FieldValue::as_value)
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn is_absent(&self, name: &str) -> bool {
        matches!(self.field(name), Some(FieldValue::Absent))
    }

    pub fn absent_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|(_, v)| *v == FieldValue::Absent)
            .map(|(n, _)| *n)
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.as_value().cloned().unwrap_or(Value::Null),
                )
            })
            .collect();
        Value::Object(map)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, &value.as_value().unwrap_or(&Value::Null))?;
        }
        map.end()
    }
}

/// Why a parsed JSON value does not fit the schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("expected a JSON object at the top level, got {found}")]
    NotAnObject { found: &'static str },

    #[error("required field '{path}' is missing")]
    MissingRequired { path: String },

    #[error("field '{path}' should be {expected}, got {found}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl PayloadError {
    /// Structurally wrong content, as opposed to content that is merely
    /// incomplete. Repairs cannot fix this.
    pub fn is_violation(&self) -> bool {
        matches!(self, PayloadError::WrongType { .. })
    }
}

/// Check `value` against `descriptor`, producing a normalised payload.
pub fn validate(descriptor: &SchemaDescriptor, value: Value) -> Result<Payload, PayloadError> {
    let Value::Object(mut object) = value else {
        return Err(PayloadError::NotAnObject {
            found: json_type(&value),
        });
    };

    let mut fields = Vec::with_capacity(descriptor.fields.len());
    for def in descriptor.fields {
        let entry = match object.remove(def.name) {
            None | Some(Value::Null) if def.required => {
                return Err(PayloadError::MissingRequired {
                    path: def.name.to_string(),
                })
            }
            None | Some(Value::Null) => FieldValue::Absent,
            Some(v) => FieldValue::Present(normalize(&def.ty, v, def.name)?),
        };
        fields.push((def.name, entry));
    }

    Ok(Payload { fields })
}

fn normalize(ty: &FieldType, value: Value, path: &str) -> Result<Value, PayloadError> {
    let wrong = |value: &Value| PayloadError::WrongType {
        path: path.to_string(),
        expected: ty.name(),
        found: json_type(value),
    };

    match ty {
        FieldType::String if value.is_string() => Ok(value),
        FieldType::Integer if value.is_i64() || value.is_u64() => Ok(value),
        FieldType::Boolean if value.is_boolean() => Ok(value),
        FieldType::Array(inner) => match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| normalize(inner, item, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Err(wrong(&other)),
        },
        FieldType::Object(defs) => match value {
            Value::Object(object) => normalize_object(defs, object, path),
            other => Err(wrong(&other)),
        },
        _ => Err(wrong(&value)),
    }
}

fn normalize_object(
    defs: &[FieldDef],
    mut object: Map<String, Value>,
    path: &str,
) -> Result<Value, PayloadError> {
    let mut out = Map::new();
    for def in defs {
        let child = format!("{}.{}", path, def.name);
        let value = match object.remove(def.name) {
            None | Some(Value::Null) if def.required => {
                return Err(PayloadError::MissingRequired { path: child })
            }
            None | Some(Value::Null) => Value::Null,
            Some(v) => normalize(&def.ty, v, &child)?,
        };
        out.insert(def.name.to_string(), value);
    }
    Ok(Value::Object(out))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
