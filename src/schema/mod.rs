//! Field type registry and the runtime contract compiler.
//!
//! A contract is a schema-description value: an ordered list of typed field
//! declarations interpreted by one table-driven validator. No per-request
//! types are generated.

mod contract;
pub mod form;
mod json_schema;
mod record;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use contract::{Contract, FieldDef, FieldSpec, compile};
pub use form::{ContractForm, ProjectForm};
pub use record::{FieldValue, Record};

/// Concrete value kinds every type tag resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Integer,
    Boolean,
    List,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::List => "list",
        }
    }

    /// JSON Schema `type` keyword for this kind.
    pub fn json_schema_type(self) -> &'static str {
        match self {
            FieldType::Text => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::List => "array",
        }
    }

    /// Lax coercion of a decoded value into this kind.
    ///
    /// Strings are accepted for every non-text kind because form bodies carry
    /// scalars as strings. `null` is never coerced.
    pub fn coerce(self, value: &Value) -> Option<FieldValue> {
        match (self, value) {
            (FieldType::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
            (FieldType::Number, Value::Number(n)) => n.as_f64().map(FieldValue::Number),
            (FieldType::Number, Value::String(s)) => parse_finite_f64(s).map(FieldValue::Number),
            (FieldType::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral_f64))
                .map(FieldValue::Integer),
            (FieldType::Integer, Value::String(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| parse_finite_f64(s).and_then(integral_f64))
                    .map(FieldValue::Integer)
            }
            (FieldType::Boolean, Value::Bool(b)) => Some(FieldValue::Boolean(*b)),
            (FieldType::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(FieldValue::Boolean(false)),
                Some(1) => Some(FieldValue::Boolean(true)),
                _ => None,
            },
            (FieldType::Boolean, Value::String(s)) => parse_bool(s).map(FieldValue::Boolean),
            (FieldType::List, Value::Array(items)) => Some(FieldValue::List(items.clone())),
            (FieldType::List, Value::String(s)) => match serde_json::from_str::<Value>(s.trim()) {
                Ok(Value::Array(items)) => Some(FieldValue::List(items)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type tags accepted in contract definitions.
///
/// Both the form-facing names (`Text`, `Number`, `Boolean`) and the short
/// names (`str`, `int`, `float`, `bool`, `list`) are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Text,
    Number,
    Boolean,
    Str,
    Int,
    Float,
    Bool,
    List,
}

impl TypeTag {
    pub const ALL: [TypeTag; 8] = [
        TypeTag::Text,
        TypeTag::Number,
        TypeTag::Boolean,
        TypeTag::Str,
        TypeTag::Int,
        TypeTag::Float,
        TypeTag::Bool,
        TypeTag::List,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Text => "Text",
            TypeTag::Number => "Number",
            TypeTag::Boolean => "Boolean",
            TypeTag::Str => "str",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Bool => "bool",
            TypeTag::List => "list",
        }
    }

    pub fn field_type(self) -> FieldType {
        match self {
            TypeTag::Text | TypeTag::Str => FieldType::Text,
            TypeTag::Number | TypeTag::Float => FieldType::Number,
            TypeTag::Int => FieldType::Integer,
            TypeTag::Boolean | TypeTag::Bool => FieldType::Boolean,
            TypeTag::List => FieldType::List,
        }
    }
}

impl FromStr for TypeTag {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        TypeTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == raw)
            .ok_or(())
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("unknown type tag {tag:?} for field {field}")]
    UnknownTypeTag { field: String, tag: String },
    #[error("duplicate field name: {0}")]
    DuplicateFieldName(String),
    #[error("field name must not be empty")]
    EmptyFieldName,
    #[error("invalid default for field {field}: expected {expected}")]
    InvalidDefault { field: String, expected: FieldType },
    #[error("contract form has {names} names but {dtypes} types")]
    MismatchedForm { names: usize, dtypes: usize },
    #[error("missing form field: {0}")]
    MissingFormField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("payload must be an object, got {0}")]
    NotAnObject(&'static str),
    #[error("unexpected field: {0}")]
    UnexpectedField(String),
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("type mismatch for field {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        got: &'static str,
    },
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_finite_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `i64::MAX as f64` rounds up to 2^63, which is already out of range.
const I64_UPPER_EXCLUSIVE: f64 = 9_223_372_036_854_775_808.0;

fn integral_f64(value: f64) -> Option<i64> {
    if value.fract() != 0.0 || value < i64::MIN as f64 || value >= I64_UPPER_EXCLUSIVE {
        return None;
    }
    Some(value as i64)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}
