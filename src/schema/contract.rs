use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    CompilationError, FieldType, FieldValue, Record, TypeTag, ValidationError, json_type_name,
};

/// An uncompiled field declaration as the operator submitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub tag: TypeTag,
    pub default: Option<FieldValue>,
}

impl FieldSpec {
    pub fn field_type(&self) -> FieldType {
        self.tag.field_type()
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// A compiled contract. Field order is the declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    fields: Vec<FieldSpec>,
    strict: bool,
}

/// Compiles a strict contract from ordered field declarations.
pub fn compile(defs: &[FieldDef]) -> Result<Contract, CompilationError> {
    let mut seen = HashSet::<&str>::with_capacity(defs.len());
    let mut fields = Vec::with_capacity(defs.len());

    for def in defs {
        let name = def.name.trim();
        if name.is_empty() {
            return Err(CompilationError::EmptyFieldName);
        }
        if !seen.insert(name) {
            return Err(CompilationError::DuplicateFieldName(name.to_string()));
        }

        let tag = def
            .dtype
            .trim()
            .parse::<TypeTag>()
            .map_err(|()| CompilationError::UnknownTypeTag {
                field: name.to_string(),
                tag: def.dtype.clone(),
            })?;

        let default = match def.default.as_ref() {
            None => None,
            Some(raw) => Some(tag.field_type().coerce(raw).ok_or_else(|| {
                CompilationError::InvalidDefault {
                    field: name.to_string(),
                    expected: tag.field_type(),
                }
            })?),
        };

        fields.push(FieldSpec {
            name: name.to_string(),
            tag,
            default,
        });
    }

    Ok(Contract {
        fields,
        strict: true,
    })
}

impl Contract {
    /// Allows keys the contract does not declare; they are dropped.
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|field| field.is_required())
    }

    pub fn validate(&self, raw: &Map<String, Value>) -> Result<Record, ValidationError> {
        if self.strict {
            // Report unknown keys in a stable order regardless of map ordering.
            let mut unknown = raw
                .keys()
                .filter(|key| self.field(key).is_none())
                .collect::<Vec<_>>();
            unknown.sort();
            if let Some(key) = unknown.first() {
                return Err(ValidationError::UnexpectedField((*key).clone()));
            }
        }

        let mut record = Record::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = match raw.get(&field.name) {
                Some(value) => {
                    field
                        .field_type()
                        .coerce(value)
                        .ok_or_else(|| ValidationError::TypeMismatch {
                            field: field.name.clone(),
                            expected: field.field_type(),
                            got: json_type_name(value),
                        })?
                }
                None => field
                    .default
                    .clone()
                    .ok_or_else(|| ValidationError::MissingField(field.name.clone()))?,
            };
            record.push(field.name.clone(), value);
        }
        Ok(record)
    }

    /// Validates an arbitrary decoded value, which must be an object.
    pub fn validate_value(&self, raw: &Value) -> Result<Record, ValidationError> {
        match raw {
            Value::Object(map) => self.validate(map),
            other => Err(ValidationError::NotAnObject(json_type_name(other))),
        }
    }
}
