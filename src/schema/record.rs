use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use super::FieldType;

/// A validated field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
    List(Vec<Value>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Number(_) => FieldType::Number,
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::List(_) => FieldType::List,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(text) => Value::String(text.clone()),
            FieldValue::Number(number) => serde_json::Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Integer(number) => Value::Number((*number).into()),
            FieldValue::Boolean(value) => Value::Bool(*value),
            FieldValue::List(items) => Value::Array(items.clone()),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(text) => serializer.serialize_str(text),
            FieldValue::Number(number) => serializer.serialize_f64(*number),
            FieldValue::Integer(number) => serializer.serialize_i64(*number),
            FieldValue::Boolean(value) => serializer.serialize_bool(*value),
            FieldValue::List(items) => items.serialize(serializer),
        }
    }
}

/// Output of [`super::Contract::validate`]: field values in contract order.
///
/// Serializes as a JSON object whose key order follows the contract, which
/// keeps the canonical encoding (and therefore metering) reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compact JSON encoding in contract field order.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_keeps_field_order() {
        let mut record = Record::default();
        record.push("zeta", FieldValue::Text("last".to_string()));
        record.push("alpha", FieldValue::Integer(1));
        record.push("mid", FieldValue::List(vec![json!("a")]));
        assert_eq!(
            record.to_canonical_json(),
            r#"{"zeta":"last","alpha":1,"mid":["a"]}"#
        );
    }

    #[test]
    fn numbers_serialize_as_floats() {
        let mut record = Record::default();
        record.push("score", FieldValue::Number(3.0));
        assert_eq!(record.to_canonical_json(), r#"{"score":3.0}"#);
        assert_eq!(record.to_json_map().get("score"), Some(&json!(3.0)));
    }
}
