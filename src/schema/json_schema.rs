use serde_json::{Map, Value};

use super::{Contract, FieldType};

impl Contract {
    /// Object-parameter schema for a function/tool definition.
    ///
    /// Fields without a default are `required`; a strict contract forbids
    /// additional properties.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::<String, Value>::new();
        for field in self.fields() {
            let mut property = Map::<String, Value>::new();
            let field_type = field.field_type();
            property.insert(
                "type".to_string(),
                Value::String(field_type.json_schema_type().to_string()),
            );
            if field_type == FieldType::List {
                property.insert("items".to_string(), Value::Object(Map::new()));
            }
            if let Some(default) = field.default.as_ref() {
                property.insert("default".to_string(), default.to_json());
            }
            properties.insert(field.name.clone(), Value::Object(property));
        }

        let required = self
            .required_fields()
            .map(|field| Value::String(field.name.clone()))
            .collect::<Vec<_>>();

        let mut out = Map::<String, Value>::new();
        out.insert("type".to_string(), Value::String("object".to_string()));
        out.insert("properties".to_string(), Value::Object(properties));
        out.insert("required".to_string(), Value::Array(required));
        if self.is_strict() {
            out.insert("additionalProperties".to_string(), Value::Bool(false));
        }
        Value::Object(out)
    }
}
