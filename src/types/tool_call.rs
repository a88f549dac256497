use serde_json::{Map, Value};

/// Parses raw `function.arguments`. Blank input means a call without
/// arguments and decodes to an empty object.
pub(crate) fn parse_tool_call_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str::<Value>(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_arguments() {
        assert_eq!(
            parse_tool_call_arguments(" {\"a\": 1} ").expect("parse"),
            json!({"a": 1})
        );
        assert_eq!(parse_tool_call_arguments("  ").expect("parse"), json!({}));
    }

    #[test]
    fn string_literal_is_a_decoded_value() {
        assert_eq!(
            parse_tool_call_arguments("\"hello\"").expect("parse"),
            Value::String("hello".to_string())
        );
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(parse_tool_call_arguments("{\"a\": ").is_err());
    }
}
