use serde_json::Value;

/// Remove `"format": "uri"` from every string-typed schema, recursively.
///
/// Several `OpenAI`-compatible backends reject the `uri` format outright.
/// Everything else in the schema is preserved.
pub fn strip_uri_format(schema: &mut Value) {
    match schema {
        Value::Object(obj) => {
            if is_string_schema(obj) && obj.get("format").and_then(Value::as_str) == Some("uri") {
                obj.remove("format");
            }
            for value in obj.values_mut() {
                strip_uri_format(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_uri_format(item);
            }
        }
        _ => {}
    }
}

#[inline]
fn is_string_schema(obj: &serde_json::Map<String, Value>) -> bool {
    obj.get("type").and_then(Value::as_str) == Some("string")
}
