//! Plain-JSON mapping of the core value model
//!
//! The agent speaks ordinary JSON, not the typed value enum: `Int64(5)`
//! travels as `5`, binary as base64 text, temporal values as their ISO
//! renderings. The reverse mapping is intentionally coarse (numbers come
//! back as Int64/Float64) because the agent side owns the engine typing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value as Json;

use tabula_core::{Row, RowValues, Value};

/// Render a core value as plain JSON.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(v) => Json::Bool(*v),
        Value::Int32(v) => Json::from(*v),
        Value::Int64(v) => Json::from(*v),
        Value::Float64(v) => serde_json::Number::from_f64(*v)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Decimal(v) => Json::String(v.clone()),
        Value::String(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::String(BASE64.encode(v)),
        Value::Uuid(v) => Json::String(v.to_string()),
        Value::Date(v) => Json::String(v.to_string()),
        Value::Time(v) => Json::String(v.to_string()),
        Value::DateTime(v) => Json::String(v.to_string()),
        Value::DateTimeUtc(v) => Json::String(v.to_rfc3339()),
        Value::Json(v) => v.clone(),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
    }
}

/// Interpret plain JSON as a core value.
pub fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(v) => Value::Bool(*v),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else {
                Value::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        Json::Object(_) => Value::Json(json.clone()),
    }
}

/// Serialize a key/row map for the wire.
pub(crate) fn row_values_to_json(values: &RowValues) -> Json {
    let mut object = serde_json::Map::new();
    let mut columns: Vec<&String> = values.keys().collect();
    columns.sort();
    for column in columns {
        object.insert(column.clone(), value_to_json(&values[column]));
    }
    Json::Object(object)
}

/// Interpret a JSON object as one row. Column order follows the
/// serializer's key order.
pub(crate) fn json_object_to_row(json: &Json) -> Option<Row> {
    let object = json.as_object()?;
    let columns: Vec<String> = object.keys().cloned().collect();
    let values: Vec<Value> = object.values().map(json_to_value).collect();
    Some(Row::new(columns, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scalars_round_trip() {
        assert_eq!(json_to_value(&value_to_json(&Value::Int64(7))), Value::Int64(7));
        assert_eq!(json_to_value(&value_to_json(&Value::Null)), Value::Null);
        assert_eq!(
            json_to_value(&value_to_json(&Value::String("x".into()))),
            Value::String("x".into())
        );
    }

    #[test]
    fn bytes_become_base64_text() {
        let json = value_to_json(&Value::Bytes(vec![1, 2, 3]));
        assert_eq!(json, Json::String("AQID".to_string()));
    }

    #[test]
    fn objects_become_rows() {
        let json = serde_json::json!({"id": 1, "name": "a"});
        let row = json_object_to_row(&json).unwrap();
        assert_eq!(row.get_by_name("id"), Some(&Value::Int64(1)));
        assert_eq!(row.get_by_name("name"), Some(&Value::String("a".into())));
    }
}
