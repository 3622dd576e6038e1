//! Conversion between BSON documents and the core value model

use bson::{Bson, Document};

use tabula_core::{Row, RowValues, Value};

/// Convert a BSON value into the core model.
pub(crate) fn bson_to_value(bson: &Bson) -> Value {
    match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(v) => Value::Bool(*v),
        Bson::Int32(v) => Value::Int32(*v),
        Bson::Int64(v) => Value::Int64(*v),
        Bson::Double(v) => Value::Float64(*v),
        Bson::Decimal128(v) => Value::Decimal(v.to_string()),
        Bson::String(v) => Value::String(v.clone()),
        Bson::ObjectId(v) => Value::String(v.to_hex()),
        Bson::DateTime(v) => Value::DateTimeUtc(v.to_chrono()),
        Bson::Binary(v) => Value::Bytes(v.bytes.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_value).collect()),
        Bson::Document(doc) => Value::Json(
            serde_json::to_value(doc).unwrap_or(serde_json::Value::Null),
        ),
        other => Value::String(other.to_string()),
    }
}

/// Convert a core value into BSON. `_id`-shaped hex strings become
/// ObjectIds so primary-key round trips work.
pub(crate) fn value_to_bson(field: &str, value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(v) => Bson::Boolean(*v),
        Value::Int32(v) => Bson::Int32(*v),
        Value::Int64(v) => Bson::Int64(*v),
        Value::Float64(v) => Bson::Double(*v),
        Value::Decimal(v) => v
            .parse::<f64>()
            .map(Bson::Double)
            .unwrap_or_else(|_| Bson::String(v.clone())),
        Value::String(v) => {
            if field == "_id"
                && let Ok(oid) = bson::oid::ObjectId::parse_str(v)
            {
                Bson::ObjectId(oid)
            } else {
                Bson::String(v.clone())
            }
        }
        Value::Bytes(v) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: v.clone(),
        }),
        Value::Uuid(v) => Bson::String(v.to_string()),
        Value::Date(v) => Bson::String(v.to_string()),
        Value::Time(v) => Bson::String(v.to_string()),
        Value::DateTime(v) => Bson::DateTime(bson::DateTime::from_chrono(
            chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(*v, chrono::Utc),
        )),
        Value::DateTimeUtc(v) => Bson::DateTime(bson::DateTime::from_chrono(*v)),
        Value::Json(v) => serde_json::from_value::<Bson>(v.clone()).unwrap_or(Bson::Null),
        Value::Array(items) => Bson::Array(
            items
                .iter()
                .map(|item| value_to_bson(field, item))
                .collect(),
        ),
    }
}

/// Human-readable type name used for inferred column structure.
pub(crate) fn bson_type_name(bson: &Bson) -> &'static str {
    match bson {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null | Bson::Undefined => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Binary(_) => "binData",
        Bson::RegularExpression(_) => "regex",
        Bson::Timestamp(_) => "timestamp",
        _ => "unknown",
    }
}

/// Flatten a document into a row, keys in document order.
pub(crate) fn document_to_row(doc: &Document) -> Row {
    let columns: Vec<String> = doc.keys().cloned().collect();
    let values: Vec<Value> = doc.values().map(bson_to_value).collect();
    Row::new(columns, values)
}

/// Build a BSON filter document from primary key values.
pub(crate) fn key_to_filter(key: &RowValues) -> Document {
    let mut filter = Document::new();
    let mut columns: Vec<&String> = key.keys().collect();
    columns.sort();
    for column in columns {
        filter.insert(column.clone(), value_to_bson(column, &key[column]));
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_strings_round_trip() {
        let oid = bson::oid::ObjectId::new();
        let bson = value_to_bson("_id", &Value::String(oid.to_hex()));
        assert_eq!(bson, Bson::ObjectId(oid));

        // the same hex in another field stays a string
        let bson = value_to_bson("name", &Value::String(oid.to_hex()));
        assert!(matches!(bson, Bson::String(_)));
    }

    #[test]
    fn document_order_is_preserved() {
        let mut doc = Document::new();
        doc.insert("_id", 1i64);
        doc.insert("name", "a");
        let row = document_to_row(&doc);
        assert_eq!(row.columns(), &["_id".to_string(), "name".to_string()]);
        assert_eq!(row.get(0), Some(&Value::Int64(1)));
    }

    #[test]
    fn decimal128_becomes_decimal_string() {
        let dec: bson::Decimal128 = "10.5".parse().unwrap();
        assert_eq!(
            bson_to_value(&Bson::Decimal128(dec)),
            Value::Decimal("10.5".to_string())
        );
    }
}
