//! Value conversion between the core model and tokio-postgres
//!
//! Parameters are coerced against the prepared statement's declared types
//! so the wire encoding always matches the column (4 bytes for INT4, text
//! parsed into DATE, and so on). Strings that fail to parse fall back to
//! text and let the server report the real error.

use bytes::BytesMut;
use tokio_postgres::Row as PgRow;
use tokio_postgres::types::{FromSql, ToSql, Type};

use tabula_core::{Result, Value};

/// Owned parameter wrapper implementing `ToSql` for the core value model
#[derive(Debug)]
pub(crate) enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
}

impl PgValue {
    /// Convert a core value into the variant matching the target column
    /// type of the prepared statement.
    pub(crate) fn from_value_for_type(value: &Value, target: &Type) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int32(v) => Self::coerce_int(*v as i64, target),
            Value::Int64(v) => Self::coerce_int(*v, target),
            Value::Float64(v) => PgValue::Float64(*v),
            Value::Decimal(v) => PgValue::String(v.clone()),
            Value::String(v) => Self::coerce_string(v, target),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::Date(v) => PgValue::Date(*v),
            Value::Time(v) => PgValue::Time(*v),
            Value::DateTime(v) => PgValue::DateTime(*v),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
            Value::Array(_) => PgValue::String(value.to_string()),
        }
    }

    /// Fallback when the target type is unknown (raw queries).
    pub(crate) fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int32(v) => PgValue::Int32(*v),
            Value::Int64(v) => PgValue::Int64(*v),
            Value::Float64(v) => PgValue::Float64(*v),
            Value::Decimal(v) => PgValue::String(v.clone()),
            Value::String(v) => PgValue::String(v.clone()),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::Date(v) => PgValue::Date(*v),
            Value::Time(v) => PgValue::Time(*v),
            Value::DateTime(v) => PgValue::DateTime(*v),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
            Value::Array(_) => PgValue::String(value.to_string()),
        }
    }

    fn coerce_int(value: i64, target: &Type) -> Self {
        match *target {
            Type::INT2 => PgValue::Int16(value as i16),
            Type::INT4 => PgValue::Int32(value as i32),
            _ => PgValue::Int64(value),
        }
    }

    fn coerce_string(value: &str, target: &Type) -> Self {
        match *target {
            Type::BOOL => match value {
                "true" | "t" | "1" => PgValue::Bool(true),
                "false" | "f" | "0" => PgValue::Bool(false),
                _ => PgValue::String(value.to_string()),
            },
            Type::INT2 | Type::INT4 | Type::INT8 => value
                .parse::<i64>()
                .map(|v| Self::coerce_int(v, target))
                .unwrap_or_else(|_| PgValue::String(value.to_string())),
            Type::FLOAT4 | Type::FLOAT8 => value
                .parse::<f64>()
                .map(PgValue::Float64)
                .unwrap_or_else(|_| PgValue::String(value.to_string())),
            Type::UUID => uuid::Uuid::parse_str(value)
                .map(PgValue::Uuid)
                .unwrap_or_else(|_| PgValue::String(value.to_string())),
            Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(value)
                .map(PgValue::Json)
                .unwrap_or_else(|_| PgValue::String(value.to_string())),
            Type::DATE => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(PgValue::Date)
                .unwrap_or_else(|_| PgValue::String(value.to_string())),
            Type::TIME => chrono::NaiveTime::parse_from_str(value, "%H:%M:%S")
                .or_else(|_| chrono::NaiveTime::parse_from_str(value, "%H:%M:%S%.f"))
                .map(PgValue::Time)
                .unwrap_or_else(|_| PgValue::String(value.to_string())),
            Type::TIMESTAMP => parse_naive_datetime(value)
                .map(PgValue::DateTime)
                .unwrap_or_else(|| PgValue::String(value.to_string())),
            Type::TIMESTAMPTZ => chrono::DateTime::parse_from_rfc3339(value)
                .map(|ts| PgValue::DateTimeUtc(ts.with_timezone(&chrono::Utc)))
                .ok()
                .or_else(|| {
                    parse_naive_datetime(value).map(|naive| {
                        PgValue::DateTimeUtc(chrono::DateTime::from_naive_utc_and_offset(
                            naive,
                            chrono::Utc,
                        ))
                    })
                })
                .unwrap_or_else(|| PgValue::String(value.to_string())),
            _ => PgValue::String(value.to_string()),
        }
    }
}

fn parse_naive_datetime(value: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| chrono::NaiveTime::from_hms_opt(0, 0, 0).map(|t| date.and_time(t)))
        })
}

impl ToSql for PgValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgValue::Null => Ok(postgres_types::IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int16(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::String(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Uuid(v) => v.to_sql(ty, out),
            PgValue::Json(v) => v.to_sql(ty, out),
            PgValue::Date(v) => v.to_sql(ty, out),
            PgValue::Time(v) => v.to_sql(ty, out),
            PgValue::DateTime(v) => v.to_sql(ty, out),
            PgValue::DateTimeUtc(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// Text rendering of NUMERIC from the binary wire format, so exact
/// decimals survive without a decimal crate in the model.
#[derive(Debug)]
pub(crate) struct PgNumericString(pub String);

impl PgNumericString {
    fn parse(raw: &[u8]) -> std::result::Result<String, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }

        let ndigits = i16::from_be_bytes([raw[0], raw[1]]) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]);
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = i16::from_be_bytes([raw[6], raw[7]]) as usize;

        if raw.len() < 8 + ndigits * 2 {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }
        if sign == 0xC000 {
            return Ok("NaN".to_string());
        }

        let mut digits = Vec::with_capacity(ndigits);
        for index in 0..ndigits {
            let offset = 8 + index * 2;
            let group = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
            if group > 9999 {
                return Err("invalid NUMERIC payload: group out of range".into());
            }
            digits.push(group);
        }
        if digits.is_empty() {
            return Ok("0".to_string());
        }

        let integer_group_count = if weight >= 0 { (weight as usize) + 1 } else { 0 };

        let mut integer_text = String::new();
        if integer_group_count == 0 {
            integer_text.push('0');
        } else {
            for group_index in 0..integer_group_count {
                let group = digits.get(group_index).copied().unwrap_or(0);
                if group_index == 0 {
                    integer_text.push_str(&group.to_string());
                } else {
                    integer_text.push_str(&format!("{group:04}"));
                }
            }
        }

        let mut fraction_text = String::new();
        if dscale > 0 {
            let start = integer_group_count.min(digits.len());
            for group in digits.iter().skip(start) {
                fraction_text.push_str(&format!("{group:04}"));
            }
            if fraction_text.len() < dscale {
                fraction_text.push_str(&"0".repeat(dscale - fraction_text.len()));
            } else {
                fraction_text.truncate(dscale);
            }
            while fraction_text.ends_with('0') {
                fraction_text.pop();
            }
        }

        let mut output = String::new();
        if sign == 0x4000 && integer_text != "0" {
            output.push('-');
        }
        output.push_str(&integer_text);
        if !fraction_text.is_empty() {
            output.push('.');
            output.push_str(&fraction_text);
        }
        Ok(output)
    }
}

impl<'a> FromSql<'a> for PgNumericString {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(Self::parse(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Decode one column of a result row into the core value model.
pub(crate) fn postgres_to_value(row: &PgRow, idx: usize) -> Result<Value> {
    let col = &row.columns()[idx];
    let type_name = col.type_().name();

    let value = match type_name {
        "bool" => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Int32(v as i32))
            .unwrap_or(Value::Null),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(Value::Int32)
            .unwrap_or(Value::Null),
        "int8" => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(Value::Int64)
            .unwrap_or(Value::Null),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Float64(v as f64))
            .unwrap_or(Value::Null),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(Value::Float64)
            .unwrap_or(Value::Null),
        "numeric" => row
            .try_get::<_, Option<PgNumericString>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Decimal(v.0))
            .unwrap_or(Value::Null),
        "text" | "varchar" | "char" | "bpchar" | "name" | "citext" => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .ok()
            .flatten()
            .map(Value::Uuid)
            .unwrap_or(Value::Null),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(Value::Json)
            .unwrap_or(Value::Null),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(Value::Date)
            .unwrap_or(Value::Null),
        "time" => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(Value::Time)
            .unwrap_or(Value::Null),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()
            .flatten()
            .map(Value::DateTimeUtc)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<PgFallbackString>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::String(v.0))
            .unwrap_or(Value::Null),
    };

    Ok(value)
}

/// Last-resort decode: interpret the raw bytes as UTF-8 text.
#[derive(Debug)]
pub(crate) struct PgFallbackString(pub String);

impl<'a> FromSql<'a> for PgFallbackString {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_payload(ndigits: i16, weight: i16, sign: u16, dscale: i16, groups: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&ndigits.to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for g in groups {
            raw.extend_from_slice(&g.to_be_bytes());
        }
        raw
    }

    #[test]
    fn numeric_integer() {
        let raw = numeric_payload(1, 0, 0, 0, &[42]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "42");
    }

    #[test]
    fn numeric_fraction() {
        // 1.5 => groups [1, 5000], weight 0, dscale 1
        let raw = numeric_payload(2, 0, 0, 1, &[1, 5000]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "1.5");
    }

    #[test]
    fn numeric_negative() {
        let raw = numeric_payload(1, 0, 0x4000, 0, &[7]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "-7");
    }

    #[test]
    fn numeric_nan() {
        let raw = numeric_payload(0, 0, 0xC000, 0, &[]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "NaN");
    }

    #[test]
    fn numeric_truncated_is_error() {
        assert!(PgNumericString::parse(&[0, 1]).is_err());
    }

    #[test]
    fn string_coercion_targets() {
        assert!(matches!(
            PgValue::from_value_for_type(&Value::String("42".into()), &Type::INT4),
            PgValue::Int32(42)
        ));
        assert!(matches!(
            PgValue::from_value_for_type(&Value::String("2024-05-01".into()), &Type::DATE),
            PgValue::Date(_)
        ));
        // unparseable values fall back to text so the server reports the error
        assert!(matches!(
            PgValue::from_value_for_type(&Value::String("not a number".into()), &Type::INT4),
            PgValue::String(_)
        ));
    }
}
