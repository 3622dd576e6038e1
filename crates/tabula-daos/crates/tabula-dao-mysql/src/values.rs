//! Value conversion between the core model and mysql_async
//!
//! MySQL's text protocol returns most values as bytes; the column type
//! decides how they re-enter the typed model. Parameters lean on the
//! server's weak typing: everything travels as the closest wire type and
//! the server coerces.

use mysql_async::consts::ColumnType;

use tabula_core::Value;

/// Convert a core value into a mysql_async parameter value.
pub(crate) fn value_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(v) => mysql_async::Value::Int(i64::from(*v)),
        Value::Int32(v) => mysql_async::Value::Int(*v as i64),
        Value::Int64(v) => mysql_async::Value::Int(*v),
        Value::Float64(v) => mysql_async::Value::Double(*v),
        Value::Decimal(v) => mysql_async::Value::Bytes(v.clone().into_bytes()),
        Value::String(v) => mysql_async::Value::Bytes(v.clone().into_bytes()),
        Value::Bytes(v) => mysql_async::Value::Bytes(v.clone()),
        Value::Uuid(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
        Value::Json(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
        Value::Date(d) => {
            use chrono::Datelike;
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => {
            use chrono::Timelike;
            mysql_async::Value::Time(
                false,
                0,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
                t.nanosecond() / 1000,
            )
        }
        Value::DateTime(dt) => naive_to_mysql(*dt),
        Value::DateTimeUtc(dt) => naive_to_mysql(dt.naive_utc()),
        Value::Array(_) => mysql_async::Value::Bytes(value.to_string().into_bytes()),
    }
}

fn naive_to_mysql(dt: chrono::NaiveDateTime) -> mysql_async::Value {
    use chrono::{Datelike, Timelike};
    mysql_async::Value::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.nanosecond() / 1000,
    )
}

/// Convert a mysql_async result value into the core model, steered by the
/// column type.
pub(crate) fn mysql_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => s
                    .parse::<f64>()
                    .map(Value::Float64)
                    .unwrap_or(Value::String(s)),
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Decimal(s)
                }
                ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(&s)
                    .map(Value::Json)
                    .unwrap_or(Value::String(s)),
                _ => Value::String(s),
            },
            Err(err) => Value::Bytes(err.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => {
            if u <= i64::MAX as u64 {
                Value::Int64(u as i64)
            } else {
                Value::String(u.to_string())
            }
        }
        mysql_async::Value::Float(f) => Value::Float64(f as f64),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .map(Value::Date)
                    .unwrap_or_else(|| {
                        Value::String(format!("{:04}-{:02}-{:02}", year, month, day))
                    })
            } else {
                chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .and_then(|d| {
                        d.and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                    })
                    .map(Value::DateTime)
                    .unwrap_or_else(|| {
                        Value::String(format!(
                            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                            year, month, day, hour, min, sec
                        ))
                    })
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            let total_hours = (days as u32) * 24 + (hours as u32);
            let sign = if negative { "-" } else { "" };
            Value::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, total_hours, mins, secs, micros
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_bytes_stay_exact() {
        let val = mysql_async::Value::Bytes(b"123.450".to_vec());
        assert_eq!(
            mysql_to_value(val, ColumnType::MYSQL_TYPE_NEWDECIMAL),
            Value::Decimal("123.450".to_string())
        );
    }

    #[test]
    fn integer_bytes_parse() {
        let val = mysql_async::Value::Bytes(b"42".to_vec());
        assert_eq!(
            mysql_to_value(val, ColumnType::MYSQL_TYPE_LONG),
            Value::Int64(42)
        );
    }

    #[test]
    fn date_only_maps_to_date() {
        let val = mysql_async::Value::Date(2024, 5, 1, 0, 0, 0, 0);
        assert!(matches!(
            mysql_to_value(val, ColumnType::MYSQL_TYPE_DATE),
            Value::Date(_)
        ));
    }

    #[test]
    fn bool_param_is_int() {
        assert_eq!(
            value_to_mysql(&Value::Bool(true)),
            mysql_async::Value::Int(1)
        );
    }
}
