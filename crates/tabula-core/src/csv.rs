//! CSV reading and writing shared by the engine implementations
//!
//! Covers the RFC 4180 subset the import/export contract needs: comma
//! delimiter, double-quote qualifier with doubled-quote escaping, CRLF or
//! LF records, embedded newlines inside quoted fields.

use std::io::Write;

use crate::{AccessError, Result, Row, Value};

/// Quote a field if it contains the delimiter, a quote or a line break.
pub fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write one CSV record.
pub fn write_csv_record(out: &mut (dyn Write + Send), fields: &[String]) -> Result<()> {
    let line = fields
        .iter()
        .map(|f| escape_csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Render a row for CSV export. NULL becomes the empty field.
pub fn row_to_csv_fields(row: &Row) -> Vec<String> {
    row.values()
        .iter()
        .map(|v| match v {
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect()
}

/// Parse CSV bytes into records of string fields.
pub fn parse_csv(data: &[u8]) -> Result<Vec<Vec<String>>> {
    let text = std::str::from_utf8(data)
        .map_err(|_| AccessError::Configuration("CSV payload is not valid UTF-8".to_string()))?;

    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                other => field.push(other),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            ',' => {
                record.push(std::mem::take(&mut field));
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            other => field.push(other),
        }
    }
    if in_quotes {
        return Err(AccessError::Configuration(
            "CSV payload ends inside a quoted field".to_string(),
        ));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escaping_round_trip() {
        let fields = vec![
            "plain".to_string(),
            "with,comma".to_string(),
            "with \"quote\"".to_string(),
            "multi\nline".to_string(),
            String::new(),
        ];
        let mut out: Vec<u8> = Vec::new();
        write_csv_record(&mut out, &fields).unwrap();

        let parsed = parse_csv(&out).unwrap();
        assert_eq!(parsed, vec![fields]);
    }

    #[test]
    fn parses_crlf_and_quoted_records() {
        let data = b"id,name\r\n1,\"Smith, Jane\"\r\n2,plain\r\n";
        let parsed = parse_csv(data).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], vec!["1".to_string(), "Smith, Jane".to_string()]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(parse_csv(b"a,\"unterminated").is_err());
    }

    #[test]
    fn null_renders_empty() {
        let row = Row::new(
            vec!["a".to_string(), "b".to_string()],
            vec![Value::Null, Value::Int64(7)],
        );
        assert_eq!(row_to_csv_fields(&row), vec!["".to_string(), "7".to_string()]);
    }
}
