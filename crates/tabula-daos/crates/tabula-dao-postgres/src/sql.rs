//! Parameterized SQL assembly for dynamic tables
//!
//! Identifiers are double-quote escaped; every value travels as a
//! numbered parameter. Pattern operators escape LIKE metacharacters so a
//! search for `50%` matches the literal text.

use tabula_core::{AccessError, ColumnFilter, FilterOp, Result, RowValues, Value};

/// Quote an identifier for PostgreSQL.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."table"`
pub(crate) fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Escape LIKE/ILIKE metacharacters in a user-supplied pattern fragment.
pub(crate) fn escape_like(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Accumulates WHERE conditions and their parameters with stable
/// placeholder numbering.
#[derive(Default)]
pub(crate) struct WhereBuilder {
    conditions: Vec<String>,
    params: Vec<Value>,
    /// Placeholder numbering starts after this many existing parameters
    offset: usize,
}

impl WhereBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after `offset` parameters already bound by the
    /// surrounding statement (e.g. the SET list of an UPDATE).
    pub(crate) fn with_offset(offset: usize) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    fn placeholder(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.offset + self.params.len())
    }

    pub(crate) fn push_filter(&mut self, filter: &ColumnFilter) -> Result<()> {
        let col = quote_ident(&filter.column);
        let condition = match filter.op {
            FilterOp::Eq => {
                let p = self.placeholder(filter.value.clone());
                format!("{} = {}", col, p)
            }
            FilterOp::Gt => {
                let p = self.placeholder(filter.value.clone());
                format!("{} > {}", col, p)
            }
            FilterOp::Lt => {
                let p = self.placeholder(filter.value.clone());
                format!("{} < {}", col, p)
            }
            FilterOp::Gte => {
                let p = self.placeholder(filter.value.clone());
                format!("{} >= {}", col, p)
            }
            FilterOp::Lte => {
                let p = self.placeholder(filter.value.clone());
                format!("{} <= {}", col, p)
            }
            FilterOp::StartsWith => {
                let p = self.placeholder(Value::String(format!(
                    "{}%",
                    escape_like(&filter.value.to_string())
                )));
                format!("{}::text ILIKE {}", col, p)
            }
            FilterOp::EndsWith => {
                let p = self.placeholder(Value::String(format!(
                    "%{}",
                    escape_like(&filter.value.to_string())
                )));
                format!("{}::text ILIKE {}", col, p)
            }
            FilterOp::Contains => {
                let p = self.placeholder(Value::String(format!(
                    "%{}%",
                    escape_like(&filter.value.to_string())
                )));
                format!("{}::text ILIKE {}", col, p)
            }
            FilterOp::Empty => format!("({col} IS NULL OR {col}::text = '')", col = col),
        };
        self.conditions.push(condition);
        Ok(())
    }

    /// Case-insensitive contains across the given columns, ORed together.
    pub(crate) fn push_search(&mut self, term: &str, columns: &[String]) {
        if columns.is_empty() {
            return;
        }
        let pattern = format!("%{}%", escape_like(term));
        let alternatives: Vec<String> = columns
            .iter()
            .map(|c| {
                let p = self.placeholder(Value::String(pattern.clone()));
                format!("{}::text ILIKE {}", quote_ident(c), p)
            })
            .collect();
        self.conditions.push(format!("({})", alternatives.join(" OR ")));
    }

    /// Exact match on every column of a primary key map. NULL key parts
    /// match with IS NULL.
    pub(crate) fn push_key(&mut self, key: &RowValues) -> Result<()> {
        if key.is_empty() {
            return Err(AccessError::Query(
                "primary key values must not be empty".to_string(),
            ));
        }
        let mut columns: Vec<&String> = key.keys().collect();
        columns.sort();
        for column in columns {
            let value = &key[column];
            let col = quote_ident(column);
            if value.is_null() {
                self.conditions.push(format!("{} IS NULL", col));
            } else {
                let p = self.placeholder(value.clone());
                self.conditions.push(format!("{} = {}", col, p));
            }
        }
        Ok(())
    }

    pub(crate) fn params_cloned(&self) -> Vec<Value> {
        self.params.clone()
    }

    /// ` WHERE ...` or the empty string.
    pub(crate) fn clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub(crate) fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub(crate) fn into_params(self) -> Vec<Value> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn idents_are_escaped() {
        assert_eq!(quote_ident("simple"), "\"simple\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("public", "users"), "\"public\".\"users\"");
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_\\"), "50\\%\\_\\\\");
    }

    #[test]
    fn filters_number_placeholders_in_order() {
        let mut wb = WhereBuilder::new();
        wb.push_filter(&ColumnFilter {
            column: "age".to_string(),
            op: FilterOp::Gte,
            value: Value::Int64(21),
        })
        .unwrap();
        wb.push_filter(&ColumnFilter {
            column: "name".to_string(),
            op: FilterOp::StartsWith,
            value: Value::String("Jo".to_string()),
        })
        .unwrap();

        assert_eq!(
            wb.clause(),
            " WHERE \"age\" >= $1 AND \"name\"::text ILIKE $2"
        );
        let params = wb.into_params();
        assert_eq!(params[1], Value::String("Jo%".to_string()));
    }

    #[test]
    fn key_matching_sorts_columns_and_handles_null() {
        let mut key = RowValues::new();
        key.insert("b".to_string(), Value::Null);
        key.insert("a".to_string(), Value::Int64(1));

        let mut wb = WhereBuilder::new();
        wb.push_key(&key).unwrap();
        assert_eq!(wb.clause(), " WHERE \"a\" = $1 AND \"b\" IS NULL");
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut wb = WhereBuilder::new();
        assert!(wb.push_key(&RowValues::new()).is_err());
    }

    #[test]
    fn search_groups_alternatives() {
        let mut wb = WhereBuilder::new();
        wb.push_search("smith", &["first".to_string(), "last".to_string()]);
        assert_eq!(
            wb.clause(),
            " WHERE (\"first\"::text ILIKE $1 OR \"last\"::text ILIKE $2)"
        );
    }
}
