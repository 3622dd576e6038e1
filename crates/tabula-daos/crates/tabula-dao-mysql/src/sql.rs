//! Parameterized SQL assembly for MySQL
//!
//! Identifiers are backtick escaped; values travel as `?` placeholders.
//! Non-text columns are cast to CHAR before pattern matching so search
//! works across the whole row.

use tabula_core::{AccessError, ColumnFilter, FilterOp, Result, RowValues, Value};

/// Quote an identifier for MySQL.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Escape LIKE metacharacters in a user-supplied pattern fragment.
pub(crate) fn escape_like(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Accumulates WHERE conditions and their `?` parameters.
#[derive(Default)]
pub(crate) struct WhereBuilder {
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl WhereBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_filter(&mut self, filter: &ColumnFilter) -> Result<()> {
        let col = quote_ident(&filter.column);
        let condition = match filter.op {
            FilterOp::Eq => {
                self.params.push(filter.value.clone());
                format!("{} = ?", col)
            }
            FilterOp::Gt => {
                self.params.push(filter.value.clone());
                format!("{} > ?", col)
            }
            FilterOp::Lt => {
                self.params.push(filter.value.clone());
                format!("{} < ?", col)
            }
            FilterOp::Gte => {
                self.params.push(filter.value.clone());
                format!("{} >= ?", col)
            }
            FilterOp::Lte => {
                self.params.push(filter.value.clone());
                format!("{} <= ?", col)
            }
            FilterOp::StartsWith => {
                self.params.push(Value::String(format!(
                    "{}%",
                    escape_like(&filter.value.to_string())
                )));
                format!("CAST({} AS CHAR) LIKE ?", col)
            }
            FilterOp::EndsWith => {
                self.params.push(Value::String(format!(
                    "%{}",
                    escape_like(&filter.value.to_string())
                )));
                format!("CAST({} AS CHAR) LIKE ?", col)
            }
            FilterOp::Contains => {
                self.params.push(Value::String(format!(
                    "%{}%",
                    escape_like(&filter.value.to_string())
                )));
                format!("CAST({} AS CHAR) LIKE ?", col)
            }
            FilterOp::Empty => format!("({col} IS NULL OR CAST({col} AS CHAR) = '')", col = col),
        };
        self.conditions.push(condition);
        Ok(())
    }

    /// Contains match across the given columns, ORed together.
    pub(crate) fn push_search(&mut self, term: &str, columns: &[String]) {
        if columns.is_empty() {
            return;
        }
        let pattern = format!("%{}%", escape_like(term));
        let alternatives: Vec<String> = columns
            .iter()
            .map(|c| {
                self.params.push(Value::String(pattern.clone()));
                format!("CAST({} AS CHAR) LIKE ?", quote_ident(c))
            })
            .collect();
        self.conditions
            .push(format!("({})", alternatives.join(" OR ")));
    }

    /// Exact match on every column of a primary key map.
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
                self.params.push(value.clone());
                self.conditions.push(format!("{} = ?", col));
            }
        }
        Ok(())
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

    pub(crate) fn params_cloned(&self) -> Vec<Value> {
        self.params.clone()
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
    fn idents_use_backticks() {
        assert_eq!(quote_ident("users"), "`users`");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn filters_use_question_placeholders() {
        let mut wb = WhereBuilder::new();
        wb.push_filter(&ColumnFilter {
            column: "age".to_string(),
            op: FilterOp::Lt,
            value: Value::Int64(30),
        })
        .unwrap();
        wb.push_filter(&ColumnFilter {
            column: "city".to_string(),
            op: FilterOp::Contains,
            value: Value::String("berg".to_string()),
        })
        .unwrap();

        assert_eq!(
            wb.clause(),
            " WHERE `age` < ? AND CAST(`city` AS CHAR) LIKE ?"
        );
        assert_eq!(
            wb.into_params()[1],
            Value::String("%berg%".to_string())
        );
    }

    #[test]
    fn null_key_parts_use_is_null() {
        let mut key = RowValues::new();
        key.insert("id".to_string(), Value::Null);
        let mut wb = WhereBuilder::new();
        wb.push_key(&key).unwrap();
        assert_eq!(wb.clause(), " WHERE `id` IS NULL");
        assert!(wb.into_params().is_empty());
    }
}
