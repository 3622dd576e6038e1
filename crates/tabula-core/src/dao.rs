//! The data access contract every engine implements
//!
//! Business use-cases depend only on this trait; they never see driver
//! clients, tunnels or engine internals. Agent-proxied connections
//! implement the identical contract by forwarding calls over the agent
//! channel, so callers never branch on "direct vs. agent".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::{ForeignKeyInfo, PrimaryColumn, Result, Row, RowValues, TableInfo, TableRowsPage};
use crate::{ColumnInfo, Value};

/// Default page size for row browsing
pub const DEFAULT_PER_PAGE: u32 = 20;
/// Upper bound on page size regardless of what the caller asks for
pub const MAX_PER_PAGE: u32 = 500;

/// Page request, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Comparison applied to a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    StartsWith,
    EndsWith,
    Contains,
    Gt,
    Lt,
    Gte,
    Lte,
    /// NULL or empty string
    Empty,
}

/// One per-column filter condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Full row-browsing request: pagination plus optional search and filters.
///
/// `search` applies a case-insensitive contains match across
/// `searched_columns` (or every text column when empty); `filters` are
/// ANDed on top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowQuery {
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub searched_columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<ColumnFilter>,
}

impl RowQuery {
    pub fn page(page: u32, per_page: u32) -> Self {
        Self {
            pagination: Some(Pagination::new(page, per_page)),
            ..Default::default()
        }
    }

    pub fn pagination_or_default(&self) -> Pagination {
        self.pagination.unwrap_or_default()
    }
}

/// The one contract all engine implementations honor.
///
/// Implementations hold their driver client internally; a value of this
/// type *is* a live, authenticated handle and is what the resource cache
/// stores. Engines that cannot sensibly support an operation return
/// [`AccessError::UnsupportedOperation`](crate::AccessError) rather than
/// an empty result.
#[async_trait]
pub trait DataAccessObject: Send + Sync {
    /// Engine this object talks to
    fn engine(&self) -> crate::EngineType;

    /// Cheap connectivity check against the live handle
    async fn test_connect(&self) -> Result<()>;

    /// List tables (and views) in the connected database/schema
    async fn get_tables_from_db(&self) -> Result<Vec<TableInfo>>;

    /// Column-level structure of one table
    async fn get_table_structure(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Primary key columns of one table
    async fn get_table_primary_columns(&self, table: &str) -> Result<Vec<PrimaryColumn>>;

    /// Foreign keys of one table
    async fn get_table_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>>;

    /// One page of rows with search and filters applied
    async fn get_rows_from_table(&self, table: &str, query: &RowQuery) -> Result<TableRowsPage>;

    /// Fetch a single row by primary key values
    async fn get_row_by_primary_key(&self, table: &str, key: &RowValues) -> Result<Option<Row>>;

    /// Insert one row; returns the stored row (with generated keys)
    async fn add_row_in_table(&self, table: &str, row: &RowValues) -> Result<Row>;

    /// Update the row identified by `key`; returns the stored row
    async fn update_row_in_table(&self, table: &str, key: &RowValues, row: &RowValues)
    -> Result<Row>;

    /// Delete the row identified by `key`; returns affected count
    async fn delete_row_in_table(&self, table: &str, key: &RowValues) -> Result<u64>;

    /// Apply the same column updates to many rows
    async fn bulk_update_rows(
        &self,
        table: &str,
        keys: &[RowValues],
        row: &RowValues,
    ) -> Result<u64>;

    /// Delete many rows by primary key
    async fn bulk_delete_rows(&self, table: &str, keys: &[RowValues]) -> Result<u64>;

    /// Execute a caller-supplied query verbatim
    async fn execute_raw_query(&self, query: &str) -> Result<Vec<Row>>;

    /// Whether the named relation is a view
    async fn is_view(&self, table: &str) -> Result<bool>;

    /// Bulk-insert rows parsed from CSV; returns inserted count
    async fn import_csv(&self, table: &str, data: &[u8]) -> Result<u64>;

    /// Stream the query result as CSV into `out`; returns row count
    async fn export_csv(
        &self,
        table: &str,
        query: &RowQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64>;

    /// Release the underlying driver client. Idempotent.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps() {
        let p = Pagination::new(0, 10_000);
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, MAX_PER_PAGE);
        assert_eq!(p.offset(), 0);

        let p = Pagination::new(3, 25);
        assert_eq!(p.offset(), 50);
    }

    #[test]
    fn row_query_defaults() {
        let q = RowQuery::default();
        let p = q.pagination_or_default();
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, DEFAULT_PER_PAGE);
    }
}
