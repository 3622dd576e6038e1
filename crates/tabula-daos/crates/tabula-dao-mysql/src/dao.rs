//! `DataAccessObject` implementation for MySQL/MariaDB

use std::io::Write;

use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Params, Row as MysqlRow};

use tabula_core::csv::{parse_csv, row_to_csv_fields, write_csv_record};
use tabula_core::{
    AccessError, ColumnInfo, DataAccessObject, EngineType, ForeignKeyInfo, MAX_PER_PAGE, PageMeta,
    PrimaryColumn, Result, Row, RowQuery, RowValues, TableInfo, TableRowsPage, Value,
};

use crate::connection::MysqlDao;
use crate::sql::{WhereBuilder, quote_ident};
use crate::values::{mysql_to_value, value_to_mysql};

/// Row-count threshold above which information_schema statistics stand in
/// for an exact COUNT(*)
const LARGE_DATASET_THRESHOLD: u64 = 100_000;

fn to_params(values: &[Value]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(value_to_mysql).collect())
    }
}

fn decode_row(row: MysqlRow) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();
    let types: Vec<ColumnType> = row
        .columns_ref()
        .iter()
        .map(|c| c.column_type())
        .collect();
    let raw = row.unwrap();
    let values: Vec<Value> = raw
        .into_iter()
        .zip(types)
        .map(|(val, ty)| mysql_to_value(val, ty))
        .collect();
    Row::new(columns, values)
}

impl MysqlDao {
    async fn query_typed(&self, sql: &str, params: &[Value]) -> Result<Vec<MysqlRow>> {
        let mut conn = self.get_conn().await?;
        conn.exec(sql, to_params(params))
            .await
            .map_err(|e| AccessError::Query(format!("MySQL query failed: {}", e)))
    }

    /// Execute a statement; returns (affected rows, last insert id).
    async fn execute_typed(&self, sql: &str, params: &[Value]) -> Result<(u64, Option<u64>)> {
        let mut conn = self.get_conn().await?;
        conn.exec_drop(sql, to_params(params))
            .await
            .map_err(|e| AccessError::Query(format!("MySQL statement failed: {}", e)))?;
        Ok((conn.affected_rows(), conn.last_insert_id()))
    }

    fn table_ref(&self, table: &str) -> String {
        quote_ident(table)
    }

    async fn count_rows(&self, table: &str, wb: &WhereBuilder, params: &[Value]) -> Result<(u64, bool)> {
        if !wb.has_conditions() {
            let rows = self
                .query_typed(
                    "SELECT TABLE_ROWS FROM information_schema.TABLES \
                     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
                    &[
                        Value::String(self.database.clone()),
                        Value::String(table.to_string()),
                    ],
                )
                .await?;
            if let Some(row) = rows.into_iter().next() {
                let estimate: Option<u64> = row.get(0).flatten();
                if let Some(estimate) = estimate
                    && estimate > LARGE_DATASET_THRESHOLD
                {
                    return Ok((estimate, true));
                }
            }
        }

        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            self.table_ref(table),
            wb.clause()
        );
        let rows = self.query_typed(&sql, params).await?;
        let count: u64 = rows
            .into_iter()
            .next()
            .and_then(|r| r.get(0))
            .unwrap_or(0);
        Ok((count, false))
    }

    fn build_where(&self, query: &RowQuery, structure: &[ColumnInfo]) -> Result<WhereBuilder> {
        let mut wb = WhereBuilder::new();
        for filter in &query.filters {
            wb.push_filter(filter)?;
        }
        if let Some(term) = query.search.as_deref().filter(|t| !t.is_empty()) {
            let columns: Vec<String> = if query.searched_columns.is_empty() {
                structure
                    .iter()
                    .filter(|c| is_searchable_type(&c.data_type))
                    .map(|c| c.name.clone())
                    .collect()
            } else {
                query.searched_columns.clone()
            };
            wb.push_search(term, &columns);
        }
        Ok(wb)
    }

    async fn order_by_clause(&self, table: &str) -> String {
        match self.get_table_primary_columns(table).await {
            Ok(pks) if !pks.is_empty() => {
                let columns: Vec<String> =
                    pks.iter().map(|p| quote_ident(&p.column_name)).collect();
                format!(" ORDER BY {}", columns.join(", "))
            }
            _ => String::new(),
        }
    }

    async fn fetch_page(
        &self,
        table: &str,
        query: &RowQuery,
        page: u32,
        per_page: u32,
    ) -> Result<TableRowsPage> {
        let structure = self.get_table_structure(table).await?;
        let wb = self.build_where(query, &structure)?;
        let params = wb.params_cloned();
        let (total, estimated) = self.count_rows(table, &wb, &params).await?;

        let order_by = self.order_by_clause(table).await;
        let offset = (page as u64 - 1) * per_page as u64;
        let sql = format!(
            "SELECT * FROM {}{}{} LIMIT {} OFFSET {}",
            self.table_ref(table),
            wb.clause(),
            order_by,
            per_page,
            offset
        );
        let rows: Vec<Row> = self
            .query_typed(&sql, &params)
            .await?
            .into_iter()
            .map(decode_row)
            .collect();

        let total_pages = if total == 0 {
            0
        } else {
            ((total + per_page as u64 - 1) / per_page as u64) as u32
        };

        Ok(TableRowsPage {
            rows,
            pagination: PageMeta {
                total_rows: total,
                total_pages,
                current_page: page,
                per_page,
            },
            large_dataset: estimated,
        })
    }
}

fn is_searchable_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set"
    )
}

#[async_trait]
impl DataAccessObject for MysqlDao {
    fn engine(&self) -> EngineType {
        self.engine_type()
    }

    async fn test_connect(&self) -> Result<()> {
        self.query_typed("SELECT 1", &[]).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_tables_from_db(&self) -> Result<Vec<TableInfo>> {
        let rows = self
            .query_typed(
                "SELECT TABLE_NAME, TABLE_TYPE FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME",
                &[Value::String(self.database.clone())],
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name: Option<String> = row.get(0);
                let table_type: Option<String> = row.get(1);
                name.map(|name| TableInfo {
                    name,
                    is_view: table_type.as_deref() == Some("VIEW"),
                })
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_table_structure(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self
            .query_typed(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, \
                        CHARACTER_MAXIMUM_LENGTH, EXTRA \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                &[
                    Value::String(self.database.clone()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;

        if rows.is_empty() {
            return Err(AccessError::NotFound(format!(
                "table '{}' not found in database '{}'",
                table, self.database
            )));
        }

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name: Option<String> = row.get(0);
                let data_type: Option<String> = row.get(1);
                let is_nullable: Option<String> = row.get(2);
                let default_value: Option<String> = row.get(3).flatten();
                let max_length: Option<i64> = row.get(4).flatten();
                let extra: Option<String> = row.get(5);

                name.map(|name| ColumnInfo {
                    name,
                    data_type: data_type.unwrap_or_default(),
                    nullable: is_nullable.as_deref() == Some("YES"),
                    default_value,
                    auto_increment: extra
                        .map(|e| e.contains("auto_increment"))
                        .unwrap_or(false),
                    max_length,
                })
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_table_primary_columns(&self, table: &str) -> Result<Vec<PrimaryColumn>> {
        let rows = self
            .query_typed(
                "SELECT k.COLUMN_NAME, c.DATA_TYPE \
                 FROM information_schema.KEY_COLUMN_USAGE k \
                 JOIN information_schema.COLUMNS c \
                   ON c.TABLE_SCHEMA = k.TABLE_SCHEMA \
                  AND c.TABLE_NAME = k.TABLE_NAME \
                  AND c.COLUMN_NAME = k.COLUMN_NAME \
                 WHERE k.CONSTRAINT_NAME = 'PRIMARY' \
                   AND k.TABLE_SCHEMA = ? AND k.TABLE_NAME = ? \
                 ORDER BY k.ORDINAL_POSITION",
                &[
                    Value::String(self.database.clone()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let column_name: Option<String> = row.get(0);
                let data_type: Option<String> = row.get(1);
                column_name.map(|column_name| PrimaryColumn {
                    column_name,
                    data_type: data_type.unwrap_or_default(),
                })
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_table_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let rows = self
            .query_typed(
                "SELECT CONSTRAINT_NAME, COLUMN_NAME, \
                        REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
                 FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                   AND REFERENCED_TABLE_NAME IS NOT NULL \
                 ORDER BY CONSTRAINT_NAME",
                &[
                    Value::String(self.database.clone()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let constraint_name: Option<String> = row.get(0);
                let column_name: Option<String> = row.get(1);
                let referenced_table: Option<String> = row.get(2).flatten();
                let referenced_column: Option<String> = row.get(3).flatten();
                match (constraint_name, column_name, referenced_table, referenced_column) {
                    (Some(constraint_name), Some(column_name), Some(referenced_table), Some(referenced_column)) => {
                        Some(ForeignKeyInfo {
                            constraint_name,
                            column_name,
                            referenced_table,
                            referenced_column,
                        })
                    }
                    _ => None,
                }
            })
            .collect())
    }

    #[tracing::instrument(skip(self, query))]
    async fn get_rows_from_table(&self, table: &str, query: &RowQuery) -> Result<TableRowsPage> {
        let pagination = query.pagination_or_default();
        self.fetch_page(table, query, pagination.page, pagination.per_page)
            .await
    }

    async fn get_row_by_primary_key(&self, table: &str, key: &RowValues) -> Result<Option<Row>> {
        let mut wb = WhereBuilder::new();
        wb.push_key(key)?;
        let sql = format!(
            "SELECT * FROM {}{} LIMIT 1",
            self.table_ref(table),
            wb.clause()
        );
        let params = wb.into_params();
        let rows = self.query_typed(&sql, &params).await?;
        Ok(rows.into_iter().next().map(decode_row))
    }

    #[tracing::instrument(skip(self, row))]
    async fn add_row_in_table(&self, table: &str, row: &RowValues) -> Result<Row> {
        let sql;
        let params: Vec<Value>;
        if row.is_empty() {
            sql = format!("INSERT INTO {} () VALUES ()", self.table_ref(table));
            params = Vec::new();
        } else {
            let mut columns: Vec<&String> = row.keys().collect();
            columns.sort();
            let idents: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
            params = columns.iter().map(|c| row[*c].clone()).collect();
            sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table_ref(table),
                idents.join(", "),
                placeholders.join(", ")
            );
        }

        let (_, last_insert_id) = self.execute_typed(&sql, &params).await?;

        // read the stored row back through its primary key
        let pks = self.get_table_primary_columns(table).await?;
        let mut key = RowValues::new();
        for pk in &pks {
            if let Some(value) = row.get(&pk.column_name) {
                key.insert(pk.column_name.clone(), value.clone());
            } else if let Some(id) = last_insert_id {
                key.insert(pk.column_name.clone(), Value::Int64(id as i64));
            }
        }

        if !key.is_empty() && key.len() == pks.len() {
            if let Some(stored) = self.get_row_by_primary_key(table, &key).await? {
                return Ok(stored);
            }
        }

        // tables without usable keys: echo the inserted values
        let mut columns: Vec<&String> = row.keys().collect();
        columns.sort();
        Ok(Row::new(
            columns.iter().map(|c| (*c).clone()).collect(),
            columns.iter().map(|c| row[*c].clone()).collect(),
        ))
    }

    #[tracing::instrument(skip(self, key, row))]
    async fn update_row_in_table(
        &self,
        table: &str,
        key: &RowValues,
        row: &RowValues,
    ) -> Result<Row> {
        if row.is_empty() {
            return Err(AccessError::Query("no columns to update".to_string()));
        }

        let mut columns: Vec<&String> = row.keys().collect();
        columns.sort();
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect();
        let mut params: Vec<Value> = columns.iter().map(|c| row[*c].clone()).collect();

        let mut wb = WhereBuilder::new();
        wb.push_key(key)?;
        let clause = wb.clause();
        params.extend(wb.into_params());

        let sql = format!(
            "UPDATE {} SET {}{}",
            self.table_ref(table),
            assignments.join(", "),
            clause
        );
        self.execute_typed(&sql, &params).await?;

        // the key may itself have been updated
        let mut lookup = key.clone();
        for (column, value) in row {
            if lookup.contains_key(column) {
                lookup.insert(column.clone(), value.clone());
            }
        }
        self.get_row_by_primary_key(table, &lookup)
            .await?
            .ok_or_else(|| AccessError::NotFound("row not found after update".to_string()))
    }

    #[tracing::instrument(skip(self, key))]
    async fn delete_row_in_table(&self, table: &str, key: &RowValues) -> Result<u64> {
        let mut wb = WhereBuilder::new();
        wb.push_key(key)?;
        let sql = format!("DELETE FROM {}{}", self.table_ref(table), wb.clause());
        let params = wb.into_params();
        let (affected, _) = self.execute_typed(&sql, &params).await?;
        Ok(affected)
    }

    async fn bulk_update_rows(
        &self,
        table: &str,
        keys: &[RowValues],
        row: &RowValues,
    ) -> Result<u64> {
        if row.is_empty() {
            return Err(AccessError::Query("no columns to update".to_string()));
        }
        let mut affected = 0u64;
        for key in keys {
            let mut columns: Vec<&String> = row.keys().collect();
            columns.sort();
            let assignments: Vec<String> = columns
                .iter()
                .map(|c| format!("{} = ?", quote_ident(c)))
                .collect();
            let mut params: Vec<Value> = columns.iter().map(|c| row[*c].clone()).collect();

            let mut wb = WhereBuilder::new();
            wb.push_key(key)?;
            let clause = wb.clause();
            params.extend(wb.into_params());

            let sql = format!(
                "UPDATE {} SET {}{}",
                self.table_ref(table),
                assignments.join(", "),
                clause
            );
            let (count, _) = self.execute_typed(&sql, &params).await?;
            affected += count;
        }
        Ok(affected)
    }

    async fn bulk_delete_rows(&self, table: &str, keys: &[RowValues]) -> Result<u64> {
        let mut affected = 0u64;
        for key in keys {
            affected += self.delete_row_in_table(table, key).await?;
        }
        Ok(affected)
    }

    #[tracing::instrument(skip(self, query))]
    async fn execute_raw_query(&self, query: &str) -> Result<Vec<Row>> {
        let mut conn = self.get_conn().await?;
        let rows: Vec<MysqlRow> = conn
            .query(query)
            .await
            .map_err(|e| AccessError::Query(format!("MySQL query failed: {}", e)))?;
        Ok(rows.into_iter().map(decode_row).collect())
    }

    async fn is_view(&self, table: &str) -> Result<bool> {
        let rows = self
            .query_typed(
                "SELECT TABLE_TYPE FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
                &[
                    Value::String(self.database.clone()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AccessError::NotFound(format!("table '{}' not found", table)))?;
        let table_type: Option<String> = row.get(0);
        Ok(table_type.as_deref() == Some("VIEW"))
    }

    #[tracing::instrument(skip(self, data))]
    async fn import_csv(&self, table: &str, data: &[u8]) -> Result<u64> {
        let records = parse_csv(data)?;
        let Some((header, body)) = records.split_first() else {
            return Ok(0);
        };

        let mut inserted = 0u64;
        for record in body {
            let mut row = RowValues::new();
            for (column, field) in header.iter().zip(record.iter()) {
                let value = if field.is_empty() {
                    Value::Null
                } else {
                    Value::String(field.clone())
                };
                row.insert(column.clone(), value);
            }
            self.add_row_in_table(table, &row).await?;
            inserted += 1;
        }
        tracing::info!(rows = inserted, "CSV import completed");
        Ok(inserted)
    }

    #[tracing::instrument(skip(self, query, out))]
    async fn export_csv(
        &self,
        table: &str,
        query: &RowQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64> {
        let structure = self.get_table_structure(table).await?;
        let header: Vec<String> = structure.iter().map(|c| c.name.clone()).collect();
        write_csv_record(out, &header)?;

        let mut exported = 0u64;
        if query.pagination.is_some() {
            let page = self.get_rows_from_table(table, query).await?;
            for row in &page.rows {
                write_csv_record(out, &row_to_csv_fields(row))?;
                exported += 1;
            }
        } else {
            let mut page_no = 1u32;
            loop {
                let batch = self.fetch_page(table, query, page_no, MAX_PER_PAGE).await?;
                let len = batch.rows.len();
                for row in &batch.rows {
                    write_csv_record(out, &row_to_csv_fields(row))?;
                    exported += 1;
                }
                if (len as u32) < MAX_PER_PAGE {
                    break;
                }
                page_no += 1;
            }
        }
        Ok(exported)
    }

    async fn close(&self) -> Result<()> {
        self.pool.clone().disconnect().await.map_err(|e| {
            AccessError::Connection(format!("Failed to disconnect MySQL pool: {}", e))
        })
    }
}
