//! `DataAccessObject` implementation for PostgreSQL

use std::io::Write;

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Row as PgRow, SimpleQueryMessage};

use tabula_core::csv::{parse_csv, row_to_csv_fields, write_csv_record};
use tabula_core::{
    AccessError, ColumnInfo, DataAccessObject, EngineType, ForeignKeyInfo, MAX_PER_PAGE, PageMeta,
    PrimaryColumn, Result, Row, RowQuery, RowValues, TableInfo, TableRowsPage, Value,
};

use crate::connection::PostgresDao;
use crate::sql::{WhereBuilder, qualified, quote_ident};
use crate::values::{PgValue, postgres_to_value};

/// Row-count threshold above which planner statistics stand in for an
/// exact COUNT(*)
const LARGE_DATASET_THRESHOLD: i64 = 100_000;

pub(crate) fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let code = db_error.code();
    let mut message = db_error.message().to_string();
    if let Some(detail) = db_error.detail()
        && !detail.trim().is_empty()
    {
        message.push_str(&format!(" (detail: {})", detail));
    }

    match code.code() {
        "23505" => format!("duplicate value violates unique constraint: {}", message),
        "23503" => format!("foreign key violation: {}", message),
        "23502" => format!("null value violates not-null constraint: {}", message),
        "22P02" => format!("invalid input syntax: {}", message),
        _ => format!("{} (code: {:?})", message, code),
    }
}

impl PostgresDao {
    async fn query_typed(&self, sql: &str, params: &[Value]) -> Result<Vec<PgRow>> {
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| AccessError::Query(format_postgres_error(&e)))?;

        let types = statement.params();
        let pg_params: Vec<PgValue> = params
            .iter()
            .enumerate()
            .map(|(i, v)| match types.get(i) {
                Some(ty) => PgValue::from_value_for_type(v, ty),
                None => PgValue::from_value(v),
            })
            .collect();
        let refs: Vec<&(dyn ToSql + Sync)> = pg_params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        self.client
            .query(&statement, &refs)
            .await
            .map_err(|e| AccessError::Query(format_postgres_error(&e)))
    }

    async fn execute_typed(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| AccessError::Query(format_postgres_error(&e)))?;

        let types = statement.params();
        let pg_params: Vec<PgValue> = params
            .iter()
            .enumerate()
            .map(|(i, v)| match types.get(i) {
                Some(ty) => PgValue::from_value_for_type(v, ty),
                None => PgValue::from_value(v),
            })
            .collect();
        let refs: Vec<&(dyn ToSql + Sync)> = pg_params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        self.client
            .execute(&statement, &refs)
            .await
            .map_err(|e| AccessError::Query(format_postgres_error(&e)))
    }

    fn table_ref(&self, table: &str) -> String {
        qualified(&self.schema, table)
    }

    fn decode_row(row: &PgRow) -> Result<Row> {
        let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(postgres_to_value(row, idx)?);
        }
        Ok(Row::new(columns, values))
    }

    async fn count_rows(&self, table: &str, wb: &WhereBuilder, params: &[Value]) -> Result<(u64, bool)> {
        if !wb.has_conditions() {
            let rows = self
                .query_typed(
                    "SELECT reltuples::bigint FROM pg_class WHERE oid = to_regclass($1)",
                    &[Value::String(self.table_ref(table))],
                )
                .await?;
            if let Some(row) = rows.first() {
                let estimate: i64 = row.try_get(0).unwrap_or(-1);
                if estimate > LARGE_DATASET_THRESHOLD {
                    return Ok((estimate as u64, true));
                }
            }
        }

        let sql = format!("SELECT COUNT(*) FROM {}{}", self.table_ref(table), wb.clause());
        let rows = self.query_typed(&sql, params).await?;
        let count: i64 = rows
            .first()
            .map(|r| r.try_get(0).unwrap_or(0))
            .unwrap_or(0);
        Ok((count.max(0) as u64, false))
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
            if columns.is_empty() {
                tracing::debug!(table_search = %term, "no searchable columns, ignoring search term");
            }
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
        // count and select share the same parameter list
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
        let pg_rows = self.query_typed(&sql, &params).await?;
        let rows = pg_rows
            .iter()
            .map(Self::decode_row)
            .collect::<Result<Vec<_>>>()?;

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
    matches!(data_type, "text" | "citext" | "name" | "uuid")
        || data_type.starts_with("character")
        || data_type.starts_with("char")
}

#[async_trait]
impl DataAccessObject for PostgresDao {
    fn engine(&self) -> EngineType {
        EngineType::Postgres
    }

    async fn test_connect(&self) -> Result<()> {
        self.query_typed("SELECT 1", &[]).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_tables_from_db(&self) -> Result<Vec<TableInfo>> {
        let rows = self
            .query_typed(
                "SELECT table_name, table_type FROM information_schema.tables \
                 WHERE table_schema = $1 ORDER BY table_name",
                &[Value::String(self.schema.clone())],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row
                    .try_get(0)
                    .map_err(|e| AccessError::Query(e.to_string()))?;
                let table_type: String = row
                    .try_get(1)
                    .map_err(|e| AccessError::Query(e.to_string()))?;
                Ok(TableInfo {
                    name,
                    is_view: table_type == "VIEW",
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn get_table_structure(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self
            .query_typed(
                "SELECT column_name, data_type, is_nullable, column_default, \
                        character_maximum_length, is_identity \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[
                    Value::String(self.schema.clone()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;

        if rows.is_empty() {
            return Err(AccessError::NotFound(format!(
                "table '{}' not found in schema '{}'",
                table, self.schema
            )));
        }

        rows.iter()
            .map(|row| {
                let name: String = row
                    .try_get(0)
                    .map_err(|e| AccessError::Query(e.to_string()))?;
                let data_type: String = row
                    .try_get(1)
                    .map_err(|e| AccessError::Query(e.to_string()))?;
                let is_nullable: String = row.try_get(2).unwrap_or_else(|_| "YES".to_string());
                let default_value: Option<String> = row.try_get(3).ok().flatten();
                let max_length: Option<i32> = row.try_get(4).ok().flatten();
                let is_identity: String = row.try_get(5).unwrap_or_else(|_| "NO".to_string());

                let auto_increment = is_identity == "YES"
                    || default_value
                        .as_deref()
                        .map(|d| d.starts_with("nextval("))
                        .unwrap_or(false);

                Ok(ColumnInfo {
                    name,
                    data_type,
                    nullable: is_nullable == "YES",
                    default_value,
                    auto_increment,
                    max_length: max_length.map(|v| v as i64),
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn get_table_primary_columns(&self, table: &str) -> Result<Vec<PrimaryColumn>> {
        let rows = self
            .query_typed(
                "SELECT kcu.column_name, c.data_type \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON kcu.constraint_name = tc.constraint_name \
                  AND kcu.table_schema = tc.table_schema \
                 JOIN information_schema.columns c \
                   ON c.table_schema = tc.table_schema \
                  AND c.table_name = tc.table_name \
                  AND c.column_name = kcu.column_name \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                   AND tc.table_schema = $1 AND tc.table_name = $2 \
                 ORDER BY kcu.ordinal_position",
                &[
                    Value::String(self.schema.clone()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(PrimaryColumn {
                    column_name: row
                        .try_get(0)
                        .map_err(|e| AccessError::Query(e.to_string()))?,
                    data_type: row
                        .try_get(1)
                        .map_err(|e| AccessError::Query(e.to_string()))?,
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn get_table_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let rows = self
            .query_typed(
                "SELECT tc.constraint_name, kcu.column_name, \
                        ccu.table_name, ccu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON kcu.constraint_name = tc.constraint_name \
                  AND kcu.table_schema = tc.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name \
                  AND ccu.table_schema = tc.table_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' \
                   AND tc.table_schema = $1 AND tc.table_name = $2 \
                 ORDER BY tc.constraint_name",
                &[
                    Value::String(self.schema.clone()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ForeignKeyInfo {
                    constraint_name: row
                        .try_get(0)
                        .map_err(|e| AccessError::Query(e.to_string()))?,
                    column_name: row
                        .try_get(1)
                        .map_err(|e| AccessError::Query(e.to_string()))?,
                    referenced_table: row
                        .try_get(2)
                        .map_err(|e| AccessError::Query(e.to_string()))?,
                    referenced_column: row
                        .try_get(3)
                        .map_err(|e| AccessError::Query(e.to_string()))?,
                })
            })
            .collect()
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
        rows.first().map(Self::decode_row).transpose()
    }

    #[tracing::instrument(skip(self, row))]
    async fn add_row_in_table(&self, table: &str, row: &RowValues) -> Result<Row> {
        let sql;
        let params: Vec<Value>;
        if row.is_empty() {
            sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", self.table_ref(table));
            params = Vec::new();
        } else {
            let mut columns: Vec<&String> = row.keys().collect();
            columns.sort();
            let idents: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|i| format!("${}", i)).collect();
            params = columns.iter().map(|c| row[*c].clone()).collect();
            sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                self.table_ref(table),
                idents.join(", "),
                placeholders.join(", ")
            );
        }

        let rows = self.query_typed(&sql, &params).await?;
        let inserted = rows
            .first()
            .ok_or_else(|| AccessError::Query("insert returned no row".to_string()))?;
        Self::decode_row(inserted)
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
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
            .collect();
        let mut params: Vec<Value> = columns.iter().map(|c| row[*c].clone()).collect();

        let mut wb = WhereBuilder::with_offset(params.len());
        wb.push_key(key)?;
        let clause = wb.clause();
        params.extend(wb.into_params());

        let sql = format!(
            "UPDATE {} SET {}{} RETURNING *",
            self.table_ref(table),
            assignments.join(", "),
            clause
        );
        let rows = self.query_typed(&sql, &params).await?;
        let updated = rows
            .first()
            .ok_or_else(|| AccessError::NotFound("row not found for update".to_string()))?;
        Self::decode_row(updated)
    }

    #[tracing::instrument(skip(self, key))]
    async fn delete_row_in_table(&self, table: &str, key: &RowValues) -> Result<u64> {
        let mut wb = WhereBuilder::new();
        wb.push_key(key)?;
        let sql = format!("DELETE FROM {}{}", self.table_ref(table), wb.clause());
        let params = wb.into_params();
        self.execute_typed(&sql, &params).await
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
                .enumerate()
                .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
                .collect();
            let mut params: Vec<Value> = columns.iter().map(|c| row[*c].clone()).collect();

            let mut wb = WhereBuilder::with_offset(params.len());
            wb.push_key(key)?;
            let clause = wb.clause();
            params.extend(wb.into_params());

            let sql = format!(
                "UPDATE {} SET {}{}",
                self.table_ref(table),
                assignments.join(", "),
                clause
            );
            affected += self.execute_typed(&sql, &params).await?;
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
        let messages = self
            .client
            .simple_query(query)
            .await
            .map_err(|e| AccessError::Query(format_postgres_error(&e)))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(simple_row) = message {
                let columns: Vec<String> = simple_row
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
                let values: Vec<Value> = (0..simple_row.len())
                    .map(|i| {
                        simple_row
                            .get(i)
                            .map(|s| Value::String(s.to_string()))
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                rows.push(Row::new(columns, values));
            }
        }
        Ok(rows)
    }

    async fn is_view(&self, table: &str) -> Result<bool> {
        let rows = self
            .query_typed(
                "SELECT table_type FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
                &[
                    Value::String(self.schema.clone()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;
        let row = rows.first().ok_or_else(|| {
            AccessError::NotFound(format!("table '{}' not found", table))
        })?;
        let table_type: String = row
            .try_get(0)
            .map_err(|e| AccessError::Query(e.to_string()))?;
        Ok(table_type == "VIEW")
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
            // stream every page
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
        self.shutdown();
        Ok(())
    }
}
