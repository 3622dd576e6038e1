//! `DataAccessObject` implementation for MongoDB

use std::io::Write;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::results::CollectionType;

use tabula_core::csv::{parse_csv, write_csv_record};
use tabula_core::{
    AccessError, ColumnInfo, DataAccessObject, EngineType, FilterOp, ForeignKeyInfo, MAX_PER_PAGE,
    PageMeta, PrimaryColumn, Result, Row, RowQuery, RowValues, TableInfo, TableRowsPage, Value,
};

use crate::connection::MongoDao;
use crate::values::{bson_to_value, bson_type_name, document_to_row, key_to_filter, value_to_bson};

/// Document-count threshold above which collection statistics stand in
/// for an exact count
const LARGE_DATASET_THRESHOLD: u64 = 100_000;

/// Escape regex metacharacters so search terms match literally.
fn regex_escape(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if ".^$*+?()[]{}|\\".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

impl MongoDao {
    async fn collection_specs(&self) -> Result<Vec<(String, CollectionType)>> {
        let cursor = self
            .db
            .list_collections()
            .await
            .map_err(|e| AccessError::Query(format!("Failed to list collections: {}", e)))?;
        let specs: Vec<_> = cursor
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| AccessError::Query(format!("Failed to read collections: {}", e)))?;
        Ok(specs
            .into_iter()
            .map(|spec| (spec.name, spec.collection_type))
            .collect())
    }

    async fn sample_document(&self, table: &str) -> Result<Option<Document>> {
        self.db
            .collection::<Document>(table)
            .find_one(doc! {})
            .await
            .map_err(|e| AccessError::Query(format!("Failed to sample collection: {}", e)))
    }

    fn build_filter(&self, query: &RowQuery, structure: &[ColumnInfo]) -> Document {
        let mut clauses: Vec<Document> = Vec::new();

        for filter in &query.filters {
            let column = filter.column.as_str();
            let clause = match filter.op {
                FilterOp::Eq => doc! { column: value_to_bson(column, &filter.value) },
                FilterOp::Gt => doc! { column: { "$gt": value_to_bson(column, &filter.value) } },
                FilterOp::Lt => doc! { column: { "$lt": value_to_bson(column, &filter.value) } },
                FilterOp::Gte => doc! { column: { "$gte": value_to_bson(column, &filter.value) } },
                FilterOp::Lte => doc! { column: { "$lte": value_to_bson(column, &filter.value) } },
                FilterOp::StartsWith => doc! { column: {
                    "$regex": format!("^{}", regex_escape(&filter.value.to_string())),
                    "$options": "i",
                } },
                FilterOp::EndsWith => doc! { column: {
                    "$regex": format!("{}$", regex_escape(&filter.value.to_string())),
                    "$options": "i",
                } },
                FilterOp::Contains => doc! { column: {
                    "$regex": regex_escape(&filter.value.to_string()),
                    "$options": "i",
                } },
                FilterOp::Empty => doc! { column: { "$in": [Bson::Null, Bson::String(String::new())] } },
            };
            clauses.push(clause);
        }

        if let Some(term) = query.search.as_deref().filter(|t| !t.is_empty()) {
            let columns: Vec<String> = if query.searched_columns.is_empty() {
                structure
                    .iter()
                    .filter(|c| c.data_type == "string")
                    .map(|c| c.name.clone())
                    .collect()
            } else {
                query.searched_columns.clone()
            };
            if !columns.is_empty() {
                let alternatives: Vec<Document> = columns
                    .iter()
                    .map(|c| {
                        doc! { c: { "$regex": regex_escape(term), "$options": "i" } }
                    })
                    .collect();
                clauses.push(doc! { "$or": alternatives });
            }
        }

        match clauses.len() {
            0 => doc! {},
            1 => clauses.into_iter().next().expect("one clause"),
            _ => doc! { "$and": clauses },
        }
    }

    async fn count_documents(&self, table: &str, filter: &Document) -> Result<(u64, bool)> {
        let coll = self.db.collection::<Document>(table);
        if filter.is_empty() {
            let estimate = coll
                .estimated_document_count()
                .await
                .map_err(|e| AccessError::Query(format!("Failed to count documents: {}", e)))?;
            if estimate > LARGE_DATASET_THRESHOLD {
                return Ok((estimate, true));
            }
        }
        let exact = coll
            .count_documents(filter.clone())
            .await
            .map_err(|e| AccessError::Query(format!("Failed to count documents: {}", e)))?;
        Ok((exact, false))
    }

    async fn fetch_page(
        &self,
        table: &str,
        query: &RowQuery,
        page: u32,
        per_page: u32,
    ) -> Result<TableRowsPage> {
        let structure = self.get_table_structure(table).await?;
        let filter = self.build_filter(query, &structure);
        let (total, estimated) = self.count_documents(table, &filter).await?;

        let skip = (page as u64 - 1) * per_page as u64;
        let cursor = self
            .db
            .collection::<Document>(table)
            .find(filter)
            .sort(doc! { "_id": 1 })
            .skip(skip)
            .limit(per_page as i64)
            .await
            .map_err(|e| AccessError::Query(format!("Failed to query collection: {}", e)))?;
        let documents: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| AccessError::Query(format!("Failed to read documents: {}", e)))?;

        let rows: Vec<Row> = documents.iter().map(document_to_row).collect();
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

#[async_trait]
impl DataAccessObject for MongoDao {
    fn engine(&self) -> EngineType {
        EngineType::Mongodb
    }

    async fn test_connect(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AccessError::Connection(format!("MongoDB ping failed: {}", e)))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_tables_from_db(&self) -> Result<Vec<TableInfo>> {
        let mut tables: Vec<TableInfo> = self
            .collection_specs()
            .await?
            .into_iter()
            .map(|(name, collection_type)| TableInfo {
                name,
                is_view: matches!(collection_type, CollectionType::View),
            })
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    #[tracing::instrument(skip(self))]
    async fn get_table_structure(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        match self.sample_document(table).await? {
            Some(sample) => Ok(sample
                .iter()
                .map(|(field, value)| ColumnInfo {
                    name: field.clone(),
                    data_type: bson_type_name(value).to_string(),
                    nullable: field != "_id",
                    default_value: None,
                    auto_increment: false,
                    max_length: None,
                })
                .collect()),
            // empty collection: only the mandatory identifier is known
            None => Ok(vec![ColumnInfo {
                name: "_id".to_string(),
                data_type: "objectId".to_string(),
                nullable: false,
                default_value: None,
                auto_increment: false,
                max_length: None,
            }]),
        }
    }

    async fn get_table_primary_columns(&self, _table: &str) -> Result<Vec<PrimaryColumn>> {
        Ok(vec![PrimaryColumn {
            column_name: "_id".to_string(),
            data_type: "objectId".to_string(),
        }])
    }

    async fn get_table_foreign_keys(&self, _table: &str) -> Result<Vec<ForeignKeyInfo>> {
        Err(AccessError::unsupported(
            EngineType::Mongodb,
            "getTableForeignKeys",
        ))
    }

    #[tracing::instrument(skip(self, query))]
    async fn get_rows_from_table(&self, table: &str, query: &RowQuery) -> Result<TableRowsPage> {
        let pagination = query.pagination_or_default();
        self.fetch_page(table, query, pagination.page, pagination.per_page)
            .await
    }

    async fn get_row_by_primary_key(&self, table: &str, key: &RowValues) -> Result<Option<Row>> {
        let filter = key_to_filter(key);
        if filter.is_empty() {
            return Err(AccessError::Query(
                "primary key values must not be empty".to_string(),
            ));
        }
        let document = self
            .db
            .collection::<Document>(table)
            .find_one(filter)
            .await
            .map_err(|e| AccessError::Query(format!("Failed to fetch document: {}", e)))?;
        Ok(document.as_ref().map(document_to_row))
    }

    #[tracing::instrument(skip(self, row))]
    async fn add_row_in_table(&self, table: &str, row: &RowValues) -> Result<Row> {
        let mut document = Document::new();
        let mut columns: Vec<&String> = row.keys().collect();
        columns.sort();
        for column in columns {
            document.insert(column.clone(), value_to_bson(column, &row[column]));
        }

        let result = self
            .db
            .collection::<Document>(table)
            .insert_one(document)
            .await
            .map_err(|e| AccessError::Query(format!("Failed to insert document: {}", e)))?;

        let stored = self
            .db
            .collection::<Document>(table)
            .find_one(doc! { "_id": result.inserted_id })
            .await
            .map_err(|e| AccessError::Query(format!("Failed to read inserted document: {}", e)))?
            .ok_or_else(|| AccessError::Query("insert returned no document".to_string()))?;
        Ok(document_to_row(&stored))
    }

    #[tracing::instrument(skip(self, key, row))]
    async fn update_row_in_table(
        &self,
        table: &str,
        key: &RowValues,
        row: &RowValues,
    ) -> Result<Row> {
        if row.is_empty() {
            return Err(AccessError::Query("no fields to update".to_string()));
        }
        let filter = key_to_filter(key);
        let mut set = Document::new();
        for (column, value) in row {
            set.insert(column.clone(), value_to_bson(column, value));
        }

        let result = self
            .db
            .collection::<Document>(table)
            .update_one(filter.clone(), doc! { "$set": set })
            .await
            .map_err(|e| AccessError::Query(format!("Failed to update document: {}", e)))?;
        if result.matched_count == 0 {
            return Err(AccessError::NotFound(
                "document not found for update".to_string(),
            ));
        }

        // the key may itself have been updated
        let mut lookup = key.clone();
        for (column, value) in row {
            if lookup.contains_key(column) {
                lookup.insert(column.clone(), value.clone());
            }
        }
        self.get_row_by_primary_key(table, &lookup)
            .await?
            .ok_or_else(|| AccessError::NotFound("document not found after update".to_string()))
    }

    #[tracing::instrument(skip(self, key))]
    async fn delete_row_in_table(&self, table: &str, key: &RowValues) -> Result<u64> {
        let filter = key_to_filter(key);
        let result = self
            .db
            .collection::<Document>(table)
            .delete_one(filter)
            .await
            .map_err(|e| AccessError::Query(format!("Failed to delete document: {}", e)))?;
        Ok(result.deleted_count)
    }

    async fn bulk_update_rows(
        &self,
        table: &str,
        keys: &[RowValues],
        row: &RowValues,
    ) -> Result<u64> {
        let mut affected = 0u64;
        for key in keys {
            match self.update_row_in_table(table, key, row).await {
                Ok(_) => affected += 1,
                Err(AccessError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
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

    /// Raw queries are database commands in extended-JSON form, e.g.
    /// `{"collStats": "users"}`.
    #[tracing::instrument(skip(self, query))]
    async fn execute_raw_query(&self, query: &str) -> Result<Vec<Row>> {
        let command: Document = serde_json::from_str(query).map_err(|e| {
            AccessError::Query(format!("raw query must be a JSON command document: {}", e))
        })?;
        let response = self
            .db
            .run_command(command)
            .await
            .map_err(|e| AccessError::Query(format!("MongoDB command failed: {}", e)))?;

        // cursor-shaped responses become one row per document
        if let Ok(cursor) = response.get_document("cursor")
            && let Ok(batch) = cursor.get_array("firstBatch")
        {
            return Ok(batch
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(doc) => Some(document_to_row(doc)),
                    _ => None,
                })
                .collect());
        }
        Ok(vec![document_to_row(&response)])
    }

    async fn is_view(&self, table: &str) -> Result<bool> {
        let specs = self.collection_specs().await?;
        specs
            .into_iter()
            .find(|(name, _)| name == table)
            .map(|(_, collection_type)| matches!(collection_type, CollectionType::View))
            .ok_or_else(|| AccessError::NotFound(format!("collection '{}' not found", table)))
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

        // documents are heterogeneous: project every row onto the header
        let project = |row: &Row| -> Vec<String> {
            header
                .iter()
                .map(|column| match row.get_by_name(column) {
                    Some(Value::Null) | None => String::new(),
                    Some(value) => value.to_string(),
                })
                .collect()
        };

        let mut exported = 0u64;
        if query.pagination.is_some() {
            let page = self.get_rows_from_table(table, query).await?;
            for row in &page.rows {
                write_csv_record(out, &project(row))?;
                exported += 1;
            }
        } else {
            let mut page_no = 1u32;
            loop {
                let batch = self.fetch_page(table, query, page_no, MAX_PER_PAGE).await?;
                let len = batch.rows.len();
                for row in &batch.rows {
                    write_csv_record(out, &project(row))?;
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
        self.client.clone().shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_metacharacters_match_literally() {
        assert_eq!(regex_escape("a.b*c"), "a\\.b\\*c");
        assert_eq!(regex_escape("plain"), "plain");
        assert_eq!(regex_escape("50%"), "50%");
    }
}
