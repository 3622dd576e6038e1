//! The proxy implementation of the data access contract

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value as Json, json};

use tabula_core::csv::{parse_csv, write_csv_record};
use tabula_core::{
    AccessError, ColumnInfo, ConnectionParams, DaoFactory, DataAccessObject, EngineType,
    ForeignKeyInfo, MAX_PER_PAGE, PageMeta, PrimaryColumn, Result, Row, RowQuery, RowValues,
    TableInfo, TableRowsPage, Value,
};

use crate::channel::{AgentChannel, AgentCommand, AgentConnector};
use crate::json::{json_object_to_row, row_values_to_json, value_to_json};

/// Data access object that forwards every contract call to a remote
/// agent over a channel.
pub struct AgentDao {
    channel: Arc<dyn AgentChannel>,
    engine: EngineType,
}

impl AgentDao {
    pub fn new(channel: Arc<dyn AgentChannel>, engine: EngineType) -> Self {
        Self { channel, engine }
    }

    async fn call(&self, command: AgentCommand) -> Result<Json> {
        tracing::debug!(operation = %command.operation, "forwarding contract call to agent");
        self.channel.call(command).await
    }

    fn rows_from_json(json: &Json) -> Result<Vec<Row>> {
        json.as_array()
            .ok_or_else(|| AccessError::Query("agent response is not a row array".to_string()))?
            .iter()
            .map(|item| {
                json_object_to_row(item).ok_or_else(|| {
                    AccessError::Query("agent row is not a JSON object".to_string())
                })
            })
            .collect()
    }

    fn affected_from_json(json: &Json) -> Result<u64> {
        json.as_u64()
            .or_else(|| json.get("affected").and_then(Json::as_u64))
            .ok_or_else(|| {
                AccessError::Query("agent response carries no affected count".to_string())
            })
    }
}

#[async_trait]
impl DataAccessObject for AgentDao {
    fn engine(&self) -> EngineType {
        self.engine
    }

    async fn test_connect(&self) -> Result<()> {
        self.call(AgentCommand::new("testConnect")).await?;
        Ok(())
    }

    async fn get_tables_from_db(&self) -> Result<Vec<TableInfo>> {
        let response = self.call(AgentCommand::new("getTablesFromDB")).await?;
        serde_json::from_value(response).map_err(AccessError::from)
    }

    async fn get_table_structure(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let response = self
            .call(AgentCommand::new("getTableStructure").table(table))
            .await?;
        serde_json::from_value(response).map_err(AccessError::from)
    }

    async fn get_table_primary_columns(&self, table: &str) -> Result<Vec<PrimaryColumn>> {
        let response = self
            .call(AgentCommand::new("getTablePrimaryColumns").table(table))
            .await?;
        serde_json::from_value(response).map_err(AccessError::from)
    }

    async fn get_table_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let response = self
            .call(AgentCommand::new("getTableForeignKeys").table(table))
            .await?;
        serde_json::from_value(response).map_err(AccessError::from)
    }

    async fn get_rows_from_table(&self, table: &str, query: &RowQuery) -> Result<TableRowsPage> {
        let response = self
            .call(
                AgentCommand::new("getRowsFromTable")
                    .table(table)
                    .payload(serde_json::to_value(query)?),
            )
            .await?;

        let rows = Self::rows_from_json(
            response
                .get("rows")
                .ok_or_else(|| AccessError::Query("agent response has no rows".to_string()))?,
        )?;
        let pagination: PageMeta = serde_json::from_value(
            response
                .get("pagination")
                .cloned()
                .ok_or_else(|| AccessError::Query("agent response has no pagination".to_string()))?,
        )?;
        let large_dataset = response
            .get("large_dataset")
            .and_then(Json::as_bool)
            .unwrap_or(false);

        Ok(TableRowsPage {
            rows,
            pagination,
            large_dataset,
        })
    }

    async fn get_row_by_primary_key(&self, table: &str, key: &RowValues) -> Result<Option<Row>> {
        let response = self
            .call(
                AgentCommand::new("getRowByPrimaryKey")
                    .table(table)
                    .payload(json!({ "key": row_values_to_json(key) })),
            )
            .await?;
        if response.is_null() {
            return Ok(None);
        }
        Ok(json_object_to_row(&response))
    }

    async fn add_row_in_table(&self, table: &str, row: &RowValues) -> Result<Row> {
        let response = self
            .call(
                AgentCommand::new("addRowInTable")
                    .table(table)
                    .payload(json!({ "row": row_values_to_json(row) })),
            )
            .await?;
        json_object_to_row(&response)
            .ok_or_else(|| AccessError::Query("agent returned no inserted row".to_string()))
    }

    async fn update_row_in_table(
        &self,
        table: &str,
        key: &RowValues,
        row: &RowValues,
    ) -> Result<Row> {
        let response = self
            .call(
                AgentCommand::new("updateRowInTable").table(table).payload(json!({
                    "key": row_values_to_json(key),
                    "row": row_values_to_json(row),
                })),
            )
            .await?;
        json_object_to_row(&response)
            .ok_or_else(|| AccessError::Query("agent returned no updated row".to_string()))
    }

    async fn delete_row_in_table(&self, table: &str, key: &RowValues) -> Result<u64> {
        let response = self
            .call(
                AgentCommand::new("deleteRowInTable")
                    .table(table)
                    .payload(json!({ "key": row_values_to_json(key) })),
            )
            .await?;
        Self::affected_from_json(&response)
    }

    async fn bulk_update_rows(
        &self,
        table: &str,
        keys: &[RowValues],
        row: &RowValues,
    ) -> Result<u64> {
        let keys_json: Vec<Json> = keys.iter().map(row_values_to_json).collect();
        let response = self
            .call(
                AgentCommand::new("bulkUpdateRows").table(table).payload(json!({
                    "keys": keys_json,
                    "row": row_values_to_json(row),
                })),
            )
            .await?;
        Self::affected_from_json(&response)
    }

    async fn bulk_delete_rows(&self, table: &str, keys: &[RowValues]) -> Result<u64> {
        let keys_json: Vec<Json> = keys.iter().map(row_values_to_json).collect();
        let response = self
            .call(
                AgentCommand::new("bulkDeleteRows")
                    .table(table)
                    .payload(json!({ "keys": keys_json })),
            )
            .await?;
        Self::affected_from_json(&response)
    }

    async fn execute_raw_query(&self, query: &str) -> Result<Vec<Row>> {
        let response = self
            .call(AgentCommand::new("executeRawQuery").payload(json!({ "query": query })))
            .await?;
        Self::rows_from_json(&response)
    }

    async fn is_view(&self, table: &str) -> Result<bool> {
        let response = self.call(AgentCommand::new("isView").table(table)).await?;
        response
            .as_bool()
            .or_else(|| response.get("is_view").and_then(Json::as_bool))
            .ok_or_else(|| AccessError::Query("agent response carries no view flag".to_string()))
    }

    async fn import_csv(&self, table: &str, data: &[u8]) -> Result<u64> {
        // parse locally; the agent receives structured rows, not raw CSV
        let records = parse_csv(data)?;
        let Some((header, body)) = records.split_first() else {
            return Ok(0);
        };

        let rows: Vec<Json> = body
            .iter()
            .map(|record| {
                let mut object = serde_json::Map::new();
                for (column, field) in header.iter().zip(record.iter()) {
                    let value = if field.is_empty() {
                        Value::Null
                    } else {
                        Value::String(field.clone())
                    };
                    object.insert(column.clone(), value_to_json(&value));
                }
                Json::Object(object)
            })
            .collect();

        let response = self
            .call(
                AgentCommand::new("importCSV")
                    .table(table)
                    .payload(json!({ "rows": rows })),
            )
            .await?;
        Self::affected_from_json(&response)
    }

    async fn export_csv(
        &self,
        table: &str,
        query: &RowQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64> {
        let structure = self.get_table_structure(table).await?;
        let header: Vec<String> = structure.iter().map(|c| c.name.clone()).collect();
        write_csv_record(out, &header)?;

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
            let mut paged = query.clone();
            let mut page_no = 1u32;
            loop {
                paged.pagination = Some(tabula_core::Pagination::new(page_no, MAX_PER_PAGE));
                let batch = self.get_rows_from_table(table, &paged).await?;
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
        self.channel.close().await
    }
}

/// Factory for agent-proxied connections; registered with the registry's
/// agent slot rather than per engine family.
pub struct AgentDaoFactory {
    connector: Arc<dyn AgentConnector>,
}

impl AgentDaoFactory {
    pub fn new(connector: Arc<dyn AgentConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl DaoFactory for AgentDaoFactory {
    fn families(&self) -> &'static [EngineType] {
        &[]
    }

    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn DataAccessObject>> {
        if params.agent.is_none() {
            return Err(AccessError::Configuration(
                "connection has no agent parameters".to_string(),
            ));
        }
        let channel = self.connector.open(params).await?;
        Ok(Arc::new(AgentDao::new(channel, params.engine)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Channel that records commands and replays canned responses.
    struct ScriptedChannel {
        calls: Mutex<Vec<AgentCommand>>,
        responses: Mutex<Vec<Json>>,
    }

    impl ScriptedChannel {
        fn new(responses: Vec<Json>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl AgentChannel for ScriptedChannel {
        async fn call(&self, command: AgentCommand) -> Result<Json> {
            self.calls.lock().push(command);
            Ok(self.responses.lock().remove(0))
        }
    }

    #[tokio::test]
    async fn forwards_operations_and_decodes_rows() {
        let channel = Arc::new(ScriptedChannel::new(vec![json!({
            "rows": [{"id": 1, "name": "a"}],
            "pagination": {"total_rows": 1, "total_pages": 1, "current_page": 1, "per_page": 20},
            "large_dataset": false,
        })]));
        let dao = AgentDao::new(channel.clone(), EngineType::Mysql);

        let page = dao
            .get_rows_from_table("users", &RowQuery::default())
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.pagination.total_rows, 1);

        let calls = channel.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, "getRowsFromTable");
        assert_eq!(calls[0].table.as_deref(), Some("users"));
    }

    #[tokio::test]
    async fn affected_counts_accept_both_shapes() {
        let channel = Arc::new(ScriptedChannel::new(vec![json!(3), json!({"affected": 2})]));
        let dao = AgentDao::new(channel, EngineType::Postgres);

        let mut key = RowValues::new();
        key.insert("id".to_string(), Value::Int64(1));
        assert_eq!(dao.delete_row_in_table("t", &key).await.unwrap(), 3);
        assert_eq!(
            dao.bulk_delete_rows("t", std::slice::from_ref(&key))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn unsupported_engine_error_passes_through() {
        struct FailingChannel;
        #[async_trait]
        impl AgentChannel for FailingChannel {
            async fn call(&self, command: AgentCommand) -> Result<Json> {
                Err(AccessError::unsupported(
                    EngineType::Redis,
                    match command.operation.as_str() {
                        "getTableForeignKeys" => "getTableForeignKeys",
                        _ => "unknown",
                    },
                ))
            }
        }

        let dao = AgentDao::new(Arc::new(FailingChannel), EngineType::Redis);
        let err = dao.get_table_foreign_keys("t").await.unwrap_err();
        assert!(matches!(err, AccessError::UnsupportedOperation { .. }));
    }
}
