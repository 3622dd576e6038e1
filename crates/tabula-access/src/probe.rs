//! Connectivity probe with linear backoff

use std::sync::Arc;
use std::time::Duration;

use tabula_core::{AccessError, DataAccessObject, Result};

use crate::config::ProbeConfig;

/// Probe a live handle, retrying with linearly growing delay (attempt n
/// waits n * step) up to the configured attempt count. Used for initial
/// connectivity checks; decryption and fingerprinting failures are
/// deterministic and must not come through here.
pub async fn probe_with_backoff(
    dao: &Arc<dyn DataAccessObject>,
    config: &ProbeConfig,
) -> Result<()> {
    let mut last_error = None;
    for attempt in 0..config.attempts.max(1) {
        if attempt > 0 {
            let delay = Duration::from_millis(config.backoff_step_ms * attempt as u64);
            tracing::debug!(attempt, ?delay, "retrying connectivity probe");
            tokio::time::sleep(delay).await;
        }
        match dao.test_connect().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "connectivity probe failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| AccessError::Internal("probe ran no attempts".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tabula_core::{
        ColumnInfo, EngineType, ForeignKeyInfo, PrimaryColumn, Row, RowQuery, RowValues,
        TableInfo, TableRowsPage,
    };

    /// Fails the first `failures` probes, then succeeds.
    struct FlakyDao {
        failures: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl DataAccessObject for FlakyDao {
        fn engine(&self) -> EngineType {
            EngineType::Postgres
        }
        async fn test_connect(&self) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(AccessError::Connection("refused".to_string()))
            } else {
                Ok(())
            }
        }
        async fn get_tables_from_db(&self) -> Result<Vec<TableInfo>> {
            Ok(Vec::new())
        }
        async fn get_table_structure(&self, _: &str) -> Result<Vec<ColumnInfo>> {
            Ok(Vec::new())
        }
        async fn get_table_primary_columns(&self, _: &str) -> Result<Vec<PrimaryColumn>> {
            Ok(Vec::new())
        }
        async fn get_table_foreign_keys(&self, _: &str) -> Result<Vec<ForeignKeyInfo>> {
            Ok(Vec::new())
        }
        async fn get_rows_from_table(&self, _: &str, _: &RowQuery) -> Result<TableRowsPage> {
            Ok(TableRowsPage::empty(1, 20))
        }
        async fn get_row_by_primary_key(&self, _: &str, _: &RowValues) -> Result<Option<Row>> {
            Ok(None)
        }
        async fn add_row_in_table(&self, _: &str, _: &RowValues) -> Result<Row> {
            Err(AccessError::Internal("stub".into()))
        }
        async fn update_row_in_table(&self, _: &str, _: &RowValues, _: &RowValues) -> Result<Row> {
            Err(AccessError::Internal("stub".into()))
        }
        async fn delete_row_in_table(&self, _: &str, _: &RowValues) -> Result<u64> {
            Ok(0)
        }
        async fn bulk_update_rows(&self, _: &str, _: &[RowValues], _: &RowValues) -> Result<u64> {
            Ok(0)
        }
        async fn bulk_delete_rows(&self, _: &str, _: &[RowValues]) -> Result<u64> {
            Ok(0)
        }
        async fn execute_raw_query(&self, _: &str) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn is_view(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn import_csv(&self, _: &str, _: &[u8]) -> Result<u64> {
            Ok(0)
        }
        async fn export_csv(
            &self,
            _: &str,
            _: &RowQuery,
            _: &mut (dyn std::io::Write + Send),
        ) -> Result<u64> {
            Ok(0)
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_attempt_budget() {
        let dao: Arc<dyn DataAccessObject> = Arc::new(FlakyDao {
            failures: 2,
            attempts: AtomicU32::new(0),
        });
        let config = ProbeConfig {
            attempts: 3,
            backoff_step_ms: 100,
        };
        probe_with_backoff(&dao, &config).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_capped_attempts() {
        let flaky = Arc::new(FlakyDao {
            failures: 10,
            attempts: AtomicU32::new(0),
        });
        let dao: Arc<dyn DataAccessObject> = flaky.clone();
        let config = ProbeConfig {
            attempts: 3,
            backoff_step_ms: 10,
        };
        let err = probe_with_backoff(&dao, &config).await.unwrap_err();
        assert!(matches!(err, AccessError::Connection(_)));
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    }
}
