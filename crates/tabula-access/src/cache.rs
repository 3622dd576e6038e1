//! Bounded resource stores
//!
//! One independently sized store per resource kind. Client handles and
//! tunnels expire on idleness; schema metadata has a time-to-live.
//! Evicted handles are closed through an eviction listener, never just
//! dropped, and a consumer needing several related values (tunnel plus
//! the client dialed through it) stores them as one composite value in
//! one store.

use std::sync::Arc;

use futures::FutureExt;
use moka::future::Cache;
use tracing::{debug, warn};

use tabula_core::{ColumnInfo, DataAccessObject, ForeignKeyInfo, PrimaryColumn, TableInfo};

use crate::config::CacheConfig;
use crate::tunnel::TunnelEntry;

/// Tunnel and the client dialed through it; one lifetime.
pub(crate) struct TunneledClient {
    pub(crate) tunnel: Arc<TunnelEntry>,
    pub(crate) dao: Arc<dyn DataAccessObject>,
}

/// The set of bounded stores owned by one `AccessService`.
pub struct ResourceCache {
    pub(crate) daos: Cache<String, Arc<dyn DataAccessObject>>,
    pub(crate) tunnels: Cache<String, Arc<TunneledClient>>,
    pub(crate) tables: Cache<String, Arc<Vec<TableInfo>>>,
    pub(crate) structures: Cache<String, Arc<Vec<ColumnInfo>>>,
    pub(crate) primary_keys: Cache<String, Arc<Vec<PrimaryColumn>>>,
    pub(crate) foreign_keys: Cache<String, Arc<Vec<ForeignKeyInfo>>>,
}

impl ResourceCache {
    pub fn new(config: &CacheConfig) -> Self {
        let daos = Cache::builder()
            .max_capacity(config.daos_capacity)
            .time_to_idle(config.handle_idle())
            .async_eviction_listener(
                |key: Arc<String>, dao: Arc<dyn DataAccessObject>, cause| {
                    async move {
                        debug!(fingerprint = %key, ?cause, "closing evicted client handle");
                        if let Err(e) = dao.close().await {
                            warn!(error = %e, "error closing evicted client handle");
                        }
                    }
                    .boxed()
                },
            )
            .build();

        let tunnels = Cache::builder()
            .max_capacity(config.tunnels_capacity)
            .time_to_idle(config.handle_idle())
            .async_eviction_listener(
                |key: Arc<String>, entry: Arc<TunneledClient>, cause| {
                    async move {
                        debug!(fingerprint = %key, ?cause, "closing evicted tunnel entry");
                        if let Err(e) = entry.dao.close().await {
                            warn!(error = %e, "error closing tunneled client");
                        }
                        entry.tunnel.close();
                    }
                    .boxed()
                },
            )
            .build();

        Self {
            daos,
            tunnels,
            tables: schema_store(config),
            structures: schema_store(config),
            primary_keys: schema_store(config),
            foreign_keys: schema_store(config),
        }
    }

    /// Cache key for per-table schema metadata.
    pub fn schema_key(fingerprint: &str, table: &str) -> String {
        format!("{}:{}", fingerprint, table)
    }

    /// Drop every resource held for one fingerprint: the client handle,
    /// the tunnel and all schema metadata. Used when a connection is
    /// edited or deleted.
    pub async fn invalidate_connection(&self, fingerprint: &str) {
        self.daos.invalidate(fingerprint).await;
        self.tunnels.invalidate(fingerprint).await;

        let prefix = format!("{}:", fingerprint);
        for store_result in [
            invalidate_prefix(&self.tables, &prefix),
            invalidate_prefix(&self.structures, &prefix),
            invalidate_prefix(&self.primary_keys, &prefix),
            invalidate_prefix(&self.foreign_keys, &prefix),
        ] {
            if let Err(e) = store_result {
                warn!(error = %e, "failed to invalidate schema entries");
            }
        }
    }

    /// Close every live handle and tunnel, then clear all stores.
    pub async fn shutdown(&self) {
        debug!("shutting down resource cache");
        for (fingerprint, dao) in self.daos.iter() {
            if let Err(e) = dao.close().await {
                warn!(fingerprint = %fingerprint, error = %e, "error closing client handle");
            }
        }
        for (fingerprint, entry) in self.tunnels.iter() {
            if let Err(e) = entry.dao.close().await {
                warn!(fingerprint = %fingerprint, error = %e, "error closing tunneled client");
            }
            entry.tunnel.close();
        }
        self.daos.invalidate_all();
        self.tunnels.invalidate_all();
        self.tables.invalidate_all();
        self.structures.invalidate_all();
        self.primary_keys.invalidate_all();
        self.foreign_keys.invalidate_all();
        self.daos.run_pending_tasks().await;
        self.tunnels.run_pending_tasks().await;
    }
}

fn schema_store<T: Clone + Send + Sync + 'static>(config: &CacheConfig) -> Cache<String, T> {
    Cache::builder()
        .max_capacity(config.schema_capacity)
        .time_to_live(config.schema_ttl())
        .support_invalidation_closures()
        .build()
}

fn invalidate_prefix<T: Clone + Send + Sync + 'static>(
    cache: &Cache<String, T>,
    prefix: &str,
) -> std::result::Result<(), moka::PredicateError> {
    let prefix = prefix.to_string();
    cache
        .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tabula_core::{
        AccessError, EngineType, Result, Row, RowQuery, RowValues, TableRowsPage,
    };

    /// Contract stub that counts close calls.
    struct ClosableDao {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DataAccessObject for ClosableDao {
        fn engine(&self) -> EngineType {
            EngineType::Postgres
        }
        async fn test_connect(&self) -> Result<()> {
            Ok(())
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
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn small_config() -> CacheConfig {
        CacheConfig {
            daos_capacity: 2,
            tunnels_capacity: 2,
            schema_capacity: 4,
            handle_idle_secs: 3600,
            schema_ttl_secs: 3600,
        }
    }

    #[tokio::test]
    async fn capacity_bound_is_enforced() {
        let cache = ResourceCache::new(&small_config());
        let closes = Arc::new(AtomicUsize::new(0));
        for i in 0..10 {
            let dao: Arc<dyn DataAccessObject> = Arc::new(ClosableDao {
                closes: Arc::clone(&closes),
            });
            cache.daos.insert(format!("fp-{}", i), dao).await;
        }
        cache.daos.run_pending_tasks().await;
        assert!(cache.daos.entry_count() <= 2);
        // every evicted handle was closed, not just dropped
        assert!(closes.load(Ordering::SeqCst) >= 8);
    }

    #[tokio::test]
    async fn stores_are_independent() {
        let cache = ResourceCache::new(&small_config());
        let closes = Arc::new(AtomicUsize::new(0));
        let dao: Arc<dyn DataAccessObject> = Arc::new(ClosableDao {
            closes: Arc::clone(&closes),
        });
        cache.daos.insert("fp".to_string(), dao).await;
        cache
            .structures
            .insert(
                ResourceCache::schema_key("fp", "users"),
                Arc::new(Vec::new()),
            )
            .await;

        cache.daos.invalidate("fp").await;
        cache.daos.run_pending_tasks().await;
        cache.structures.run_pending_tasks().await;

        // deleting the handle leaves schema metadata until explicit
        // connection invalidation
        assert!(
            cache
                .structures
                .get(&ResourceCache::schema_key("fp", "users"))
                .await
                .is_some()
        );

        cache.invalidate_connection("fp").await;
        cache.structures.run_pending_tasks().await;
        assert!(
            cache
                .structures
                .get(&ResourceCache::schema_key("fp", "users"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn shutdown_closes_cached_handles() {
        let cache = ResourceCache::new(&small_config());
        let closes = Arc::new(AtomicUsize::new(0));
        let dao: Arc<dyn DataAccessObject> = Arc::new(ClosableDao {
            closes: Arc::clone(&closes),
        });
        cache.daos.insert("fp".to_string(), dao).await;

        cache.shutdown().await;
        assert!(closes.load(Ordering::SeqCst) >= 1);
        assert_eq!(cache.daos.entry_count(), 0);
    }
}
