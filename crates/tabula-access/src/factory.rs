//! Get-or-create of live client handles
//!
//! One entry point: fingerprint, cache lookup, single-flighted
//! construction. Tunneled connections go through the tunnel manager
//! first; the tunnel and the client dialed through it are cached as one
//! composite entry under the fingerprint computed *before* the endpoint
//! rewrite. Construction failures cache nothing, and a broken tunnel
//! evicts itself so the next caller starts clean.

use std::sync::Arc;

use tabula_core::{AccessError, ConnectionParams, DataAccessObject, Result, fingerprint};
use tabula_daos::DaoRegistry;

use crate::cache::{ResourceCache, TunneledClient};
use crate::config::TunnelConfig;
use crate::singleflight::Singleflight;
use crate::tunnel::{ErrorHook, TunnelManager};

pub struct ClientFactory {
    registry: Arc<DaoRegistry>,
    cache: Arc<ResourceCache>,
    tunnels: Arc<TunnelManager>,
    singleflight: Singleflight,
}

impl ClientFactory {
    pub fn new(
        registry: Arc<DaoRegistry>,
        cache: Arc<ResourceCache>,
        tunnel_config: TunnelConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            tunnels: Arc::new(TunnelManager::new(tunnel_config)),
            singleflight: Singleflight::default(),
        }
    }

    /// Resolve the live handle for a connection, building it at most
    /// once per fingerprint no matter how many callers race here.
    #[tracing::instrument(skip(self, params), fields(engine = %params.engine))]
    pub async fn get_or_create(
        &self,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn DataAccessObject>> {
        let fp = fingerprint(params);
        loop {
            if let Some(dao) = self.lookup(&fp, params).await {
                tracing::debug!(fingerprint = %fp, "client handle cache hit");
                return Ok(dao);
            }
            let guard = self.singleflight.begin(&fp);
            if guard.is_leader() {
                tracing::debug!(fingerprint = %fp, "building client handle");
                return self.build(params, &fp).await;
            }
            // a leader is already constructing this handle; wait for it
            // to finish, then re-read the cache
            guard.wait().await;
        }
    }

    async fn lookup(&self, fp: &str, params: &ConnectionParams) -> Option<Arc<dyn DataAccessObject>> {
        if params.is_tunneled() && !params.is_agent() {
            let entry = self.cache.tunnels.get(fp).await?;
            if entry.tunnel.is_active() {
                Some(Arc::clone(&entry.dao))
            } else {
                // a broken tunnel is never reused
                self.cache.tunnels.invalidate(fp).await;
                None
            }
        } else {
            self.cache.daos.get(fp).await
        }
    }

    async fn build(
        &self,
        params: &ConnectionParams,
        fp: &str,
    ) -> Result<Arc<dyn DataAccessObject>> {
        let factory = self.registry.factory_for(params)?;

        if params.is_tunneled() && !params.is_agent() {
            let Some(ssh) = params.ssh.clone() else {
                return Err(AccessError::Configuration(
                    "tunneled connection without SSH parameters".to_string(),
                ));
            };

            // when the relay later breaks, evict the entry so the next
            // caller rebuilds instead of reusing a half-dead tunnel
            let on_error: ErrorHook = {
                let handle = tokio::runtime::Handle::current();
                let cache = Arc::clone(&self.cache);
                let fp = fp.to_string();
                Arc::new(move || {
                    let cache = Arc::clone(&cache);
                    let fp = fp.clone();
                    handle.spawn(async move {
                        tracing::warn!(fingerprint = %fp, "tunnel broke, evicting cache entry");
                        cache.tunnels.invalidate(&fp).await;
                    });
                })
            };

            let manager = Arc::clone(&self.tunnels);
            let remote_host = params.host.clone();
            let remote_port = params.port;
            let tunnel = tokio::task::spawn_blocking(move || {
                manager.open(&ssh, &remote_host, remote_port, on_error)
            })
            .await
            .map_err(|e| AccessError::Internal(format!("tunnel task failed: {}", e)))??;
            let tunnel = Arc::new(tunnel);

            // rewrite happens after fingerprinting: `fp` was derived from
            // the original endpoint
            let mut rewritten = params.clone();
            rewritten.rewrite_endpoint("127.0.0.1", tunnel.local_port());

            match factory.create(&rewritten).await {
                Ok(dao) => {
                    self.cache
                        .tunnels
                        .insert(
                            fp.to_string(),
                            Arc::new(TunneledClient {
                                tunnel,
                                dao: Arc::clone(&dao),
                            }),
                        )
                        .await;
                    Ok(dao)
                }
                Err(e) => {
                    tunnel.close();
                    Err(e)
                }
            }
        } else {
            let dao = factory.create(params).await?;
            self.cache
                .daos
                .insert(fp.to_string(), Arc::clone(&dao))
                .await;
            Ok(dao)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tabula_core::{
        ColumnInfo, DaoFactory, EngineType, ForeignKeyInfo, PrimaryColumn, Result, Row, RowQuery,
        RowValues, TableInfo, TableRowsPage,
    };

    use crate::config::CacheConfig;

    struct StubDao;

    #[async_trait]
    impl DataAccessObject for StubDao {
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
            Ok(())
        }
    }

    /// Counts creations and takes long enough for callers to pile up.
    struct SlowFactory {
        creations: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl DaoFactory for SlowFactory {
        fn families(&self) -> &'static [EngineType] {
            &[EngineType::Postgres]
        }

        async fn create(&self, _: &ConnectionParams) -> Result<Arc<dyn DataAccessObject>> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                Err(AccessError::Connection("refused".to_string()))
            } else {
                Ok(Arc::new(StubDao))
            }
        }
    }

    fn factory_with(fail: bool) -> (Arc<ClientFactory>, Arc<AtomicUsize>) {
        let creations = Arc::new(AtomicUsize::new(0));
        let mut registry = DaoRegistry::new();
        registry.register(Arc::new(SlowFactory {
            creations: Arc::clone(&creations),
            fail,
        }));
        let cache = Arc::new(ResourceCache::new(&CacheConfig::default()));
        let factory = Arc::new(ClientFactory::new(
            Arc::new(registry),
            cache,
            TunnelConfig::default(),
        ));
        (factory, creations)
    }

    fn direct_params() -> ConnectionParams {
        ConnectionParams::new(EngineType::Postgres, "db.internal", 5432)
            .credentials("app", "pw")
            .database("orders")
            .signing_key("sk")
    }

    #[tokio::test]
    async fn concurrent_callers_build_once() {
        let (factory, creations) = factory_with(false);
        let params = direct_params();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let factory = Arc::clone(&factory);
            let params = params.clone();
            handles.push(tokio::spawn(async move {
                factory.get_or_create(&params).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn construction_failure_caches_nothing() {
        let (factory, creations) = factory_with(true);
        let params = direct_params();

        assert!(factory.get_or_create(&params).await.is_err());
        assert!(factory.get_or_create(&params).await.is_err());
        // each call got a clean attempt
        assert_eq!(creations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_connections_get_distinct_handles() {
        let (factory, creations) = factory_with(false);
        let a = direct_params();
        let mut b = direct_params();
        b.database = "billing".to_string();

        factory.get_or_create(&a).await.unwrap();
        factory.get_or_create(&b).await.unwrap();
        assert_eq!(creations.load(Ordering::SeqCst), 2);
    }
}
