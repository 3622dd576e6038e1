//! The access core's composition root
//!
//! One `AccessService` is constructed at startup and injected where
//! needed. It owns the credential codec, the resource cache, the client
//! factory and the engine registry, and it is the only place that knows
//! how those fit together:
//!
//! encrypted record -> decrypt -> `ConnectionParams` -> fingerprint ->
//! cache -> (tunnel) -> engine factory -> live `DataAccessObject`.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;

use tabula_core::{
    AccessError, ColumnInfo, ConnectionParams, DataAccessObject, ForeignKeyInfo, PrimaryColumn,
    Result, TableInfo, fingerprint,
};
use tabula_crypto::Codec;
use tabula_daos::DaoRegistry;

use crate::cache::ResourceCache;
use crate::config::AccessConfig;
use crate::factory::ClientFactory;
use crate::probe::probe_with_backoff;

/// Encrypted connection record as handed over by persistence. The
/// payload decrypts to the JSON form of `ConnectionParams`.
#[derive(Debug, Clone)]
pub struct EncryptedConnectionRecord {
    pub payload: String,
    /// When set, decryption requires the caller's master password
    /// instead of the process key
    pub master_encryption: bool,
}

pub struct AccessService {
    codec: Codec,
    config: AccessConfig,
    registry: Arc<DaoRegistry>,
    cache: Arc<ResourceCache>,
    factory: ClientFactory,
}

impl AccessService {
    /// Service with all feature-compiled engine factories registered.
    pub fn new(process_key: impl Into<String>, config: AccessConfig) -> Self {
        Self::with_registry(process_key, config, DaoRegistry::with_defaults())
    }

    /// Service over a custom registry (extra engines, agent factory,
    /// test doubles).
    pub fn with_registry(
        process_key: impl Into<String>,
        config: AccessConfig,
        registry: DaoRegistry,
    ) -> Self {
        let registry = Arc::new(registry);
        let cache = Arc::new(ResourceCache::new(&config.cache));
        let factory = ClientFactory::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            config.tunnel.clone(),
        );
        Self {
            codec: Codec::new(process_key),
            config,
            registry,
            cache,
            factory,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn registry(&self) -> &DaoRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Decrypt a stored record into live connection parameters. A record
    /// under master encryption without a supplied password fails the
    /// same way a wrong password does.
    pub fn decrypt_params(
        &self,
        record: &EncryptedConnectionRecord,
        master_password: Option<&str>,
    ) -> Result<ConnectionParams> {
        let plaintext = if record.master_encryption {
            let master = master_password.ok_or(AccessError::DecryptionFailed)?;
            self.codec.decrypt_with_master(&record.payload, master)?
        } else {
            self.codec.decrypt(&record.payload)?
        };
        Ok(serde_json::from_str(&plaintext)?)
    }

    /// Encrypt connection parameters into a storable record. Always
    /// produces the current envelope version.
    pub fn encrypt_params(
        &self,
        params: &ConnectionParams,
        master_password: Option<&str>,
    ) -> Result<EncryptedConnectionRecord> {
        let plaintext = serde_json::to_string(params)?;
        let payload = match master_password {
            Some(master) => self.codec.encrypt_with_master(&plaintext, master)?,
            None => self.codec.encrypt(&plaintext)?,
        };
        Ok(EncryptedConnectionRecord {
            payload,
            master_encryption: master_password.is_some(),
        })
    }

    /// The live handle for a connection, cached per fingerprint.
    pub async fn dao(&self, params: &ConnectionParams) -> Result<Arc<dyn DataAccessObject>> {
        self.factory.get_or_create(params).await
    }

    /// Table listing, served from the schema cache when fresh.
    pub async fn tables(&self, params: &ConnectionParams) -> Result<Arc<Vec<TableInfo>>> {
        let key = fingerprint(params);
        if let Some(cached) = self.cache.tables.get(&key).await {
            return Ok(cached);
        }
        let dao = self.dao(params).await?;
        let tables = Arc::new(dao.get_tables_from_db().await?);
        self.cache.tables.insert(key, Arc::clone(&tables)).await;
        Ok(tables)
    }

    /// Column structure for one table, served from the schema cache
    /// when fresh.
    pub async fn table_structure(
        &self,
        params: &ConnectionParams,
        table: &str,
    ) -> Result<Arc<Vec<ColumnInfo>>> {
        let key = ResourceCache::schema_key(&fingerprint(params), table);
        if let Some(cached) = self.cache.structures.get(&key).await {
            return Ok(cached);
        }
        let dao = self.dao(params).await?;
        let structure = Arc::new(dao.get_table_structure(table).await?);
        self.cache
            .structures
            .insert(key, Arc::clone(&structure))
            .await;
        Ok(structure)
    }

    /// Primary key columns for one table, cached.
    pub async fn primary_columns(
        &self,
        params: &ConnectionParams,
        table: &str,
    ) -> Result<Arc<Vec<PrimaryColumn>>> {
        let key = ResourceCache::schema_key(&fingerprint(params), table);
        if let Some(cached) = self.cache.primary_keys.get(&key).await {
            return Ok(cached);
        }
        let dao = self.dao(params).await?;
        let columns = Arc::new(dao.get_table_primary_columns(table).await?);
        self.cache
            .primary_keys
            .insert(key, Arc::clone(&columns))
            .await;
        Ok(columns)
    }

    /// Foreign keys for one table, cached. Engines without foreign keys
    /// surface their explicit unsupported error uncached.
    pub async fn foreign_keys(
        &self,
        params: &ConnectionParams,
        table: &str,
    ) -> Result<Arc<Vec<ForeignKeyInfo>>> {
        let key = ResourceCache::schema_key(&fingerprint(params), table);
        if let Some(cached) = self.cache.foreign_keys.get(&key).await {
            return Ok(cached);
        }
        let dao = self.dao(params).await?;
        let keys = Arc::new(dao.get_table_foreign_keys(table).await?);
        self.cache
            .foreign_keys
            .insert(key, Arc::clone(&keys))
            .await;
        Ok(keys)
    }

    /// Drop every cached resource for a connection. Called when the
    /// stored record is updated or deleted.
    pub async fn invalidate_connection(&self, params: &ConnectionParams) {
        let fp = fingerprint(params);
        tracing::info!(fingerprint = %fp, "invalidating cached connection resources");
        self.cache.invalidate_connection(&fp).await;
    }

    /// Build (or reuse) the handle and probe it with the configured
    /// linear-backoff retry.
    pub async fn test_connect_with_retry(&self, params: &ConnectionParams) -> Result<()> {
        let dao = self.dao(params).await?;
        if let Err(e) = probe_with_backoff(&dao, &self.config.probe).await {
            // a handle that failed its probe must not stay cached
            self.invalidate_connection(params).await;
            return Err(e);
        }
        Ok(())
    }

    /// Run one async operation per item with the configured bounded
    /// worker count. Results come back in completion order.
    pub async fn bulk_apply<T, R, F, Fut>(&self, items: Vec<T>, op: F) -> Vec<Result<R>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        stream::iter(items.into_iter().map(op))
            .buffer_unordered(self.config.bulk_workers.max(1))
            .collect()
            .await
    }

    /// Close every live tunnel and client handle. Call once at process
    /// shutdown; cached resources are never just dropped.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down access service");
        self.cache.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabula_core::EngineType;

    fn service() -> AccessService {
        AccessService::with_registry(
            "process-private-key",
            AccessConfig::default(),
            DaoRegistry::new(),
        )
    }

    fn params() -> ConnectionParams {
        ConnectionParams::new(EngineType::Postgres, "db.internal", 5432)
            .credentials("app", "secret-pw")
            .database("orders")
            .signing_key("sk-1")
    }

    #[test]
    fn record_round_trip_with_process_key() {
        let service = service();
        let params = params();
        let record = service.encrypt_params(&params, None).unwrap();
        assert!(!record.master_encryption);

        let decrypted = service.decrypt_params(&record, None).unwrap();
        assert_eq!(decrypted, params);
    }

    #[test]
    fn master_encrypted_record_requires_password() {
        let service = service();
        let record = service.encrypt_params(&params(), Some("master-pw")).unwrap();
        assert!(record.master_encryption);

        // missing and wrong passwords fail identically
        assert!(matches!(
            service.decrypt_params(&record, None),
            Err(AccessError::DecryptionFailed)
        ));
        assert!(matches!(
            service.decrypt_params(&record, Some("wrong")),
            Err(AccessError::DecryptionFailed)
        ));

        let decrypted = service.decrypt_params(&record, Some("master-pw")).unwrap();
        assert_eq!(decrypted.database, "orders");
    }

    #[tokio::test]
    async fn unknown_engine_surfaces_from_dao_lookup() {
        let service = service();
        let err = service.dao(&params()).await.err().unwrap();
        assert!(matches!(err, AccessError::UnsupportedEngine(_)));
    }

    #[tokio::test]
    async fn bulk_apply_bounds_concurrency() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let service = service();
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = service
            .bulk_apply((0..20).collect::<Vec<u32>>(), |i| {
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(i * 2)
                }
            })
            .await;

        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2, "worker bound exceeded");
    }
}
