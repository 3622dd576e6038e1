//! PostgreSQL connection setup
//!
//! Builds a tokio-postgres client from `ConnectionParams`, with TLS via
//! native-tls. When a CA certificate is supplied it is pinned as the only
//! trusted root.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, config::SslMode};

use tabula_core::{
    AccessError, ConnectionParams, DaoFactory, DataAccessObject, EngineType, Result,
};

/// Live PostgreSQL handle implementing the data access contract
pub struct PostgresDao {
    pub(crate) client: Client,
    pub(crate) schema: String,
    /// Driver task pumping the connection; aborted on close
    conn_task: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresDao {
    /// Connect to PostgreSQL with the final transport parameters.
    #[tracing::instrument(skip(params), fields(host = %params.host, port = params.port, database = %params.database))]
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .dbname(&params.database)
            .user(&params.username)
            .password(&params.password)
            .connect_timeout(std::time::Duration::from_secs(10));

        let (client, task) = if params.tls.enabled {
            config.ssl_mode(SslMode::Require);

            let mut builder = TlsConnector::builder();
            if let Some(pem) = &params.tls.ca_cert {
                let cert = Certificate::from_pem(pem.as_bytes()).map_err(|e| {
                    AccessError::Connection(format!("Failed to parse CA certificate: {}", e))
                })?;
                builder.add_root_certificate(cert);
                builder.disable_built_in_roots(true);
            } else if !params.tls.reject_unauthorized {
                builder.danger_accept_invalid_certs(true);
                builder.danger_accept_invalid_hostnames(true);
            }
            let connector = builder.build().map_err(|e| {
                AccessError::Connection(format!("Failed to build TLS connector: {}", e))
            })?;

            let (client, connection) = config
                .connect(MakeTlsConnector::new(connector))
                .await
                .map_err(|e| connect_error(&e))?;
            let task = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!(error = %e, "PostgreSQL connection terminated");
                }
            });
            (client, task)
        } else {
            config.ssl_mode(SslMode::Disable);
            let (client, connection) = config.connect(NoTls).await.map_err(|e| connect_error(&e))?;
            let task = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!(error = %e, "PostgreSQL connection terminated");
                }
            });
            (client, task)
        };

        let schema = params
            .schema
            .clone()
            .unwrap_or_else(|| "public".to_string());

        tracing::info!(schema = %schema, "PostgreSQL connection established");
        Ok(Self {
            client,
            schema,
            conn_task: Mutex::new(Some(task)),
        })
    }

    /// Abort the connection driver task. Idempotent.
    pub(crate) fn shutdown(&self) {
        if let Ok(mut slot) = self.conn_task.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }
}

fn connect_error(e: &tokio_postgres::Error) -> AccessError {
    AccessError::Connection(format!(
        "Failed to connect to PostgreSQL: {}",
        crate::dao::format_postgres_error(e)
    ))
}

/// Factory registered for the postgres engine family
pub struct PostgresDaoFactory;

#[async_trait]
impl DaoFactory for PostgresDaoFactory {
    fn families(&self) -> &'static [EngineType] {
        &[EngineType::Postgres]
    }

    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn DataAccessObject>> {
        Ok(Arc::new(PostgresDao::connect(params).await?))
    }
}
