//! MySQL connection setup
//!
//! A single-connection pool per handle: the access layer caches one
//! handle per logical connection, so the pool exists for reconnect
//! behavior rather than parallelism.

use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};

use tabula_core::{
    AccessError, ConnectionParams, DaoFactory, DataAccessObject, EngineType, Result,
};

/// Live MySQL/MariaDB handle implementing the data access contract
pub struct MysqlDao {
    pub(crate) pool: Pool,
    pub(crate) database: String,
    engine: EngineType,
}

impl MysqlDao {
    /// Connect to MySQL/MariaDB with the final transport parameters.
    #[tracing::instrument(skip(params), fields(host = %params.host, port = params.port, database = %params.database))]
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let mut builder = OptsBuilder::from_opts(Opts::default())
            .ip_or_hostname(params.host.clone())
            .tcp_port(params.port)
            .db_name(Some(params.database.clone()))
            .user(Some(params.username.clone()))
            .pass(Some(params.password.clone()));

        if params.tls.enabled {
            let mut ssl = SslOpts::default();
            if let Some(pem) = &params.tls.ca_cert {
                ssl = ssl.with_root_certs(vec![pem.clone().into_bytes().into()]);
            } else if !params.tls.reject_unauthorized {
                ssl = ssl
                    .with_danger_accept_invalid_certs(true)
                    .with_danger_skip_domain_validation(true);
            }
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, 1).ok_or_else(|| {
            AccessError::Connection("Failed to configure MySQL pool constraints".to_string())
        })?;
        builder = builder.pool_opts(
            PoolOpts::default()
                .with_constraints(constraints)
                .with_reset_connection(false),
        );

        let pool = Pool::new(Opts::from(builder));

        // verify connectivity before handing the handle out
        let conn = pool
            .get_conn()
            .await
            .map_err(|e| AccessError::Connection(format!("Failed to connect to MySQL: {}", e)))?;
        drop(conn);

        tracing::info!("MySQL connection established");
        Ok(Self {
            pool,
            database: params.database.clone(),
            engine: params.engine,
        })
    }

    pub(crate) async fn get_conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| AccessError::Connection(format!("Failed to get MySQL connection: {}", e)))
    }

    pub(crate) fn engine_type(&self) -> EngineType {
        self.engine
    }
}

/// Factory registered for the mysql engine family (serves MariaDB too)
pub struct MysqlDaoFactory;

#[async_trait]
impl DaoFactory for MysqlDaoFactory {
    fn families(&self) -> &'static [EngineType] {
        &[EngineType::Mysql]
    }

    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn DataAccessObject>> {
        Ok(Arc::new(MysqlDao::connect(params).await?))
    }
}
