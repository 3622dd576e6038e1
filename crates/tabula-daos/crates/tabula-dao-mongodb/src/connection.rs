//! MongoDB connection setup

use std::sync::Arc;

use async_trait::async_trait;
use bson::doc;
use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};
use mongodb::{Client, Database};

use tabula_core::{
    AccessError, ConnectionParams, DaoFactory, DataAccessObject, EngineType, Result,
};

/// Live MongoDB handle implementing the data access contract
pub struct MongoDao {
    pub(crate) client: Client,
    pub(crate) db: Database,
}

impl MongoDao {
    /// Connect to MongoDB with the final transport parameters.
    #[tracing::instrument(skip(params), fields(host = %params.host, port = params.port, database = %params.database))]
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let mut options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: params.host.clone(),
                port: Some(params.port),
            }])
            .build();

        if !params.username.is_empty() {
            options.credential = Some(
                Credential::builder()
                    .username(params.username.clone())
                    .password(params.password.clone())
                    .build(),
            );
        }

        if params.tls.enabled {
            let mut tls = TlsOptions::default();
            if let Some(pem) = &params.tls.ca_cert {
                tls.ca_file_path = Some(write_ca_to_disk(pem)?);
            }
            if !params.tls.reject_unauthorized {
                tls.allow_invalid_certificates = Some(true);
            }
            options.tls = Some(Tls::Enabled(tls));
        }

        options.connect_timeout = Some(std::time::Duration::from_secs(10));
        options.server_selection_timeout = Some(std::time::Duration::from_secs(10));

        let client = Client::with_options(options)
            .map_err(|e| AccessError::Connection(format!("Failed to build MongoDB client: {}", e)))?;
        let db = client.database(&params.database);

        // the driver connects lazily; ping to surface auth/network errors now
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AccessError::Connection(format!("Failed to connect to MongoDB: {}", e)))?;

        tracing::info!("MongoDB connection established");
        Ok(Self { client, db })
    }
}

/// The driver only accepts CA material by path; spill the PEM next to the
/// other runtime state with a unique name.
fn write_ca_to_disk(pem: &str) -> Result<std::path::PathBuf> {
    let path = std::env::temp_dir().join(format!("tabula-mongo-ca-{}.pem", uuid::Uuid::new_v4()));
    std::fs::write(&path, pem)?;
    Ok(path)
}

/// Factory registered for the mongodb engine family
pub struct MongoDaoFactory;

#[async_trait]
impl DaoFactory for MongoDaoFactory {
    fn families(&self) -> &'static [EngineType] {
        &[EngineType::Mongodb]
    }

    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn DataAccessObject>> {
        Ok(Arc::new(MongoDao::connect(params).await?))
    }
}
