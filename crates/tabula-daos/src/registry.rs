//! Engine dispatch registry
//!
//! Maps a connection's engine family to the factory that can build a
//! live data access object for it. Adding an engine means registering a
//! factory; nothing in the access layer switches on engine types.

use std::collections::HashMap;
use std::sync::Arc;

use tabula_core::{AccessError, ConnectionParams, DaoFactory, DataAccessObject, EngineType, Result};

/// Registry of engine factories plus the agent proxy factory.
///
/// Agent-flavored connections resolve to the proxy factory regardless of
/// their engine type; the proxy honors the identical contract, so callers
/// never branch on "direct vs. agent".
pub struct DaoRegistry {
    factories: HashMap<EngineType, Arc<dyn DaoFactory>>,
    agent: Option<Arc<dyn DaoFactory>>,
}

impl DaoRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            agent: None,
        }
    }

    /// Create a registry with all feature-compiled engine factories
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::postgres::PostgresDaoFactory));
        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::mysql::MysqlDaoFactory));
        #[cfg(feature = "mongodb")]
        registry.register(Arc::new(crate::mongodb::MongoDaoFactory));

        registry
    }

    /// Register an engine factory under every family it serves
    pub fn register(&mut self, factory: Arc<dyn DaoFactory>) {
        for family in factory.families() {
            tracing::info!(engine = %family, "registering data access factory");
            self.factories.insert(*family, Arc::clone(&factory));
        }
    }

    /// Register the factory used for agent-proxied connections
    pub fn register_agent(&mut self, factory: Arc<dyn DaoFactory>) {
        tracing::info!("registering agent proxy factory");
        self.agent = Some(factory);
    }

    /// Resolve the factory for a connection.
    pub fn factory_for(&self, params: &ConnectionParams) -> Result<Arc<dyn DaoFactory>> {
        if params.is_agent() {
            return self.agent.clone().ok_or_else(|| {
                AccessError::Configuration(
                    "connection is agent-proxied but no agent factory is registered".to_string(),
                )
            });
        }
        let family = params.engine.family();
        self.factories
            .get(&family)
            .cloned()
            .ok_or(AccessError::UnsupportedEngine(params.engine))
    }

    /// Build a data access object for the connection.
    pub async fn get_data_access_object(
        &self,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn DataAccessObject>> {
        let factory = self.factory_for(params)?;
        factory.create(params).await
    }

    /// List registered engine families
    pub fn engines(&self) -> Vec<EngineType> {
        self.factories.keys().copied().collect()
    }

    /// Check if an engine family has a registered factory
    pub fn has(&self, engine: EngineType) -> bool {
        self.factories.contains_key(&engine.family())
    }
}

impl Default for DaoRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_compiled_engines() {
        let registry = DaoRegistry::with_defaults();

        #[cfg(feature = "postgres")]
        assert!(registry.has(EngineType::Postgres));
        #[cfg(feature = "mysql")]
        {
            assert!(registry.has(EngineType::Mysql));
            // MariaDB rides the mysql factory
            assert!(registry.has(EngineType::Mariadb));
        }
        #[cfg(feature = "mongodb")]
        assert!(registry.has(EngineType::Mongodb));

        assert!(!registry.has(EngineType::Oracle));
    }

    #[test]
    fn unknown_engine_is_explicit() {
        let registry = DaoRegistry::with_defaults();
        let params = ConnectionParams::new(EngineType::Oracle, "ora.internal", 1521);
        let err = registry.factory_for(&params).err().unwrap();
        assert!(matches!(err, AccessError::UnsupportedEngine(EngineType::Oracle)));
    }

    #[test]
    fn agent_params_need_agent_factory() {
        let registry = DaoRegistry::with_defaults();
        let params = ConnectionParams::new(EngineType::Postgres, "unused", 0).agent(
            tabula_core::AgentParams {
                token: "tok".to_string(),
                signing_key: "sig".to_string(),
            },
        );
        assert!(matches!(
            registry.factory_for(&params),
            Err(AccessError::Configuration(_))
        ));
    }
}
