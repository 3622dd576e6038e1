//! Factory seam between the access layer and engine implementations

use std::sync::Arc;

use async_trait::async_trait;

use crate::{ConnectionParams, DataAccessObject, EngineType, Result};

/// Builds a live, authenticated data access object for one engine family.
///
/// `create` receives the final transport parameters: when the connection
/// is tunneled, host/port have already been rewritten to the tunnel's
/// local endpoint by the time the factory runs.
#[async_trait]
pub trait DaoFactory: Send + Sync {
    /// The engine families this factory serves. The agent proxy factory
    /// serves none directly; it is registered for proxied dispatch.
    fn families(&self) -> &'static [EngineType];

    async fn create(&self, params: &ConnectionParams) -> Result<Arc<dyn DataAccessObject>>;
}
