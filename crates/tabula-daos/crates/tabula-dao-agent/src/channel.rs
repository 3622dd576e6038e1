//! The seam between the proxy DAO and the agent transport

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tabula_core::{ConnectionParams, Result};

/// One forwarded contract call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCommand {
    /// Contract method name, e.g. `getRowsFromTable`
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Method arguments as plain JSON
    pub payload: serde_json::Value,
}

impl AgentCommand {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            table: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Transport to one connected agent. Implementations live in the agent
/// subsystem; this crate only needs request/response semantics.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Send a command and wait for the agent's JSON response.
    async fn call(&self, command: AgentCommand) -> Result<serde_json::Value>;

    /// Release the transport. Idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens agent channels for connections carrying agent parameters.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn AgentChannel>>;
}
