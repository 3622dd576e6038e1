//! Decrypted connection parameters
//!
//! `ConnectionParams` is reconstructed per request from an encrypted
//! record; it is never persisted in plaintext. Secrets are redacted from
//! the `Debug` output so instrumented spans cannot leak them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::security::{SshParams, TlsParams};
use crate::EngineType;

/// Identity of a connection proxied through a remote agent process.
///
/// Agent connections are never dialed directly; the token authenticates
/// the agent channel and replaces host/credential fields entirely.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentParams {
    pub token: String,
    pub signing_key: String,
}

impl std::fmt::Debug for AgentParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentParams")
            .field("token", &"***")
            .field("signing_key", &"***")
            .finish()
    }
}

/// Decrypted parameters describing one logical database connection.
///
/// Invariant: once a tunnel is established, `host`/`port` are rewritten
/// in memory to the tunnel's local endpoint for the lifetime of the
/// cached client. Fingerprinting therefore happens *before* any rewrite
/// (see `fingerprint`), and SSH fingerprints exclude host/port entirely.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Stable identity of the stored connection record
    pub id: Uuid,
    /// Target engine
    pub engine: EngineType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Namespace/schema within the database, when the engine has one
    #[serde(default)]
    pub schema: Option<String>,
    /// Oracle service identifier
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub tls: TlsParams,
    /// Present when the database is reached through an SSH bastion
    #[serde(default)]
    pub ssh: Option<SshParams>,
    /// Key used only for fingerprinting and HMAC signing, never sent to
    /// the engine
    pub signing_key: String,
    /// Disposable connections created by the connection wizard's
    /// "try it" flow; ephemeral and host-unique by construction
    #[serde(default)]
    pub is_test_connection: bool,
    /// Present when the connection is proxied through a remote agent
    #[serde(default)]
    pub agent: Option<AgentParams>,
}

impl ConnectionParams {
    /// Minimal direct-connection constructor; builder methods fill the rest.
    pub fn new(engine: EngineType, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            schema: None,
            sid: None,
            tls: TlsParams::default(),
            ssh: None,
            signing_key: String::new(),
            is_test_connection: false,
            agent: None,
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = key.into();
        self
    }

    pub fn tls(mut self, tls: TlsParams) -> Self {
        self.tls = tls;
        self
    }

    pub fn ssh(mut self, ssh: SshParams) -> Self {
        self.ssh = Some(ssh);
        self
    }

    pub fn agent(mut self, agent: AgentParams) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn test_connection(mut self) -> Self {
        self.is_test_connection = true;
        self
    }

    /// Whether this connection is dialed through an SSH tunnel
    pub fn is_tunneled(&self) -> bool {
        self.ssh.is_some()
    }

    /// Whether this connection is proxied through a remote agent
    pub fn is_agent(&self) -> bool {
        self.agent.is_some()
    }

    /// Rewrite the transport endpoint to a tunnel's local address.
    /// Only the tunnel manager calls this, after fingerprinting.
    pub fn rewrite_endpoint(&mut self, host: impl Into<String>, port: u16) {
        self.host = host.into();
        self.port = port;
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("id", &self.id)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("ssl", &self.tls.enabled)
            .field("ssh", &self.ssh.as_ref().map(|s| &s.host))
            .field("is_test_connection", &self.is_test_connection)
            .field("agent", &self.agent.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let params = ConnectionParams::new(EngineType::Postgres, "db.internal", 5432)
            .credentials("admin", "s3cret")
            .signing_key("sk-123");
        let rendered = format!("{:?}", params);
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("sk-123"));
        assert!(rendered.contains("db.internal"));
    }

    #[test]
    fn rewrite_endpoint_changes_transport_only() {
        let mut params = ConnectionParams::new(EngineType::Mysql, "db.internal", 3306)
            .credentials("root", "pw")
            .database("app");
        let id = params.id;
        params.rewrite_endpoint("127.0.0.1", 49152);
        assert_eq!(params.host, "127.0.0.1");
        assert_eq!(params.port, 49152);
        assert_eq!(params.id, id);
        assert_eq!(params.database, "app");
    }
}
