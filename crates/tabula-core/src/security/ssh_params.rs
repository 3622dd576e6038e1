//! SSH tunnel parameters
//!
//! Connections to databases behind a bastion host carry these fields.
//! The private key is stored as PEM text (it arrives decrypted from the
//! credential record, never from the local filesystem).

use crate::{AccessError, Result};
use serde::{Deserialize, Serialize};

/// Parameters for establishing an SSH tunnel to the database host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshParams {
    /// SSH server hostname or IP address
    pub host: String,
    /// SSH server port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Username for SSH authentication
    pub username: String,
    /// Private key in PEM format
    pub private_key: String,
    /// Optional passphrase for encrypted private keys
    #[serde(default)]
    pub passphrase: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl SshParams {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            private_key: private_key.into(),
            passphrase: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Validate the SSH parameters before attempting a tunnel
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(AccessError::Configuration(
                "SSH host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(AccessError::Configuration(
                "SSH port cannot be 0".to_string(),
            ));
        }
        if self.username.is_empty() {
            return Err(AccessError::Configuration(
                "SSH username cannot be empty".to_string(),
            ));
        }
        if self.private_key.is_empty() {
            return Err(AccessError::Configuration(
                "SSH private key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_fields() {
        let base = SshParams::new("bastion.example.com", "deploy", "-----BEGIN KEY-----");
        assert!(base.validate().is_ok());

        let mut missing_host = base.clone();
        missing_host.host.clear();
        assert!(missing_host.validate().is_err());

        let mut zero_port = base.clone();
        zero_port.port = 0;
        assert!(zero_port.validate().is_err());

        let mut missing_key = base;
        missing_key.private_key.clear();
        assert!(missing_key.validate().is_err());
    }

    #[test]
    fn builder_sets_port_and_passphrase() {
        let params = SshParams::new("bastion", "admin", "key")
            .port(2222)
            .passphrase("hunter2");
        assert_eq!(params.port, 2222);
        assert_eq!(params.passphrase.as_deref(), Some("hunter2"));
    }
}
