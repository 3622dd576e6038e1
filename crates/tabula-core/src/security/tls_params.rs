//! TLS/SSL parameters

use serde::{Deserialize, Serialize};

/// TLS settings carried inside `ConnectionParams`.
///
/// When `ca_cert` is present the certificate is pinned: the supplied PEM
/// becomes the only trusted root. Without it, system trust applies and
/// `reject_unauthorized` controls whether invalid chains are tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TlsParams {
    /// Whether to negotiate TLS at all
    #[serde(default)]
    pub enabled: bool,
    /// CA certificate in PEM format for pinning
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// Refuse connections with unverifiable certificates
    #[serde(default = "default_reject_unauthorized")]
    pub reject_unauthorized: bool,
}

fn default_reject_unauthorized() -> bool {
    true
}

impl TlsParams {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ca_cert: None,
            reject_unauthorized: true,
        }
    }

    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ca_cert: None,
            reject_unauthorized: true,
        }
    }

    pub fn with_ca_cert(cert_pem: impl Into<String>) -> Self {
        Self {
            enabled: true,
            ca_cert: Some(cert_pem.into()),
            reject_unauthorized: true,
        }
    }
}
