//! Security-related configuration types for database connections
//!
//! SSH tunnel and TLS/SSL parameter types carried inside
//! `ConnectionParams`.

mod ssh_params;
mod tls_params;

pub use ssh_params::*;
pub use tls_params::*;
