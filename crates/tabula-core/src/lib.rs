//! Tabula Core - shared abstractions for the database access layer
//!
//! This crate provides the fundamental traits and types every other
//! tabula crate depends on. It defines:
//!
//! - `DataAccessObject` - the one contract all engine implementations honor
//! - `ConnectionParams` - decrypted connection identity and transport fields
//! - `fingerprint` - stable cache-key derivation for logical connections
//! - `EngineType` - the closed set of supported storage engines
//! - Common types like `Value`, `Row`, `TableRowsPage`, schema metadata

pub mod csv;
mod dao;
mod engine;
mod error;
mod factory;
mod fingerprint;
mod params;
mod schema;
pub mod security;
mod types;

pub use dao::*;
pub use engine::*;
pub use error::*;
pub use factory::*;
pub use fingerprint::*;
pub use params::*;
pub use schema::*;
pub use security::*;
pub use types::*;
