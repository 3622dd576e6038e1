//! MongoDB data access implementation
//!
//! Collections surface as tables and sampled documents stand in for
//! column structure. Relational-only contract methods (foreign keys)
//! fail with an explicit unsupported error so callers can tell "no data"
//! from "cannot answer".

mod connection;
mod dao;
mod values;

pub use connection::{MongoDao, MongoDaoFactory};
