//! PostgreSQL data access implementation

mod connection;
mod dao;
mod sql;
mod values;

pub use connection::{PostgresDao, PostgresDaoFactory};
