//! Supported storage engines

use serde::{Deserialize, Serialize};

/// The closed set of storage engines a connection can point at.
///
/// Engines group into families that share a wire protocol and SQL surface:
/// MariaDB speaks the MySQL protocol, so both resolve to the same data
/// access implementation. Adding an engine means adding a variant here and
/// registering a factory for its family; nothing else switches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Postgres,
    Mysql,
    Mariadb,
    Mssql,
    Oracle,
    Db2,
    Mongodb,
    Redis,
    Cassandra,
    Elasticsearch,
    Dynamodb,
    Snowflake,
    Clickhouse,
    Sqlite,
}

impl EngineType {
    /// Stable identifier used in fingerprints and persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Postgres => "postgres",
            EngineType::Mysql => "mysql",
            EngineType::Mariadb => "mariadb",
            EngineType::Mssql => "mssql",
            EngineType::Oracle => "oracle",
            EngineType::Db2 => "db2",
            EngineType::Mongodb => "mongodb",
            EngineType::Redis => "redis",
            EngineType::Cassandra => "cassandra",
            EngineType::Elasticsearch => "elasticsearch",
            EngineType::Dynamodb => "dynamodb",
            EngineType::Snowflake => "snowflake",
            EngineType::Clickhouse => "clickhouse",
            EngineType::Sqlite => "sqlite",
        }
    }

    /// The protocol family this engine belongs to. Factories register per
    /// family, so MariaDB resolves to the MySQL implementation.
    pub fn family(&self) -> EngineType {
        match self {
            EngineType::Mariadb => EngineType::Mysql,
            other => *other,
        }
    }

    /// Whether the engine speaks SQL (affects raw-query support).
    pub fn is_sql(&self) -> bool {
        !matches!(
            self,
            EngineType::Mongodb
                | EngineType::Redis
                | EngineType::Elasticsearch
                | EngineType::Dynamodb
        )
    }

    /// Default port for server-based engines.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            EngineType::Postgres => Some(5432),
            EngineType::Mysql | EngineType::Mariadb => Some(3306),
            EngineType::Mssql => Some(1433),
            EngineType::Oracle => Some(1521),
            EngineType::Db2 => Some(50000),
            EngineType::Mongodb => Some(27017),
            EngineType::Redis => Some(6379),
            EngineType::Cassandra => Some(9042),
            EngineType::Elasticsearch => Some(9200),
            EngineType::Clickhouse => Some(8123),
            EngineType::Dynamodb | EngineType::Snowflake | EngineType::Sqlite => None,
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EngineType {
    type Err = crate::AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineType::Postgres),
            "mysql" => Ok(EngineType::Mysql),
            "mariadb" => Ok(EngineType::Mariadb),
            "mssql" | "sqlserver" => Ok(EngineType::Mssql),
            "oracle" | "oracledb" => Ok(EngineType::Oracle),
            "db2" | "ibmdb2" => Ok(EngineType::Db2),
            "mongodb" => Ok(EngineType::Mongodb),
            "redis" => Ok(EngineType::Redis),
            "cassandra" => Ok(EngineType::Cassandra),
            "elasticsearch" => Ok(EngineType::Elasticsearch),
            "dynamodb" => Ok(EngineType::Dynamodb),
            "snowflake" => Ok(EngineType::Snowflake),
            "clickhouse" => Ok(EngineType::Clickhouse),
            "sqlite" => Ok(EngineType::Sqlite),
            other => Err(crate::AccessError::Configuration(format!(
                "Unknown engine type: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_str_round_trip() {
        let engines = [
            EngineType::Postgres,
            EngineType::Mysql,
            EngineType::Mariadb,
            EngineType::Mssql,
            EngineType::Oracle,
            EngineType::Db2,
            EngineType::Mongodb,
            EngineType::Redis,
            EngineType::Cassandra,
            EngineType::Elasticsearch,
            EngineType::Dynamodb,
            EngineType::Snowflake,
            EngineType::Clickhouse,
            EngineType::Sqlite,
        ];
        for engine in engines {
            let parsed: EngineType = engine.as_str().parse().unwrap();
            assert_eq!(parsed, engine);
        }
    }

    #[test]
    fn mariadb_resolves_to_mysql_family() {
        assert_eq!(EngineType::Mariadb.family(), EngineType::Mysql);
        assert_eq!(EngineType::Postgres.family(), EngineType::Postgres);
    }

    #[test]
    fn aliases_parse() {
        assert_eq!(
            "postgresql".parse::<EngineType>().unwrap(),
            EngineType::Postgres
        );
        assert_eq!(
            "sqlserver".parse::<EngineType>().unwrap(),
            EngineType::Mssql
        );
        assert!("accessdb".parse::<EngineType>().is_err());
    }
}
