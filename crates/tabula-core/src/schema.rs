//! Schema metadata types shared by all engines

use serde::{Deserialize, Serialize};

/// Table listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub is_view: bool,
}

/// Column metadata as reported by engine introspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub auto_increment: bool,
    /// Maximum character length for string types
    pub max_length: Option<i64>,
}

/// Primary key column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryColumn {
    pub column_name: String,
    pub data_type: String,
}

/// Foreign key constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub constraint_name: String,
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
}
