//! Source backend kinds and their connection settings.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// BackendType
// ---------------------------------------------------------------------------

/// The SQL engine behind a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// File-based engine.
    Sqlite,
    Mysql,
    Postgres,
}

impl BackendType {
    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::Mysql),
            "postgres" => Ok(Self::Postgres),
            _ => Err(CoreError::Validation(format!(
                "Invalid data source type: '{s}'. Must be one of: sqlite, mysql, postgres"
            ))),
        }
    }

    /// Most bound variables one statement may carry.
    pub fn max_bind_variables(&self) -> usize {
        match self {
            Self::Sqlite => 32_766,
            Self::Mysql | Self::Postgres => 65_535,
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// Connection settings for a network engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

/// Connection settings for the file engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub path: String,
}

/// Typed view of a data source's opaque `config` blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionConfig {
    Network(NetworkConfig),
    File(FileConfig),
}

impl ConnectionConfig {
    /// Interpret a stored config blob for the given backend.
    pub fn from_json(backend: BackendType, config: &serde_json::Value) -> Result<Self, CoreError> {
        let invalid = |e: serde_json::Error| {
            CoreError::Validation(format!("Invalid {backend} connection config: {e}"))
        };
        match backend {
            BackendType::Sqlite => serde_json::from_value(config.clone())
                .map(Self::File)
                .map_err(invalid),
            BackendType::Mysql | BackendType::Postgres => serde_json::from_value(config.clone())
                .map(Self::Network)
                .map_err(invalid),
        }
    }
}
