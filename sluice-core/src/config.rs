//! Engine configuration.
//!
//! Loaded from a `[bulk]` table in a TOML file, from a bare TOML document, or
//! from `SLUICE_*` environment variables. Every loader validates the result.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{BulkError, BulkResult};
use crate::statement::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, PayloadBinding};

/// Environment variable overriding [`BulkConfig::chunk_size`].
pub const ENV_CHUNK_SIZE: &str = "SLUICE_CHUNK_SIZE";
/// Environment variable overriding [`BulkConfig::payload_binding`].
pub const ENV_PAYLOAD_BINDING: &str = "SLUICE_PAYLOAD_BINDING";
/// Environment variable overriding [`BulkConfig::strict_correlation`].
pub const ENV_STRICT_CORRELATION: &str = "SLUICE_STRICT_CORRELATION";

/// Bulk engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkConfig {
    /// Rows per staging `INSERT ... VALUES` statement.
    pub chunk_size: usize,

    /// How payload values are embedded.
    pub payload_binding: PayloadBinding,

    /// Fail when an inserted row cannot be matched to a record.
    pub strict_correlation: bool,

    /// Schema for unqualified SQL Server tables.
    pub sqlserver_schema: Option<String>,

    /// Schema for unqualified PostgreSQL tables.
    pub postgres_schema: Option<String>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            payload_binding: PayloadBinding::default(),
            strict_correlation: true,
            sqlserver_schema: Some("dbo".to_string()),
            postgres_schema: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    bulk: BulkConfig,
}

impl BulkConfig {
    /// Parse a bare TOML document of `BulkConfig` keys.
    pub fn from_toml_str(content: &str) -> BulkResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            BulkError::configuration(format!("invalid bulk configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the `[bulk]` table of a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> BulkResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BulkError::configuration(format!("cannot read {}", path.display())).with_source(e)
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|e| {
            BulkError::configuration(format!("invalid configuration in {}: {}", path.display(), e))
        })?;
        file.bulk.validate()?;
        Ok(file.bulk)
    }

    /// Defaults overridden by `SLUICE_*` environment variables.
    pub fn from_env() -> BulkResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> BulkResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CHUNK_SIZE) {
            config.chunk_size = raw.trim().parse().map_err(|_| {
                BulkError::configuration(format!("{} must be an integer, got '{}'", ENV_CHUNK_SIZE, raw))
            })?;
        }
        if let Some(raw) = lookup(ENV_PAYLOAD_BINDING) {
            config.payload_binding = raw.trim().parse()?;
        }
        if let Some(raw) = lookup(ENV_STRICT_CORRELATION) {
            config.strict_correlation = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(BulkError::configuration(format!(
                        "{} must be a boolean, got '{}'",
                        ENV_STRICT_CORRELATION, raw
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> BulkResult<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(BulkError::configuration(format!(
                "chunk_size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            ))
            .with_suggestion("Use the default of 1000 unless statements hit a size limit"));
        }
        Ok(())
    }

    /// Set the chunk size.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the payload binding.
    pub fn payload_binding(mut self, binding: PayloadBinding) -> Self {
        self.payload_binding = binding;
        self
    }

    /// Set strict correlation.
    pub fn strict_correlation(mut self, strict: bool) -> Self {
        self.strict_correlation = strict;
        self
    }

    /// The schema applied to unqualified tables for a dialect.
    pub fn default_schema(&self, dialect: Dialect) -> Option<&str> {
        match dialect {
            Dialect::SqlServer => self.sqlserver_schema.as_deref(),
            Dialect::Postgres => self.postgres_schema.as_deref(),
            Dialect::InMemory => None,
        }
    }
}
