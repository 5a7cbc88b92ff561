//! Integration tests for loading bulk engine configuration.
//!
//! These tests verify that TOML files, bare TOML documents and environment
//! lookups all produce validated settings.

use std::collections::HashMap;
use std::io::Write;

use pretty_assertions::assert_eq;
use sluice::{BulkConfig, Dialect, ErrorCode, PayloadBinding};

/// Test that defaults are sane
#[test]
fn test_config_defaults() {
    let config = BulkConfig::default();
    assert_eq!(config.chunk_size, 1000);
    assert_eq!(config.payload_binding, PayloadBinding::Inline);
    assert!(config.strict_correlation);
    assert_eq!(config.default_schema(Dialect::SqlServer), Some("dbo"));
    assert_eq!(config.default_schema(Dialect::Postgres), None);
    assert!(config.validate().is_ok());
}

/// Test a bare TOML document
#[test]
fn test_config_from_toml_str() {
    let config = BulkConfig::from_toml_str(
        r#"
        chunk_size = 250
        payload_binding = "parameters"
        strict_correlation = false
        postgres_schema = "staging"
    "#,
    )
    .unwrap();

    assert_eq!(config.chunk_size, 250);
    assert_eq!(config.payload_binding, PayloadBinding::Parameters);
    assert!(!config.strict_correlation);
    assert_eq!(config.default_schema(Dialect::Postgres), Some("staging"));
    assert_eq!(config.default_schema(Dialect::InMemory), None);
}

/// Test that unknown keys are rejected rather than ignored
#[test]
fn test_config_unknown_key() {
    let err = BulkConfig::from_toml_str("batch_size = 10").unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
}

/// Test that out-of-range chunk sizes fail validation
#[test]
fn test_config_chunk_size_range() {
    for raw in ["chunk_size = 0", "chunk_size = 1001"] {
        let err = BulkConfig::from_toml_str(raw).unwrap_err();
        assert!(err.is_configuration(), "{} should be rejected", raw);
    }
}

/// Test loading the `[bulk]` table of a project file
#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[bulk]
chunk_size = 500
sqlserver_schema = "etl"
"#
    )
    .unwrap();

    let config = BulkConfig::from_file(file.path()).unwrap();
    assert_eq!(config.chunk_size, 500);
    assert_eq!(config.default_schema(Dialect::SqlServer), Some("etl"));
    assert!(config.strict_correlation);
}

/// Test that a file without a `[bulk]` table yields defaults
#[test]
fn test_config_file_without_bulk_table() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[other]\nname = \"x\"").unwrap();

    let config = BulkConfig::from_file(file.path()).unwrap();
    assert_eq!(config, BulkConfig::default());
}

/// Test a missing file
#[test]
fn test_config_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = BulkConfig::from_file(dir.path().join("sluice.toml")).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
}

/// Test environment overrides through an injected lookup
#[test]
fn test_config_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("SLUICE_CHUNK_SIZE", " 64 "),
        ("SLUICE_PAYLOAD_BINDING", "params"),
        ("SLUICE_STRICT_CORRELATION", "off"),
    ]
    .into_iter()
    .collect();

    let config = BulkConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
    assert_eq!(config.chunk_size, 64);
    assert_eq!(config.payload_binding, PayloadBinding::Parameters);
    assert!(!config.strict_correlation);
}

/// Test malformed environment values
#[test]
fn test_config_bad_lookup_values() {
    let err = BulkConfig::from_lookup(|name| {
        (name == "SLUICE_STRICT_CORRELATION").then(|| "maybe".to_string())
    })
    .unwrap_err();
    assert!(err.is_configuration());

    let err = BulkConfig::from_lookup(|name| {
        (name == "SLUICE_CHUNK_SIZE").then(|| "lots".to_string())
    })
    .unwrap_err();
    assert!(err.is_configuration());
}
