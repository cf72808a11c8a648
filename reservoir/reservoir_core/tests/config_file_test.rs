//! Integration tests for loading configuration documents from disk.

use std::io::Write;
use std::time::Duration;

use reservoir_core::{ConfigError, Error, LogLevel, ReservoirConfig};

#[test]
fn test_load_full_document() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[logging]
level = "debug"

[pool]
capacity = 2
initial_size = 1
acquire_timeout_ms = 500

[buffer]
capacity = 3

[workers]
threads = 4
queue_capacity = 8
thread_name_prefix = "stress"
shutdown_grace_ms = 100
"#
    )
    .unwrap();

    let config = ReservoirConfig::from_file(file.path()).unwrap();

    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.pool.capacity, 2);
    assert_eq!(config.pool.initial_size, 1);
    assert_eq!(config.pool.acquire_timeout(), Some(Duration::from_millis(500)));
    assert_eq!(config.buffer.capacity, 3);
    assert_eq!(config.workers.threads, Some(4));
    assert_eq!(config.workers.thread_name_prefix, "stress");
    assert_eq!(config.workers.shutdown_grace(), Duration::from_millis(100));
}

#[test]
fn test_empty_document_is_default() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let config = ReservoirConfig::from_file(file.path()).unwrap();
    assert_eq!(config, ReservoirConfig::default());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = ReservoirConfig::from_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_invalid_document_is_config_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[pool]\ncapacity = 1\ninitial_size = 5").unwrap();

    let result = ReservoirConfig::from_file(file.path());
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::Invalid(_)))
    ));
}
