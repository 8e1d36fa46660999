//! Configuration resolution tests
//!
//! Tests touching `REACH_*` environment variables run under `#[serial]` so they
//! never observe each other's overrides.

use reach_common::config::{TomlConfig, ENV_CONFIG, ENV_DATABASE_PATH, ENV_GEOCODING_API_KEY};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(ENV_CONFIG);
    env::remove_var(ENV_DATABASE_PATH);
    env::remove_var(ENV_GEOCODING_API_KEY);
}

#[test]
#[serial]
fn test_explicit_config_file_is_loaded() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        database_path = "/data/contacts.db"

        [geocoding]
        api_key = "from-toml"
        "#,
    )
    .unwrap();

    let config = TomlConfig::load(Some(&path), None).unwrap();

    assert_eq!(config.database_path, PathBuf::from("/data/contacts.db"));
    assert_eq!(config.geocoding.api_key.as_deref(), Some("from-toml"));
}

#[test]
#[serial]
fn test_env_overrides_toml_and_cli_overrides_env() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "database_path = \"/data/from-toml.db\"\n").unwrap();

    env::set_var(ENV_DATABASE_PATH, "/data/from-env.db");
    env::set_var(ENV_GEOCODING_API_KEY, "from-env");

    let config = TomlConfig::load(Some(&path), None).unwrap();
    assert_eq!(config.database_path, PathBuf::from("/data/from-env.db"));
    assert_eq!(config.geocoding.api_key.as_deref(), Some("from-env"));

    let cli_db = PathBuf::from("/data/from-cli.db");
    let config = TomlConfig::load(Some(&path), Some(&cli_db)).unwrap();
    assert_eq!(config.database_path, cli_db);

    clear_env();
}

#[test]
#[serial]
fn test_missing_explicit_config_is_an_error() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");

    assert!(TomlConfig::load(Some(&missing), None).is_err());
}
