//! Warehouse connection settings resolution
//!
//! These tests touch process environment variables, so they run serially.

use iform_common::config::TomlConfig;
use iform_common::Error;
use iform_import::config::{
    resolve_warehouse_config, CliOverrides, ENV_AUTH_TOKEN, ENV_NONCE, ENV_WAREHOUSE_URL,
};
use serial_test::serial;

fn clear_env() {
    std::env::remove_var(ENV_WAREHOUSE_URL);
    std::env::remove_var(ENV_AUTH_TOKEN);
    std::env::remove_var(ENV_NONCE);
}

fn toml_with_everything() -> TomlConfig {
    TomlConfig {
        warehouse_url: Some("https://toml.test/index.php/services/".to_string()),
        auth_token: Some("toml-token".to_string()),
        nonce: Some("toml-nonce".to_string()),
        ..Default::default()
    }
}

/// TC-CFG-001: TOML alone is enough; trailing slash is dropped
#[test]
#[serial]
fn tc_cfg_001_toml_only() {
    clear_env();

    let config = resolve_warehouse_config(&CliOverrides::default(), &toml_with_everything()).unwrap();

    assert_eq!(config.base_url, "https://toml.test/index.php/services");
    assert_eq!(config.authorization(), "IndiciaTokens toml-token|toml-nonce");
}

/// TC-CFG-002: Environment beats TOML, command line beats both
#[test]
#[serial]
fn tc_cfg_002_priority_order() {
    // Given
    clear_env();
    std::env::set_var(ENV_WAREHOUSE_URL, "http://env.test");
    std::env::set_var(ENV_AUTH_TOKEN, "env-token");
    let cli = CliOverrides {
        auth_token: Some("cli-token".to_string()),
        ..Default::default()
    };

    // When
    let config = resolve_warehouse_config(&cli, &toml_with_everything()).unwrap();
    clear_env();

    // Then
    assert_eq!(config.base_url, "http://env.test");
    assert_eq!(config.auth_token, "cli-token");
    assert_eq!(config.nonce, "toml-nonce");
}

/// TC-CFG-003: A missing value names where it can be set
#[test]
#[serial]
fn tc_cfg_003_missing_nonce_is_config_error() {
    clear_env();
    let toml = TomlConfig {
        nonce: None,
        ..toml_with_everything()
    };

    let result = resolve_warehouse_config(&CliOverrides::default(), &toml);

    match result {
        Err(Error::Config(message)) => assert!(message.contains(ENV_NONCE)),
        other => panic!("expected config error, got {:?}", other),
    }
}

/// TC-CFG-004: Only http and https warehouses are accepted
#[test]
#[serial]
fn tc_cfg_004_url_scheme_is_checked() {
    clear_env();
    let cli = CliOverrides {
        warehouse_url: Some("ftp://warehouse.test".to_string()),
        ..Default::default()
    };

    let result = resolve_warehouse_config(&cli, &toml_with_everything());

    assert!(matches!(result, Err(Error::Config(_))));
}
