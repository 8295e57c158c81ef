//! Configuration resolution for iform-import
//!
//! Warehouse connection settings resolve with CLI → ENV → TOML priority.

use iform_common::config::{resolve_value, TomlConfig};
use iform_common::{Error, Result};
use std::time::Duration;
use tracing::info;

pub const ENV_WAREHOUSE_URL: &str = "IFORM_WAREHOUSE_URL";
pub const ENV_AUTH_TOKEN: &str = "IFORM_AUTH_TOKEN";
pub const ENV_NONCE: &str = "IFORM_NONCE";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Everything needed to talk to one warehouse
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseConfig {
    /// Services root, e.g. `https://warehouse.example.org/index.php/services`
    pub base_url: String,
    pub auth_token: String,
    pub nonce: String,
    pub timeout: Duration,
}

impl WarehouseConfig {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            nonce: nonce.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// `Authorization` header value
    pub fn authorization(&self) -> String {
        format!("IndiciaTokens {}|{}", self.auth_token, self.nonce)
    }
}

/// Command-line overrides, all optional
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub warehouse_url: Option<String>,
    pub auth_token: Option<String>,
    pub nonce: Option<String>,
}

fn require(
    name: &str,
    cli: Option<&str>,
    env_var: &str,
    toml_value: Option<&str>,
    toml_key: &str,
) -> Result<String> {
    match resolve_value(name, cli, env_var, toml_value) {
        Some((value, source)) => {
            info!("{} loaded from {}", name, source);
            Ok(value)
        }
        None => Err(Error::Config(format!(
            "{} not configured. Please configure using one of:\n\
             1. Command line option\n\
             2. Environment: {}=...\n\
             3. TOML config: ~/.config/iform/config.toml ({} = \"...\")",
            name, env_var, toml_key
        ))),
    }
}

/// Resolve warehouse settings from the three tiers
pub fn resolve_warehouse_config(cli: &CliOverrides, toml_config: &TomlConfig) -> Result<WarehouseConfig> {
    let base_url = require(
        "Warehouse URL",
        cli.warehouse_url.as_deref(),
        ENV_WAREHOUSE_URL,
        toml_config.warehouse_url.as_deref(),
        "warehouse_url",
    )?;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(Error::Config(format!(
            "Warehouse URL must start with http:// or https://, got '{}'",
            base_url
        )));
    }

    let auth_token = require(
        "Auth token",
        cli.auth_token.as_deref(),
        ENV_AUTH_TOKEN,
        toml_config.auth_token.as_deref(),
        "auth_token",
    )?;
    let nonce = require(
        "Nonce",
        cli.nonce.as_deref(),
        ENV_NONCE,
        toml_config.nonce.as_deref(),
        "nonce",
    )?;

    Ok(WarehouseConfig::new(base_url, auth_token, nonce))
}
