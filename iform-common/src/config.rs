//! Configuration loading and tiered value resolution
//!
//! Values resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default, when one exists

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// tracing EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "iform_import=info,iform_common=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Warehouse base URL, e.g. "https://warehouse.example.org/index.php/services"
    pub warehouse_url: Option<String>,
    /// Write auth token issued for the website
    pub auth_token: Option<String>,
    /// Nonce paired with the auth token
    pub nonce: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-user config file location, whether or not it exists
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("iform").join("config.toml"))
}

/// Get default configuration file path for the platform
///
/// On Linux, `~/.config/iform/config.toml` wins over `/etc/iform/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let user_config = user_config_path();

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/iform/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    match user_config {
        Some(path) if path.exists() => Ok(path),
        Some(path) => Err(Error::Config(format!("Config file not found: {:?}", path))),
        None => Err(Error::Config(
            "Could not determine config directory".to_string(),
        )),
    }
}

/// Load a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load the platform config file, or defaults when none exists
pub fn load_default_toml_config() -> TomlConfig {
    match default_config_path() {
        Ok(path) => match load_toml_config(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring unreadable config file: {}", e);
                TomlConfig::default()
            }
        },
        Err(_) => TomlConfig::default(),
    }
}

/// Write a TOML config file, creating its parent directory
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    // Write to a sibling temp file then rename so readers never see a partial file
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Which tier a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    CommandLine,
    Environment,
    Toml,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CommandLine => write!(f, "command line"),
            ValueSource::Environment => write!(f, "environment"),
            ValueSource::Toml => write!(f, "TOML"),
        }
    }
}

/// Validate a config value (non-empty, non-whitespace)
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Resolve one setting from CLI → ENV → TOML
///
/// Blank values are skipped. Warns when more than one tier supplies a value
/// since that usually means a stale environment variable or config file.
pub fn resolve_value(
    name: &str,
    cli_value: Option<&str>,
    env_var_name: &str,
    toml_value: Option<&str>,
) -> Option<(String, ValueSource)> {
    let env_value = std::env::var(env_var_name).ok();

    let candidates = [
        (cli_value.map(str::to_string), ValueSource::CommandLine),
        (env_value, ValueSource::Environment),
        (toml_value.map(str::to_string), ValueSource::Toml),
    ];

    let valid: Vec<(String, ValueSource)> = candidates
        .into_iter()
        .filter_map(|(value, source)| value.filter(|v| is_valid_value(v)).map(|v| (v, source)))
        .collect();

    if valid.len() > 1 {
        let sources: Vec<String> = valid.iter().map(|(_, s)| s.to_string()).collect();
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            name,
            sources.join(", "),
            valid[0].1
        );
    }

    valid.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cli_overrides_env_and_toml() {
        std::env::set_var("IFORM_TEST_VALUE", "env");
        let resolved = resolve_value("value", Some("cli"), "IFORM_TEST_VALUE", Some("toml"));
        assert_eq!(resolved, Some(("cli".to_string(), ValueSource::CommandLine)));
        std::env::remove_var("IFORM_TEST_VALUE");
    }

    #[test]
    #[serial]
    fn test_env_fallback_skips_blank_cli() {
        std::env::set_var("IFORM_TEST_VALUE", "env");
        let resolved = resolve_value("value", Some("   "), "IFORM_TEST_VALUE", Some("toml"));
        assert_eq!(resolved, Some(("env".to_string(), ValueSource::Environment)));
        std::env::remove_var("IFORM_TEST_VALUE");
    }

    #[test]
    #[serial]
    fn test_toml_fallback_and_none() {
        std::env::remove_var("IFORM_TEST_VALUE");
        let resolved = resolve_value("value", None, "IFORM_TEST_VALUE", Some("toml"));
        assert_eq!(resolved, Some(("toml".to_string(), ValueSource::Toml)));
        assert_eq!(resolve_value("value", None, "IFORM_TEST_VALUE", None), None);
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = TomlConfig {
            warehouse_url: Some("https://warehouse.test/index.php/services".to_string()),
            auth_token: Some("token".to_string()),
            nonce: Some("nonce".to_string()),
            logging: LoggingConfig::default(),
        };

        write_toml_config(&config, &path).unwrap();
        let loaded = load_toml_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_logging_section_is_optional() {
        let config: TomlConfig = toml::from_str("warehouse_url = \"http://w\"").unwrap();
        assert_eq!(config.logging.level, "iform_import=info,iform_common=info");
        assert_eq!(config.auth_token, None);
    }
}
