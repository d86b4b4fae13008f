//! Bootstrap configuration loading
//!
//! Settings are resolved in priority order:
//! 1. Environment variable (highest priority)
//! 2. TOML config file
//! 3. Compiled default (fallback)
//!
//! A missing TOML file is not an error: the service starts with defaults and
//! logs a warning. A TOML file that exists but cannot be parsed is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable that points at an explicit config file
pub const CONFIG_PATH_ENV: &str = "WWF_CONFIG";

/// Bootstrap configuration loaded from TOML
///
/// Every field is optional; consumers apply their own compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Socket address the HTTP server binds to
    #[serde(default)]
    pub bind_address: Option<String>,

    /// SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Geoapify geocoding API key
    #[serde(default)]
    pub geoapify_api_key: Option<String>,

    /// Base URL of the filming-locations GraphQL service
    #[serde(default)]
    pub locations_service_base_url: Option<String>,

    /// Secret used to sign obfuscated title tokens
    #[serde(default)]
    pub token_secret: Option<String>,

    /// Title token lifetime (seconds)
    #[serde(default)]
    pub token_ttl_seconds: Option<u64>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where a resolved setting came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingSource {
    Environment,
    Toml,
}

impl std::fmt::Display for SettingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingSource::Environment => write!(f, "environment"),
            SettingSource::Toml => write!(f, "TOML"),
        }
    }
}

/// A setting value with its provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSetting {
    pub value: String,
    pub source: SettingSource,
}

/// Resolve a string setting from environment then TOML
///
/// Blank values are treated as absent. Warns when the setting is present in
/// more than one source, since only the environment value is used.
pub fn resolve_setting(
    name: &str,
    env_var: &str,
    toml_value: Option<&str>,
) -> Option<ResolvedSetting> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_value(v));
    let toml_value = toml_value.filter(|v| is_valid_value(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            setting = name,
            "Setting found in both environment ({}) and TOML. Using environment.",
            env_var
        );
    }

    if let Some(value) = env_value {
        return Some(ResolvedSetting {
            value: value.trim().to_string(),
            source: SettingSource::Environment,
        });
    }

    toml_value.map(|value| ResolvedSetting {
        value: value.trim().to_string(),
        source: SettingSource::Toml,
    })
}

/// Non-empty, non-whitespace
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Locate the TOML config file for a service
///
/// `WWF_CONFIG` wins; otherwise `<config dir>/wwf/<service>.toml`.
pub fn config_file_path(service_name: &str) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if is_valid_value(&path) {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|d| d.join("wwf").join(format!("{}.toml", service_name)))
}

/// Load a TOML config file
///
/// Missing file → defaults with a warning.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load the TOML config for a service from its default location
pub fn load_service_config(service_name: &str) -> Result<TomlConfig> {
    match config_file_path(service_name) {
        Some(path) => load_toml_config(&path),
        None => {
            warn!("Could not determine config directory, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("wwf"))
        .unwrap_or_else(|| PathBuf::from("./wwf_data"))
}

/// User-Agent sent to every upstream service
pub fn get_user_agent() -> String {
    format!(
        "where-was-filmed/{} (https://github.com/where-was-filmed/wwf)",
        env!("CARGO_PKG_VERSION")
    )
}
