//! Configuration resolution for wwf-locations
//!
//! Bootstrap values come from ENV → TOML → compiled default (see
//! `wwf_common::config`). Pipeline tunables are compiled defaults held in
//! [`PipelineSettings`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use wwf_common::config::{default_data_dir, resolve_setting, TomlConfig};
use wwf_common::{Error, Result};

/// Default bind address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5730";

/// Default title token lifetime (seconds)
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 30 * 60;

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: SocketAddr,
    pub database_path: PathBuf,
    /// `None` → geocoding unavailable
    pub geoapify_api_key: Option<String>,
    /// `None` → locations service unavailable
    pub locations_service_base_url: Option<String>,
    /// `None` → tokens never verify and cannot be issued
    pub token_secret: Option<String>,
    pub token_ttl_seconds: u64,
    pub pipeline: PipelineSettings,
}

impl ServiceConfig {
    /// Resolve every setting from environment and TOML
    pub fn resolve(toml: &TomlConfig) -> Result<Self> {
        let bind_raw = resolve_setting("bind_address", "WWF_BIND_ADDRESS", toml.bind_address.as_deref())
            .map(|s| s.value)
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
        let bind_address: SocketAddr = bind_raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", bind_raw, e)))?;

        let toml_db = toml
            .database_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let database_path = resolve_setting("database_path", "WWF_DATABASE_PATH", toml_db.as_deref())
            .map(|s| PathBuf::from(s.value))
            .unwrap_or_else(|| default_data_dir().join("wwf.db"));

        let geoapify_api_key = resolve_setting(
            "geoapify_api_key",
            "WWF_GEOAPIFY_API_KEY",
            toml.geoapify_api_key.as_deref(),
        )
        .map(|s| {
            info!("Geoapify API key loaded from {}", s.source);
            s.value
        });
        if geoapify_api_key.is_none() {
            warn!(
                "Geoapify API key not configured; geocoding will be unavailable. \
                 Set WWF_GEOAPIFY_API_KEY or geoapify_api_key in the TOML config."
            );
        }

        let locations_service_base_url = resolve_setting(
            "locations_service_base_url",
            "WWF_LOCATIONS_SERVICE_BASE_URL",
            toml.locations_service_base_url.as_deref(),
        )
        .map(|s| s.value.trim_end_matches('/').to_string());
        if locations_service_base_url.is_none() {
            warn!("Locations service base URL not configured; fresh lookups will be unavailable");
        }

        let token_secret = resolve_setting(
            "token_secret",
            "WWF_TOKEN_SECRET",
            toml.token_secret.as_deref(),
        )
        .map(|s| s.value);

        let toml_ttl = toml.token_ttl_seconds.map(|t| t.to_string());
        let token_ttl_seconds = match resolve_setting(
            "token_ttl_seconds",
            "WWF_TOKEN_TTL_SECONDS",
            toml_ttl.as_deref(),
        ) {
            Some(s) => s.value.parse::<u64>().map_err(|e| {
                Error::Config(format!("Invalid token TTL '{}': {}", s.value, e))
            })?,
            None => DEFAULT_TOKEN_TTL_SECONDS,
        };

        Ok(Self {
            bind_address,
            database_path,
            geoapify_api_key,
            locations_service_base_url,
            token_secret,
            token_ttl_seconds,
            pipeline: PipelineSettings::default(),
        })
    }
}

/// Pipeline tunables (compiled defaults)
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Hard timeout per geocode request
    pub geocode_timeout: Duration,
    /// Geocoding provider request budget
    pub geocode_requests_per_second: u32,
    /// Knowledge-base entity lookup timeout
    pub knowledge_base_timeout: Duration,
    /// Title label (SPARQL) lookup timeout
    pub title_label_timeout: Duration,
    /// Ceiling for the locations service call
    pub locations_timeout: Duration,
    /// Minimum interval between running progress publishes
    pub progress_throttle: Duration,
    /// Radius of the approximate circle drawn for region-level places
    pub region_radius_km: f64,
    /// Delay before the no-locations view redirects home
    pub no_locations_redirect_secs: u64,
    /// Pipeline sessions idle this long are dropped
    pub session_idle_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            geocode_timeout: Duration::from_secs(15),
            geocode_requests_per_second: 5,
            knowledge_base_timeout: Duration::from_secs(10),
            title_label_timeout: Duration::from_secs(8),
            locations_timeout: Duration::from_secs(30),
            progress_throttle: Duration::from_millis(150),
            region_radius_km: 35.0,
            no_locations_redirect_secs: 5,
            session_idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}
