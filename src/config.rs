use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{AppError, Result};

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";
pub const DEFAULT_ANALYTICS_API_BASE: &str = "https://analyticsdata.googleapis.com/v1beta";
pub const DEFAULT_SQUARE_API_BASE: &str = "https://connect.squareup.com/v2";

/// Credentials for the upstream APIs. All optional at startup; a handler
/// that cannot proceed without one asks for it through [`Config::require`].
#[derive(Clone, Default)]
pub struct Credentials {
    pub meta_access_token: Option<String>,
    pub analytics_access_token: Option<String>,
    pub square_access_token: Option<String>,
}

#[derive(Clone)]
pub struct Upstreams {
    pub graph_api_base: String,
    pub analytics_api_base: String,
    pub square_api_base: String,
}

impl Default for Upstreams {
    fn default() -> Self {
        Self {
            graph_api_base: DEFAULT_GRAPH_API_BASE.to_string(),
            analytics_api_base: DEFAULT_ANALYTICS_API_BASE.to_string(),
            square_api_base: DEFAULT_SQUARE_API_BASE.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub development: bool,
    pub cache_ttl: Duration,
    /// Upper bound per cache scope, 0 disables the bound.
    pub cache_max_entries: usize,
    pub upstream_timeout: Duration,
    pub default_range_days: u32,
    pub credentials: Credentials,
    pub upstreams: Upstreams,
    pub brands_file: Option<String>,
    pub organizations_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            development: false,
            cache_ttl: Duration::from_secs(900),
            cache_max_entries: 10_000,
            upstream_timeout: Duration::from_secs(15),
            default_range_days: 30,
            credentials: Credentials::default(),
            upstreams: Upstreams::default(),
            brands_file: None,
            organizations_file: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parse_var("PORT", 3000)?;
        let ip = IpAddr::from_str(&host)
            .map_err(|e| AppError::Config(format!("Invalid host address: {}", e)))?;

        let development = env::var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let defaults = Upstreams::default();
        let upstreams = Upstreams {
            graph_api_base: env::var("GRAPH_API_BASE").unwrap_or(defaults.graph_api_base),
            analytics_api_base: env::var("ANALYTICS_API_BASE")
                .unwrap_or(defaults.analytics_api_base),
            square_api_base: env::var("SQUARE_API_BASE").unwrap_or(defaults.square_api_base),
        };

        let credentials = Credentials {
            meta_access_token: optional_var("META_ACCESS_TOKEN"),
            analytics_access_token: optional_var("GOOGLE_ANALYTICS_ACCESS_TOKEN"),
            square_access_token: optional_var("SQUARE_ACCESS_TOKEN"),
        };

        let default_range_days: u32 = parse_var("DEFAULT_RANGE_DAYS", 30)?;
        if default_range_days == 0 {
            return Err(AppError::Config(
                "DEFAULT_RANGE_DAYS must be at least 1".to_string(),
            ));
        }

        let config = Config {
            server_addr: SocketAddr::new(ip, port),
            development,
            cache_ttl: Duration::from_secs(parse_var("CACHE_TTL_SECS", 900)?),
            cache_max_entries: parse_var("CACHE_MAX_ENTRIES", 10_000)?,
            upstream_timeout: Duration::from_secs(parse_var("UPSTREAM_TIMEOUT_SECS", 15)?),
            default_range_days,
            credentials,
            upstreams,
            brands_file: optional_var("BRANDS_FILE"),
            organizations_file: optional_var("ORGANIZATIONS_FILE"),
        };

        info!(
            addr = %config.server_addr,
            development = config.development,
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "configuration loaded"
        );

        Ok(config)
    }

    /// Returns a credential the caller cannot do without, or a structured
    /// missing-configuration error naming the variable.
    pub fn require<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str> {
        value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::MissingConfig(name.to_string()))
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_missing_and_empty() {
        assert!(matches!(
            Config::require("META_ACCESS_TOKEN", None),
            Err(AppError::MissingConfig(name)) if name == "META_ACCESS_TOKEN"
        ));
        assert!(Config::require("META_ACCESS_TOKEN", Some("")).is_err());
        assert_eq!(Config::require("X", Some("abc")).unwrap(), "abc");
    }

    #[test]
    fn test_defaults_match_dashboard_cache_window() {
        let config = Config::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(900));
        assert_eq!(config.default_range_days, 30);
        assert!(!config.development);
        assert!(config.upstreams.graph_api_base.starts_with("https://graph.facebook.com"));
    }
}
