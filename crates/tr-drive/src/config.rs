//! Engine configuration.

use std::time::Duration;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_net::ClientConfig;

const DEFAULT_CACHE_SIZE: usize = 10;
const MAX_CACHE_SIZE: usize = 1024;

/// Tunables for a [`crate::Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveConfig {
    pub snapshot_cache_size: usize,
    /// How long a hover prefetch stays usable.
    pub prefetch_ttl: Duration,
    /// Hover debounce before a prefetch request is issued.
    pub prefetch_delay: Duration,
    pub refresh_debounce: Duration,
    pub request_timeout: Duration,
    pub max_redirects: u8,
    pub user_agent: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            snapshot_cache_size: DEFAULT_CACHE_SIZE,
            prefetch_ttl: Duration::from_secs(10),
            prefetch_delay: Duration::from_millis(100),
            refresh_debounce: Duration::from_millis(150),
            request_timeout: Duration::from_secs(30),
            max_redirects: 10,
            user_agent: format!("trellis/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DriveConfig {
    /// Defaults overridden by `TRELLIS_*` environment variables.
    pub fn from_env() -> DriveResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`DriveConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DriveResult<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("TRELLIS_CACHE_SIZE") {
            config.snapshot_cache_size = parse_number("TRELLIS_CACHE_SIZE", &value)?;
        }
        if let Some(value) = lookup("TRELLIS_PREFETCH_TTL_MS") {
            config.prefetch_ttl = parse_millis("TRELLIS_PREFETCH_TTL_MS", &value)?;
        }
        if let Some(value) = lookup("TRELLIS_PREFETCH_DELAY_MS") {
            config.prefetch_delay = parse_millis("TRELLIS_PREFETCH_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("TRELLIS_REFRESH_DEBOUNCE_MS") {
            config.refresh_debounce = parse_millis("TRELLIS_REFRESH_DEBOUNCE_MS", &value)?;
        }
        if let Some(value) = lookup("TRELLIS_REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("TRELLIS_REQUEST_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("TRELLIS_MAX_REDIRECTS") {
            let limit = parse_number("TRELLIS_MAX_REDIRECTS", &value)?;
            config.max_redirects = u8::try_from(limit).map_err(|_| {
                DriveError::new(
                    "config.env_invalid",
                    format!("`TRELLIS_MAX_REDIRECTS` must be at most 255, got {limit}"),
                )
            })?;
        }
        if let Some(value) = lookup("TRELLIS_USER_AGENT") {
            config.user_agent = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DriveResult<()> {
        if self.snapshot_cache_size == 0 || self.snapshot_cache_size > MAX_CACHE_SIZE {
            return Err(DriveError::new(
                "config.cache_size_invalid",
                format!(
                    "snapshot cache size must be 1-{MAX_CACHE_SIZE}, got {}",
                    self.snapshot_cache_size
                ),
            ));
        }

        if self.prefetch_ttl.is_zero() {
            return Err(DriveError::new(
                "config.prefetch_ttl_invalid",
                "prefetch ttl must be greater than zero",
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(DriveError::new(
                "config.request_timeout_invalid",
                "request timeout must be greater than zero",
            ));
        }

        Ok(())
    }

    /// HTTP client settings derived from this configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            read_timeout: self.request_timeout,
            max_redirects: self.max_redirects,
            user_agent: self.user_agent.clone(),
            ..ClientConfig::default()
        }
    }
}

fn parse_number(name: &str, value: &str) -> DriveResult<usize> {
    value.trim().parse::<usize>().map_err(|error| {
        DriveError::new(
            "config.env_invalid",
            format!("`{name}` must be a non-negative integer, got `{value}`: {error}"),
        )
    })
}

fn parse_millis(name: &str, value: &str) -> DriveResult<Duration> {
    parse_number(name, value).map(|millis| Duration::from_millis(millis as u64))
}

#[cfg(test)]
mod tests {
    use super::DriveConfig;
    use std::time::Duration;

    #[test]
    fn environment_overrides_defaults() {
        let config = match DriveConfig::from_lookup(|name| match name {
            "TRELLIS_CACHE_SIZE" => Some("3".to_owned()),
            "TRELLIS_REFRESH_DEBOUNCE_MS" => Some("20".to_owned()),
            _ => None,
        }) {
            Ok(config) => config,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(config.snapshot_cache_size, 3);
        assert_eq!(config.refresh_debounce, Duration::from_millis(20));
        assert_eq!(config.prefetch_ttl, DriveConfig::default().prefetch_ttl);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let parsed = DriveConfig::from_lookup(|name| {
            (name == "TRELLIS_MAX_REDIRECTS").then(|| "many".to_owned())
        });
        assert_eq!(parsed.map_err(|error| error.code), Err("config.env_invalid"));

        let empty_cache = DriveConfig {
            snapshot_cache_size: 0,
            ..DriveConfig::default()
        };
        assert!(empty_cache.validate().is_err());
    }
}
