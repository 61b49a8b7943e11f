//! Configuration management for quotaguard.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use http::header::HeaderName;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{QuotaGuardError, Result};
use crate::ratelimit::{
    AddrList, Backend, DriverKind, HeaderValueResolver, LocalStore, RateLimitPolicy, SharedStore,
    DEFAULT_NAMESPACE, DEFAULT_REMAINING_HEADER, DEFAULT_RESET_HEADER, DEFAULT_TOTAL_HEADER,
};

/// Prefix for environment variable overrides, e.g.
/// `QUOTAGUARD__RATE_LIMITING__MAX=10`.
pub const ENV_PREFIX: &str = "QUOTAGUARD";

/// Main configuration for the quotaguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaGuardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

/// Names of the three rate limit headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderNamesConfig {
    #[serde(default = "default_remaining_header")]
    pub remaining: String,
    #[serde(default = "default_reset_header")]
    pub reset: String,
    #[serde(default = "default_total_header")]
    pub total: String,
}

impl Default for HeaderNamesConfig {
    fn default() -> Self {
        Self {
            remaining: default_remaining_header(),
            reset: default_reset_header(),
            total: default_total_header(),
        }
    }
}

fn default_remaining_header() -> String {
    DEFAULT_REMAINING_HEADER.to_string()
}

fn default_reset_header() -> String {
    DEFAULT_RESET_HEADER.to_string()
}

fn default_total_header() -> String {
    DEFAULT_TOTAL_HEADER.to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Counter store driver: `local` (alias `memory`) or `shared` (alias `redis`)
    #[serde(default)]
    pub driver: DriverKind,

    /// Redis URL, required for the shared driver
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key namespace for counter records
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Window length in milliseconds
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    /// Requests per identity per window
    #[serde(default = "default_max")]
    pub max: u64,

    /// Request header to key identities on instead of the peer address
    #[serde(default)]
    pub identity_header: Option<String>,

    /// Peer addresses that are never limited
    #[serde(default)]
    pub whitelist: Vec<IpAddr>,

    /// Peer addresses that are always rejected with 403
    #[serde(default)]
    pub blacklist: Vec<IpAddr>,

    /// Rate limit header names
    #[serde(default)]
    pub headers: HeaderNamesConfig,

    /// Suppress the rate limit headers
    #[serde(default)]
    pub disable_header: bool,

    /// Body for quota-exceeded responses
    #[serde(default)]
    pub error_message: Option<String>,

    /// Status for quota-exceeded responses
    #[serde(default = "default_status")]
    pub status: u16,

    /// Surface denials as errors for an outer handler
    #[serde(default)]
    pub throw: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            redis_url: None,
            namespace: default_namespace(),
            duration_ms: default_duration_ms(),
            max: default_max(),
            identity_header: None,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            headers: HeaderNamesConfig::default(),
            disable_header: false,
            error_message: None,
            status: default_status(),
            throw: false,
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_duration_ms() -> u64 {
    60 * 60 * 1000
}

fn default_max() -> u64 {
    2500
}

fn default_status() -> u16 {
    429
}

impl RateLimitingConfig {
    /// Check settings that do not need a connection.
    pub fn validate(&self) -> Result<()> {
        if self.driver == DriverKind::Shared && self.redis_url.is_none() {
            return Err(QuotaGuardError::Config(
                "the shared driver requires redis_url".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the policy described by these settings.
    pub fn to_policy(&self) -> Result<RateLimitPolicy> {
        let mut builder = RateLimitPolicy::builder()
            .max(self.max)
            .duration(Duration::from_millis(self.duration_ms))
            .header_names(
                self.headers.remaining.as_str(),
                self.headers.reset.as_str(),
                self.headers.total.as_str(),
            )
            .disable_headers(self.disable_header)
            .status(self.status)
            .throw(self.throw);

        if let Some(header) = &self.identity_header {
            let header = HeaderName::try_from(header.as_str()).map_err(|e| {
                QuotaGuardError::Config(format!("invalid identity header '{}': {}", header, e))
            })?;
            builder = builder.identity_resolver(HeaderValueResolver::new(header));
        }
        if !self.whitelist.is_empty() {
            builder = builder.whitelist_rule(AddrList::new(self.whitelist.iter().copied()));
        }
        if !self.blacklist.is_empty() {
            builder = builder.blacklist_rule(AddrList::new(self.blacklist.iter().copied()));
        }
        if let Some(message) = &self.error_message {
            builder = builder.error_body(message.as_str());
        }

        builder.build()
    }

    /// Resolve the configured driver into a concrete store, connecting to
    /// Redis for the shared driver.
    pub async fn backend(&self) -> Result<Backend> {
        match self.driver {
            DriverKind::Local => Ok(Backend::Local(LocalStore::with_namespace(
                self.namespace.as_str(),
            ))),
            DriverKind::Shared => {
                let url = self.redis_url.as_deref().ok_or_else(|| {
                    QuotaGuardError::Config("the shared driver requires redis_url".to_string())
                })?;
                let store = SharedStore::connect(url).await?;
                Ok(Backend::Shared(store.with_namespace(self.namespace.as_str())))
            }
        }
    }
}

impl QuotaGuardConfig {
    /// Load configuration from an optional YAML file layered with
    /// `QUOTAGUARD__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<QuotaGuardConfig>())
            .map_err(|e| QuotaGuardError::Config(e.to_string()))?;

        settings.rate_limiting.validate()?;
        Ok(settings)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: QuotaGuardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| QuotaGuardError::Config(e.to_string()))?;
        config.rate_limiting.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QuotaGuardConfig::default();
        let rl = &config.rate_limiting;

        assert_eq!(config.server.listen_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(rl.driver, DriverKind::Local);
        assert_eq!(rl.duration_ms, 3_600_000);
        assert_eq!(rl.max, 2500);
        assert_eq!(rl.status, 429);
        assert_eq!(rl.headers.remaining, "X-RateLimit-Remaining");
        assert_eq!(rl.namespace, "limit");
        assert!(!rl.throw);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:8080
rate_limiting:
  driver: memory
  duration_ms: 60000
  max: 10
  identity_header: x-api-key
  whitelist: [10.0.0.1]
  headers:
    remaining: Rate-Limit-Remaining
  throw: true
"#;
        let config = QuotaGuardConfig::from_yaml(yaml).unwrap();
        let rl = &config.rate_limiting;

        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(rl.driver, DriverKind::Local);
        assert_eq!(rl.max, 10);
        assert_eq!(rl.whitelist, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(rl.headers.remaining, "Rate-Limit-Remaining");
        assert_eq!(rl.headers.reset, "X-RateLimit-Reset");
        assert!(rl.throw);
    }

    #[test]
    fn test_invalid_driver_is_config_error() {
        let yaml = "rate_limiting:\n  driver: mongo\n";
        assert!(matches!(
            QuotaGuardConfig::from_yaml(yaml),
            Err(QuotaGuardError::Config(_))
        ));
    }

    #[test]
    fn test_shared_driver_requires_url() {
        let yaml = "rate_limiting:\n  driver: redis\n";
        let err = QuotaGuardConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("redis_url"));
    }

    #[test]
    fn test_to_policy() {
        let settings = RateLimitingConfig {
            max: 7,
            duration_ms: 1000,
            disable_header: true,
            error_message: Some("Slow down".to_string()),
            status: 503,
            ..Default::default()
        };

        let policy = settings.to_policy().unwrap();
        assert_eq!(policy.quota().max, 7);
        assert_eq!(policy.quota().duration, Duration::from_secs(1));
        assert!(policy.headers().is_none());
        assert_eq!(policy.status().as_u16(), 503);
        assert_eq!(policy.error_body().unwrap().to_string(), "Slow down");
    }

    #[test]
    fn test_to_policy_rejects_bad_identity_header() {
        let settings = RateLimitingConfig {
            identity_header: Some("not a header".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            settings.to_policy(),
            Err(QuotaGuardError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_local_backend() {
        let settings = RateLimitingConfig::default();
        let backend = settings.backend().await.unwrap();
        assert_eq!(backend.kind(), DriverKind::Local);
    }

    #[tokio::test]
    async fn test_shared_backend_without_url() {
        let settings = RateLimitingConfig {
            driver: DriverKind::Shared,
            ..Default::default()
        };
        assert!(matches!(
            settings.backend().await,
            Err(QuotaGuardError::Config(_))
        ));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = QuotaGuardConfig::load(None).unwrap();
        assert_eq!(config.rate_limiting.max, 2500);
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("quotaguard-{}.yaml", std::process::id()));
        std::fs::write(&path, "rate_limiting:\n  max: 7\n  status: 503\n").unwrap();

        let config = QuotaGuardConfig::from_file(path.to_str().unwrap());
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.rate_limiting.max, 7);
        assert_eq!(config.rate_limiting.status, 503);
    }

    #[test]
    fn test_from_missing_file_is_io_error() {
        let result = QuotaGuardConfig::from_file("/nonexistent/quotaguard.yaml");
        assert!(matches!(result, Err(QuotaGuardError::Io(_))));
    }
}
