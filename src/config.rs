//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)
//!
//! The `federation` section is then validated once into an immutable
//! [`FederationSettings`] snapshot shared by the signing client and the
//! verification gate.

use std::time::Duration;

use http::Method;
use serde::Deserialize;

use crate::error::AppError;
use crate::federation::{DigestAlgorithm, REQUEST_TARGET, SignatureAlgorithm};

/// Upper bound for `federation.clock_skew_seconds` (one day)
pub const MAX_CLOCK_SKEW_SECONDS: u64 = 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default)]
    pub actors: ActorsConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain, optionally with port (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Raw federation settings as written in configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Serve and accept federation traffic
    pub enabled: bool,
    /// Maximum payload size in MiB
    pub max_size: u64,
    /// Acceptable signature algorithms, most preferred first
    pub algorithms: Vec<String>,
    /// Body digest algorithm name
    pub digest_algorithm: String,
    /// Headers covered by signatures on GET requests
    pub get_headers: Vec<String>,
    /// Headers covered by signatures on POST requests
    pub post_headers: Vec<String>,
    /// Allowed distance between an inbound `Date` and local time
    pub clock_skew_seconds: u64,
    /// Lifetime of a cached remote public key
    pub key_cache_ttl_seconds: u64,
    /// Maximum number of cached remote public keys
    pub key_cache_capacity: u64,
    /// Timeout for fetching a remote key document
    pub fetch_timeout_seconds: u64,
    /// Timeout for an outbound delivery
    pub delivery_timeout_seconds: u64,
    /// Outbound proxy URL
    pub proxy: Option<String>,
    /// Allow key documents on loopback/private hosts (development only)
    pub allow_private_hosts: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 4,
            algorithms: vec![
                "rsa-sha256".to_string(),
                "rsa-sha512".to_string(),
                "ed25519".to_string(),
            ],
            digest_algorithm: "SHA-256".to_string(),
            get_headers: vec![REQUEST_TARGET.to_string(), "Date".to_string()],
            post_headers: vec![
                REQUEST_TARGET.to_string(),
                "Date".to_string(),
                "Digest".to_string(),
            ],
            clock_skew_seconds: 300,
            key_cache_ttl_seconds: 3600,
            key_cache_capacity: 10_000,
            fetch_timeout_seconds: 10,
            delivery_timeout_seconds: 30,
            proxy: None,
            allow_private_hosts: false,
        }
    }
}

/// Local actors seeded at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActorsConfig {
    /// Usernames to create with fresh key pairs
    pub usernames: Vec<String>,
    /// RSA modulus size for generated keys
    pub key_bits: usize,
}

impl Default for ActorsConfig {
    fn default() -> Self {
        Self {
            usernames: Vec::new(),
            key_bits: 2048,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub fn filter_directive(&self) -> String {
        format!("fedsig={},tower_http=debug", self.level.trim().to_ascii_lowercase())
    }

    /// Whether logs are emitted as JSON lines
    pub fn is_json(&self) -> bool {
        self.format.trim().eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDSIG__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost:8080")?
            .set_default("server.protocol", "http")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEDSIG")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("federation.algorithms")
                    .with_list_parse_key("federation.get_headers")
                    .with_list_parse_key("federation.post_headers")
                    .with_list_parse_key("actors.usernames"),
            )
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }
}

/// Check that a covered-header list can authenticate a request
///
/// Every method needs `(request-target)` and `Date`; methods other than GET
/// carry a body and additionally need `Digest`.
pub fn require_signed_headers(method: &Method, headers: &[String]) -> Result<(), AppError> {
    let has = |name: &str| headers.iter().any(|h| h.eq_ignore_ascii_case(name));

    if !has(REQUEST_TARGET) {
        return Err(AppError::Config(format!(
            "missing http header for {}: {}",
            method, REQUEST_TARGET
        )));
    }
    if !has("date") {
        return Err(AppError::Config(format!(
            "missing http header for {}: Date",
            method
        )));
    }
    if !has("digest") && method != Method::GET {
        return Err(AppError::Config(format!(
            "missing http header for {}: Digest",
            method
        )));
    }

    Ok(())
}

/// Validated, immutable federation settings
///
/// Only obtainable through [`FederationSettings::from_config`], so holding
/// one means every header-set and algorithm check has passed.
#[derive(Debug, Clone)]
pub struct FederationSettings {
    enabled: bool,
    max_size: usize,
    digest_algorithm: DigestAlgorithm,
    algorithms: Vec<SignatureAlgorithm>,
    get_headers: Vec<String>,
    post_headers: Vec<String>,
    clock_skew: Duration,
    key_cache_ttl: Duration,
    key_cache_capacity: u64,
    fetch_timeout: Duration,
    delivery_timeout: Duration,
    proxy: Option<url::Url>,
    allow_private_hosts: bool,
}

impl FederationSettings {
    /// Validate raw configuration
    ///
    /// # Errors
    /// `AppError::Config` for any violation; callers at startup must treat
    /// it as fatal.
    pub fn from_config(config: &FederationConfig) -> Result<Self, AppError> {
        require_signed_headers(&Method::GET, &config.get_headers)?;
        require_signed_headers(&Method::POST, &config.post_headers)?;

        let digest_algorithm = DigestAlgorithm::parse(&config.digest_algorithm).ok_or_else(|| {
            AppError::Config(format!(
                "unsupported digest algorithm: {}",
                config.digest_algorithm
            ))
        })?;

        let mut algorithms = Vec::with_capacity(config.algorithms.len());
        for name in &config.algorithms {
            let algorithm = SignatureAlgorithm::parse(name).ok_or_else(|| {
                AppError::Config(format!("unsupported signature algorithm: {}", name))
            })?;
            if !algorithms.contains(&algorithm) {
                algorithms.push(algorithm);
            }
        }
        if algorithms.is_empty() {
            return Err(AppError::Config(
                "federation.algorithms must not be empty".to_string(),
            ));
        }

        let max_size = config
            .max_size
            .checked_mul(1 << 20)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| {
                AppError::Config(format!("federation.max_size too large: {}", config.max_size))
            })?;

        if config.fetch_timeout_seconds == 0 || config.delivery_timeout_seconds == 0 {
            return Err(AppError::Config(
                "federation timeouts must be greater than 0".to_string(),
            ));
        }

        if config.clock_skew_seconds > MAX_CLOCK_SKEW_SECONDS {
            return Err(AppError::Config(format!(
                "federation.clock_skew_seconds must be at most {}, got {}",
                MAX_CLOCK_SKEW_SECONDS, config.clock_skew_seconds
            )));
        }

        let proxy = config
            .proxy
            .as_deref()
            .map(str::trim)
            .filter(|proxy| !proxy.is_empty())
            .map(|proxy| {
                url::Url::parse(proxy)
                    .map_err(|e| AppError::Config(format!("invalid federation.proxy: {}", e)))
            })
            .transpose()?;

        if config.allow_private_hosts {
            tracing::warn!("Key documents may be fetched from private and loopback hosts");
        }

        Ok(Self {
            enabled: config.enabled,
            max_size,
            digest_algorithm,
            algorithms,
            get_headers: normalize_headers(&config.get_headers),
            post_headers: normalize_headers(&config.post_headers),
            clock_skew: Duration::from_secs(config.clock_skew_seconds),
            key_cache_ttl: Duration::from_secs(config.key_cache_ttl_seconds),
            key_cache_capacity: config.key_cache_capacity,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_seconds),
            delivery_timeout: Duration::from_secs(config.delivery_timeout_seconds),
            proxy,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Maximum payload size in bytes
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    /// Acceptable signature algorithms, most preferred first
    pub fn algorithms(&self) -> &[SignatureAlgorithm] {
        &self.algorithms
    }

    /// Lower-cased covered headers for GET requests
    pub fn get_headers(&self) -> &[String] {
        &self.get_headers
    }

    /// Lower-cased covered headers for POST requests
    pub fn post_headers(&self) -> &[String] {
        &self.post_headers
    }

    /// Covered headers required for `method`
    pub fn required_headers(&self, method: &Method) -> &[String] {
        if method == Method::GET || method == Method::HEAD {
            &self.get_headers
        } else {
            &self.post_headers
        }
    }

    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    pub fn key_cache_ttl(&self) -> Duration {
        self.key_cache_ttl
    }

    pub fn key_cache_capacity(&self) -> u64 {
        self.key_cache_capacity
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    pub fn proxy(&self) -> Option<&url::Url> {
        self.proxy.as_ref()
    }

    pub fn allow_private_hosts(&self) -> bool {
        self.allow_private_hosts
    }
}

fn normalize_headers(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|header| header.trim().to_ascii_lowercase())
        .collect()
}
