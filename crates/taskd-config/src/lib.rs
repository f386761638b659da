//! # taskd Config - Configuration Management
//!
//! Handles configuration loading from files and environment variables.
//!
//! Sources are layered, later sources winning:
//!
//! 1. Built-in defaults (serde `default` functions)
//! 2. An optional YAML file
//! 3. Environment variables prefixed with `TASKD__`, sections separated by `__`
//!    (e.g. `TASKD__AUTH__ACCESS_TTL_SECS=600`)
//!
//! ```yaml
//! listen:
//!   grpc: "0.0.0.0:1157"
//! auth:
//!   issuer: "taskd"
//!   access_ttl_secs: 1200
//! signup:
//!   allow_new_users: true
//!   max_users: 25
//! ```

pub mod secrets;
pub mod validation;

use std::path::Path;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub signup: SignupConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Listen address configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// gRPC API server address
    /// Format: "host:port" (e.g., "0.0.0.0:1157")
    #[serde(default = "default_grpc")]
    pub grpc: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self { grpc: default_grpc() }
    }
}

fn default_grpc() -> String {
    "0.0.0.0:1157".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (pretty, compact, json). Unset picks per build profile.
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: None }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Token issuance and credential policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Value of the `iss` claim on issued tokens; validation requires it
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Access token lifetime in seconds
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,

    /// How long a revocation record outlives the token it revokes
    #[serde(default = "default_revocation_grace")]
    pub revocation_grace_secs: u64,

    /// Tolerance applied to `exp` checks
    #[serde(default)]
    pub clock_skew_secs: u64,

    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,

    #[serde(default = "default_max_password_len")]
    pub max_password_len: usize,

    /// Length of the generated bootstrap admin password
    #[serde(default = "default_bootstrap_password_len")]
    pub bootstrap_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            revocation_grace_secs: default_revocation_grace(),
            clock_skew_secs: 0,
            min_password_len: default_min_password_len(),
            max_password_len: default_max_password_len(),
            bootstrap_password_len: default_bootstrap_password_len(),
        }
    }
}

fn default_issuer() -> String {
    "taskd".to_string()
}

fn default_access_ttl() -> u64 {
    1200 // 20 minutes
}

fn default_refresh_ttl() -> u64 {
    86400 // 24 hours
}

fn default_revocation_grace() -> u64 {
    120
}

fn default_min_password_len() -> usize {
    8
}

fn default_max_password_len() -> usize {
    128
}

fn default_bootstrap_password_len() -> usize {
    24
}

/// Public signup policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupConfig {
    #[serde(default = "default_allow_new_users")]
    pub allow_new_users: bool,

    /// Signups are refused once this many accounts exist
    #[serde(default = "default_max_users")]
    pub max_users: u64,
}

impl Default for SignupConfig {
    fn default() -> Self {
        Self { allow_new_users: default_allow_new_users(), max_users: default_max_users() }
    }
}

fn default_allow_new_users() -> bool {
    true
}

fn default_max_users() -> u64 {
    25
}

/// Where the signing keypair is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// "directory" or "memory"
    #[serde(default = "default_secrets_backend")]
    pub backend: String,

    #[serde(default = "default_secrets_path")]
    pub path: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self { backend: default_secrets_backend(), path: default_secrets_path() }
    }
}

fn default_secrets_backend() -> String {
    "directory".to_string()
}

fn default_secrets_path() -> String {
    "/etc/secrets".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory" or "redis"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    pub redis_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { backend: default_storage_backend(), redis_url: None }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Upper bound on connection draining during shutdown
    #[serde(default = "default_grace_timeout")]
    pub grace_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { grace_timeout_secs: default_grace_timeout() }
    }
}

fn default_grace_timeout() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            logging: LoggingConfig::default(),
            auth: AuthConfig::default(),
            signup: SignupConfig::default(),
            secrets: SecretsConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Validate the configuration, collecting every problem found
    pub fn validate(&self) -> validation::Result<()> {
        validation::validate(self)
    }
}

/// Load configuration from a file, with environment overrides
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    // Layer 1 (defaults) is handled by serde deserialization
    let builder = ConfigBuilder::builder().add_source(File::from(path.as_ref()).required(false));

    let builder =
        builder.add_source(Environment::with_prefix("TASKD").separator("__").try_parsing(true));

    builder.build()?.try_deserialize()
}

/// Load configuration, falling back to defaults when the file cannot be parsed
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Config {
    match load(path.as_ref()) {
        Ok(config) => {
            tracing::info!(path = ?path.as_ref(), "Configuration loaded");
            config
        },
        Err(e) => {
            tracing::warn!(
                path = ?path.as_ref(),
                error = %e,
                "Failed to load config, using defaults"
            );
            Config::default()
        },
    }
}
