//! Configuration validation
//!
//! Validates configuration values and ensures consistency

use std::net::SocketAddr;

use thiserror::Error;

use crate::{AuthConfig, Config, ListenConfig, LoggingConfig, SecretsConfig, StorageConfig};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid address '{0}': {1}")]
    InvalidAddress(String, String),

    #[error("Invalid port {0}: ports below 1024 are reserved")]
    PrivilegedPort(u16),

    #[error("Invalid log level: {0} (must be one of: trace, debug, info, warn, error)")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0} (must be one of: pretty, compact, json)")]
    InvalidLogFormat(String),

    #[error("Invalid token lifetime: {0}")]
    InvalidTokenLifetime(String),

    #[error("Invalid password policy: {0}")]
    InvalidPasswordPolicy(String),

    #[error("Issuer must not be empty")]
    EmptyIssuer,

    #[error("Invalid secrets backend: {0} (must be one of: directory, memory)")]
    InvalidSecretsBackend(String),

    #[error("Invalid storage backend: {0} (must be one of: memory, redis)")]
    InvalidBackend(String),

    #[error("Missing connection string for backend: {0}")]
    MissingConnectionString(String),

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type alias for validation operations
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validate complete configuration
pub fn validate(config: &Config) -> Result<()> {
    let mut errors: Vec<ValidationError> = [
        validate_listen(&config.listen),
        validate_logging(&config.logging),
        validate_auth(&config.auth),
        validate_secrets(&config.secrets),
        validate_storage(&config.storage),
    ]
    .into_iter()
    .filter_map(|r| r.err())
    .collect();

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

/// Validate listen configuration
pub fn validate_listen(config: &ListenConfig) -> Result<()> {
    let addr = config
        .grpc
        .parse::<SocketAddr>()
        .map_err(|e| ValidationError::InvalidAddress(config.grpc.clone(), e.to_string()))?;

    // port 0 asks the OS for an ephemeral port
    if addr.port() != 0 && addr.port() < 1024 {
        return Err(ValidationError::PrivilegedPort(addr.port()));
    }

    Ok(())
}

/// Validate logging level and format
pub fn validate_logging(config: &LoggingConfig) -> Result<()> {
    match config.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {},
        _ => return Err(ValidationError::InvalidLogLevel(config.level.clone())),
    }

    if let Some(format) = &config.format {
        match format.to_lowercase().as_str() {
            "pretty" | "compact" | "json" => {},
            _ => return Err(ValidationError::InvalidLogFormat(format.clone())),
        }
    }

    Ok(())
}

/// Validate token lifetimes and password policy
pub fn validate_auth(config: &AuthConfig) -> Result<()> {
    if config.issuer.trim().is_empty() {
        return Err(ValidationError::EmptyIssuer);
    }

    if config.access_ttl_secs == 0 || config.refresh_ttl_secs == 0 {
        return Err(ValidationError::InvalidTokenLifetime(
            "token lifetimes must be greater than zero".to_string(),
        ));
    }

    if config.access_ttl_secs >= config.refresh_ttl_secs {
        return Err(ValidationError::InvalidTokenLifetime(format!(
            "access lifetime ({}s) must be shorter than refresh lifetime ({}s)",
            config.access_ttl_secs, config.refresh_ttl_secs
        )));
    }

    if config.min_password_len == 0 || config.min_password_len > config.max_password_len {
        return Err(ValidationError::InvalidPasswordPolicy(format!(
            "length range [{}-{}] is empty",
            config.min_password_len, config.max_password_len
        )));
    }

    if !(config.min_password_len..=config.max_password_len)
        .contains(&config.bootstrap_password_len)
    {
        return Err(ValidationError::InvalidPasswordPolicy(format!(
            "bootstrap password length {} is outside [{}-{}]",
            config.bootstrap_password_len, config.min_password_len, config.max_password_len
        )));
    }

    Ok(())
}

/// Validate secrets backend
pub fn validate_secrets(config: &SecretsConfig) -> Result<()> {
    match config.backend.as_str() {
        "directory" | "memory" => Ok(()),
        other => Err(ValidationError::InvalidSecretsBackend(other.to_string())),
    }
}

/// Validate storage configuration
pub fn validate_storage(config: &StorageConfig) -> Result<()> {
    match config.backend.as_str() {
        "memory" => Ok(()),
        "redis" => match config.redis_url.as_deref() {
            Some(url) if !url.is_empty() => Ok(()),
            _ => Err(ValidationError::MissingConnectionString("redis".to_string())),
        },
        other => Err(ValidationError::InvalidBackend(other.to_string())),
    }
}
