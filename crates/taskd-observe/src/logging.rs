//! Structured logging utilities for taskd
//!
//! Provides subscriber setup and span helpers with the fields every RPC and
//! credential check records.

use std::str::FromStr;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (for development)
    Pretty,
    /// Compact format without colors
    Compact,
    /// JSON format (for production)
    Json,
}

#[allow(clippy::derivable_impls)]
impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        {
            LogFormat::Pretty
        }
        #[cfg(not(debug_assertions))]
        {
            LogFormat::Json
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Configuration for logging behavior
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format
    pub format: LogFormat,
    /// Whether to include file/line numbers
    pub include_location: bool,
    /// Whether to include target module
    pub include_target: bool,
    /// Whether to log span events (enter/exit/close)
    pub log_spans: bool,
    /// Environment filter (e.g., "info,taskd=debug"); `RUST_LOG` wins when set
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            include_location: cfg!(debug_assertions),
            include_target: true,
            log_spans: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Build a config from the configured level and optional format name
    ///
    /// An unknown format name falls back to the build default.
    pub fn from_settings(level: &str, format: Option<&str>) -> Self {
        let format = format.and_then(|f| f.parse().ok()).unwrap_or_default();
        Self { format, filter: Some(level.to_string()), ..Self::default() }
    }
}

fn build_filter(configured: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    match configured {
        Some(filter) => Ok(EnvFilter::try_new(filter)?),
        None => Ok(EnvFilter::new("info")),
    }
}

/// Initialize structured logging with configuration
///
/// Fails if the filter is invalid or a global subscriber is already set.
pub fn init_logging(config: LogConfig) -> anyhow::Result<()> {
    let env_filter = build_filter(config.filter.as_deref())?;

    let fmt_span = if config.log_spans { FmtSpan::NEW | FmtSpan::CLOSE } else { FmtSpan::NONE };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(fmt_span);

    match config.format {
        LogFormat::Pretty => {
            subscriber
                .pretty()
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize pretty logger: {}", e))?;
        },
        LogFormat::Compact => {
            subscriber
                .compact()
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize compact logger: {}", e))?;
        },
        LogFormat::Json => {
            subscriber
                .json()
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize JSON logger: {}", e))?;
        },
    }

    tracing::info!(
        format = ?config.format,
        location = config.include_location,
        target = config.include_target,
        "Logging initialized"
    );

    Ok(())
}

/// Span for one inbound RPC
pub fn rpc_span(method: &str, request_id: &str) -> Span {
    tracing::info_span!(
        "rpc",
        rpc.method = method,
        request_id = request_id,
        code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Span for one credential check
pub fn auth_span(scheme: &str) -> Span {
    tracing::debug_span!(
        "authentication",
        scheme = scheme,
        subject = tracing::field::Empty,
        result = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Record the outcome of an RPC
pub fn record_rpc_result(span: &Span, code: &str, duration_ms: u128) {
    span.record("code", code);
    span.record("duration_ms", duration_ms);
}

/// Record the outcome of a credential check
pub fn record_auth_result(span: &Span, subject: Option<&str>, result: &str, duration_ms: u128) {
    if let Some(subject) = subject {
        span.record("subject", subject);
    }
    span.record("result", result);
    span.record("duration_ms", duration_ms);
}
