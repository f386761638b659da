//! # taskd Binary
//!
//! Main entrypoint for the taskd authentication service.

use anyhow::Result;
use clap::Parser;
use taskd_config::Config;
use taskd_observe::{LogConfig, init_logging};

#[derive(Parser, Debug)]
#[command(name = "taskd")]
#[command(about = "taskd authentication service", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TASKD_CONFIG", default_value = "config.yaml")]
    config: String,

    /// gRPC port (overrides config); the host part of `listen.grpc` is kept
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding the signing keypair (overrides config)
    #[arg(long)]
    secrets_path: Option<String>,

    /// Log format: pretty, compact or json (overrides config)
    #[arg(long)]
    log_format: Option<String>,

    /// Refuse new signups
    #[arg(long)]
    disable_signup: bool,

    /// Maximum number of accounts (overrides config)
    #[arg(long)]
    max_users: Option<u64>,

    /// Seconds to wait for in-flight calls on shutdown (overrides config)
    #[arg(long)]
    grace_timeout: Option<u64>,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            let host = config
                .listen
                .grpc
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            config.listen.grpc = format!("{}:{}", host, port);
        }
        if let Some(ref path) = self.secrets_path {
            config.secrets.path = path.clone();
        }
        if let Some(ref format) = self.log_format {
            config.logging.format = Some(format.clone());
        }
        if self.disable_signup {
            config.signup.allow_new_users = false;
        }
        if let Some(max_users) = self.max_users {
            config.signup.max_users = max_users;
        }
        if let Some(grace) = self.grace_timeout {
            config.server.grace_timeout_secs = grace;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration; logging is not up yet, so keep the error for later
    let (mut config, load_error) = match taskd_config::load(&args.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    args.apply_overrides(&mut config);

    // Initialize observability
    init_logging(LogConfig::from_settings(&config.logging.level, config.logging.format.as_deref()))?;

    match load_error {
        Some(e) => tracing::warn!(path = %args.config, error = %e, "Failed to load config, using defaults"),
        None => tracing::info!(path = %args.config, "Configuration loaded"),
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Configuration validation error");
        std::process::exit(1);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        grpc = %config.listen.grpc,
        storage = %config.storage.backend,
        secrets = %config.secrets.backend,
        signups = config.signup.allow_new_users,
        "Starting taskd"
    );

    taskd_bin::run(config, shutdown_signal()).await
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }

    tracing::info!("Shutdown signal received, draining connections...");
}
