//! Component wiring and server lifecycle
//!
//! Startup runs in a fixed order: secret vault, signing keypair, stores,
//! cleanup scheduler (with its startup sweep), admin bootstrap, then the gRPC
//! server. Shutdown stops accepting calls, drains in-flight calls for at most
//! `server.grace_timeout_secs`, then stops the scheduler.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use prometheus::Registry;
use taskd_api::{AppState, serve_grpc};
use taskd_auth::{AuthMetrics, CleanupScheduler, KeyPair, Revoker, TokenCodec, TokenSettings};
use taskd_config::{
    Config,
    secrets::{DirSecretVault, MemorySecretVault, SecretVault},
};
use taskd_store::{MemoryBackend, RevocationStore};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::initialization::ensure_admin;

/// Everything the server needs, assembled by [`initialize`]
pub struct Components {
    pub state: AppState,
    pub scheduler: Arc<CleanupScheduler>,
    pub registry: Registry,
}

/// Open the configured secret vault
pub fn open_vault(config: &Config) -> Result<Box<dyn SecretVault>> {
    match config.secrets.backend.as_str() {
        "directory" => {
            info!(path = %config.secrets.path, "Using directory secret vault");
            Ok(Box::new(DirSecretVault::new(&config.secrets.path)))
        },
        "memory" => {
            warn!("Using in-memory secret vault; issued tokens will not survive a restart");
            Ok(Box::new(MemorySecretVault::new()))
        },
        other => Err(anyhow!("Unknown secrets backend: {}", other)),
    }
}

/// Build the revocation store named by `storage.backend`
pub async fn build_revocation_store(
    config: &Config,
    memory: &Arc<MemoryBackend>,
) -> Result<Arc<dyn RevocationStore>> {
    match config.storage.backend.as_str() {
        "memory" => Ok(memory.clone()),
        #[cfg(feature = "redis")]
        "redis" => {
            let url = config
                .storage
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow!("storage.redis_url is required for the redis backend"))?;
            let store = taskd_store::RedisRevocationStore::new(url)
                .await
                .context("Failed to connect to Redis")?;
            Ok(Arc::new(store))
        },
        #[cfg(not(feature = "redis"))]
        "redis" => {
            Err(anyhow!("Redis revocation backend not compiled. Enable the 'redis' feature."))
        },
        other => Err(anyhow!("Unknown storage backend: {}", other)),
    }
}

/// Assemble every component up to, but not including, the gRPC server
pub async fn initialize(config: Arc<Config>) -> Result<Components> {
    let vault = open_vault(&config)?;
    let keys = Arc::new(
        KeyPair::load_or_create(vault.as_ref()).context("Failed to load or create the signing keypair")?,
    );
    info!(public_key = %keys.public_key_base64(), "Signing keypair ready");

    let memory = Arc::new(MemoryBackend::new());
    let revocations = build_revocation_store(&config, &memory).await?;
    info!(backend = %config.storage.backend, "Revocation store ready");

    let registry = Registry::new();
    let metrics =
        Arc::new(AuthMetrics::new(&registry).context("Failed to register auth metrics")?);

    let scheduler = Arc::new(CleanupScheduler::start(
        Arc::clone(&revocations),
        Duration::from_secs(config.auth.revocation_grace_secs),
        Some(Arc::clone(&metrics)),
    ));
    match scheduler.run_startup_sweep().await {
        Ok(count) => info!(scheduled = count, "Revocation cleanup sweep finished"),
        Err(e) => warn!(error = %e, "Revocation cleanup sweep failed; continuing"),
    }

    ensure_admin(memory.as_ref(), &config.auth).await?;

    let codec = Arc::new(TokenCodec::new(
        keys,
        TokenSettings::from(&config.auth),
        Arc::clone(&revocations),
    ));
    let revoker =
        Arc::new(Revoker::new(revocations, Arc::clone(&scheduler), Some(Arc::clone(&metrics))));

    let state = AppState::new(config, memory, codec, revoker, Some(metrics));
    Ok(Components { state, scheduler, registry })
}

/// Run the server until `shutdown` resolves, then drain and stop
pub async fn run<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let config = Arc::new(config);
    let addr: SocketAddr = config
        .listen
        .grpc
        .parse()
        .with_context(|| format!("Invalid gRPC listen address '{}'", config.listen.grpc))?;
    let grace = Duration::from_secs(config.server.grace_timeout_secs);

    let Components { state, scheduler, registry: _ } = initialize(Arc::clone(&config)).await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(serve_grpc(state, addr, async move {
        stop_rx.await.ok();
    }));

    let result = tokio::select! {
        joined = &mut server => {
            error!("gRPC server exited before shutdown was requested");
            joined.context("gRPC server task failed").and_then(|r| r)
        }
        _ = shutdown => {
            stop_tx.send(()).ok();
            match tokio::time::timeout(grace, &mut server).await {
                Ok(joined) => joined.context("gRPC server task failed").and_then(|r| r),
                Err(_) => {
                    warn!(grace_secs = grace.as_secs(), "In-flight calls did not drain in time; aborting");
                    server.abort();
                    Ok(())
                },
            }
        }
    };

    if tokio::time::timeout(grace, scheduler.shutdown()).await.is_err() {
        warn!("Cleanup scheduler did not stop in time");
    }

    info!("Shutdown complete");
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use taskd_types::ROLE_ADMIN;

    use super::*;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.secrets.backend = "memory".to_string();
        config.listen.grpc = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn test_initialize_bootstraps_admin() {
        let components = initialize(Arc::new(memory_config())).await.unwrap();

        assert!(components.state.accounts.admin_exists().await.unwrap());
        let (admin, _) =
            components.state.accounts.find_by_email("admin@localhost").await.unwrap().unwrap();
        assert!(admin.roles.iter().any(|r| r == ROLE_ADMIN));

        components.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_keypair_persists_in_directory_vault() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config();
        config.secrets.backend = "directory".to_string();
        config.secrets.path = dir.path().display().to_string();

        let first = initialize(Arc::new(config.clone())).await.unwrap();
        let pair = first.state.codec.issue(uuid::Uuid::new_v4(), &[]).unwrap();
        first.scheduler.shutdown().await;

        let second = initialize(Arc::new(config)).await.unwrap();
        assert!(second.state.codec.verify(&pair.access).is_ok());
        second.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_backends_are_rejected() {
        let mut config = memory_config();
        config.secrets.backend = "vault".to_string();
        assert!(open_vault(&config).is_err());

        let mut config = memory_config();
        config.storage.backend = "sqlite".to_string();
        assert!(build_revocation_store(&config, &Arc::new(MemoryBackend::new())).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_stops_on_shutdown() {
        let result =
            tokio::time::timeout(Duration::from_secs(10), run(memory_config(), async {})).await;
        assert!(result.expect("run did not stop").is_ok());
    }
}
