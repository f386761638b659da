//! # taskd API - gRPC Layer
//!
//! Exposes the `taskd.v1.AuthService` RPCs behind the authentication gate,
//! plus gRPC reflection.

use std::{future::Future, net::SocketAddr, sync::Arc};

use taskd_auth::{AuthMetrics, PasswordPolicy, Revoker, TokenCodec};
use taskd_config::Config;
use taskd_store::AccountStore;
use tonic::transport::Server;
use tracing::info;

pub mod grpc;
pub mod grpc_interceptor;
pub mod validation;

pub use grpc::{AuthServiceImpl, proto};
pub use grpc_interceptor::{AuthGate, require_basic, require_credentials};

/// Application state shared by every RPC
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Arc<dyn AccountStore>,
    pub codec: Arc<TokenCodec>,
    pub revoker: Arc<Revoker>,
    pub password_policy: PasswordPolicy,
    pub metrics: Option<Arc<AuthMetrics>>,
}

impl AppState {
    /// Assemble the state; the password policy comes from `config.auth`
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<dyn AccountStore>,
        codec: Arc<TokenCodec>,
        revoker: Arc<Revoker>,
        metrics: Option<Arc<AuthMetrics>>,
    ) -> Self {
        let password_policy = PasswordPolicy::from(&config.auth);
        Self { config, accounts, codec, revoker, password_policy, metrics }
    }
}

/// Start the gRPC server and run until `shutdown` resolves
///
/// Once `shutdown` resolves no new calls are accepted; the returned future
/// completes when in-flight calls have finished. Bounding that wait is up to
/// the caller.
pub async fn serve_grpc<F>(state: AppState, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    use grpc::proto::auth_service_server::AuthServiceServer;

    let gate = AuthGate::new(Arc::clone(&state.codec), state.metrics.clone());
    let service = AuthServiceImpl::new(state);

    // Set up reflection service
    let file_descriptor_set = tonic::include_file_descriptor_set!("taskd_descriptor");
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(file_descriptor_set)
        .build_v1()?;

    info!("Starting gRPC server on {} with authentication gate", addr);

    Server::builder()
        .add_service(AuthServiceServer::with_interceptor(service, gate))
        .add_service(reflection_service)
        .serve_with_shutdown(addr, shutdown)
        .await?;

    info!("gRPC server stopped");
    Ok(())
}
