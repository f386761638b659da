//! gRPC service implementation
//!
//! Each RPC lives in its own handler function; the trait impl below only
//! wraps them with a span and the request id.

use std::{future::Future, time::Instant};

use taskd_auth::{AuthError, TokenPair};
use taskd_observe::logging::{record_rpc_result, rpc_span};
use taskd_store::StoreError;
use taskd_types::User;
use tonic::{Request, Response, Status, metadata::MetadataValue};
use tracing::Instrument;

use crate::{
    AppState,
    grpc_interceptor::{REQUEST_ID_HEADER, auth_error_to_status, request_id, with_request_id},
};

mod account;
mod session;

/// Generated protobuf types
pub mod proto {
    #![allow(missing_docs, clippy::all)]
    tonic::include_proto!("taskd.v1");
}

use proto::{
    Identity, LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest, SessionResponse,
    SignupRequest, UpdateCredentialsRequest, UpdateCredentialsResponse, WhoAmIRequest,
    auth_service_server::AuthService,
};

/// `AuthService` backed by the shared application state
pub struct AuthServiceImpl {
    state: AppState,
}

impl AuthServiceImpl {
    /// Create the service
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn signup(
        &self,
        request: Request<SignupRequest>,
    ) -> Result<Response<SessionResponse>, Status> {
        let id = request_id(&request);
        instrumented("Signup", id, account::signup(self, request)).await
    }

    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<SessionResponse>, Status> {
        let id = request_id(&request);
        instrumented("Login", id, account::login(self, request)).await
    }

    async fn refresh(
        &self,
        request: Request<RefreshRequest>,
    ) -> Result<Response<proto::TokenPair>, Status> {
        let id = request_id(&request);
        instrumented("Refresh", id, session::refresh(self, request)).await
    }

    async fn logout(
        &self,
        request: Request<LogoutRequest>,
    ) -> Result<Response<LogoutResponse>, Status> {
        let id = request_id(&request);
        instrumented("Logout", id, session::logout(self, request)).await
    }

    async fn who_am_i(&self, request: Request<WhoAmIRequest>) -> Result<Response<Identity>, Status> {
        let id = request_id(&request);
        instrumented("WhoAmI", id, session::who_am_i(self, request)).await
    }

    async fn update_credentials(
        &self,
        request: Request<UpdateCredentialsRequest>,
    ) -> Result<Response<UpdateCredentialsResponse>, Status> {
        let id = request_id(&request);
        instrumented("UpdateCredentials", id, account::update_credentials(self, request)).await
    }
}

/// Run a handler inside an RPC span and echo the request id to the caller
async fn instrumented<T, F>(
    method: &'static str,
    request_id: String,
    handler: F,
) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<Response<T>, Status>>,
{
    let span = rpc_span(method, &request_id);
    let start = Instant::now();

    let result = handler.instrument(span.clone()).await;

    let elapsed_ms = start.elapsed().as_millis();
    match result {
        Ok(mut response) => {
            record_rpc_result(&span, "Ok", elapsed_ms);
            if let Ok(value) = MetadataValue::try_from(request_id.as_str()) {
                response.metadata_mut().insert(REQUEST_ID_HEADER, value);
            }
            Ok(response)
        },
        Err(status) => {
            record_rpc_result(&span, &format!("{:?}", status.code()), elapsed_ms);
            Err(with_request_id(status, &request_id))
        },
    }
}

/// Status for a store failure; the detail stays in the logs
fn store_status(error: StoreError) -> Status {
    auth_error_to_status(&AuthError::Store(error.to_string()))
}

impl From<&User> for proto::User {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            created_at: user.created_at.timestamp(),
            updated_at: user.updated_at.timestamp(),
        }
    }
}

impl From<TokenPair> for proto::TokenPair {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_expires_at: pair.access_expires_at.timestamp(),
            refresh_expires_at: pair.refresh_expires_at.timestamp(),
            access_token: pair.access,
            refresh_token: pair.refresh,
        }
    }
}
