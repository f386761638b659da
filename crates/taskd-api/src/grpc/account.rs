use taskd_auth::{AuthError, authenticate_basic, hash_secret};
use taskd_store::StoreError;
use taskd_types::{NewUser, ROLE_USER, TokenType};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use super::{
    AuthServiceImpl, store_status,
    proto::{
        LoginRequest, SessionResponse, SignupRequest, UpdateCredentialsRequest,
        UpdateCredentialsResponse,
    },
};
use crate::{
    grpc_interceptor::{auth_error_to_status, require_basic, require_credentials},
    validation::{validate_email, validate_name},
};

pub async fn signup(
    service: &AuthServiceImpl,
    request: Request<SignupRequest>,
) -> Result<Response<SessionResponse>, Status> {
    let state = &service.state;
    let SignupRequest { name, email, password } = request.into_inner();

    if !state.config.signup.allow_new_users {
        return Err(Status::failed_precondition(
            "The server is not accepting new signups at this time",
        ));
    }

    let count = state.accounts.count().await.map_err(store_status)?;
    if count >= state.config.signup.max_users {
        warn!(users = count, max_users = state.config.signup.max_users, "Signup refused: user limit reached");
        return Err(Status::failed_precondition(
            "The server is not accepting new signups at this time",
        ));
    }

    let name = name.trim().to_string();
    validate_name(&name).map_err(|e| Status::invalid_argument(e.to_string()))?;
    validate_email(&email).map_err(|e| {
        warn!(error = %e, "Signup refused: invalid email");
        Status::invalid_argument(e.to_string())
    })?;
    state.password_policy.check(&password).map_err(|e| Status::invalid_argument(e.to_string()))?;

    let secret_hash = hash_off_runtime(password).await?;

    let user = state
        .accounts
        .create_user(NewUser { name, email, secret_hash, roles: vec![ROLE_USER.to_string()] })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => {
                warn!("Attempt to reuse existing email blocked");
                Status::already_exists("A user with this email is already registered")
            },
            other => store_status(other),
        })?;

    let tokens = state.codec.issue(user.id, &user.roles).map_err(|e| auth_error_to_status(&e))?;

    info!(subject = %user.id, "Successful user signup");
    Ok(Response::new(SessionResponse { user: Some((&user).into()), tokens: Some(tokens.into()) }))
}

pub async fn login(
    service: &AuthServiceImpl,
    request: Request<LoginRequest>,
) -> Result<Response<SessionResponse>, Status> {
    let state = &service.state;
    let credentials = require_basic(&request)?;

    let _timer = state.metrics.as_ref().map(|m| m.start_validation_timer("basic_verify"));
    let user = match authenticate_basic(state.accounts.as_ref(), &credentials).await {
        Ok(user) => {
            if let Some(m) = &state.metrics {
                m.record_validation_success("basic_verify");
            }
            user
        },
        Err(e) => {
            if let Some(m) = &state.metrics {
                m.record_validation_failure("basic_verify", e.label());
            }
            warn!(error_type = e.label(), "Login failed");
            return Err(auth_error_to_status(&e));
        },
    };

    let roles = state.accounts.roles(user.id).await.map_err(store_status)?;
    let tokens = state.codec.issue(user.id, &roles).map_err(|e| auth_error_to_status(&e))?;

    info!(subject = %user.id, "User logged in");
    Ok(Response::new(SessionResponse { user: Some((&user).into()), tokens: Some(tokens.into()) }))
}

/// Replace the caller's password
///
/// The hash is regenerated wholesale. Tokens already issued are left alone.
pub async fn update_credentials(
    service: &AuthServiceImpl,
    request: Request<UpdateCredentialsRequest>,
) -> Result<Response<UpdateCredentialsResponse>, Status> {
    let state = &service.state;
    let identity = require_credentials(&request, TokenType::Access)?;
    let UpdateCredentialsRequest { password } = request.into_inner();

    state.password_policy.check(&password).map_err(|e| Status::invalid_argument(e.to_string()))?;

    let secret_hash = hash_off_runtime(password).await?;

    state.accounts.update_secret(identity.subject, secret_hash).await.map_err(|e| match e {
        StoreError::NotFound => {
            warn!(subject = %identity.subject, "Credential update for a missing account");
            Status::not_found("account no longer exists")
        },
        other => store_status(other),
    })?;

    info!(subject = %identity.subject, "User credentials updated");
    Ok(Response::new(UpdateCredentialsResponse {}))
}

async fn hash_off_runtime(password: String) -> Result<String, Status> {
    tokio::task::spawn_blocking(move || hash_secret(&password))
        .await
        .map_err(|e| auth_error_to_status(&AuthError::Hashing(e.to_string())))?
        .map_err(|e| auth_error_to_status(&AuthError::from(e)))
}
