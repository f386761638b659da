use taskd_auth::{AuthError, Claims, RevocationReason, Revoker};
use taskd_types::TokenType;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use super::{
    AuthServiceImpl,
    proto::{Identity, LogoutRequest, LogoutResponse, RefreshRequest, TokenPair, WhoAmIRequest},
};
use crate::grpc_interceptor::{auth_error_to_status, require_credentials};

/// Spend a refresh token for a new pair
///
/// The spent token is revoked before the new pair is signed. The revocation
/// insert is the single point of contention, so of several concurrent
/// refreshes with the same token exactly one succeeds.
pub async fn refresh(
    service: &AuthServiceImpl,
    request: Request<RefreshRequest>,
) -> Result<Response<TokenPair>, Status> {
    let state = &service.state;
    let identity = require_credentials(&request, TokenType::Refresh)?;

    state
        .revoker
        .revoke(identity.token_id, identity.expires_at, RevocationReason::Refresh)
        .await
        .map_err(|e| {
            warn!(subject = %identity.subject, error = %e, "Refresh token could not be spent");
            auth_error_to_status(&e)
        })?;

    let pair = state
        .codec
        .issue(identity.subject, &identity.roles)
        .map_err(|e| auth_error_to_status(&e))?;

    info!(subject = %identity.subject, "Token pair refreshed");
    Ok(Response::new(pair.into()))
}

pub async fn logout(
    service: &AuthServiceImpl,
    request: Request<LogoutRequest>,
) -> Result<Response<LogoutResponse>, Status> {
    let state = &service.state;
    let identity = require_credentials(&request, TokenType::Access)?;
    let refresh_token = request.into_inner().refresh_token.filter(|t| !t.is_empty());

    // check the refresh token before revoking anything so a bad one leaves the session intact
    let refresh_claims = match refresh_token {
        Some(token) => {
            let claims = state
                .codec
                .validate(&token, Some(TokenType::Refresh))
                .await
                .map_err(|e| auth_error_to_status(&e))?;
            if claims.sub != identity.subject {
                warn!(subject = %identity.subject, "Logout with another subject's refresh token");
                return Err(Status::invalid_argument(
                    "refresh token does not belong to the caller",
                ));
            }
            Some(claims)
        },
        None => None,
    };

    // refresh first; a concurrent Refresh may already have spent it
    if let Some(claims) = &refresh_claims {
        revoke_refresh_on_logout(&state.revoker, claims).await.map_err(|e| auth_error_to_status(&e))?;
    }

    state
        .revoker
        .revoke(identity.token_id, identity.expires_at, RevocationReason::Logout)
        .await
        .map_err(|e| auth_error_to_status(&e))?;

    info!(subject = %identity.subject, refresh_revoked = refresh_claims.is_some(), "User logged out");
    Ok(Response::new(LogoutResponse { refresh_revoked: refresh_claims.is_some() }))
}

/// Revoke a logout's refresh token; one already spent counts as revoked
async fn revoke_refresh_on_logout(revoker: &Revoker, claims: &Claims) -> Result<(), AuthError> {
    match revoker.revoke_claims(claims, RevocationReason::Logout).await {
        Err(AuthError::AlreadyRevoked) => {
            debug!(subject = %claims.sub, "Refresh token was spent before logout revoked it");
            Ok(())
        },
        other => other,
    }
}

pub async fn who_am_i(
    _service: &AuthServiceImpl,
    request: Request<WhoAmIRequest>,
) -> Result<Response<Identity>, Status> {
    let identity = require_credentials(&request, TokenType::Access)?;

    Ok(Response::new(Identity {
        subject: identity.subject.to_string(),
        roles: identity.roles,
        token_type: identity.token_type.to_string(),
        expires_at: identity.expires_at.timestamp(),
    }))
}
