//! Basic (identifier + secret) authentication
//!
//! Used where a caller has no token yet, which in practice means login.

use taskd_store::AccountStore;
use taskd_types::{BasicCredentials, User};
use tracing::debug;

use crate::{
    error::{AuthError, Result},
    password::verify_secret,
};

/// Hash verified when the account does not exist, so unknown and known
/// identifiers cost the same amount of work
const DUMMY_HASH: &str = "AAAAAAAAAAAAAAAAAAAAAA==$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// Check basic credentials against the account store
///
/// The identifier is the account email. The key derivation runs on the
/// blocking pool.
///
/// # Errors
///
/// - `InvalidCredentials` for an unknown account or a wrong secret; the two
///   are indistinguishable to the caller
/// - `Store` if the account store fails
/// - `Hashing` if the stored hash is corrupt
pub async fn authenticate_basic(
    accounts: &dyn AccountStore,
    credentials: &BasicCredentials,
) -> Result<User> {
    let found = accounts
        .find_by_email(&credentials.identifier)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

    let (user, stored_hash) = match found {
        Some((user, hash)) => (Some(user), hash),
        None => (None, DUMMY_HASH.to_string()),
    };

    let secret = credentials.secret.clone();
    let verified = tokio::task::spawn_blocking(move || verify_secret(&secret, &stored_hash))
        .await
        .map_err(|e| AuthError::Hashing(format!("verification task failed: {}", e)))?;

    match (user, verified) {
        (Some(user), Ok(())) => Ok(user),
        (None, _) => {
            debug!("Basic authentication for unknown account");
            Err(AuthError::InvalidCredentials)
        },
        (Some(_), Err(e)) => Err(e.into()),
    }
}
