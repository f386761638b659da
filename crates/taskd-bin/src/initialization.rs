//! First-startup initialization
//!
//! Guarantees the service always has an administrator.
//!
//! # Initialization Flow
//!
//! 1. If any account holds the `ADMIN` role, do nothing
//! 2. Otherwise, if `admin@localhost` does not exist, create it with a
//!    generated password and log that password once
//! 3. Grant `ADMIN` to `admin@localhost`

use anyhow::{Context, Result};
use taskd_auth::generate_random_secret;
use taskd_config::AuthConfig;
use taskd_store::AccountStore;
use taskd_types::{NewUser, ROLE_ADMIN, ROLE_USER, User};
use tracing::{info, warn};

/// Email of the bootstrap administrator
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@localhost";

/// Display name of the bootstrap administrator
pub const DEFAULT_ADMIN_NAME: &str = "Default Admin";

/// Make sure an administrator exists
///
/// This function is idempotent and safe to call on every startup. Returns
/// the account created, if one was.
///
/// # Errors
///
/// Returns error if the account store fails or the password cannot be
/// generated.
pub async fn ensure_admin(accounts: &dyn AccountStore, auth: &AuthConfig) -> Result<Option<User>> {
    if accounts.admin_exists().await.context("Failed to check for an existing administrator")? {
        info!("Administrator account present");
        return Ok(None);
    }

    warn!("No user with the ADMIN role found; promoting the default admin user");

    let existing = accounts
        .find_by_email(DEFAULT_ADMIN_EMAIL)
        .await
        .context("Failed to look up the default admin user")?;

    let created = match existing {
        Some(_) => None,
        None => Some(create_default_admin(accounts, auth.bootstrap_password_len).await?),
    };

    accounts
        .grant_role(DEFAULT_ADMIN_EMAIL, ROLE_ADMIN)
        .await
        .context("Failed to grant ADMIN to the default admin user")?;

    Ok(created)
}

async fn create_default_admin(accounts: &dyn AccountStore, password_len: usize) -> Result<User> {
    let (password, secret_hash) =
        tokio::task::spawn_blocking(move || generate_random_secret(password_len))
            .await
            .context("Password generation task failed")?
            .context("Failed to generate the default admin password")?;

    let user = accounts
        .create_user(NewUser {
            name: DEFAULT_ADMIN_NAME.to_string(),
            email: DEFAULT_ADMIN_EMAIL.to_string(),
            secret_hash,
            roles: vec![ROLE_ADMIN.to_string(), ROLE_USER.to_string()],
        })
        .await
        .context("Failed to create the default admin user")?;

    warn!(
        admin_name = DEFAULT_ADMIN_NAME,
        admin_email = DEFAULT_ADMIN_EMAIL,
        admin_password = %password,
        "Created the default administrator. Note this password now, it is not shown again, \
         and change it as soon as possible"
    );

    Ok(user)
}
