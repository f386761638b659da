//! Credential hashing
//!
//! Secrets are hashed with Argon2id using fixed cost parameters and stored as
//! `base64(salt)$base64(key)` (standard alphabet, padded). The parameters are
//! not encoded in the hash, so changing them invalidates every stored hash.
//!
//! Hashing costs ~64 MiB and is CPU-bound: async callers should run it on a
//! blocking thread (`tokio::task::spawn_blocking`).

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes
pub const KEY_LEN: usize = 32;

/// Argon2 time cost (iterations)
pub const TIME_COST: u32 = 1;

/// Argon2 memory cost in KiB (64 MiB)
pub const MEMORY_COST_KIB: u32 = 64 * 1024;

/// Argon2 lanes
pub const PARALLELISM: u32 = 4;

/// Separates the salt from the derived key in the stored form
pub const HASH_DELIMITER: char = '$';

/// Characters used for generated secrets. Excludes characters that need
/// quoting in shells and config files: `;` `"` `?` `'` `\`.
pub const SECRET_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#$%&()*+,-./:<=>@[]^_`{|}~";

/// Credential hashing failures
#[derive(Debug, Error)]
pub enum HashError {
    /// Stored hash does not have the expected shape
    #[error("Invalid hash format: {0}")]
    InvalidFormat(String),

    /// Secret does not match the stored hash
    #[error("Secret does not match")]
    Mismatch,

    /// The OS random source failed
    #[error("Entropy source failure: {0}")]
    Entropy(String),

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    Kdf(String),
}

fn kdf() -> Result<Argon2<'static>, HashError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, Some(KEY_LEN))
        .map_err(|e| HashError::Kdf(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive_key(secret: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN], HashError> {
    let mut key = [0u8; KEY_LEN];
    kdf()?.hash_password_into(secret, salt, &mut key).map_err(|e| HashError::Kdf(e.to_string()))?;
    Ok(key)
}

/// Hash a secret with a fresh random salt
///
/// # Errors
///
/// Fails only if the OS random source or the KDF fails.
pub fn hash_secret(secret: &str) -> Result<String, HashError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.try_fill_bytes(&mut salt).map_err(|e| HashError::Entropy(e.to_string()))?;

    let key = derive_key(secret.as_bytes(), &salt)?;

    Ok(format!("{}{}{}", STANDARD.encode(salt), HASH_DELIMITER, STANDARD.encode(key)))
}

/// Verify a secret against a stored hash
///
/// The derived key is compared in constant time.
///
/// # Errors
///
/// - `InvalidFormat` if the stored hash cannot be parsed
/// - `Mismatch` if the secret is wrong
pub fn verify_secret(secret: &str, stored: &str) -> Result<(), HashError> {
    let (salt_b64, key_b64) = stored
        .split_once(HASH_DELIMITER)
        .ok_or_else(|| HashError::InvalidFormat("missing delimiter".to_string()))?;

    let salt = STANDARD
        .decode(salt_b64)
        .map_err(|e| HashError::InvalidFormat(format!("salt: {}", e)))?;
    if salt.len() != SALT_LEN {
        return Err(HashError::InvalidFormat(format!(
            "salt is {} bytes, expected {}",
            salt.len(),
            SALT_LEN
        )));
    }

    let expected =
        STANDARD.decode(key_b64).map_err(|e| HashError::InvalidFormat(format!("key: {}", e)))?;

    let derived = derive_key(secret.as_bytes(), &salt)?;

    // ct_eq on slices of different lengths is false without inspecting content
    if bool::from(derived.as_slice().ct_eq(expected.as_slice())) {
        Ok(())
    } else {
        Err(HashError::Mismatch)
    }
}

/// Generate a random printable secret of `length` characters, and its hash
///
/// Every character is drawn from [`SECRET_CHARSET`] by rejection sampling
/// over OS randomness.
pub fn generate_random_secret(length: usize) -> Result<(String, String), HashError> {
    let secret = random_secret(length)?;
    let hash = hash_secret(&secret)?;
    Ok((secret, hash))
}

/// Generate a random printable secret of `length` characters without hashing it
pub fn random_secret(length: usize) -> Result<String, HashError> {
    let charset_len = SECRET_CHARSET.len();
    // largest multiple of the charset length that fits in a byte
    let limit = 256 - (256 % charset_len);

    let mut out = String::with_capacity(length);
    let mut buf = [0u8; 64];
    while out.len() < length {
        OsRng.try_fill_bytes(&mut buf).map_err(|e| HashError::Entropy(e.to_string()))?;
        for &byte in buf.iter().filter(|b| (**b as usize) < limit) {
            if out.len() == length {
                break;
            }
            out.push(SECRET_CHARSET[byte as usize % charset_len] as char);
        }
    }

    Ok(out)
}

/// Password acceptance policy, applied by callers before hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    /// Minimum length in characters
    pub min_len: usize,
    /// Maximum length in characters
    pub max_len: usize,
}

/// Why a password was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// Too short or too long
    #[error(
        "password is {len} characters long, which is outside the accepted range [{min}-{max}]"
    )]
    #[allow(missing_docs)]
    Length { len: usize, min: usize, max: usize },

    /// Contains a character outside printable ASCII
    #[error("password contains characters outside the printable ASCII range [32-126]")]
    IllegalCharacter,
}

impl PasswordPolicy {
    /// Create a policy with inclusive length bounds
    pub fn new(min_len: usize, max_len: usize) -> Self {
        Self { min_len, max_len }
    }

    /// Check a candidate password against the policy
    pub fn check(&self, password: &str) -> Result<(), PolicyViolation> {
        let len = password.chars().count();
        if len < self.min_len || len > self.max_len {
            return Err(PolicyViolation::Length { len, min: self.min_len, max: self.max_len });
        }

        if !password.chars().all(|c| (' '..='~').contains(&c)) {
            return Err(PolicyViolation::IllegalCharacter);
        }

        Ok(())
    }
}

impl From<&taskd_config::AuthConfig> for PasswordPolicy {
    fn from(config: &taskd_config::AuthConfig) -> Self {
        Self::new(config.min_password_len, config.max_password_len)
    }
}
