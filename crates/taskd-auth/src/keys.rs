//! Signing key management
//!
//! The service signs every token with a single Ed25519 keypair persisted in a
//! [`SecretVault`]. The private half is authoritative: it is stored as the
//! 32-byte seed under [`PRIVATE_KEY_NAME`], and the public half stored under
//! [`PUBLIC_KEY_NAME`] is always derivable from it.
//!
//! [`KeyPair::load_or_create`] runs once at startup. The resulting keypair is
//! immutable and shared as `Arc<KeyPair>`.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use ed25519_dalek::{SECRET_KEY_LENGTH, SigningKey, VerifyingKey};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand_core::{OsRng, RngCore};
use taskd_config::secrets::{SecretError, SecretVault};
use tracing::{info, warn};

use crate::error::{AuthError, Result};

/// Vault name of the private key seed
pub const PRIVATE_KEY_NAME: &str = "server-privkey";

/// Vault name of the public key
pub const PUBLIC_KEY_NAME: &str = "server-pubkey";

/// PKCS#8 v1 prefix for an Ed25519 private key (RFC 8410), followed by the 32-byte seed
const PKCS8_ED25519_PREFIX: [u8; 16] =
    [0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20];

/// The service's token signing keypair
pub struct KeyPair {
    verifying_key: VerifyingKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl KeyPair {
    /// Build a keypair from a signing key
    pub fn from_signing_key(signing_key: &SigningKey) -> Self {
        let mut pkcs8_der = PKCS8_ED25519_PREFIX.to_vec();
        pkcs8_der.extend_from_slice(&signing_key.to_bytes());

        let verifying_key = signing_key.verifying_key();

        Self {
            verifying_key,
            encoding_key: EncodingKey::from_ed_der(&pkcs8_der),
            decoding_key: DecodingKey::from_ed_der(verifying_key.as_bytes()),
        }
    }

    /// Generate a fresh keypair from OS randomness
    pub fn generate() -> Result<(SigningKey, Self)> {
        let signing_key = generate_signing_key()?;
        let pair = Self::from_signing_key(&signing_key);
        Ok((signing_key, pair))
    }

    /// Load the keypair from the vault, generating and persisting one if absent
    ///
    /// - If the private key exists, it is used; a missing public key is
    ///   re-derived and stored, and a stored public key that does not match
    ///   the private key is an error.
    /// - If the private key is missing, a new one is generated and claimed
    ///   with an atomic create. If another process created one first, that
    ///   one is loaded instead, so a vault only ever holds one keypair.
    ///
    /// # Errors
    ///
    /// Any vault failure, or unusable key material. Callers must treat this
    /// as fatal.
    pub fn load_or_create(vault: &dyn SecretVault) -> Result<Self> {
        let signing_key = match vault.get(PRIVATE_KEY_NAME) {
            Ok(bytes) => {
                info!("Loaded token signing key from secret vault");
                signing_key_from_bytes(&bytes)?
            },
            Err(SecretError::NotFound(_)) => create_private_key(vault)?,
            Err(e) => return Err(e.into()),
        };

        ensure_public_key(vault, &signing_key)?;
        Ok(Self::from_signing_key(&signing_key))
    }

    /// Key used to sign tokens
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Key used to verify token signatures
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Raw public key
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Base64 encoding of the public key, for logs and diagnostics
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.as_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

fn generate_signing_key() -> Result<SigningKey> {
    let mut seed = [0u8; SECRET_KEY_LENGTH];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| AuthError::InvalidKey(format!("entropy source failure: {}", e)))?;
    Ok(SigningKey::from_bytes(&seed))
}

fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey> {
    let seed: [u8; SECRET_KEY_LENGTH] = bytes.try_into().map_err(|_| {
        AuthError::InvalidKey(format!(
            "stored private key is {} bytes, expected {}",
            bytes.len(),
            SECRET_KEY_LENGTH
        ))
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

fn create_private_key(vault: &dyn SecretVault) -> Result<SigningKey> {
    let candidate = generate_signing_key()?;

    if vault.set_if_absent(PRIVATE_KEY_NAME, &candidate.to_bytes())? {
        warn!("No token signing key found; generated and stored a new Ed25519 keypair");
        return Ok(candidate);
    }

    // another process created the key between our read and our write
    info!("Token signing key was created concurrently; loading the stored one");
    signing_key_from_bytes(&vault.get(PRIVATE_KEY_NAME)?)
}

fn ensure_public_key(vault: &dyn SecretVault, signing_key: &SigningKey) -> Result<()> {
    let derived = signing_key.verifying_key();

    match vault.get(PUBLIC_KEY_NAME) {
        Ok(stored) if stored.as_slice() == derived.as_bytes() => Ok(()),
        Ok(_) => Err(AuthError::InvalidKey(
            "stored public key does not match the stored private key".into(),
        )),
        Err(SecretError::NotFound(_)) => {
            vault.set(PUBLIC_KEY_NAME, derived.as_bytes())?;
            info!("Stored token verification key in secret vault");
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}
