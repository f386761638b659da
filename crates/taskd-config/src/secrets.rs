//! Secret storage
//!
//! Durable key/value storage for the service's own secrets (the token signing
//! keypair). Two implementations are provided:
//! - `DirSecretVault`: one file per secret in a directory
//!   (works with Docker secrets or Kubernetes mounted volumes)
//! - `MemorySecretVault`: in-process storage for tests and ephemeral runs
//!
//! ## Example
//!
//! ```no_run
//! use taskd_config::secrets::{DirSecretVault, SecretVault};
//!
//! let vault = DirSecretVault::new("/etc/secrets");
//! let created = vault.set_if_absent("server-privkey", b"...")?;
//! # Ok::<(), taskd_config::secrets::SecretError>(())
//! ```

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Failed to access secret storage: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid secret name: {0}")]
    InvalidName(String),

    #[error("Invalid secret format: {0}")]
    InvalidFormat(String),
}

/// Secret storage interface
pub trait SecretVault: Send + Sync {
    /// Read a secret by name
    fn get(&self, name: &str) -> Result<Vec<u8>, SecretError>;

    /// Create or replace a secret
    fn set(&self, name: &str, value: &[u8]) -> Result<(), SecretError>;

    /// Create a secret only if no secret with that name exists.
    ///
    /// Returns `true` if this call created it, `false` if it was already
    /// present. Concurrent callers racing on the same name see exactly one
    /// `true`.
    fn set_if_absent(&self, name: &str, value: &[u8]) -> Result<bool, SecretError>;
}

fn validate_name(name: &str) -> Result<(), SecretError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid { Ok(()) } else { Err(SecretError::InvalidName(name.to_string())) }
}

/// Directory-backed secret vault
///
/// Each secret is a file named after the secret. Writes go through a
/// temporary file in the same directory so readers never observe a partial
/// value.
pub struct DirSecretVault {
    base_path: PathBuf,
}

impl DirSecretVault {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, SecretError> {
        validate_name(name)?;
        Ok(self.base_path.join(name))
    }

    /// Write `value` to a fresh temporary file next to the final location
    fn write_temp(&self, name: &str, value: &[u8]) -> Result<PathBuf, SecretError> {
        fs::create_dir_all(&self.base_path)?;

        let tmp = self.base_path.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        let written = file.write_all(value).and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(tmp)
    }
}

impl SecretVault for DirSecretVault {
    fn get(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        let path = self.path_for(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(name.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<(), SecretError> {
        let path = self.path_for(name)?;
        let tmp = self.write_temp(name, value)?;

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::debug!(secret = name, "Secret stored");
        Ok(())
    }

    fn set_if_absent(&self, name: &str, value: &[u8]) -> Result<bool, SecretError> {
        let path = self.path_for(name)?;
        let tmp = self.write_temp(name, value)?;

        // hard_link fails if the target exists, which makes creation atomic
        let result = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);

        match result {
            Ok(()) => {
                tracing::debug!(secret = name, "Secret created");
                Ok(true)
            },
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory secret vault (for testing)
#[derive(Default)]
pub struct MemorySecretVault {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.insert(name.into(), value.into());
        }
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, SecretError> {
        self.secrets
            .lock()
            .map_err(|_| SecretError::Io(io::Error::other("secret vault lock poisoned")))
    }
}

impl SecretVault for MemorySecretVault {
    fn get(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        self.lock()?.get(name).cloned().ok_or_else(|| SecretError::NotFound(name.to_string()))
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<(), SecretError> {
        validate_name(name)?;
        self.lock()?.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn set_if_absent(&self, name: &str, value: &[u8]) -> Result<bool, SecretError> {
        validate_name(name)?;
        let mut secrets = self.lock()?;
        if secrets.contains_key(name) {
            return Ok(false);
        }
        secrets.insert(name.to_string(), value.to_vec());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;

    #[test]
    fn test_memory_vault_roundtrip() {
        let vault = MemorySecretVault::new().with_secret("api-key", b"secret-value".to_vec());

        assert_eq!(vault.get("api-key").unwrap(), b"secret-value");
        assert!(matches!(vault.get("missing"), Err(SecretError::NotFound(_))));

        vault.set("api-key", b"rotated").unwrap();
        assert_eq!(vault.get("api-key").unwrap(), b"rotated");
    }

    #[test]
    fn test_memory_vault_set_if_absent() {
        let vault = MemorySecretVault::new();
        assert!(vault.set_if_absent("key", b"first").unwrap());
        assert!(!vault.set_if_absent("key", b"second").unwrap());
        assert_eq!(vault.get("key").unwrap(), b"first");
    }

    #[test]
    fn test_invalid_names_rejected() {
        let vault = MemorySecretVault::new();
        assert!(matches!(vault.set("../escape", b"x"), Err(SecretError::InvalidName(_))));
        assert!(matches!(vault.set(".hidden", b"x"), Err(SecretError::InvalidName(_))));
        assert!(matches!(vault.set("", b"x"), Err(SecretError::InvalidName(_))));

        let dir = tempfile::tempdir().unwrap();
        let vault = DirSecretVault::new(dir.path());
        assert!(matches!(vault.get("a/b"), Err(SecretError::InvalidName(_))));
    }

    #[test]
    fn test_dir_vault_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = DirSecretVault::new(dir.path().join("nested"));

        assert!(matches!(vault.get("server-pubkey"), Err(SecretError::NotFound(_))));

        vault.set("server-pubkey", &[0u8, 1, 2, 255]).unwrap();
        assert_eq!(vault.get("server-pubkey").unwrap(), vec![0u8, 1, 2, 255]);

        vault.set("server-pubkey", b"replaced").unwrap();
        assert_eq!(vault.get("server-pubkey").unwrap(), b"replaced");
    }

    #[test]
    fn test_dir_vault_set_if_absent_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let vault = DirSecretVault::new(dir.path());

        assert!(vault.set_if_absent("server-privkey", b"one").unwrap());
        assert!(!vault.set_if_absent("server-privkey", b"two").unwrap());
        assert_eq!(vault.get("server-privkey").unwrap(), b"one");

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_dir_vault_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let vault = DirSecretVault::new(dir.path());
        vault.set("server-privkey", b"seed").unwrap();

        let mode = fs::metadata(dir.path().join("server-privkey")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_dir_vault_concurrent_create_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(DirSecretVault::new(dir.path()));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let vault = Arc::clone(&vault);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    vault.set_if_absent("contested", &[i]).unwrap()
                })
            })
            .collect();

        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(winners, 1);
        assert_eq!(vault.get("contested").unwrap().len(), 1);
    }
}
