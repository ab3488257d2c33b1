//! Vault lifecycle: binds a derived key to a record store
//!
//! The vault is the only gate through which plaintext passes. Sensitive
//! field values are sealed on the way into the store and opened on the way
//! out; non-sensitive values pass through verbatim. Whether a candidate
//! passphrase is correct is answered by decrypting a sealed sentinel from
//! the metadata table, so the passphrase itself is never stored or retained.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::debug;

use crate::crypto::{self, DerivedKey, MIN_ITERATIONS, SALT_SIZE};
use crate::error::{VaultError, VaultResult};
use crate::models::Secret;
use crate::store::{SearchOptions, Store};

const VERIFICATION_PLAINTEXT: &str = "keyp-vault-v1";

/// Default vault path (~/.keyp/vault.db)
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".keyp")
        .join("vault.db")
}

/// Check whether a vault file exists at `path`.
pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// An unlocked vault: a store plus the key derived from its passphrase.
pub struct Vault {
    path: PathBuf,
    store: Store,
    key: DerivedKey,
}

impl Vault {
    /// Create a new vault at `path`, protected by `passphrase`.
    ///
    /// Refuses to overwrite an existing file. The containing directory is
    /// created with mode 0700. Returns the vault already unlocked.
    pub fn init(path: &Path, passphrase: &str) -> VaultResult<Self> {
        if exists(path) {
            return Err(VaultError::AlreadyExists(format!(
                "vault at {}",
                path.display()
            )));
        }

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
                }
            }
        }

        let store = Store::open(path)?;

        let salt = crypto::generate_salt();
        let key = crypto::derive_key(passphrase.as_bytes(), &salt, MIN_ITERATIONS)?;

        store.set_meta("salt", &BASE64.encode(salt))?;
        store.set_meta("iterations", &MIN_ITERATIONS.to_string())?;

        let vault = Self {
            path: path.to_path_buf(),
            store,
            key,
        };
        let verifier = vault.encrypt_value(VERIFICATION_PLAINTEXT)?;
        vault.store.set_meta("verify", &verifier)?;

        debug!(path = %vault.path.display(), "vault initialized");
        Ok(vault)
    }

    /// Open an existing vault with a passphrase.
    ///
    /// Any failure to decrypt the verifier, including a sentinel mismatch,
    /// is reported as [`VaultError::InvalidPassphrase`].
    pub fn open(path: &Path, passphrase: &str) -> VaultResult<Self> {
        let store = open_store(path)?;

        let salt_b64 = store.get_meta("salt")?;
        let iterations: u32 = store
            .get_meta("iterations")?
            .parse()
            .map_err(|_| VaultError::Database("corrupted vault metadata".to_string()))?;
        let salt = BASE64
            .decode(salt_b64)
            .map_err(|_| VaultError::Database("corrupted vault metadata".to_string()))?;
        if salt.len() != SALT_SIZE {
            return Err(VaultError::Database("corrupted vault metadata".to_string()));
        }

        let key = crypto::derive_key(passphrase.as_bytes(), &salt, iterations)?;
        Self::with_verified_key(path, store, key)
    }

    /// Open an existing vault with an already-derived key (the disk-session
    /// fast path). The passphrase is never seen here; the key is verified
    /// against the stored sentinel before use.
    pub fn open_with_key(path: &Path, key: DerivedKey) -> VaultResult<Self> {
        let store = open_store(path)?;
        Self::with_verified_key(path, store, key)
    }

    fn with_verified_key(path: &Path, store: Store, key: DerivedKey) -> VaultResult<Self> {
        let vault = Self {
            path: path.to_path_buf(),
            store,
            key,
        };

        let verifier = vault.store.get_meta("verify").map_err(|err| match err {
            VaultError::NotFound(_) => VaultError::InvalidPassphrase,
            other => other,
        })?;
        let plaintext = vault
            .decrypt_value(&verifier)
            .map_err(|_| VaultError::InvalidPassphrase)?;
        if plaintext != VERIFICATION_PLAINTEXT {
            return Err(VaultError::InvalidPassphrase);
        }

        Ok(vault)
    }

    /// Close the store. The key buffer is overwritten when the vault drops.
    pub fn close(self) -> VaultResult<()> {
        self.store.close()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn key(&self) -> &DerivedKey {
        &self.key
    }

    /// Add a new secret, sealing sensitive field values first.
    pub fn create(&self, secret: &Secret) -> VaultResult<()> {
        let encrypted = self.encrypt_secret(secret)?;
        self.store.create(&encrypted)
    }

    /// Retrieve a secret by name with sensitive field values opened.
    pub fn get_by_name(&self, name: &str) -> VaultResult<Secret> {
        let secret = self.store.get_by_name(name)?;
        self.decrypt_secret(secret)
    }

    /// Enumerate secrets (summary view, no fields loaded).
    pub fn list(&self, opts: &SearchOptions) -> VaultResult<Vec<Secret>> {
        self.store.list(opts)
    }

    /// Full-text search (summary view, no fields loaded).
    pub fn search(&self, query: &str, opts: &SearchOptions) -> VaultResult<Vec<Secret>> {
        self.store.search(query, opts)
    }

    /// Rewrite an existing secret, sealing sensitive field values first.
    /// The caller's `updated_at` is refreshed to the stored value.
    pub fn update(&self, secret: &mut Secret) -> VaultResult<()> {
        let mut encrypted = self.encrypt_secret(secret)?;
        self.store.update(&mut encrypted)?;
        secret.updated_at = encrypted.updated_at;
        Ok(())
    }

    /// Remove a secret by name.
    pub fn delete(&self, name: &str) -> VaultResult<()> {
        self.store.delete(name)
    }

    /// Copy of `secret` with every sensitive field value sealed under the
    /// vault key. A sealing failure aborts the whole operation.
    fn encrypt_secret(&self, secret: &Secret) -> VaultResult<Secret> {
        let mut copy = secret.clone();
        for field in &mut copy.fields {
            if field.sensitive {
                field.value = self.encrypt_value(&field.value)?;
            }
        }
        Ok(copy)
    }

    /// Counterpart of [`Self::encrypt_secret`] for the read path.
    fn decrypt_secret(&self, mut secret: Secret) -> VaultResult<Secret> {
        for field in &mut secret.fields {
            if field.sensitive {
                field.value = self.decrypt_value(&field.value)?;
            }
        }
        Ok(secret)
    }

    /// Seal one value under the vault key with a fresh nonce, serialized as
    /// `b64(iv):b64(ct):b64(tag)`.
    fn encrypt_value(&self, plaintext: &str) -> VaultResult<String> {
        let (ciphertext, tag, iv) = crypto::seal_with_key(&self.key, plaintext.as_bytes())?;
        Ok(format!(
            "{}:{}:{}",
            BASE64.encode(iv),
            BASE64.encode(ciphertext),
            BASE64.encode(tag),
        ))
    }

    /// Open one value sealed by [`Self::encrypt_value`]. Every failure mode
    /// collapses into InvalidPassphrase: the key no longer matches the
    /// stored ciphertext, which means corruption or a programming error.
    fn decrypt_value(&self, encoded: &str) -> VaultResult<String> {
        let mut parts = encoded.split(':');
        let (Some(iv), Some(ciphertext), Some(tag), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VaultError::InvalidPassphrase);
        };

        let iv = BASE64
            .decode(iv)
            .map_err(|_| VaultError::InvalidPassphrase)?;
        let ciphertext = BASE64
            .decode(ciphertext)
            .map_err(|_| VaultError::InvalidPassphrase)?;
        let tag = BASE64
            .decode(tag)
            .map_err(|_| VaultError::InvalidPassphrase)?;

        let plaintext = crypto::open_with_key(&self.key, &ciphertext, &tag, &iv)
            .map_err(|_| VaultError::InvalidPassphrase)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::InvalidPassphrase)
    }
}

fn open_store(path: &Path) -> VaultResult<Store> {
    if !exists(path) {
        return Err(VaultError::NotFound(format!("vault at {}", path.display())));
    }
    Store::open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Field;
    use tempfile::TempDir;

    const PASSPHRASE: &str = "correct horse battery staple";

    fn vault_path(dir: &TempDir) -> PathBuf {
        dir.path().join("vault.db")
    }

    #[test]
    fn test_init_then_open() {
        let dir = TempDir::new().unwrap();
        let path = vault_path(&dir);

        let vault = Vault::init(&path, PASSPHRASE).unwrap();
        vault.close().unwrap();

        let vault = Vault::open(&path, PASSPHRASE).unwrap();
        vault.close().unwrap();

        assert!(matches!(
            Vault::open(&path, "wrong"),
            Err(VaultError::InvalidPassphrase)
        ));
    }

    #[test]
    fn test_init_refuses_existing_vault() {
        let dir = TempDir::new().unwrap();
        let path = vault_path(&dir);

        Vault::init(&path, PASSPHRASE).unwrap().close().unwrap();
        assert!(matches!(
            Vault::init(&path, PASSPHRASE),
            Err(VaultError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_open_missing_vault() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Vault::open(&vault_path(&dir), PASSPHRASE),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_with_key_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = vault_path(&dir);

        let vault = Vault::init(&path, PASSPHRASE).unwrap();
        let key = vault.key().clone();
        vault.close().unwrap();

        let vault = Vault::open_with_key(&path, key).unwrap();
        vault.close().unwrap();

        // A random key must be rejected by the verifier
        let bogus =
            crypto::derive_key(b"other", &crypto::generate_salt(), MIN_ITERATIONS).unwrap();
        assert!(matches!(
            Vault::open_with_key(&path, bogus),
            Err(VaultError::InvalidPassphrase)
        ));
    }

    #[test]
    fn test_sensitive_values_encrypted_at_rest() {
        let dir = TempDir::new().unwrap();
        let path = vault_path(&dir);

        let vault = Vault::init(&path, PASSPHRASE).unwrap();
        let mut secret = Secret::new("gh");
        let mut username = Field::new("username", "alice");
        username.sensitive = false;
        secret.add_field(username);
        secret.add_field(Field::new("token", "ghp_abc123"));
        vault.create(&secret).unwrap();
        vault.close().unwrap();

        // Inspect the raw field table
        let conn = rusqlite::Connection::open(&path).unwrap();
        let stored_username: String = conn
            .query_row(
                "SELECT value FROM fields WHERE label = 'username'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let stored_token: String = conn
            .query_row(
                "SELECT value FROM fields WHERE label = 'token'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        drop(conn);

        assert_eq!(stored_username, "alice");
        let envelope =
            regex::Regex::new(r"^[A-Za-z0-9+/=]+:[A-Za-z0-9+/=]+:[A-Za-z0-9+/=]+$").unwrap();
        assert!(envelope.is_match(&stored_token));
        assert!(!stored_token.contains("ghp_"));

        // Reopen and verify the round trip
        let vault = Vault::open(&path, PASSPHRASE).unwrap();
        let loaded = vault.get_by_name("gh").unwrap();
        assert_eq!(loaded.field("token").unwrap().value, "ghp_abc123");
        assert_eq!(loaded.field("username").unwrap().value, "alice");
    }

    #[test]
    fn test_update_reencrypts_and_bumps_timestamp() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::init(&vault_path(&dir), PASSPHRASE).unwrap();

        let mut secret = Secret::new("gh");
        secret.add_field(Field::new("token", "first"));
        vault.create(&secret).unwrap();

        let mut loaded = vault.get_by_name("gh").unwrap();
        let before = loaded.updated_at;
        loaded.fields[0].value = "second".to_string();
        vault.update(&mut loaded).unwrap();
        assert!(loaded.updated_at >= before);

        let reloaded = vault.get_by_name("gh").unwrap();
        assert_eq!(reloaded.fields[0].value, "second");
    }

    #[test]
    fn test_delete_and_list() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::init(&vault_path(&dir), PASSPHRASE).unwrap();

        for name in ["a", "b"] {
            let mut secret = Secret::new(name);
            secret.add_field(Field::new("value", "v"));
            vault.create(&secret).unwrap();
        }

        assert_eq!(vault.list(&SearchOptions::default()).unwrap().len(), 2);
        vault.delete("a").unwrap();
        assert_eq!(vault.list(&SearchOptions::default()).unwrap().len(), 1);
        assert!(matches!(
            vault.delete("a"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_search_goes_through_vault() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::init(&vault_path(&dir), PASSPHRASE).unwrap();

        let mut secret = Secret::new("mail");
        secret.add_field(Field::new("password", "hunter2"));
        vault.create(&secret).unwrap();

        let opts = SearchOptions::default();
        assert_eq!(vault.search("mail", &opts).unwrap().len(), 1);
        assert_eq!(vault.search("password", &opts).unwrap().len(), 1);
        assert!(vault.search("hunter2", &opts).unwrap().is_empty());
    }
}
