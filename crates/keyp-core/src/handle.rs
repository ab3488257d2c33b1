//! Reusable handle over an unlocked vault
//!
//! A handle wraps an unlocked vault with an explicit deadline so repeated
//! operations avoid re-entering the passphrase. The handle never locks
//! itself when the deadline passes: callers (the CLI pre-run check, the
//! HTTP middleware) observe expiry at well-defined points and call
//! [`VaultHandle::lock`], which keeps expiry semantics deterministic.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::crypto::DerivedKey;
use crate::error::{VaultError, VaultResult};
use crate::vault::Vault;

/// Deadline applied when unlock is called without an explicit timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct HandleState {
    vault: Option<Vault>,
    /// Cached copy of the vault key, for persisting a disk session.
    key: Option<DerivedKey>,
    unlocked_at: Option<Instant>,
    timeout: Duration,
}

/// A lockable holder of an unlocked vault plus its expiry deadline.
///
/// Read-mostly predicates take the read half of the lock so they do not
/// serialize with each other; unlock and lock take the write half.
pub struct VaultHandle {
    path: PathBuf,
    state: RwLock<HandleState>,
}

impl VaultHandle {
    /// Create a handle for the vault at `path`, initially locked.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(HandleState {
                vault: None,
                key: None,
                unlocked_at: None,
                timeout: DEFAULT_TIMEOUT,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the vault with a passphrase and keep it in the handle.
    ///
    /// Key derivation happens before the writer lock is taken, so slow
    /// PBKDF2 work never blocks readers. A positive `timeout` replaces the
    /// current one; zero leaves it unchanged. Repeated unlocks reset the
    /// deadline.
    pub fn unlock(&self, passphrase: &str, timeout: Duration) -> VaultResult<()> {
        let vault = Vault::open(&self.path, passphrase)?;
        self.adopt(vault, timeout);
        Ok(())
    }

    /// Disk-session fast path: open the vault with an already-derived key.
    pub fn unlock_with_key(&self, key: DerivedKey, timeout: Duration) -> VaultResult<()> {
        let vault = Vault::open_with_key(&self.path, key)?;
        self.adopt(vault, timeout);
        Ok(())
    }

    fn adopt(&self, vault: Vault, timeout: Duration) {
        let key = vault.key().clone();
        let mut state = self.write();
        if let Some(previous) = state.vault.take() {
            if let Err(err) = previous.close() {
                warn!(error = %err, "failed to close previously unlocked vault");
            }
        }
        state.vault = Some(vault);
        state.key = Some(key);
        state.unlocked_at = Some(Instant::now());
        if !timeout.is_zero() {
            state.timeout = timeout;
        }
    }

    /// Close the vault and erase the cached key. Idempotent.
    pub fn lock(&self) {
        let mut state = self.write();
        if let Some(vault) = state.vault.take() {
            if let Err(err) = vault.close() {
                warn!(error = %err, "failed to close vault on lock");
            }
        }
        // Dropping the cached key overwrites its bytes, still under the
        // writer lock.
        state.key = None;
        state.unlocked_at = None;
    }

    /// Run `f` against the unlocked vault, or fail with `Locked`.
    pub fn with_vault<R>(&self, f: impl FnOnce(&Vault) -> VaultResult<R>) -> VaultResult<R> {
        let state = self.read();
        match state.vault.as_ref() {
            Some(vault) => f(vault),
            None => Err(VaultError::Locked),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.read().vault.is_some()
    }

    /// True once the deadline has passed. A locked handle is always
    /// expired.
    pub fn is_expired(&self) -> bool {
        let state = self.read();
        match (state.vault.as_ref(), state.unlocked_at) {
            (Some(_), Some(at)) => at.elapsed() > state.timeout,
            _ => true,
        }
    }

    /// Time remaining until the deadline; zero when locked or already past.
    pub fn time_until_expire(&self) -> Duration {
        let state = self.read();
        match (state.vault.as_ref(), state.unlocked_at) {
            (Some(_), Some(at)) => state.timeout.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// When the vault was last unlocked, if it currently is.
    pub fn unlocked_time(&self) -> Option<Instant> {
        self.read().unlocked_at
    }

    pub fn timeout(&self) -> Duration {
        self.read().timeout
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.write().timeout = timeout;
    }

    /// Copy of the derived key for persisting a disk session.
    pub fn derived_key(&self) -> Option<DerivedKey> {
        self.read().key.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, HandleState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HandleState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
