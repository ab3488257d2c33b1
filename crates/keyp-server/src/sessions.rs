//! Token-based session store
//!
//! Maps opaque bearer tokens to unlocked-vault handles with deadlines. The
//! session ttl is the inner bound tied to a token; the handle keeps its own
//! outer deadline. Expired entries are surfaced as absent on lookup but
//! removed only by the eviction pass, which locks the handle (closing the
//! vault and zeroizing its key) before dropping the entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;

use keyp_core::handle::VaultHandle;

/// Token width in bytes (256 bits)
pub const TOKEN_BYTES: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,
}

/// An authenticated session bound to one bearer token.
#[derive(Clone)]
pub struct Session {
    pub token: String,
    pub handle: Arc<VaultHandle>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
            && self.created_at == other.created_at
            && self.expires_at == other.expires_at
            && Arc::ptr_eq(&self.handle, &other.handle)
    }
}

/// In-memory token-to-session map.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a handle under a fresh random token.
    ///
    /// Collisions at 256 bits are a cryptographic impossibility and are not
    /// handled specially.
    pub fn create(&self, handle: Arc<VaultHandle>, ttl: Duration) -> Session {
        let now = Utc::now();
        let session = Session {
            token: generate_token(),
            handle,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        };

        self.lock()
            .insert(session.token.clone(), session.clone());
        session
    }

    /// Look up a session. Expired entries are reported as such but left in
    /// place; the eviction pass owns removal.
    pub fn get(&self, token: &str) -> Result<Session, SessionStoreError> {
        let sessions = self.lock();
        let session = sessions.get(token).ok_or(SessionStoreError::NotFound)?;

        if Utc::now() > session.expires_at {
            return Err(SessionStoreError::Expired);
        }

        Ok(session.clone())
    }

    /// Reset a session's expiry to now + ttl. The handle's own deadline is
    /// untouched.
    pub fn refresh(
        &self,
        token: &str,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, SessionStoreError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(token)
            .ok_or(SessionStoreError::NotFound)?;

        session.expires_at =
            Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        Ok(session.expires_at)
    }

    /// Lock the session's handle and drop the entry. Idempotent on unknown
    /// tokens.
    pub fn delete(&self, token: &str) {
        let mut sessions = self.lock();
        if let Some(session) = sessions.remove(token) {
            session.handle.lock();
        }
    }

    /// Evict every expired session, locking each handle first.
    pub fn cleanup(&self) {
        let now = Utc::now();
        let mut sessions = self.lock();
        sessions.retain(|_, session| {
            if now > session.expires_at {
                debug!("evicting expired session");
                session.handle.lock();
                false
            } else {
                true
            }
        });
    }

    /// Lock every handle and empty the map; used on server shutdown.
    pub fn lock_all(&self) {
        let mut sessions = self.lock();
        for session in sessions.values() {
            session.handle.lock();
        }
        sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Generate a random bearer token: 32 bytes from the OS RNG, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn dummy_handle() -> Arc<VaultHandle> {
        Arc::new(VaultHandle::new("/nonexistent/vault.db"))
    }

    #[test]
    fn test_token_shape_and_uniqueness() {
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let token = generate_token();
            assert_eq!(token.len(), TOKEN_BYTES * 2);
            assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
            // First 128 bits already unique across draws
            assert!(seen.insert(token[..32].to_string()));
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new();
        let session = store.create(dummy_handle(), Duration::from_secs(60));

        let fetched = store.get(&session.token).unwrap();
        assert_eq!(fetched.token, session.token);
        assert_eq!(store.get("missing"), Err(SessionStoreError::NotFound));
    }

    #[test]
    fn test_expired_session_reported_but_kept() {
        let store = SessionStore::new();
        let session = store.create(dummy_handle(), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1100));

        assert_eq!(store.get(&session.token), Err(SessionStoreError::Expired));
        // Still present until the eviction pass runs
        assert_eq!(store.len(), 1);

        store.cleanup();
        assert_eq!(store.len(), 0);
        assert_eq!(store.get(&session.token), Err(SessionStoreError::NotFound));
    }

    #[test]
    fn test_refresh_extends_expiry() {
        let store = SessionStore::new();
        let session = store.create(dummy_handle(), Duration::from_secs(5));

        let extended = store
            .refresh(&session.token, Duration::from_secs(3600))
            .unwrap();
        assert!(extended > session.expires_at);

        assert_eq!(
            store.refresh("missing", Duration::from_secs(1)),
            Err(SessionStoreError::NotFound)
        );
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = SessionStore::new();
        let session = store.create(dummy_handle(), Duration::from_secs(60));

        store.delete(&session.token);
        store.delete(&session.token);
        assert_eq!(store.get(&session.token), Err(SessionStoreError::NotFound));
    }

    #[test]
    fn test_lock_all_empties_store() {
        let store = SessionStore::new();
        store.create(dummy_handle(), Duration::from_secs(60));
        store.create(dummy_handle(), Duration::from_secs(60));

        store.lock_all();
        assert!(store.is_empty());
    }
}
