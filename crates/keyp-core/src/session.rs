//! Cross-invocation disk session
//!
//! Lets a sequence of independent shell invocations share an unlocked vault
//! without re-typing the passphrase. Only the derived key is persisted,
//! never the passphrase: an attacker holding the file has the same power as
//! one holding the passphrase while the file is valid, which keeps the
//! PBKDF2 work factor out of the hot path without weakening the envelope.
//!
//! Format: `~/.keyp/session`, mode 0600, two lines — lowercase hex key,
//! decimal unix expiry.

use std::path::PathBuf;

use chrono::Utc;

use crate::crypto::DerivedKey;
use crate::error::{SessionError, SessionResult};

const SESSION_FILE: &str = "session";

/// Default disk-session lifetime (15 minutes)
pub const DEFAULT_SESSION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15 * 60);

/// Handles session persistence in a per-user directory.
pub struct SessionManager {
    session_dir: PathBuf,
    timeout: std::time::Duration,
}

impl SessionManager {
    /// Manager over the default `~/.keyp` directory.
    pub fn new(timeout: std::time::Duration) -> Self {
        let session_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".keyp");
        Self::with_dir(session_dir, timeout)
    }

    /// Manager over an explicit directory.
    pub fn with_dir(session_dir: impl Into<PathBuf>, timeout: std::time::Duration) -> Self {
        Self {
            session_dir: session_dir.into(),
            timeout,
        }
    }

    fn session_path(&self) -> PathBuf {
        self.session_dir.join(SESSION_FILE)
    }

    /// Persist the derived key with an expiry of now + timeout.
    pub fn save(&self, key: &DerivedKey) -> SessionResult<()> {
        std::fs::create_dir_all(&self.session_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.session_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let expiry = Utc::now().timestamp() + self.timeout.as_secs() as i64;
        let content = format!("{}\n{}", key.to_hex(), expiry);

        let path = self.session_path();
        std::fs::write(&path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Read the session file and return the derived key if still valid.
    pub fn load(&self) -> SessionResult<DerivedKey> {
        let data = match std::fs::read_to_string(self.session_path()) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NoSession)
            }
            Err(err) => return Err(err.into()),
        };

        let mut lines = data.lines();
        let key_hex = lines.next().ok_or(SessionError::Corrupt)?.trim();
        let expiry_str = lines.next().ok_or(SessionError::Corrupt)?.trim();

        let key = DerivedKey::from_hex(key_hex).map_err(|_| SessionError::Corrupt)?;
        let expiry: i64 = expiry_str.parse().map_err(|_| SessionError::Corrupt)?;

        if Utc::now().timestamp() > expiry {
            return Err(SessionError::Expired);
        }

        Ok(key)
    }

    /// Remove the session file; succeeds when already absent.
    pub fn clear(&self) -> SessionResult<()> {
        match std::fs::remove_file(self.session_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
