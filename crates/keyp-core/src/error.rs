//! Error types for vault operations

use thiserror::Error;

/// Errors that can occur during vault operations.
///
/// This is a closed taxonomy: callers match on variants, never on message
/// text. Messages exist for human display only.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid master passphrase")]
    InvalidPassphrase,

    #[error("vault is locked - unlock with master passphrase first")]
    Locked,

    #[error("{0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// NotFound for a secret, with the conventional display form.
    pub fn secret_not_found(name: &str) -> Self {
        VaultError::NotFound(format!("secret '{name}'"))
    }

    /// AlreadyExists for a secret, with the conventional display form.
    pub fn secret_exists(name: &str) -> Self {
        VaultError::AlreadyExists(format!("secret '{name}'"))
    }
}

impl From<rusqlite::Error> for VaultError {
    /// Scrub database errors at the boundary: constraint violations become
    /// conflicts, missing rows become NotFound, everything else is reduced
    /// to a short result code so schema details never leak upward.
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => VaultError::NotFound("row".to_string()),
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                VaultError::AlreadyExists("record".to_string())
            }
            rusqlite::Error::SqliteFailure(e, _) => {
                VaultError::Database(format!("sqlite result code {}", e.extended_code))
            }
            _ => VaultError::Database("statement failed".to_string()),
        }
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthFailure => VaultError::InvalidPassphrase,
            CryptoError::InvalidParams(msg) => VaultError::BadRequest(msg),
            CryptoError::Rng(msg) | CryptoError::Cipher(msg) => VaultError::Crypto(msg),
        }
    }
}

/// Errors from the crypto envelope.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Wrong key or tampered ciphertext. The two are deliberately
    /// indistinguishable.
    #[error("decryption failed: invalid passphrase or corrupted data")]
    AuthFailure,

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("random generator failure: {0}")]
    Rng(String),

    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// Errors from the on-disk session file.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no session found")]
    NoSession,

    #[error("session expired")]
    Expired,

    #[error("invalid session file format")]
    Corrupt,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from vault synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("git binary not found")]
    GitMissing,

    #[error("git {command} failed: {output}")]
    GitCommand { command: String, output: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;
pub type CryptoResult<T> = Result<T, CryptoError>;
pub type SessionResult<T> = Result<T, SessionError>;
pub type SyncResult<T> = Result<T, SyncError>;
