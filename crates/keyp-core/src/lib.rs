//! keyp core - the trust-and-data engine of a local-first secret manager
//!
//! This crate provides:
//! - PBKDF2-derived AES-256-GCM envelope encryption for field values
//! - An SQLite record store with FTS5 search over non-secret metadata
//! - The vault lifecycle: init, unlock, bounded session, lock
//! - Disk sessions so repeated shell invocations skip the passphrase
//! - Configuration loading and off-site sync over the opaque vault files

pub mod config;
pub mod crypto;
pub mod error;
pub mod handle;
pub mod models;
pub mod session;
pub mod store;
pub mod sync;
pub mod vault;

pub use config::*;
pub use crypto::*;
pub use error::*;
pub use handle::*;
pub use models::*;
pub use session::*;
pub use store::*;
pub use sync::*;
pub use vault::*;
