//! keyp HTTP API
//!
//! Projects the vault's unlock/lock lifecycle onto a loopback REST surface:
//! token-based sessions over unlocked-vault handles, a JSON response
//! envelope, and middleware for authentication, logging, and panic
//! recovery.

pub mod handlers;
pub mod middleware;
pub mod server;
pub mod sessions;
pub mod types;

pub use server::{AppState, Server};
pub use sessions::{Session, SessionStore};
