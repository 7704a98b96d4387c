//! Session and identity management.
//!
//! Provides:
//! - Users with stretched-password verification and access levels
//! - Sessions holding a communication key and a rotating connection key,
//!   with sliding expiration
//! - Encrypted whole-file persistence (`users.db`, `sessions.db`)
//! - Encrypted protocol messages and the built-in session request handler
//!
//! Store corruption is not recovered from: callers serving clients hand
//! persistence errors to [`fatal`].

pub mod messages;
pub mod rpc;
pub mod store;
pub mod table;

pub use messages::{
    decode_response, empty_response, error_response, expired_response, response, Request,
    RequestError, NO_SESSION_KEY,
};
pub use rpc::SessionRpc;
pub use store::{Session, SessionStore, User, KEY_LEN, NO_EXPIRATION_SECS};

/// Logs an unrecoverable store failure and exits the process.
pub fn fatal(err: anyhow::Error) -> ! {
    tracing::error!("Session store failure: {err:#}");
    std::process::exit(1)
}
