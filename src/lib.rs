//! Minimal web and session server.
//!
//! A single TCP listener answers static-file `GET`s, a `POST` command
//! endpoint and opaque application payloads. The bundled application
//! handler manages users and encrypted sessions persisted under one home
//! directory.

pub mod auth;
pub mod cipher;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod runner;
pub mod transport;
pub mod value;

pub use config::Config;
