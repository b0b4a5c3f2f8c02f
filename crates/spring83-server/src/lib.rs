//! # spring83-server
//!
//! A Spring '83 board server: an HTTP service that accepts signed boards
//! under Ed25519 key identifiers, enforces the size, signature and
//! timestamp rules, and serves boards back until they expire.
//!
//! The [`engine::ProtocolEngine`] holds every protocol decision. The
//! [`http`] module only translates between HTTP and the engine, and the
//! [`store`] module only persists bytes.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod locks;
pub mod pages;
pub mod store;

pub use config::{Args, ServerConfig};
pub use engine::{AdmissionPolicy, ProtocolEngine};
pub use error::ProtocolError;
