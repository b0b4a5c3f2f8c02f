//! # spring83-core
//!
//! Core types for the Spring '83 board protocol:
//! - Key identifiers (the board address and its Ed25519 public key)
//! - Ed25519 board signing and verification
//! - Extraction of the authoritative `<time>` element from board markup
//! - Protocol constants shared by the server and the client
//!
//! This crate has no network code and no storage code.

pub mod error;
pub mod identity;
pub mod key;
pub mod signing;
pub mod timestamp;

use std::time::Duration;

pub use error::{Error, Result};
pub use key::{BoardKey, KeyExpiry, INFERNAL_KEY, TEST_KEY};

/// Maximum size of a board in bytes.
pub const BOARD_LIMIT: usize = 2217;

/// How long a stored board stays readable after the server accepted it.
pub const BOARD_TTL: Duration = Duration::from_secs(22 * 24 * 3600);

/// Value of the `Spring-Version` header.
pub const SPRING_VERSION: &str = "83";

/// Header carrying the protocol version on every response.
pub const SPRING_VERSION_HEADER: &str = "Spring-Version";

/// Header carrying the hex-encoded Ed25519 signature of a PUT body.
pub const SIGNATURE_HEADER: &str = "Spring-Signature";
