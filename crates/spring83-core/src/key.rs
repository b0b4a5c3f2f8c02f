//! Board key identifiers.
//!
//! A key identifier is 64 lowercase hex characters: the 32 bytes of an
//! Ed25519 public key. Valid keys end in `83e` followed by a two-digit
//! month and a two-digit year, which together name the month after
//! which the key is no longer authorized:
//!
//! ```text
//! 53a1abd272b270bc2660244d44bf64c6072fe316091cd850d93ed02b3 83e 03 67
//! |------------------- 57 hex chars ----------------------| |   |  |
//!                                                   marker  month year
//! ```
//!
//! The same string is the board's address in URL paths, so the codec is
//! strict: lowercase only, exact length, no normalization.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use crate::error::{Error, Result};

/// Length of a key identifier in hex characters.
pub const KEY_LEN: usize = 64;

/// Reserved key that always serves generated content and is never stored.
pub const TEST_KEY: &str = "ab589f4dde9fce4180fcf42c7b05185b0a02a5d682e353fa39177995083e0583";

/// Reserved key that is rejected for both reads and writes.
pub const INFERNAL_KEY: &str = "d17eef211f510479ee6696495a2589f7e9fb055c2576749747d93444883e0123";

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{57}83e(0[1-9]|1[0-2])[0-9]{2}$").expect("key pattern compiles")
});

/// A validated key identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoardKey(String);

/// The month a key stops being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyExpiry {
    /// 1 through 12.
    pub month: u32,
    /// Four-digit year (`20YY`).
    pub year: i32,
}

impl KeyExpiry {
    /// First instant after the expiry month.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    /// Whether `now` falls after the last day of the expiry month.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at().is_some_and(|end| now >= end)
    }
}

impl BoardKey {
    /// Parse a key identifier exactly as it appears in a URL path segment.
    pub fn parse(segment: &str) -> Result<Self> {
        if KEY_PATTERN.is_match(segment) {
            Ok(Self(segment.to_string()))
        } else {
            Err(Error::InvalidKeyFormat(truncate_for_display(segment)))
        }
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The raw Ed25519 public key bytes encoded by this identifier.
    pub fn public_key_bytes(&self) -> Result<[u8; 32]> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&self.0, &mut bytes)
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
        Ok(bytes)
    }

    /// The expiry month and year embedded in the last four characters.
    pub fn expiry(&self) -> KeyExpiry {
        let tail = &self.0.as_bytes()[KEY_LEN - 4..];
        let digit = |b: u8| u32::from(b - b'0');
        KeyExpiry {
            month: digit(tail[0]) * 10 + digit(tail[1]),
            year: 2000 + (digit(tail[2]) * 10 + digit(tail[3])) as i32,
        }
    }

    pub fn is_test(&self) -> bool {
        self.0 == TEST_KEY
    }

    pub fn is_infernal(&self) -> bool {
        self.0 == INFERNAL_KEY
    }
}

/// Keep error messages bounded when someone sends a huge path.
fn truncate_for_display(segment: &str) -> String {
    segment.chars().take(KEY_LEN + 8).collect()
}

impl FromStr for BoardKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for BoardKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BoardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoardKey({})", self.0)
    }
}

impl fmt::Display for BoardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
