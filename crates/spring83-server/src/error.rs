//! Protocol rejections and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use spring83_core::BOARD_LIMIT;
use thiserror::Error;

use crate::store::StoreError;

/// Every way a request can be turned away. Each variant is terminal for
/// the request; nothing is retried.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed key on a read. Deliberately looks like "absent".
    #[error("Invalid key format")]
    UnknownKey,

    /// Malformed key on a write, where the publisher gets a real diagnosis.
    #[error("Invalid key format")]
    InvalidKey,

    #[error("Infernal key rejected")]
    InfernalKey,

    #[error("Key has expired")]
    KeyExpired,

    /// Absent and expired boards share this variant on purpose.
    #[error("Board not found")]
    NotFound,

    #[error("Invalid Content-Length")]
    InvalidContentLength,

    #[error("Body does not match Content-Length")]
    IncompleteBody,

    #[error("Board exceeds {} bytes", BOARD_LIMIT)]
    TooLarge,

    #[error("Missing <time> element")]
    MissingTimeElement,

    #[error("Unparseable <time> element")]
    UnparseableTimestamp,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Timestamp must be monotonically increasing")]
    NotMonotonic,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ProtocolError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownKey | Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidKey
            | Self::KeyExpired
            | Self::InvalidContentLength
            | Self::IncompleteBody
            | Self::MissingTimeElement
            | Self::UnparseableTimestamp => StatusCode::BAD_REQUEST,
            Self::InfernalKey => StatusCode::FORBIDDEN,
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::NotMonotonic => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        if let Self::Storage(ref e) = self {
            tracing::error!("Board storage failed: {e}");
        }
        (self.status(), self.to_string()).into_response()
    }
}
