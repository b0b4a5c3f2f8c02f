//! HTTP surface: routes, response headers, and conditional GET.
//!
//! Endpoints:
//! - GET     /      informational page
//! - GET     /{key} a stored board, or the generated test board
//! - PUT     /{key} publish a signed board
//! - OPTIONS *      CORS preflight

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode, Uri,
        header::{self, CONTENT_LENGTH, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED},
    },
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use spring83_core::timestamp::{http_date, parse_http_date};
use spring83_core::{SIGNATURE_HEADER, SPRING_VERSION};
use tower_http::{set_header::SetResponseHeaderLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::engine::{GetOutcome, ProtocolEngine, PutHeaders, PutOutcome};
use crate::error::ProtocolError;

const BOARD_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Build the router. Every response, errors and timeouts included, carries
/// the protocol version and the CORS headers.
pub fn router(engine: Arc<ProtocolEngine>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(get_board).put(put_board).options(preflight))
        .route("/{*path}", get(get_board).put(put_board).options(preflight))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("spring-version"),
            HeaderValue::from_static(SPRING_VERSION),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, PUT, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Spring-Signature, Spring-Version"),
        ))
        .with_state(engine)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn last_modified(ts: DateTime<Utc>) -> Option<HeaderValue> {
    HeaderValue::from_str(&http_date(ts)).ok()
}

async fn get_board(
    State(engine): State<Arc<ProtocolEngine>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ProtocolError> {
    let since = header_str(&headers, IF_MODIFIED_SINCE.as_str()).and_then(parse_http_date);

    let response = match engine.get(uri.path(), since)? {
        GetOutcome::Index(html) | GetOutcome::TestBoard(html) => Html(html).into_response(),
        GetOutcome::Board(board) => {
            let mut response = (
                StatusCode::OK,
                [(CONTENT_TYPE, HeaderValue::from_static(BOARD_CONTENT_TYPE))],
                board.body,
            )
                .into_response();
            if let Some(value) = last_modified(board.stored_at) {
                response.headers_mut().insert(LAST_MODIFIED, value);
            }
            response
        }
        GetOutcome::NotModified { stored_at } => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            if let Some(value) = last_modified(stored_at) {
                response.headers_mut().insert(LAST_MODIFIED, value);
            }
            response
        }
    };
    Ok(response)
}

async fn put_board(
    State(engine): State<Arc<ProtocolEngine>>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ProtocolError> {
    let put_headers = PutHeaders {
        content_length: header_str(&headers, CONTENT_LENGTH.as_str()),
        signature: header_str(&headers, SIGNATURE_HEADER),
    };

    // The limit is the declared length, so a longer body fails the read.
    let read_body = |declared: usize| async move {
        axum::body::to_bytes(body, declared)
            .await
            .map_err(|_| ProtocolError::IncompleteBody)
    };

    match engine.put(uri.path(), put_headers, read_body).await? {
        PutOutcome::Stored { .. } | PutOutcome::Discarded => Ok(StatusCode::CREATED),
    }
}

async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, [(CONTENT_LENGTH, HeaderValue::from_static("0"))])
}
