#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use chrono::{TimeZone, Utc};
use spring83_core::identity::Keypair;
use spring83_core::signing;
use spring83_server::clock::ManualClock;
use spring83_server::engine::{AdmissionPolicy, ProtocolEngine};
use spring83_server::http;
use spring83_server::store::BoardStore;
use spring83_server::store::fs::DirectoryBackend;
use tempfile::TempDir;
use tower::ServiceExt;

/// Seeds whose public keys are valid key identifiers.
pub const SEED: &str = "5509e4e19d71cdf6bcf1b92635c75ff2b9d1b878afec4b9547a78bb187698c87";
pub const KEY: &str = "53a1abd272b270bc2660244d44bf64c6072fe316091cd850d93ed02b383e0367";
pub const OTHER_SEED: &str = "6bf787cd246927adddeae27922659c814b9dfef264d71009b3260346ee721b1b";
pub const OTHER_KEY: &str = "15e1f40385e8f7393b2d63372b4e222cc87b19dd4ca0773b723f59d3883e0583";

pub struct TestServer {
    pub app: Router,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<ProtocolEngine>,
    _dir: TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_policy(AdmissionPolicy::default())
    }

    pub fn with_policy(policy: AdmissionPolicy) -> Self {
        Self::build(policy, Duration::from_secs(10))
    }

    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self::build(AdmissionPolicy::default(), request_timeout)
    }

    fn build(policy: AdmissionPolicy, request_timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()));
        let backend = DirectoryBackend::open(dir.path()).unwrap();
        let store = BoardStore::new(Box::new(backend), clock.clone());
        let engine = Arc::new(ProtocolEngine::new(store, policy));
        let app = http::router(engine.clone(), request_timeout);
        Self { app, clock, engine, _dir: dir }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

pub fn keypair() -> Keypair {
    Keypair::from_secret_hex(SEED).unwrap()
}

pub fn board_at(ts: &str) -> Vec<u8> {
    format!("<p>hello from the test suite</p><time datetime=\"{ts}\">{ts}</time>").into_bytes()
}

pub fn signed_put(key: &str, keypair: &Keypair, body: Vec<u8>) -> Request<Body> {
    let signature = signing::sign_hex(keypair.signing_key(), &body);
    Request::builder()
        .method("PUT")
        .uri(format!("/{key}"))
        .header("content-length", body.len())
        .header("content-type", "text/html;charset=utf-8")
        .header("spring-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}
