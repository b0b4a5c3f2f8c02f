//! The request-level protocol state machine.
//!
//! Each GET or PUT is a short, single-pass sequence of checks. The
//! order matters and is part of the protocol: a malformed key is
//! reported before the infernal key, the infernal key before the body
//! is read, size before content, content before signature, signature
//! before the store is consulted.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use spring83_core::{BOARD_LIMIT, BoardKey, signing, timestamp};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ServerConfig, TimestampPolicy};
use crate::error::ProtocolError;
use crate::locks::KeyLocks;
use crate::pages;
use crate::store::{BoardStore, StoreError, StoredBoard};

/// Admission rules that are a matter of policy rather than protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub timestamps: TimestampPolicy,
    pub enforce_key_expiry: bool,
}

impl From<&ServerConfig> for AdmissionPolicy {
    fn from(config: &ServerConfig) -> Self {
        Self {
            timestamps: config.timestamp_policy,
            enforce_key_expiry: config.enforce_key_expiry,
        }
    }
}

/// What a successful GET produced.
#[derive(Debug)]
pub enum GetOutcome {
    /// The informational root page.
    Index(String),
    /// Generated content for the test key.
    TestBoard(String),
    Board(StoredBoard),
    /// The client's copy is current.
    NotModified { stored_at: DateTime<Utc> },
}

/// What a successful PUT did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored { stored_at: DateTime<Utc> },
    /// The test key accepts well-formed boards but never keeps them.
    Discarded,
}

/// The request headers a PUT decision depends on.
#[derive(Debug, Default, Clone, Copy)]
pub struct PutHeaders<'a> {
    pub content_length: Option<&'a str>,
    pub signature: Option<&'a str>,
}

pub struct ProtocolEngine {
    store: BoardStore,
    policy: AdmissionPolicy,
    locks: KeyLocks,
}

/// Leading and trailing slashes are not part of the key.
fn key_segment(path: &str) -> &str {
    path.trim_matches('/')
}

impl ProtocolEngine {
    pub fn new(store: BoardStore, policy: AdmissionPolicy) -> Self {
        Self {
            store,
            policy,
            locks: KeyLocks::new(),
        }
    }

    /// Open the configured store and apply the configured policy.
    pub fn open(config: &ServerConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let store = BoardStore::open(&config.storage, clock)?;
        Ok(Self::new(store, AdmissionPolicy::from(config)))
    }

    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Answer a GET for `path`.
    ///
    /// `if_modified_since` comes from the request header, already parsed.
    pub fn get(
        &self,
        path: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<GetOutcome, ProtocolError> {
        let segment = key_segment(path);
        if segment.is_empty() {
            return Ok(GetOutcome::Index(pages::index_page(self.store.now())));
        }
        if segment == spring83_core::TEST_KEY {
            return Ok(GetOutcome::TestBoard(pages::test_board(self.store.now())));
        }

        let key = BoardKey::parse(segment).map_err(|_| ProtocolError::UnknownKey)?;
        if key.is_infernal() {
            return Err(ProtocolError::InfernalKey);
        }

        let board = self.store.get(&key)?.ok_or(ProtocolError::NotFound)?;

        // HTTP dates carry whole seconds only.
        if let Some(since) = if_modified_since {
            if board.stored_at.timestamp() <= since.timestamp() {
                return Ok(GetOutcome::NotModified { stored_at: board.stored_at });
            }
        }
        Ok(GetOutcome::Board(board))
    }

    /// Answer a PUT for `path`.
    ///
    /// `read_body` is called at most once, with the declared length, and
    /// only after the key and the declared length have been accepted.
    pub async fn put<F, Fut, B>(
        &self,
        path: &str,
        headers: PutHeaders<'_>,
        read_body: F,
    ) -> Result<PutOutcome, ProtocolError>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = Result<B, ProtocolError>>,
        B: AsRef<[u8]>,
    {
        let key = BoardKey::parse(key_segment(path)).map_err(|_| ProtocolError::InvalidKey)?;
        if key.is_infernal() {
            return Err(ProtocolError::InfernalKey);
        }
        if self.policy.enforce_key_expiry && key.expiry().is_expired_at(self.store.now()) {
            debug!(key = %key, "rejected write under expired key");
            return Err(ProtocolError::KeyExpired);
        }

        let declared = headers
            .content_length
            .and_then(|value| value.trim().parse::<usize>().ok())
            .ok_or(ProtocolError::InvalidContentLength)?;
        if declared > BOARD_LIMIT {
            return Err(ProtocolError::TooLarge);
        }

        let body = read_body(declared).await?;
        let body = body.as_ref();
        if body.len() > BOARD_LIMIT {
            return Err(ProtocolError::TooLarge);
        }
        if body.len() != declared {
            return Err(ProtocolError::IncompleteBody);
        }

        if !timestamp::has_time_element(body) {
            return Err(ProtocolError::MissingTimeElement);
        }
        if !signing::verify_header(&key, body, headers.signature) {
            debug!(key = %key, "rejected board with invalid signature");
            return Err(ProtocolError::InvalidSignature);
        }

        let new_ts = timestamp::extract(body);
        if new_ts.is_none() && self.policy.timestamps == TimestampPolicy::Strict {
            return Err(ProtocolError::UnparseableTimestamp);
        }

        if key.is_test() {
            return Ok(PutOutcome::Discarded);
        }

        let _guard = self.locks.lock(&key).await;
        if self.store.exists(&key)? {
            if let Some(old) = self.store.load(&key)? {
                // Unknown on either side skips the comparison.
                if let (Some(old_ts), Some(new_ts)) = (timestamp::extract(&old.body), new_ts) {
                    if new_ts <= old_ts {
                        debug!(key = %key, %old_ts, %new_ts, "rejected non-monotonic board");
                        return Err(ProtocolError::NotMonotonic);
                    }
                }
            }
        }

        let stored_at = self.store.put(&key, body)?;
        info!(key = %key, bytes = body.len(), "Board accepted");
        Ok(PutOutcome::Stored { stored_at })
    }
}

/// Periodically delete expired boards. The first pass runs immediately.
pub fn spawn_sweeper(engine: Arc<ProtocolEngine>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.store().sweep_expired() {
                warn!("Expiry sweep failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::BoardBackend;
    use crate::store::sqlite::SqliteBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::TimeZone;
    use spring83_core::identity::Keypair;
    use spring83_core::{INFERNAL_KEY, TEST_KEY};
    use std::time::Duration;

    // Seeds whose public keys happen to be valid key identifiers.
    const SEED: &str = "5509e4e19d71cdf6bcf1b92635c75ff2b9d1b878afec4b9547a78bb187698c87";
    const KEY: &str = "53a1abd272b270bc2660244d44bf64c6072fe316091cd850d93ed02b383e0367";
    const OTHER_SEED: &str = "6bf787cd246927adddeae27922659c814b9dfef264d71009b3260346ee721b1b";

    struct Harness {
        engine: ProtocolEngine,
        clock: Arc<ManualClock>,
        keypair: Keypair,
    }

    fn harness_with(policy: AdmissionPolicy) -> Harness {
        harness_on(Box::new(SqliteBackend::in_memory().unwrap()), policy)
    }

    fn harness_on(backend: Box<dyn BoardBackend>, policy: AdmissionPolicy) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()));
        let store = BoardStore::new(backend, clock.clone());
        Harness {
            engine: ProtocolEngine::new(store, policy),
            clock,
            keypair: Keypair::from_secret_hex(SEED).unwrap(),
        }
    }

    fn harness() -> Harness {
        harness_with(AdmissionPolicy::default())
    }

    fn board_at(ts: &str) -> Vec<u8> {
        format!("<h1>hello</h1><time datetime=\"{ts}\">{ts}</time>").into_bytes()
    }

    impl Harness {
        async fn put_signed(&self, path: &str, body: Vec<u8>) -> Result<PutOutcome, ProtocolError> {
            let signature = signing::sign_hex(self.keypair.signing_key(), &body);
            self.put_raw(path, &body.len().to_string(), Some(&signature), body).await
        }

        async fn put_raw(
            &self,
            path: &str,
            content_length: &str,
            signature: Option<&str>,
            body: Vec<u8>,
        ) -> Result<PutOutcome, ProtocolError> {
            let headers = PutHeaders { content_length: Some(content_length), signature };
            self.engine.put(path, headers, |_| async move { Ok(body) }).await
        }

        fn get_body(&self, path: &str) -> Result<Vec<u8>, ProtocolError> {
            match self.engine.get(path, None)? {
                GetOutcome::Board(board) => Ok(board.body),
                other => panic!("expected a stored board, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn publish_then_read_back() {
        let h = harness();
        let body = board_at("2024-06-01T09:00:00Z");

        let outcome = h.put_signed(KEY, body.clone()).await.unwrap();
        assert_eq!(outcome, PutOutcome::Stored { stored_at: h.clock.now() });
        assert_eq!(h.get_body(KEY).unwrap(), body);
        assert_eq!(h.get_body(&format!("/{KEY}/")).unwrap(), body);
    }

    #[test]
    fn empty_path_serves_the_index() {
        let h = harness();
        assert!(matches!(h.engine.get("/", None), Ok(GetOutcome::Index(_))));
        assert!(matches!(h.engine.get("", None), Ok(GetOutcome::Index(_))));
    }

    #[test]
    fn read_errors_look_like_absence() {
        let h = harness();
        assert!(matches!(h.engine.get("invalid-key", None), Err(ProtocolError::UnknownKey)));
        assert!(matches!(h.engine.get(&KEY.to_uppercase(), None), Err(ProtocolError::UnknownKey)));
        assert!(matches!(h.engine.get(KEY, None), Err(ProtocolError::NotFound)));
    }

    #[tokio::test]
    async fn infernal_key_is_always_forbidden() {
        let h = harness();
        assert!(matches!(h.engine.get(INFERNAL_KEY, None), Err(ProtocolError::InfernalKey)));

        let called = std::cell::Cell::new(false);
        let result = h
            .engine
            .put(INFERNAL_KEY, PutHeaders::default(), |_| {
                called.set(true);
                async { Ok(Vec::<u8>::new()) }
            })
            .await;
        assert!(matches!(result, Err(ProtocolError::InfernalKey)));
        assert!(!called.get(), "body must not be read for the infernal key");
    }

    #[tokio::test]
    async fn test_key_is_generated_and_never_stored() {
        let h = harness();
        let at_ten = match h.engine.get(TEST_KEY, None).unwrap() {
            GetOutcome::TestBoard(html) => html,
            other => panic!("unexpected {other:?}"),
        };
        assert!(at_ten.contains("Current hour: 10"));

        h.clock.advance(Duration::from_secs(3600));
        let at_eleven = match h.engine.get(TEST_KEY, None).unwrap() {
            GetOutcome::TestBoard(html) => html,
            other => panic!("unexpected {other:?}"),
        };
        assert!(at_eleven.contains("Current hour: 11"));
        assert_ne!(at_ten, at_eleven);

        let test_key = BoardKey::parse(TEST_KEY).unwrap();
        assert!(!h.engine.store().exists(&test_key).unwrap());
    }

    #[tokio::test]
    async fn write_errors_are_diagnosable() {
        let h = harness();
        let result = h.put_signed("ab", board_at("2024-06-01T09:00:00Z")).await;
        assert!(matches!(result, Err(ProtocolError::InvalidKey)));
    }

    #[tokio::test]
    async fn content_length_must_be_present_and_numeric() {
        let h = harness();
        let headers = PutHeaders { content_length: None, signature: None };
        let result = h.engine.put(KEY, headers, |_| async { Ok(Vec::<u8>::new()) }).await;
        assert!(matches!(result, Err(ProtocolError::InvalidContentLength)));

        let result = h.put_raw(KEY, "twelve", None, Vec::new()).await;
        assert!(matches!(result, Err(ProtocolError::InvalidContentLength)));

        let result = h.put_raw(KEY, "-1", None, Vec::new()).await;
        assert!(matches!(result, Err(ProtocolError::InvalidContentLength)));
    }

    #[tokio::test]
    async fn size_limit_is_inclusive() {
        let h = harness();
        let mut body = board_at("2024-06-01T09:00:00Z");
        body.resize(BOARD_LIMIT, b' ');
        assert!(h.put_signed(KEY, body.clone()).await.is_ok());

        h.clock.advance(Duration::from_secs(60));
        let mut bigger = board_at("2024-06-01T10:00:00Z");
        bigger.resize(BOARD_LIMIT + 1, b' ');
        assert!(matches!(h.put_signed(KEY, bigger).await, Err(ProtocolError::TooLarge)));
        assert_eq!(h.get_body(KEY).unwrap(), body);
    }

    #[tokio::test]
    async fn oversized_declaration_is_rejected_before_reading() {
        let h = harness();
        let called = std::cell::Cell::new(false);
        let result = h
            .engine
            .put(KEY, PutHeaders { content_length: Some("2218"), signature: None }, |_| {
                called.set(true);
                async { Ok(Vec::<u8>::new()) }
            })
            .await;
        assert!(matches!(result, Err(ProtocolError::TooLarge)));
        assert!(!called.get());
    }

    #[tokio::test]
    async fn actual_length_is_checked_too() {
        let h = harness();
        let mut body = board_at("2024-06-01T09:00:00Z");
        body.resize(BOARD_LIMIT + 10, b' ');
        let result = h.put_raw(KEY, "100", None, body).await;
        assert!(matches!(result, Err(ProtocolError::TooLarge)));

        let result = h.put_raw(KEY, "100", None, b"<time".to_vec()).await;
        assert!(matches!(result, Err(ProtocolError::IncompleteBody)));
    }

    #[tokio::test]
    async fn board_needs_a_time_element() {
        let h = harness();
        let result = h.put_signed(KEY, b"<p>no timestamp here</p>".to_vec()).await;
        assert!(matches!(result, Err(ProtocolError::MissingTimeElement)));
    }

    #[tokio::test]
    async fn signature_must_match_key_and_body() {
        let h = harness();
        let body = board_at("2024-06-01T09:00:00Z");
        let len = body.len().to_string();

        let result = h.put_raw(KEY, &len, None, body.clone()).await;
        assert!(matches!(result, Err(ProtocolError::InvalidSignature)));

        let other = Keypair::from_secret_hex(OTHER_SEED).unwrap();
        let forged = signing::sign_hex(other.signing_key(), &body);
        let result = h.put_raw(KEY, &len, Some(&forged), body.clone()).await;
        assert!(matches!(result, Err(ProtocolError::InvalidSignature)));

        let key = BoardKey::parse(KEY).unwrap();
        assert!(!h.engine.store().exists(&key).unwrap());
    }

    #[tokio::test]
    async fn timestamps_must_increase() {
        let h = harness();
        h.put_signed(KEY, board_at("2024-06-01T09:00:00Z")).await.unwrap();

        let same = h.put_signed(KEY, board_at("2024-06-01T09:00:00Z")).await;
        assert!(matches!(same, Err(ProtocolError::NotMonotonic)));

        let earlier = h.put_signed(KEY, board_at("2024-06-01T08:59:59Z")).await;
        assert!(matches!(earlier, Err(ProtocolError::NotMonotonic)));

        // Same instant written with an offset is still not later.
        let offset = h.put_signed(KEY, board_at("2024-06-01T11:00:00+02:00")).await;
        assert!(matches!(offset, Err(ProtocolError::NotMonotonic)));

        let later = board_at("2024-06-01T09:00:01Z");
        h.put_signed(KEY, later.clone()).await.unwrap();
        assert_eq!(h.get_body(KEY).unwrap(), later);
    }

    #[tokio::test]
    async fn strict_policy_rejects_unparseable_timestamps() {
        let h = harness();
        let result = h.put_signed(KEY, board_at("yesterday")).await;
        assert!(matches!(result, Err(ProtocolError::UnparseableTimestamp)));

        // The bare tag passes admission but still has no usable timestamp.
        let result = h.put_signed(KEY, b"<time>soon</time>".to_vec()).await;
        assert!(matches!(result, Err(ProtocolError::UnparseableTimestamp)));
    }

    #[tokio::test]
    async fn permissive_policy_skips_the_comparison() {
        let h = harness_with(AdmissionPolicy {
            timestamps: TimestampPolicy::Permissive,
            enforce_key_expiry: false,
        });
        h.put_signed(KEY, board_at("2024-06-01T09:00:00Z")).await.unwrap();
        h.put_signed(KEY, board_at("yesterday")).await.unwrap();
        // The stored board's timestamp is unknown now, so anything goes.
        h.put_signed(KEY, board_at("2020-01-01T00:00:00Z")).await.unwrap();
        assert_eq!(h.get_body(KEY).unwrap(), board_at("2020-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn expired_boards_disappear_on_read() {
        let h = harness();
        h.put_signed(KEY, board_at("2024-06-01T09:00:00Z")).await.unwrap();
        let key = BoardKey::parse(KEY).unwrap();

        h.clock.advance(Duration::from_secs(22 * 24 * 3600 + 1));
        assert!(h.engine.store().exists(&key).unwrap());
        assert!(matches!(h.engine.get(KEY, None), Err(ProtocolError::NotFound)));
        assert!(!h.engine.store().exists(&key).unwrap());
    }

    #[tokio::test]
    async fn conditional_get_reports_not_modified() {
        let h = harness();
        h.put_signed(KEY, board_at("2024-06-01T09:00:00Z")).await.unwrap();
        let stored_at = h.clock.now();

        match h.engine.get(KEY, Some(stored_at)).unwrap() {
            GetOutcome::NotModified { stored_at: at } => assert_eq!(at, stored_at),
            other => panic!("unexpected {other:?}"),
        }
        let before = stored_at - chrono::Duration::seconds(1);
        assert!(matches!(h.engine.get(KEY, Some(before)).unwrap(), GetOutcome::Board(_)));
    }

    #[tokio::test]
    async fn test_key_writes_are_checked_but_discarded() {
        let h = harness();
        let body = board_at("2024-06-01T09:00:00Z");
        // Nobody here holds the test key's secret, so the signature fails.
        let result = h.put_signed(TEST_KEY, body).await;
        assert!(matches!(result, Err(ProtocolError::InvalidSignature)));

        let result = h.put_signed(TEST_KEY, b"<p>nothing</p>".to_vec()).await;
        assert!(matches!(result, Err(ProtocolError::MissingTimeElement)));
    }

    #[tokio::test]
    async fn key_expiry_is_enforced_only_when_enabled() {
        // The fixture key expires in March 2067.
        let h = harness_with(AdmissionPolicy {
            timestamps: TimestampPolicy::Strict,
            enforce_key_expiry: true,
        });
        h.put_signed(KEY, board_at("2024-06-01T09:00:00Z")).await.unwrap();

        h.clock.set(Utc.with_ymd_and_hms(2067, 4, 1, 0, 0, 0).unwrap());
        let result = h.put_signed(KEY, board_at("2067-04-01T00:00:00Z")).await;
        assert!(matches!(result, Err(ProtocolError::KeyExpired)));

        let lenient = harness();
        lenient.clock.set(Utc.with_ymd_and_hms(2067, 4, 1, 0, 0, 0).unwrap());
        assert!(lenient.put_signed(KEY, board_at("2067-04-01T00:00:00Z")).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_writers_cannot_both_win_with_stale_reads() {
        let h = Arc::new(harness());
        h.put_signed(KEY, board_at("2024-06-01T09:00:00Z")).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                h.put_signed(KEY, board_at("2024-06-01T12:00:00Z")).await.is_ok()
            }));
        }
        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn sweeper_removes_expired_boards() {
        let h = harness();
        h.put_signed(KEY, board_at("2024-06-01T09:00:00Z")).await.unwrap();
        h.clock.advance(Duration::from_secs(23 * 24 * 3600));

        let Harness { engine, .. } = h;
        let engine = Arc::new(engine);
        let sweeper = spawn_sweeper(engine.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        let key = BoardKey::parse(KEY).unwrap();
        assert!(!engine.store().exists(&key).unwrap());
    }

    /// Holds one board but cannot read it back.
    struct UnreadableBackend {
        inner: SqliteBackend,
        saves: Arc<AtomicUsize>,
    }

    impl BoardBackend for UnreadableBackend {
        fn load(&self, _key: &BoardKey) -> Result<Option<StoredBoard>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk unreadable")))
        }

        fn save(&self, key: &BoardKey, body: &[u8], stored_at: DateTime<Utc>) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(key, body, stored_at)
        }

        fn remove(&self, key: &BoardKey) -> Result<bool, StoreError> {
            self.inner.remove(key)
        }

        fn remove_if_stored_at(
            &self,
            key: &BoardKey,
            stored_at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.remove_if_stored_at(key, stored_at)
        }

        fn contains(&self, key: &BoardKey) -> Result<bool, StoreError> {
            self.inner.contains(key)
        }

        fn keys(&self) -> Result<Vec<BoardKey>, StoreError> {
            self.inner.keys()
        }
    }

    #[tokio::test]
    async fn unreadable_previous_board_fails_the_write() {
        let inner = SqliteBackend::in_memory().unwrap();
        let key = BoardKey::parse(KEY).unwrap();
        let stamped = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        inner.save(&key, &board_at("2024-06-01T09:00:00Z"), stamped).unwrap();

        let saves = Arc::new(AtomicUsize::new(0));
        let backend = UnreadableBackend { inner, saves: saves.clone() };
        let h = harness_on(Box::new(backend), AdmissionPolicy::default());

        let err = h.put_signed(KEY, board_at("2024-06-01T10:00:00Z")).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Storage(StoreError::Io(_))));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("disk unreadable"));
        assert_eq!(saves.load(Ordering::SeqCst), 0);
    }
}
