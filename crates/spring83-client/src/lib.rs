//! # spring83-client
//!
//! Follows a list of boards into a local cache with conditional GETs, and
//! publishes signed boards to a server.
//!
//! The board list is a plain text file of URLs, one per line. Each board
//! is cached as `<cache>/<key>.html`; the file's modification time is the
//! server's `Last-Modified` and drives `If-Modified-Since` on the next
//! fetch.

pub mod error;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use spring83_core::identity::Keypair;
use spring83_core::timestamp::{http_date, parse_http_date};
use spring83_core::{SIGNATURE_HEADER, SPRING_VERSION, SPRING_VERSION_HEADER, signing};
use tracing::{debug, info, warn};
use url::Url;

pub use error::{ClientError, Result};

pub const USER_AGENT: &str = concat!("spring83-client/", env!("CARGO_PKG_VERSION"));

/// What a single fetch did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A fresh copy was written to `path`.
    Updated { path: PathBuf, bytes: usize },
    /// The cached copy is current.
    NotModified,
    /// The server answered with something other than 200 or 304.
    Failed(StatusCode),
}

/// Read a board list: one URL per line, blank lines and `#` comments skipped.
pub fn read_board_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|source| ClientError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_board_list(&text))
}

fn parse_board_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// The local board cache: one file per followed board.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Open the cache at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file for a board URL. The root page maps to `index.html`.
    pub fn path_for(&self, url: &Url) -> PathBuf {
        let key = url.path().trim_matches('/').replace('/', "_");
        if key.is_empty() {
            self.dir.join("index.html")
        } else {
            self.dir.join(format!("{key}.html"))
        }
    }
}

pub struct Client {
    http: reqwest::Client,
}

impl Client {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http })
    }

    /// Fetch one board, sending `If-Modified-Since` when a cached copy exists.
    pub async fn fetch(&self, cache: &Cache, url: &str) -> Result<FetchOutcome> {
        let url = Url::parse(url)?;
        let cache_path = cache.path_for(&url);

        let mut request = self
            .http
            .get(url.clone())
            .header(SPRING_VERSION_HEADER, SPRING_VERSION);
        if let Some(cached_at) = modified_at(&cache_path).await {
            request = request.header(IF_MODIFIED_SINCE, http_date(cached_at));
        }

        let response = request.send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => {
                let last_modified = response
                    .headers()
                    .get(LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_http_date);
                let body = response.bytes().await?;
                write_cached(&cache_path, &body, last_modified)?;
                debug!(%url, bytes = body.len(), "cached board");
                Ok(FetchOutcome::Updated { path: cache_path, bytes: body.len() })
            }
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            other => Ok(FetchOutcome::Failed(other)),
        }
    }

    /// Fetch every URL in turn. One failure never stops the rest.
    pub async fn fetch_all(
        &self,
        cache: &Cache,
        urls: &[String],
    ) -> Vec<(String, Result<FetchOutcome>)> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            let result = self.fetch(cache, url).await;
            match &result {
                Ok(FetchOutcome::Failed(status)) => warn!(%url, %status, "fetch refused"),
                Err(e) => warn!(%url, "fetch failed: {e}"),
                Ok(_) => {}
            }
            results.push((url.clone(), result));
        }
        results
    }

    /// Sign `board` with `keypair` and PUT it under the keypair's key.
    ///
    /// `server` is the base URL, e.g. `http://127.0.0.1:8083/`.
    pub async fn publish(&self, server: &str, keypair: &Keypair, board: &[u8]) -> Result<StatusCode> {
        let key = keypair.board_key()?;
        let url = Url::parse(server)?.join(key.as_str())?;
        let signature = signing::sign_hex(keypair.signing_key(), board);

        let response = self
            .http
            .put(url.clone())
            .header(SPRING_VERSION_HEADER, SPRING_VERSION)
            .header(SIGNATURE_HEADER, signature)
            .header(CONTENT_TYPE, "text/html;charset=utf-8")
            .body(board.to_vec())
            .send()
            .await?;
        let status = response.status();
        info!(%url, %status, "published board");
        Ok(status)
    }
}

async fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

/// Replace a cached board. The new copy, mtime included, is complete
/// before it is renamed over the old one.
fn write_cached(path: &Path, body: &[u8], last_modified: Option<DateTime<Utc>>) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".fetch-").tempfile_in(dir)?;
    tmp.write_all(body)?;
    if let Some(ts) = last_modified {
        tmp.as_file().set_modified(SystemTime::from(ts))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
