//! Persistence, upload archiving and outbound HTTP for the portal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use fedbd_core::ImportType;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub mod db;
pub mod schema;

pub use db::{
    CalendarEvent, DocUpsertOutcome, DriveDocUpsert, ImportRunRecord, InsertOutcome, NewHolder,
    NewOpportunity, NewResearchDoc, NewSubscriber, NewUser, OutreachRecord, PortalStore, StoreError,
    SyncLogEntry, UserRecord,
};

pub const CRATE_NAME: &str = "fedbd-storage";

#[derive(Debug, Clone)]
pub struct ArchivedUpload {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Content-addressed archive of every CSV handed to the importer.
#[derive(Debug, Clone)]
pub struct UploadArchive {
    root: PathBuf,
}

impl UploadArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn upload_relative_path(
        &self,
        received_at: DateTime<Utc>,
        import_type: ImportType,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = received_at.format("%Y%m%d").to_string();
        PathBuf::from("imports")
            .join(stamp)
            .join(import_type.as_str())
            .join(format!("{content_hash}.csv"))
    }

    /// Store an upload under its hash; the same bytes on the same day land on the same path.
    pub async fn store_upload(
        &self,
        received_at: DateTime<Utc>,
        import_type: ImportType,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedUpload> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.upload_relative_path(received_at, import_type, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating upload directory {}", parent.display()))?;

        let archived = |deduplicated| ArchivedUpload {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking upload path {}", absolute_path.display()))?
        {
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp upload file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp upload file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp upload file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(archived(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(archived(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp upload {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

/// Why a failed Drive API call is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// 429, or 403 carrying a Drive rate-limit reason.
    Throttled,
    /// 408 or any 5xx.
    Upstream,
    /// Timeout, refused connection, or a response body that ended early.
    Transport,
}

/// Drive reports quota exhaustion as 403 with `rateLimitExceeded` or `userRateLimitExceeded`
/// in the error body; other 403s (permissions, disabled API) are final.
pub fn retry_reason_for_status(status: StatusCode, body: &[u8]) -> Option<RetryReason> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(RetryReason::Throttled);
    }
    if status == StatusCode::FORBIDDEN {
        let body = String::from_utf8_lossy(body).to_ascii_lowercase();
        return body.contains("ratelimitexceeded").then_some(RetryReason::Throttled);
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return Some(RetryReason::Upstream);
    }
    None
}

pub fn retry_reason_for_error(err: &reqwest::Error) -> Option<RetryReason> {
    (err.is_timeout() || err.is_connect() || err.is_request() || err.is_body())
        .then_some(RetryReason::Transport)
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
pub fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Waits between attempts: doubling from `first_delay`, never above `ceiling`. A throttled
/// response's `Retry-After` stretches the wait, still capped.
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    pub max_retries: usize,
    pub first_delay: Duration,
    pub ceiling: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_retries: 4,
            first_delay: Duration::from_secs(1),
            ceiling: Duration::from_secs(16),
        }
    }
}

impl RetrySchedule {
    pub fn delay(&self, attempt: usize, reason: RetryReason, retry_after: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        let mut wait = self.first_delay.saturating_mul(factor);
        if reason == RetryReason::Throttled {
            if let Some(hint) = retry_after {
                wait = wait.max(hint);
            }
        }
        wait.min(self.ceiling)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetrySchedule,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            retry: RetrySchedule::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One failed attempt and whether it may be repeated.
struct FailedAttempt {
    error: FetchError,
    reason: Option<RetryReason>,
    retry_after: Option<Duration>,
}

impl FailedAttempt {
    fn transport(err: reqwest::Error) -> Self {
        Self {
            reason: retry_reason_for_error(&err),
            retry_after: None,
            error: FetchError::Request(err),
        }
    }
}

/// reqwest client for the Drive v3 JSON API.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetrySchedule,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            retry: config.retry,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> Result<T, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let mut attempt = 0usize;
            loop {
                match self.try_once(url, query, bearer).await {
                    Ok(value) => return Ok(value),
                    Err(FailedAttempt {
                        error,
                        reason: Some(reason),
                        retry_after,
                    }) if attempt < self.retry.max_retries => {
                        let wait = self.retry.delay(attempt, reason, retry_after);
                        warn!(
                            error = %error,
                            ?reason,
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            "retrying Drive request"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    }
                    Err(failed) => return Err(failed.error),
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> Result<T, FailedAttempt> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(FailedAttempt::transport)?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let retry_after = retry_after_hint(resp.headers());
        let body = resp.bytes().await.map_err(FailedAttempt::transport)?;

        if !status.is_success() {
            return Err(FailedAttempt {
                reason: retry_reason_for_status(status, &body),
                retry_after,
                error: FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                },
            });
        }
        serde_json::from_slice(&body).map_err(|source| FailedAttempt {
            // A listing page cut off mid-body is a dropped connection, not a schema change.
            reason: source.is_eof().then_some(RetryReason::Transport),
            retry_after: None,
            error: FetchError::Decode { url: final_url, source },
        })
    }
}
