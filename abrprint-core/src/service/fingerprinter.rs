use std::path::PathBuf;
use std::time::Duration;

use futures::future::try_join_all;
use rand::Rng;
use reqwest::header::{ORIGIN, RANGE, REFERER};
use reqwest::Method;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::boxes::{self, BoxError};
use crate::model::{Addressing, ExplicitAddressing, Fingerprint, IndexedAddressing, Variant};
use crate::transport::{is_http_url, local_path, parse_url, Transport, TransportError};

use super::variant_extractor::substitute_server;

#[derive(Debug, Error)]
pub enum FingerprinterError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("status {0}")]
    Status(reqwest::StatusCode),
    #[error("read {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("unsupported mime type {0:?}")]
    UnsupportedMime(String),
    #[error("webm not yet implemented")]
    WebmNotImplemented,
    #[error("invalid index range {0:?}")]
    InvalidIndexRange(String),
    #[error("parse index: {0}")]
    Index(#[from] BoxError),
    #[error("sidx box not found")]
    SidxNotFound,
    #[error("missing content length for {0:?}")]
    MissingContentLength(String),
    #[error("{0} exceeds u32")]
    Overflow(&'static str),
    #[error("attempt deadline exceeded")]
    AttemptTimeout,
    #[error("cancelled")]
    Cancelled,
}

pub type FingerprinterResult<T> = Result<T, FingerprinterError>;

/// Controls the HEAD probe retry loop. Tests tighten these to make the
/// loop deterministic.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per segment URL.
    pub attempts: usize,
    /// Deadline for a single attempt.
    pub attempt_timeout: Duration,
    /// Upper bound for the random back-off between attempts.
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            attempt_timeout: Duration::from_secs(10),
            backoff_cap: Duration::from_millis(1000),
        }
    }
}

/// The generic fingerprinter: turns a variant's addressing into the
/// (size, duration) sequence identifying its rendition.
#[derive(Clone)]
pub struct DefaultFingerprinter {
    transport: Transport,
    origin: Option<String>,
    retry: RetryPolicy,
}

impl DefaultFingerprinter {
    pub fn new(transport: Transport, origin: Option<String>) -> Self {
        Self {
            transport,
            origin,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn fingerprint(
        &self,
        variant: &Variant,
        cancel: &CancellationToken,
    ) -> FingerprinterResult<Fingerprint> {
        match &variant.addressing {
            Addressing::Fingerprinted(fingerprint) => Ok(fingerprint.clone()),
            Addressing::Indexed(info) => {
                self.fingerprint_indexed(&variant.mime_type, info, cancel).await
            }
            Addressing::Explicit(info) => self.fingerprint_explicit(info, cancel).await,
        }
    }

    async fn fingerprint_indexed(
        &self,
        mime_type: &str,
        info: &IndexedAddressing,
        cancel: &CancellationToken,
    ) -> FingerprinterResult<Fingerprint> {
        match mime_type {
            "video/mp4" => self.fingerprint_indexed_mp4(info, cancel).await,
            "video/webm" => Err(FingerprinterError::WebmNotImplemented),
            other => Err(FingerprinterError::UnsupportedMime(other.to_string())),
        }
    }

    async fn fingerprint_indexed_mp4(
        &self,
        info: &IndexedAddressing,
        cancel: &CancellationToken,
    ) -> FingerprinterResult<Fingerprint> {
        let index_range = if info.index_range.is_empty() {
            "0-65535"
        } else {
            info.index_range.as_str()
        };

        let raw = if is_http_url(&info.url) {
            self.fetch_index(&info.url, index_range, cancel).await?
        } else {
            read_range(&info.url, index_range).await?
        };

        let sidx = boxes::find_sidx(&raw)?.ok_or(FingerprinterError::SidxNotFound)?;

        let mut fingerprint = Fingerprint {
            segment_sizes: Vec::with_capacity(sidx.references.len()),
            segment_durations: Vec::with_capacity(sidx.references.len()),
            timescale: sidx.timescale,
        };
        for reference in &sidx.references {
            fingerprint.segment_sizes.push(reference.referenced_size);
            fingerprint
                .segment_durations
                .push(reference.subsegment_duration);
        }
        Ok(fingerprint)
    }

    async fn fetch_index(
        &self,
        url: &str,
        index_range: &str,
        cancel: &CancellationToken,
    ) -> FingerprinterResult<Vec<u8>> {
        let parsed = parse_url(url)?;
        let mut request = self
            .transport
            .request(Method::GET, parsed)
            .header(RANGE, format!("bytes={index_range}"));
        if let Some(origin) = &self.origin {
            request = request
                .header(ORIGIN, origin)
                .header(REFERER, format!("{origin}/"));
        }

        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(FingerprinterError::Status(response.status()));
        }
        let bytes = response.bytes().await.map_err(TransportError::Http)?;
        Ok(bytes.to_vec())
    }

    /// Probe every segment URL for its size. Output order follows the URL
    /// list, not probe completion order. A single failed URL fails the
    /// whole variant.
    async fn fingerprint_explicit(
        &self,
        info: &ExplicitAddressing,
        cancel: &CancellationToken,
    ) -> FingerprinterResult<Fingerprint> {
        let sizes = try_join_all(
            info.urls
                .iter()
                .map(|url| self.probe_segment(url, &info.servers, cancel)),
        )
        .await?;

        Ok(Fingerprint {
            segment_sizes: sizes,
            segment_durations: info.segment_durations.clone(),
            timescale: info.timescale,
        })
    }

    async fn probe_segment(
        &self,
        url: &str,
        servers: &[String],
        cancel: &CancellationToken,
    ) -> FingerprinterResult<u32> {
        // One server choice per segment URL, shared by every retry.
        let target = substitute_server(url, servers);
        let mut attempt = 1usize;
        loop {
            let outcome = match timeout(
                self.retry.attempt_timeout,
                self.content_length(&target, cancel),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(FingerprinterError::AttemptTimeout),
            };

            // A lapsed per-attempt deadline is retried; the pipeline's own
            // cancellation is not.
            if cancel.is_cancelled() {
                return Err(FingerprinterError::Cancelled);
            }

            match outcome {
                Ok(length) => {
                    if length > u32::MAX as u64 {
                        return Err(FingerprinterError::Overflow("content length"));
                    }
                    return Ok(length as u32);
                }
                Err(error) => {
                    if attempt >= self.retry.attempts {
                        return Err(error);
                    }
                    warn!(url = %target, attempt, error = %error, "segment probe failed, retrying");
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
                    let delay = jitter.min(self.retry.backoff_cap);
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn content_length(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> FingerprinterResult<u64> {
        if !is_http_url(url) {
            let path = local_path(url)?;
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|source| FingerprinterError::Io { source, path })?;
            return Ok(metadata.len());
        }

        let parsed = parse_url(url)?;
        let mut request = self.transport.request(Method::HEAD, parsed);
        if let Some(origin) = &self.origin {
            request = request
                .header(ORIGIN, origin)
                .header(REFERER, format!("{origin}/"));
        }

        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(FingerprinterError::Status(response.status()));
        }
        response
            .content_length()
            .ok_or_else(|| FingerprinterError::MissingContentLength(url.to_string()))
    }
}

/// Read an inclusive `"start-end"` byte range from a local file. Short
/// files yield whatever lies within the range.
async fn read_range(url: &str, index_range: &str) -> FingerprinterResult<Vec<u8>> {
    let invalid = || FingerprinterError::InvalidIndexRange(index_range.to_string());
    let (start, end) = index_range.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.parse().map_err(|_| invalid())?;
    let end: u64 = end.parse().map_err(|_| invalid())?;
    if end < start {
        return Err(invalid());
    }

    let path = local_path(url)?;
    let map_io = |source| FingerprinterError::Io {
        source,
        path: path.clone(),
    };

    let mut file = tokio::fs::File::open(&path).await.map_err(map_io)?;
    file.seek(std::io::SeekFrom::Start(start))
        .await
        .map_err(map_io)?;

    let mut buffer = Vec::new();
    file.take(end - start + 1)
        .read_to_end(&mut buffer)
        .await
        .map_err(map_io)?;
    Ok(buffer)
}

#[async_trait::async_trait]
impl super::Fingerprinter for DefaultFingerprinter {
    async fn fingerprint(
        &self,
        variant: &Variant,
        cancel: &CancellationToken,
    ) -> super::ServiceResult<Fingerprint> {
        Ok(DefaultFingerprinter::fingerprint(self, variant, cancel).await?)
    }
}
