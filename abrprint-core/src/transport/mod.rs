mod headers;
mod limit;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::{Client, Method, RequestBuilder, Response};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use limit::HostLimits;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
    #[error("cancelled")]
    Cancelled,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// The one HTTP client every component sends through. Applies browser-like
/// default headers, the CORS heuristics and per-host rate limiting before a
/// request goes on the wire.
#[derive(Clone)]
pub struct Transport {
    client: Client,
    limits: Arc<HostLimits>,
}

impl Transport {
    pub fn new(jar: Arc<Jar>, limits: HostLimits) -> TransportResult<Self> {
        let client = Client::builder()
            .cookie_provider(jar)
            .http2_adaptive_window(true)
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(3 * 60))
            .build()?;
        Ok(Self {
            client,
            limits: Arc::new(limits),
        })
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Finalize and send a request. Blocks on the target host's token bucket
    /// if one is configured; aborts early when `cancel` fires.
    pub async fn send(
        &self,
        builder: RequestBuilder,
        cancel: &CancellationToken,
    ) -> TransportResult<Response> {
        let mut request = builder.build()?;
        headers::apply_defaults(&mut request);

        if let Some(host) = request.url().host_str() {
            if let Some(limiter) = self.limits.get(host) {
                tokio::select! {
                    _ = limiter.until_ready() => {}
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                }
            }
        }

        tokio::select! {
            result = self.client.execute(request) => Ok(result?),
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
        }
    }
}

/// Resolve a `file://` URL or a plain filesystem path to a `PathBuf`.
pub(crate) fn local_path(url: &str) -> TransportResult<PathBuf> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed
            .to_file_path()
            .map_err(|_| TransportError::InvalidUrl(url.to_string())),
        _ => Ok(PathBuf::from(url)),
    }
}

pub(crate) fn parse_url(url: &str) -> TransportResult<Url> {
    Url::parse(url).map_err(|_| TransportError::InvalidUrl(url.to_string()))
}

/// Whether a reference URL points at a remote HTTP(S) resource rather than
/// the local filesystem.
pub(crate) fn is_http_url(url: &str) -> bool {
    matches!(
        Url::parse(url).map(|u| u.scheme().to_string()).as_deref(),
        Ok("http") | Ok("https")
    )
}
