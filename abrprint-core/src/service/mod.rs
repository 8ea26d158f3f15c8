pub mod amazon;
mod default;
mod fingerprinter;
mod justwatch;
pub mod svt;
mod variant_extractor;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::try_join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::model::{
    AbrFormat, Addressing, ExtractResult, Fingerprint, FingerprintResult, FormatFilter,
    IndexedAddressing, Reference, UrlExtractResult, Variant, Video,
};
use crate::transport::TransportError;

pub use default::DefaultService;
pub use fingerprinter::{DefaultFingerprinter, FingerprinterError, FingerprinterResult, RetryPolicy};
pub use justwatch::JustWatchUrlExtractor;
pub use variant_extractor::{DefaultVariantExtractor, ExtractorError, ExtractorResult};

pub const DEFAULT_SERVICE_ID: &str = "default";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service:?} already registered")]
    AlreadyRegistered { service: String },
    #[error("{service:?} does not provide {capability}")]
    MissingCapability {
        service: String,
        capability: Capability,
    },
    #[error("no service matches {url:?}")]
    NoServiceMatch { url: String },
    #[error("extract {url:?}: no fingerprints")]
    NoFingerprints { url: String },
    #[error("unsupported file extension {0:?}")]
    UnsupportedFile(String),
    #[error("extract variants: {0}")]
    Extract(#[from] ExtractorError),
    #[error("fingerprint: {0}")]
    Fingerprint(#[from] FingerprinterError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("status {0}")]
    Status(reqwest::StatusCode),
    #[error("decode body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("graphql: {0}")]
    GraphQl(String),
    #[error("invalid matcher: {0}")]
    Matcher(#[from] regex::Error),
    #[error("{0}")]
    Provider(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Capabilities a service plugin may advertise beyond its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    UrlList,
    VideoExtract,
    VariantExtract,
    Fingerprint,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Capability::UrlList => "url extraction",
            Capability::VideoExtract => "video extraction",
            Capability::VariantExtract => "variant extraction",
            Capability::Fingerprint => "fingerprinting",
        };
        write!(f, "{label}")
    }
}

/// A video the service resolved, together with its manifest references.
#[derive(Debug)]
pub struct ExtractedVideo {
    pub video: Video,
    pub references: Vec<Reference>,
}

pub type VideoResult = ServiceResult<ExtractedVideo>;

#[async_trait]
pub trait UrlExtractor: Send + Sync {
    async fn extract_urls(&self, cancel: &CancellationToken) -> ServiceResult<Vec<String>>;
}

pub trait VideoExtractor: Send + Sync {
    fn matches(&self, url: &str) -> bool;

    /// Lazily produce video results; each one is pushed onto the returned
    /// channel as soon as the service resolves it, so a large catalog does
    /// not buffer.
    fn video_extract(&self, url: &str, cancel: &CancellationToken)
        -> mpsc::Receiver<VideoResult>;
}

#[async_trait]
pub trait VariantExtractor: Send + Sync {
    async fn extract_variants(
        &self,
        reference: &Reference,
        cancel: &CancellationToken,
    ) -> ServiceResult<Vec<Variant>>;
}

#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(
        &self,
        variant: &Variant,
        cancel: &CancellationToken,
    ) -> ServiceResult<Fingerprint>;
}

/// A service plugin: a stable identity plus any subset of the optional
/// capabilities, self-described through the accessor methods.
pub trait Service: Send + Sync {
    fn id(&self) -> &str;

    fn url_extractor(&self) -> Option<&dyn UrlExtractor> {
        None
    }

    fn video_extractor(&self) -> Option<&dyn VideoExtractor> {
        None
    }

    fn variant_extractor(&self) -> Option<&dyn VariantExtractor> {
        None
    }

    fn fingerprinter(&self) -> Option<&dyn Fingerprinter> {
        None
    }
}

/// Registry of service plugins, indexed per capability, plus the pipeline
/// that drives extract → variants → fingerprint with bounded concurrency
/// and partial-failure accumulation.
pub struct ServiceManager {
    services: HashMap<String, Arc<dyn Service>>,
    url_extractors: HashMap<String, Arc<dyn Service>>,
    /// Registration order; URL matchers are tried in this order.
    video_extractors: Vec<Arc<dyn Service>>,
    variant_extractors: HashMap<String, Arc<dyn Service>>,
    fingerprinters: HashMap<String, Arc<dyn Service>>,
}

impl ServiceManager {
    pub fn new(default_service: DefaultService) -> Self {
        let mut manager = Self {
            services: HashMap::new(),
            url_extractors: HashMap::new(),
            video_extractors: Vec::new(),
            variant_extractors: HashMap::new(),
            fingerprinters: HashMap::new(),
        };
        // The default service's id is a constant; the first registration
        // cannot collide.
        let _ = manager.register(Arc::new(default_service));
        manager
    }

    pub fn register(&mut self, service: Arc<dyn Service>) -> ServiceResult<()> {
        let id = service.id().to_string();
        if self.services.contains_key(&id) {
            return Err(ServiceError::AlreadyRegistered { service: id });
        }

        if service.url_extractor().is_some() {
            self.url_extractors.insert(id.clone(), service.clone());
        }
        if service.video_extractor().is_some() {
            self.video_extractors.push(service.clone());
        }
        if service.variant_extractor().is_some() {
            self.variant_extractors.insert(id.clone(), service.clone());
        }
        if service.fingerprinter().is_some() {
            self.fingerprinters.insert(id.clone(), service.clone());
        }

        self.services.insert(id, service);
        Ok(())
    }

    pub async fn extract_urls(
        &self,
        service: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<UrlExtractResult> {
        let extractor = self
            .capability(&self.url_extractors, service, Capability::UrlList)?
            .url_extractor()
            .ok_or_else(|| missing(service, Capability::UrlList))?;

        let urls = extractor.extract_urls(cancel).await?;
        Ok(UrlExtractResult {
            service: service.to_string(),
            urls,
        })
    }

    /// Run the full pipeline for one input URL: match a service, drain its
    /// lazy video stream, extract and fingerprint variants per video.
    /// Individual video failures are accumulated, not fatal; an extraction
    /// that produces no videos at all fails.
    pub async fn extract(
        &self,
        url: &str,
        format: FormatFilter,
        cancel: &CancellationToken,
    ) -> ServiceResult<ExtractResult> {
        let service = self
            .video_extractors
            .iter()
            .find(|s| s.video_extractor().is_some_and(|ve| ve.matches(url)))
            .cloned()
            .ok_or_else(|| ServiceError::NoServiceMatch {
                url: url.to_string(),
            })?;

        let extractor = service
            .video_extractor()
            .ok_or_else(|| missing(service.id(), Capability::VideoExtract))?;

        let videos: Arc<Mutex<Vec<Video>>> = Arc::default();
        let failures: Arc<Mutex<Vec<String>>> = Arc::default();

        let mut receiver = extractor.video_extract(url, cancel);
        let mut tasks = JoinSet::new();
        while let Some(result) = receiver.recv().await {
            if cancel.is_cancelled() {
                break;
            }

            let service = service.clone();
            let videos = videos.clone();
            let failures = failures.clone();
            let cancel = cancel.clone();
            let url = url.to_string();
            tasks.spawn(async move {
                match result {
                    Err(error) => {
                        let mut failures = failures.lock().unwrap();
                        failures.push(format!("video extract {url:?}: {error}"));
                    }
                    Ok(extracted) => {
                        if let Err(error) =
                            process_video(service.as_ref(), &url, extracted, format, &videos, &cancel)
                                .await
                        {
                            failures.lock().unwrap().push(error);
                        }
                    }
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        let videos = std::mem::take(&mut *videos.lock().unwrap());
        let failed_errors = std::mem::take(&mut *failures.lock().unwrap());
        if videos.is_empty() {
            return Err(ServiceError::NoFingerprints {
                url: url.to_string(),
            });
        }

        Ok(ExtractResult {
            service: service.id().to_string(),
            url: url.to_string(),
            videos,
            num_failed: failed_errors.len(),
            failed_errors,
        })
    }

    /// Fingerprint a standalone manifest or fragmented MP4, dispatching on
    /// file extension.
    pub async fn fingerprint_file(
        &self,
        file_or_url: &str,
        base_url: &str,
        index_range: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<FingerprintResult> {
        match extension(file_or_url).as_str() {
            "mpd" => {
                let variants = self
                    .fingerprint_variants(AbrFormat::Dash, file_or_url, base_url, cancel)
                    .await?;
                Ok(FingerprintResult {
                    url: file_or_url.to_string(),
                    variants: Some(variants),
                    fingerprint: None,
                })
            }
            "m3u8" => {
                let variants = self
                    .fingerprint_variants(AbrFormat::Hls, file_or_url, base_url, cancel)
                    .await?;
                Ok(FingerprintResult {
                    url: file_or_url.to_string(),
                    variants: Some(variants),
                    fingerprint: None,
                })
            }
            "mp4" => {
                let variant = Variant {
                    id: String::new(),
                    mime_type: "video/mp4".to_string(),
                    codecs: String::new(),
                    width: 0,
                    height: 0,
                    bandwidth: 0,
                    addressing: Addressing::Indexed(IndexedAddressing {
                        url: file_or_url.to_string(),
                        index_range: index_range.to_string(),
                    }),
                    fingerprint: None,
                };
                let fingerprinter = self
                    .capability(&self.fingerprinters, DEFAULT_SERVICE_ID, Capability::Fingerprint)?
                    .fingerprinter()
                    .ok_or_else(|| missing(DEFAULT_SERVICE_ID, Capability::Fingerprint))?;
                let fingerprint = fingerprinter.fingerprint(&variant, cancel).await?;
                Ok(FingerprintResult {
                    url: file_or_url.to_string(),
                    variants: None,
                    fingerprint: Some(fingerprint),
                })
            }
            other => Err(ServiceError::UnsupportedFile(other.to_string())),
        }
    }

    async fn fingerprint_variants(
        &self,
        format: AbrFormat,
        file_or_url: &str,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<Vec<Variant>> {
        let reference = Reference {
            id: String::new(),
            format,
            url: file_or_url.to_string(),
            servers: vec![base_url.to_string()],
        };

        let extractor = self
            .capability(
                &self.variant_extractors,
                DEFAULT_SERVICE_ID,
                Capability::VariantExtract,
            )?
            .variant_extractor()
            .ok_or_else(|| missing(DEFAULT_SERVICE_ID, Capability::VariantExtract))?;
        let variants = extractor.extract_variants(&reference, cancel).await?;

        let fingerprinter = self
            .capability(&self.fingerprinters, DEFAULT_SERVICE_ID, Capability::Fingerprint)?
            .fingerprinter()
            .ok_or_else(|| missing(DEFAULT_SERVICE_ID, Capability::Fingerprint))?;

        try_join_all(variants.into_iter().map(|mut variant| async move {
            let fingerprint = fingerprinter.fingerprint(&variant, cancel).await?;
            variant.fingerprint = Some(fingerprint);
            Ok::<_, ServiceError>(variant)
        }))
        .await
    }

    fn capability<'a>(
        &self,
        index: &'a HashMap<String, Arc<dyn Service>>,
        service: &str,
        capability: Capability,
    ) -> ServiceResult<&'a Arc<dyn Service>> {
        index.get(service).ok_or_else(|| missing(service, capability))
    }
}

async fn process_video(
    service: &dyn Service,
    url: &str,
    extracted: ExtractedVideo,
    format: FormatFilter,
    videos: &Mutex<Vec<Video>>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let ExtractedVideo {
        mut video,
        references,
    } = extracted;

    let extractor = service
        .variant_extractor()
        .ok_or_else(|| missing(service.id(), Capability::VariantExtract).to_string())?;

    let variant_lists = try_join_all(
        references
            .iter()
            .filter(|reference| format.accepts(reference.format))
            .map(|reference| extractor.extract_variants(reference, cancel)),
    )
    .await
    .map_err(|error| format!("extract variants {url:?}: {error}"))?;

    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for variant in variant_lists.into_iter().flatten() {
        if seen.insert(variant.id.clone()) {
            unique.push(variant);
        }
    }

    let fingerprinter = service
        .fingerprinter()
        .ok_or_else(|| missing(service.id(), Capability::Fingerprint).to_string())?;

    let fingerprinted = try_join_all(unique.into_iter().map(|mut variant| async move {
        let fingerprint = fingerprinter.fingerprint(&variant, cancel).await?;
        variant.fingerprint = Some(fingerprint);
        Ok::<_, ServiceError>(variant)
    }))
    .await
    .map_err(|error| format!("fingerprint {url:?}: {error}"))?;

    video.variants = fingerprinted;
    videos.lock().unwrap().push(video);
    Ok(())
}

fn missing(service: &str, capability: Capability) -> ServiceError {
    ServiceError::MissingCapability {
        service: service.to_string(),
        capability,
    }
}

/// Lower-case extension of a URL path or filesystem path, without the dot.
fn extension(file_or_url: &str) -> String {
    let path = match Url::parse(file_or_url) {
        Ok(parsed) => Path::new(parsed.path())
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string),
        Err(_) => Path::new(file_or_url)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string),
    };
    path.unwrap_or_default().to_lowercase()
}
