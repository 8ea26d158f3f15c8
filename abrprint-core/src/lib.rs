pub mod boxes;
pub mod config;
pub mod geolocate;
pub mod manifest;
pub mod model;
pub mod service;
pub mod transport;

pub use config::AppConfig;
pub use model::{
    AbrFormat, Addressing, ExplicitAddressing, ExtractResult, Fingerprint, FingerprintResult,
    FormatFilter, IndexedAddressing, Reference, UrlExtractResult, Variant, Video,
};
pub use service::amazon::Amazon;
pub use service::svt::Svt;
pub use service::{
    Capability, DefaultFingerprinter, DefaultService, DefaultVariantExtractor, ExtractedVideo,
    Fingerprinter, JustWatchUrlExtractor, RetryPolicy, Service, ServiceError, ServiceManager,
    ServiceResult, UrlExtractor, VariantExtractor, VideoExtractor, VideoResult,
};
pub use transport::{HostLimits, Transport, TransportError};
