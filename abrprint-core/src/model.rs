use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::Serialize;

/// One ABR rendition of a video: codec, resolution and bitrate plus the
/// addressing information needed to fingerprint its physical segment layout.
#[derive(Debug, Clone, Serialize)]
pub struct Variant {
    #[serde(skip)]
    pub id: String,
    pub mime_type: String,
    pub codecs: String,
    pub width: u32,
    pub height: u32,
    pub bandwidth: u32,

    #[serde(skip)]
    pub addressing: Addressing,

    pub fingerprint: Option<Fingerprint>,
}

impl Variant {
    /// Recompute the content-hash identifier from the five identity fields.
    /// Must be called after any of them is mutated.
    pub fn recompute_id(&mut self) {
        self.id = variant_id(
            &self.mime_type,
            &self.codecs,
            self.width,
            self.height,
            self.bandwidth,
        );
    }
}

/// How a variant's media segments are located on the wire.
#[derive(Debug, Clone)]
pub enum Addressing {
    /// A single segmented file whose layout is described by a SIDX box
    /// within the given byte range.
    Indexed(IndexedAddressing),
    /// Concrete per-segment URLs whose sizes must be probed.
    Explicit(ExplicitAddressing),
    /// The playlist already carried the full layout; no probing needed.
    Fingerprinted(Fingerprint),
}

#[derive(Debug, Clone)]
pub struct IndexedAddressing {
    pub url: String,
    /// Inclusive `"start-end"` byte range of the index segment. Empty means
    /// the prober falls back to the first 64 KiB.
    pub index_range: String,
}

#[derive(Debug, Clone)]
pub struct ExplicitAddressing {
    pub template_url: String,
    pub urls: Vec<String>,
    pub servers: Vec<String>,
    pub segment_durations: Vec<u32>,
    pub timescale: u32,
}

/// Byte-level identity of one rendition: parallel segment size and duration
/// arrays plus the timescale the durations are expressed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    pub segment_sizes: Vec<u32>,
    pub segment_durations: Vec<u32>,
    pub timescale: u32,
}

/// A manifest pointer for one video in one ABR format, produced by a
/// service plugin and consumed by the variant extractor.
#[derive(Debug, Clone)]
pub struct Reference {
    pub id: String,
    pub format: AbrFormat,
    /// Manifest URL, possibly containing a `$Server$` placeholder.
    pub url: String,
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbrFormat {
    Dash,
    Hls,
}

impl fmt::Display for AbrFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbrFormat::Dash => write!(f, "dash"),
            AbrFormat::Hls => write!(f, "hls"),
        }
    }
}

/// Extraction-time filter over reference formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFilter {
    Dash,
    Hls,
    Both,
}

impl FormatFilter {
    pub fn accepts(self, format: AbrFormat) -> bool {
        match self {
            FormatFilter::Dash => format == AbrFormat::Dash,
            FormatFilter::Hls => format == AbrFormat::Hls,
            FormatFilter::Both => true,
        }
    }
}

impl FromStr for FormatFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dash" => Ok(FormatFilter::Dash),
            "hls" => Ok(FormatFilter::Hls),
            "both" => Ok(FormatFilter::Both),
            other => Err(format!("unknown format {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub playback_url: String,
    pub duration: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlExtractResult {
    pub service: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractResult {
    pub service: String,
    pub url: String,
    pub videos: Vec<Video>,
    pub num_failed: usize,
    #[serde(skip)]
    pub failed_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FingerprintResult {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<Variant>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

/// Content-hash identifier of a rendition: lower-case hex MD5 over the five
/// identity fields joined by dashes.
pub fn variant_id(mime_type: &str, codecs: &str, width: u32, height: u32, bandwidth: u32) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{mime_type}-{codecs}-{width}-{height}-{bandwidth}"));
    hex::encode(hasher.finalize())
}

/// Combine a main and a secondary title into one display title, with
/// `SxxxExxx` numbering when a season or episode number is known.
pub fn one_title(main: &str, secondary: &str, season: i32, episode: i32) -> String {
    let mut title = main.to_string();
    if season > 0 || episode > 0 {
        title.push_str(&format!(" S{season:03}E{episode:03}"));
        if !secondary.is_empty() && secondary != main {
            title.push(' ');
            title.push_str(secondary);
        }
        return title;
    }
    if !secondary.is_empty() && secondary != main {
        title.push_str(" - ");
        title.push_str(secondary);
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_id_is_deterministic() {
        let a = variant_id("video/mp4", "avc1.64001f", 1280, 720, 1_000_000);
        let b = variant_id("video/mp4", "avc1.64001f", 1280, 720, 1_000_000);
        assert_eq!(a, b);
        assert_eq!(a, "1adfd7d84d9e7864243f2cbd6769c9e4");
    }

    #[test]
    fn variant_id_changes_with_bandwidth() {
        let a = variant_id("video/mp4", "avc1.64001f", 1280, 720, 2000);
        let b = variant_id("video/mp4", "avc1.64001f", 1280, 720, 4000);
        assert_ne!(a, b);
        assert_eq!(b, "b229fe0d529823bb19a264feb7ad36fa");
    }

    #[test]
    fn one_title_forms() {
        assert_eq!(one_title("Show", "Pilot", 1, 2), "Show S001E002 Pilot");
        assert_eq!(one_title("Show", "Show", 1, 2), "Show S001E002");
        assert_eq!(one_title("Movie", "", 0, 0), "Movie");
        assert_eq!(one_title("Movie", "Part Two", 0, 0), "Movie - Part Two");
    }

    #[test]
    fn format_filter_accepts() {
        assert!(FormatFilter::Both.accepts(AbrFormat::Dash));
        assert!(FormatFilter::Both.accepts(AbrFormat::Hls));
        assert!(FormatFilter::Dash.accepts(AbrFormat::Dash));
        assert!(!FormatFilter::Dash.accepts(AbrFormat::Hls));
        assert!(!FormatFilter::Hls.accepts(AbrFormat::Dash));
    }
}
