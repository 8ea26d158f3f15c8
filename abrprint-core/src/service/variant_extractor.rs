use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::try_join_all;
use rand::Rng;
use reqwest::header::{ORIGIN, REFERER};
use reqwest::Method;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::manifest::hls::{self, MasterVariant, Playlist, PlaylistError};
use crate::manifest::mpd::{
    AdaptationSet, Mpd, MpdError, Representation, SegmentTemplate,
};
use crate::model::{
    variant_id, AbrFormat, Addressing, ExplicitAddressing, Fingerprint, IndexedAddressing,
    Reference, Variant,
};
use crate::transport::{is_http_url, local_path, parse_url, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("status {0}")]
    Status(reqwest::StatusCode),
    #[error("read {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("parse mpd: {0}")]
    Mpd(#[from] MpdError),
    #[error("parse m3u8: {0}")]
    Playlist(#[from] PlaylistError),
    #[error("mpd is not static")]
    NotStatic,
    #[error("no variants found")]
    NoVariants,
    #[error("segment list not implemented")]
    SegmentListUnsupported,
    #[error("unknown addressing type")]
    UnknownAddressing,
    #[error("missing segment timeline")]
    MissingTimeline,
    #[error("expected exactly one of $Time$ or $Number$ in {0:?}")]
    Placeholder(String),
    #[error("missing time in segment timeline")]
    MissingTime,
    #[error("unlimited repeat in segment timeline")]
    UnlimitedRepeat,
    #[error("{0} exceeds u32")]
    Overflow(&'static str),
    #[error("master playlist not found")]
    MasterNotFound,
    #[error("media playlist not found")]
    MediaNotFound,
    #[error("invalid resolution {0:?}")]
    InvalidResolution(String),
    #[error("no codecs")]
    NoCodecs,
}

pub type ExtractorResult<T> = Result<T, ExtractorError>;

/// The generic variant extractor: resolves a reference's manifest into the
/// normalized per-rendition variant list. Service plugins reuse it with
/// their own site origin.
#[derive(Clone)]
pub struct DefaultVariantExtractor {
    transport: Transport,
    origin: Option<String>,
}

impl DefaultVariantExtractor {
    pub fn new(transport: Transport, origin: Option<String>) -> Self {
        Self { transport, origin }
    }

    pub async fn extract_variants(
        &self,
        reference: &Reference,
        cancel: &CancellationToken,
    ) -> ExtractorResult<Vec<Variant>> {
        match reference.format {
            AbrFormat::Dash => self.extract_mpd_variants(reference, cancel).await,
            AbrFormat::Hls => self.extract_m3u8_variants(reference, cancel).await,
        }
    }

    async fn extract_mpd_variants(
        &self,
        reference: &Reference,
        cancel: &CancellationToken,
    ) -> ExtractorResult<Vec<Variant>> {
        let (document, base) = self.load_manifest(reference, cancel).await?;

        let mpd = Mpd::parse(&document)?;
        if !mpd.is_static() {
            return Err(ExtractorError::NotStatic);
        }

        let base = resolve_base(&base, &mpd.base_urls);
        let mut group = VariantGroup::default();
        for period in &mpd.periods {
            let period_duration = period.duration.unwrap_or_default();
            let is_ad = period
                .supplemental_properties
                .iter()
                .any(|p| p.value.eq_ignore_ascii_case("ad"));
            if is_ad {
                continue;
            }

            let base = resolve_base(&base, &period.base_urls);
            for set in &period.adaptation_sets {
                if set.content_type.as_deref().is_some_and(|t| t != "video") {
                    continue;
                }

                let base = resolve_base(&base, &set.base_urls);
                for representation in &set.representations {
                    let mime_type = representation
                        .mime_type
                        .clone()
                        .or_else(|| set.mime_type.clone())
                        .unwrap_or_default();
                    if !mime_type.is_empty() && !mime_type.starts_with("video") {
                        continue;
                    }

                    let base = resolve_base(&base, &representation.base_urls);
                    let variant = extract_mpd_variant(
                        &base,
                        &reference.servers,
                        set,
                        representation,
                        mime_type,
                    )?;
                    group.add(variant, period_duration);
                }
            }
        }

        let merged = group.merge();
        if merged.is_empty() {
            return Err(ExtractorError::NoVariants);
        }
        Ok(merged)
    }

    async fn extract_m3u8_variants(
        &self,
        reference: &Reference,
        cancel: &CancellationToken,
    ) -> ExtractorResult<Vec<Variant>> {
        let (contents, base) = self.load_manifest(reference, cancel).await?;

        let Playlist::Master(master) = hls::parse(&contents)? else {
            return Err(ExtractorError::MasterNotFound);
        };

        let variants = try_join_all(
            master
                .variants
                .iter()
                .filter(|v| v.resolution.is_some())
                .map(|v| self.extract_m3u8_variant(&base, reference, v, cancel)),
        )
        .await?;
        Ok(variants)
    }

    async fn extract_m3u8_variant(
        &self,
        base: &str,
        reference: &Reference,
        master_variant: &MasterVariant,
        cancel: &CancellationToken,
    ) -> ExtractorResult<Variant> {
        let resolution = master_variant.resolution.as_deref().unwrap_or_default();
        let invalid = || ExtractorError::InvalidResolution(resolution.to_string());
        let (width, height) = resolution.split_once('x').ok_or_else(invalid)?;
        let width: u32 = width.parse().map_err(|_| invalid())?;
        let height: u32 = height.parse().map_err(|_| invalid())?;

        if master_variant.bandwidth > u32::MAX as u64 {
            return Err(ExtractorError::Overflow("bandwidth"));
        }
        let bandwidth = master_variant.bandwidth as u32;
        let codecs = master_variant
            .codecs
            .first()
            .ok_or(ExtractorError::NoCodecs)?
            .clone();

        let media_url = resolve_reference(base, &master_variant.uri);
        let contents = self.fetch_document(&media_url, cancel).await?;
        let Playlist::Media(media) = hls::parse(&contents)? else {
            return Err(ExtractorError::MediaNotFound);
        };

        let mut mime_type = String::new();
        let mut embedded: Option<Fingerprint> = None;
        let mut explicit = ExplicitAddressing {
            template_url: String::new(),
            urls: Vec::new(),
            servers: reference.servers.clone(),
            segment_durations: Vec::new(),
            timescale: 1000,
        };

        for segment in &media.segments {
            if mime_type.is_empty() {
                mime_type = match segment_extension(&segment.uri) {
                    Some("ts") => "video/mp2t".to_string(),
                    Some("m4s" | "m4v" | "mp4") => "video/mp4".to_string(),
                    _ => String::new(),
                };
            }

            let millis = (segment.duration * 1000.0).round();
            if millis > u32::MAX as f64 {
                return Err(ExtractorError::Overflow("segment duration"));
            }
            let duration = millis as u32;

            // Byte-range media segments already describe the physical
            // layout; only the range length matters, positions are treated
            // as contiguous.
            if let Some(length) = segment.byte_range_length {
                if length > u32::MAX as u64 {
                    return Err(ExtractorError::Overflow("segment size"));
                }
                let fingerprint = embedded.get_or_insert_with(|| Fingerprint {
                    segment_sizes: Vec::new(),
                    segment_durations: Vec::new(),
                    timescale: 1000,
                });
                fingerprint.segment_sizes.push(length as u32);
                fingerprint.segment_durations.push(duration);
                continue;
            }

            explicit.urls.push(resolve_reference(&media_url, &segment.uri));
            explicit.segment_durations.push(duration);
        }

        let id = variant_id(&mime_type, &codecs, width, height, bandwidth);
        let addressing = match embedded {
            Some(fingerprint) => Addressing::Fingerprinted(fingerprint),
            None => Addressing::Explicit(explicit),
        };

        Ok(Variant {
            id,
            mime_type,
            codecs,
            width,
            height,
            bandwidth,
            addressing,
            fingerprint: None,
        })
    }

    /// Fetch or read the top-level manifest and work out the base URL the
    /// rest of the document resolves against.
    async fn load_manifest(
        &self,
        reference: &Reference,
        cancel: &CancellationToken,
    ) -> ExtractorResult<(String, String)> {
        if is_http_url(&reference.url) {
            let url = substitute_server(&reference.url, &reference.servers);
            let document = self.fetch_document(&url, cancel).await?;
            return Ok((document, url));
        }

        let document = self.fetch_document(&reference.url, cancel).await?;
        let base = match reference.servers.first().filter(|s| !s.is_empty()) {
            Some(server) => server.clone(),
            None => reference.url.clone(),
        };
        Ok((document, base))
    }

    async fn fetch_document(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> ExtractorResult<String> {
        if !is_http_url(url) {
            let path = local_path(url)?;
            return tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ExtractorError::Io { source, path });
        }

        let parsed = parse_url(url)?;
        let mut request = self.transport.request(Method::GET, parsed);
        if let Some(origin) = &self.origin {
            request = request
                .header(ORIGIN, origin)
                .header(REFERER, format!("{origin}/"));
        }

        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(ExtractorError::Status(response.status()));
        }
        Ok(response.text().await.map_err(TransportError::Http)?)
    }
}

fn extract_mpd_variant(
    base: &str,
    servers: &[String],
    set: &AdaptationSet,
    representation: &Representation,
    mime_type: String,
) -> ExtractorResult<Variant> {
    let codecs = representation
        .codecs
        .clone()
        .or_else(|| set.codecs.clone())
        .unwrap_or_default();

    let addressing = if let Some(segment_base) = &representation.segment_base {
        Addressing::Indexed(IndexedAddressing {
            url: substitute_server(base, servers),
            index_range: segment_base.index_range.clone().unwrap_or_default(),
        })
    } else if let Some(template) = representation
        .segment_template
        .as_ref()
        .or(set.segment_template.as_ref())
    {
        Addressing::Explicit(explicit_addressing(base, template, servers)?)
    } else if representation.has_segment_list {
        return Err(ExtractorError::SegmentListUnsupported);
    } else {
        return Err(ExtractorError::UnknownAddressing);
    };

    Ok(Variant {
        id: variant_id(
            &mime_type,
            &codecs,
            representation.width,
            representation.height,
            representation.bandwidth,
        ),
        mime_type,
        codecs,
        width: representation.width,
        height: representation.height,
        bandwidth: representation.bandwidth,
        addressing,
        fingerprint: None,
    })
}

/// Materialize a `SegmentTemplate` + `SegmentTimeline` into concrete
/// segment URLs and durations.
fn explicit_addressing(
    base: &str,
    template: &SegmentTemplate,
    servers: &[String],
) -> ExtractorResult<ExplicitAddressing> {
    let timeline = template
        .timeline
        .as_ref()
        .ok_or(ExtractorError::MissingTimeline)?;

    let media = template.media.as_deref().unwrap_or_default();
    let template_url = resolve_reference(base, media);

    let uses_time = media.contains("$Time$");
    let uses_number = media.contains("$Number$");
    if uses_time == uses_number {
        return Err(ExtractorError::Placeholder(media.to_string()));
    }

    let mut urls = Vec::new();
    let mut durations = Vec::new();
    let mut number = template.start_number.unwrap_or(1);

    for segment in timeline {
        if segment.d > u32::MAX as u64 {
            return Err(ExtractorError::Overflow("segment duration"));
        }

        if uses_time {
            let t = segment.t.ok_or(ExtractorError::MissingTime)?;
            urls.push(template_url.replacen("$Time$", &t.to_string(), 1));
            durations.push(segment.d as u32);
            continue;
        }

        if segment.r < 0 {
            return Err(ExtractorError::UnlimitedRepeat);
        }
        for _ in 0..=segment.r {
            urls.push(template_url.replacen("$Number$", &number.to_string(), 1));
            durations.push(segment.d as u32);
            number += 1;
        }
    }

    Ok(ExplicitAddressing {
        template_url,
        urls,
        servers: servers.to_vec(),
        segment_durations: durations,
        timescale: template.timescale.unwrap_or(1),
    })
}

/// Collects per-period variants keyed by URL identity and folds each group
/// into one rendition.
#[derive(Default)]
struct VariantGroup {
    variants: HashMap<String, Vec<Variant>>,
    durations: HashMap<String, Duration>,
    max_duration: Duration,
}

impl VariantGroup {
    fn add(&mut self, variant: Variant, duration: Duration) {
        let key = match &variant.addressing {
            Addressing::Indexed(info) => info.url.clone(),
            Addressing::Explicit(info) => info.template_url.clone(),
            Addressing::Fingerprinted(_) => String::new(),
        };
        self.variants.entry(key.clone()).or_default().push(variant);
        let total = self.durations.entry(key).or_default();
        *total += duration;
        self.max_duration = self.max_duration.max(*total);
    }

    /// Merge multi-period variants, averaging bandwidths and extending
    /// explicit timelines. Groups covering less total duration than the
    /// longest group are likely not part of the main content and are
    /// dropped.
    fn merge(mut self) -> Vec<Variant> {
        let mut merged = Vec::new();
        for (key, group) in self.variants.drain() {
            let total = self.durations.get(&key).copied().unwrap_or_default();
            if total < self.max_duration {
                continue;
            }

            let count = group.len() as i64;
            let mut sum = 0i64;
            let mut folded: Option<Variant> = None;
            for variant in group {
                sum += variant.bandwidth as i64;
                match folded.as_mut() {
                    None => folded = Some(variant),
                    Some(target) => {
                        // Indexed addressing points at one segmented file
                        // per period; the first period's file stands for
                        // the rendition.
                        if let (Addressing::Explicit(target_info), Addressing::Explicit(info)) =
                            (&mut target.addressing, variant.addressing)
                        {
                            target_info.urls.extend(info.urls);
                            target_info.segment_durations.extend(info.segment_durations);
                        }
                    }
                }
            }

            let Some(mut variant) = folded else {
                continue;
            };
            let original = variant.bandwidth;
            variant.bandwidth = (sum / count) as u32;
            if variant.bandwidth != original {
                variant.recompute_id();
            }
            merged.push(variant);
        }
        merged
    }
}

/// Replace the first `$Server$` placeholder with a randomly chosen server.
pub(crate) fn substitute_server(url: &str, servers: &[String]) -> String {
    if servers.is_empty() {
        return url.to_string();
    }
    let server = &servers[rand::thread_rng().gen_range(0..servers.len())];
    url.replacen("$Server$", server, 1)
}

/// RFC 3986 reference resolution; absolute references win, an empty
/// reference yields the base.
pub(crate) fn resolve_reference(base: &str, reference: &str) -> String {
    const PLACEHOLDER: &str = "$Server$";
    // Hosts are case-normalized during URL parsing, which would mangle a
    // `$Server$` placeholder sitting in the authority. Shield it with a
    // lowercase token that survives normalization.
    const SHIELD: &str = "srvr-placeholder-host";

    let shielded = base.contains(PLACEHOLDER) || reference.contains(PLACEHOLDER);
    let (base, reference) = if shielded {
        (
            base.replace(PLACEHOLDER, SHIELD),
            reference.replace(PLACEHOLDER, SHIELD),
        )
    } else {
        (base.to_string(), reference.to_string())
    };

    let resolved = match Url::parse(&base) {
        Ok(base_url) => match base_url.join(&reference) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => base,
        },
        Err(_) => {
            if reference.is_empty() {
                base
            } else {
                reference
            }
        }
    };

    if shielded {
        resolved.replace(SHIELD, PLACEHOLDER)
    } else {
        resolved
    }
}

fn resolve_base(base: &str, base_urls: &[String]) -> String {
    match base_urls.first() {
        Some(first) => resolve_reference(base, first),
        None => base.to_string(),
    }
}

fn segment_extension(uri: &str) -> Option<&str> {
    Path::new(uri).extension().and_then(|ext| ext.to_str())
}

#[async_trait::async_trait]
impl super::VariantExtractor for DefaultVariantExtractor {
    async fn extract_variants(
        &self,
        reference: &Reference,
        cancel: &CancellationToken,
    ) -> super::ServiceResult<Vec<Variant>> {
        Ok(DefaultVariantExtractor::extract_variants(self, reference, cancel).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::mpd::TimelineSegment;

    fn template(
        media: &str,
        start_number: Option<u64>,
        timeline: Vec<TimelineSegment>,
    ) -> SegmentTemplate {
        SegmentTemplate {
            media: Some(media.to_string()),
            timescale: Some(1000),
            start_number,
            timeline: Some(timeline),
        }
    }

    fn segment(t: Option<u64>, d: u64, r: i64) -> TimelineSegment {
        TimelineSegment { t, d, r }
    }

    fn variant(bandwidth: u32, addressing: Addressing) -> Variant {
        let mut variant = Variant {
            id: String::new(),
            mime_type: "video/mp4".to_string(),
            codecs: "avc1.64001f".to_string(),
            width: 1280,
            height: 720,
            bandwidth,
            addressing,
            fingerprint: None,
        };
        variant.recompute_id();
        variant
    }

    fn explicit(template_url: &str, urls: &[&str]) -> Addressing {
        Addressing::Explicit(ExplicitAddressing {
            template_url: template_url.to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
            servers: Vec::new(),
            segment_durations: vec![1000; urls.len()],
            timescale: 1000,
        })
    }

    #[test]
    fn number_template_with_start_number_and_repeats() {
        let template = template(
            "seg_$Number$.m4s",
            Some(5),
            vec![segment(None, 1000, 2), segment(None, 500, 0)],
        );
        let info = explicit_addressing("https://cdn.example.com/v/", &template, &[]).unwrap();

        assert_eq!(
            info.urls,
            vec![
                "https://cdn.example.com/v/seg_5.m4s",
                "https://cdn.example.com/v/seg_6.m4s",
                "https://cdn.example.com/v/seg_7.m4s",
                "https://cdn.example.com/v/seg_8.m4s",
            ]
        );
        assert_eq!(info.segment_durations, vec![1000, 1000, 1000, 500]);
        assert_eq!(info.urls.len(), info.segment_durations.len());
    }

    #[test]
    fn repeat_zero_emits_one_url() {
        let template1 = template("seg_$Number$.m4s", None, vec![segment(None, 1000, 0)]);
        let info = explicit_addressing("https://cdn.example.com/", &template1, &[]).unwrap();
        assert_eq!(info.urls.len(), 1);
        assert_eq!(info.urls[0], "https://cdn.example.com/seg_1.m4s");

        let template2 = template("seg_$Number$.m4s", None, vec![segment(None, 1000, 3)]);
        let info = explicit_addressing("https://cdn.example.com/", &template2, &[]).unwrap();
        assert_eq!(info.urls.len(), 4);
    }

    #[test]
    fn time_template_emits_one_pair_per_entry() {
        let template = template(
            "seg_$Time$.m4s",
            None,
            vec![segment(Some(0), 4000, 4), segment(Some(4000), 2000, 0)],
        );
        let info = explicit_addressing("https://cdn.example.com/", &template, &[]).unwrap();
        // Repeat counts are not expanded in time-addressed timelines.
        assert_eq!(
            info.urls,
            vec![
                "https://cdn.example.com/seg_0.m4s",
                "https://cdn.example.com/seg_4000.m4s",
            ]
        );
        assert_eq!(info.segment_durations, vec![4000, 2000]);
    }

    #[test]
    fn time_template_requires_time_attribute() {
        let template = template("seg_$Time$.m4s", None, vec![segment(None, 1000, 0)]);
        let err = explicit_addressing("https://cdn.example.com/", &template, &[]).unwrap_err();
        assert!(matches!(err, ExtractorError::MissingTime));
    }

    #[test]
    fn duration_overflow_boundary() {
        let template1 = template(
            "seg_$Number$.m4s",
            None,
            vec![segment(None, u32::MAX as u64, 0)],
        );
        let info = explicit_addressing("https://cdn.example.com/", &template1, &[]).unwrap();
        assert_eq!(info.segment_durations, vec![u32::MAX]);

        let template2 = template(
            "seg_$Number$.m4s",
            None,
            vec![segment(None, u32::MAX as u64 + 1, 0)],
        );
        let err = explicit_addressing("https://cdn.example.com/", &template2, &[]).unwrap_err();
        assert!(matches!(err, ExtractorError::Overflow(_)));
    }

    #[test]
    fn unlimited_repeat_fails() {
        let template = template("seg_$Number$.m4s", None, vec![segment(None, 1000, -1)]);
        let err = explicit_addressing("https://cdn.example.com/", &template, &[]).unwrap_err();
        assert!(matches!(err, ExtractorError::UnlimitedRepeat));
    }

    #[test]
    fn placeholder_must_be_exactly_one() {
        let neither = template("seg.m4s", None, vec![segment(None, 1000, 0)]);
        assert!(matches!(
            explicit_addressing("https://cdn.example.com/", &neither, &[]),
            Err(ExtractorError::Placeholder(_))
        ));

        let both = template(
            "seg_$Number$_$Time$.m4s",
            None,
            vec![segment(Some(0), 1000, 0)],
        );
        assert!(matches!(
            explicit_addressing("https://cdn.example.com/", &both, &[]),
            Err(ExtractorError::Placeholder(_))
        ));
    }

    #[test]
    fn missing_timeline_fails() {
        let template = SegmentTemplate {
            media: Some("seg_$Number$.m4s".to_string()),
            timescale: None,
            start_number: None,
            timeline: None,
        };
        assert!(matches!(
            explicit_addressing("https://cdn.example.com/", &template, &[]),
            Err(ExtractorError::MissingTimeline)
        ));
    }

    #[test]
    fn resolve_reference_rfc3986() {
        assert_eq!(
            resolve_reference("https://a.example/x/y.mpd", "seg.m4s"),
            "https://a.example/x/seg.m4s"
        );
        assert_eq!(
            resolve_reference("https://a.example/x/", "https://b.example/z.m4s"),
            "https://b.example/z.m4s"
        );
        assert_eq!(
            resolve_reference("https://a.example/x/y.mpd", ""),
            "https://a.example/x/y.mpd"
        );
        assert_eq!(
            resolve_reference("https://a.example/x/", "../up.m4s"),
            "https://a.example/up.m4s"
        );
    }

    #[test]
    fn resolve_reference_preserves_server_placeholder() {
        assert_eq!(
            resolve_reference("https://$Server$.cdn/v/manifest.mpd", "seg_$Number$.m4s"),
            "https://$Server$.cdn/v/seg_$Number$.m4s"
        );
        assert_eq!(
            resolve_reference("file:///tmp/x/manifest.mpd", "https://$Server$.cdn/video.mp4"),
            "https://$Server$.cdn/video.mp4"
        );
    }

    #[test]
    fn substitute_server_replaces_first_occurrence() {
        let out = substitute_server(
            "https://$Server$.cdn/v/$Server$.m4s",
            &["a".to_string()],
        );
        assert_eq!(out, "https://a.cdn/v/$Server$.m4s");
        assert_eq!(substitute_server("https://x.cdn/v.m4s", &[]), "https://x.cdn/v.m4s");
    }

    #[test]
    fn merge_averages_bandwidth_and_recomputes_id() {
        let mut group = VariantGroup::default();
        group.add(
            variant(2000, explicit("https://cdn/x_$Number$.m4s", &["https://cdn/x_1.m4s"])),
            Duration::from_secs(3600),
        );
        group.add(
            variant(6000, explicit("https://cdn/x_$Number$.m4s", &["https://cdn/x_2.m4s"])),
            Duration::from_secs(900),
        );

        let merged = group.merge();
        assert_eq!(merged.len(), 1);
        let variant = &merged[0];
        assert_eq!(variant.bandwidth, 4000);
        assert_eq!(variant.id, "b229fe0d529823bb19a264feb7ad36fa");
        if let Addressing::Explicit(info) = &variant.addressing {
            assert_eq!(info.urls, vec!["https://cdn/x_1.m4s", "https://cdn/x_2.m4s"]);
        } else {
            panic!("expected explicit addressing");
        }
    }

    #[test]
    fn merge_drops_groups_shorter_than_longest() {
        let mut group = VariantGroup::default();
        group.add(
            variant(2000, explicit("https://cdn/main_$Number$.m4s", &["https://cdn/main_1.m4s"])),
            Duration::from_secs(3600),
        );
        group.add(
            variant(9000, explicit("https://cdn/ad_$Number$.m4s", &["https://cdn/ad_1.m4s"])),
            Duration::from_secs(30),
        );

        let merged = group.merge();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].bandwidth, 2000);
    }

    #[test]
    fn merge_keeps_unchanged_bandwidth_id() {
        let mut group = VariantGroup::default();
        let original = variant(2000, explicit("https://cdn/x_$Number$.m4s", &["https://cdn/x_1.m4s"]));
        let id = original.id.clone();
        group.add(original, Duration::from_secs(3600));

        let merged = group.merge();
        assert_eq!(merged[0].id, id);
        assert_eq!(merged[0].bandwidth, 2000);
    }
}
