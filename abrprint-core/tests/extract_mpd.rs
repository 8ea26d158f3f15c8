use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use abrprint_core::service::{DefaultVariantExtractor, ExtractorError};
use abrprint_core::{AbrFormat, Addressing, HostLimits, Reference, Transport};

fn transport() -> Transport {
    Transport::new(Arc::new(reqwest::cookie::Jar::default()), HostLimits::default()).unwrap()
}

fn file_url(path: &Path) -> String {
    Url::from_file_path(path).unwrap().to_string()
}

fn dash_reference(url: String, servers: &[&str]) -> Reference {
    Reference {
        id: String::new(),
        format: AbrFormat::Dash,
        url,
        servers: servers.iter().map(|s| s.to_string()).collect(),
    }
}

async fn extract(manifest: &str, servers: &[&str]) -> Result<Vec<abrprint_core::Variant>, ExtractorError> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.mpd");
    std::fs::write(&path, manifest).unwrap();

    let extractor = DefaultVariantExtractor::new(transport(), None);
    let reference = dash_reference(file_url(&path), servers);
    extractor
        .extract_variants(&reference, &CancellationToken::new())
        .await
}

const SEGMENT_BASE_MPD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT10M">
  <BaseURL>https://$Server$.cdn/</BaseURL>
  <Period duration="PT10M">
    <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001f">
      <Representation id="v0" width="1280" height="720" bandwidth="1000000">
        <BaseURL>video.mp4</BaseURL>
        <SegmentBase indexRange="804-1023"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn segment_base_yields_indexed_variant_with_substituted_server() {
    let variants = extract(SEGMENT_BASE_MPD, &["a", "b", "c"]).await.unwrap();
    assert_eq!(variants.len(), 1);

    let variant = &variants[0];
    assert_eq!(variant.mime_type, "video/mp4");
    assert_eq!((variant.width, variant.height), (1280, 720));

    let Addressing::Indexed(info) = &variant.addressing else {
        panic!("expected indexed addressing");
    };
    assert!(
        ["https://a.cdn/video.mp4", "https://b.cdn/video.mp4", "https://c.cdn/video.mp4"]
            .contains(&info.url.as_str()),
        "unexpected url {}",
        info.url
    );
    assert_eq!(info.index_range, "804-1023");
}

const NUMBER_TEMPLATE_MPD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static">
  <BaseURL>https://cdn.example.com/content/</BaseURL>
  <Period duration="PT4S">
    <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001f">
      <SegmentTemplate media="seg_$Number$.m4s" timescale="1000" startNumber="5">
        <SegmentTimeline>
          <S d="1000" r="2"/>
          <S d="500"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" width="1280" height="720" bandwidth="1000000"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" mimeType="audio/mp4" codecs="mp4a.40.2">
      <SegmentTemplate media="audio_$Number$.m4s" timescale="1000">
        <SegmentTimeline>
          <S d="1000" r="3"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="a0" bandwidth="96000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn number_template_materializes_running_numbers() {
    let variants = extract(NUMBER_TEMPLATE_MPD, &[]).await.unwrap();
    assert_eq!(variants.len(), 1, "audio adaptation sets are skipped");

    let Addressing::Explicit(info) = &variants[0].addressing else {
        panic!("expected explicit addressing");
    };
    assert_eq!(
        info.urls,
        vec![
            "https://cdn.example.com/content/seg_5.m4s",
            "https://cdn.example.com/content/seg_6.m4s",
            "https://cdn.example.com/content/seg_7.m4s",
            "https://cdn.example.com/content/seg_8.m4s",
        ]
    );
    assert_eq!(info.segment_durations, vec![1000, 1000, 1000, 500]);
    assert_eq!(info.urls.len(), info.segment_durations.len());
    assert_eq!(info.timescale, 1000);
}

const MULTI_PERIOD_MPD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static">
  <BaseURL>https://cdn.example.com/content/</BaseURL>
  <Period duration="PT1H">
    <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001f">
      <SegmentTemplate media="seg_$Number$.m4s" timescale="1000" startNumber="1">
        <SegmentTimeline>
          <S d="4000" r="1"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" width="1280" height="720" bandwidth="2000"/>
    </AdaptationSet>
  </Period>
  <Period duration="PT15M">
    <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001f">
      <SegmentTemplate media="seg_$Number$.m4s" timescale="1000" startNumber="1">
        <SegmentTimeline>
          <S d="2000"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" width="1280" height="720" bandwidth="6000"/>
    </AdaptationSet>
  </Period>
  <Period duration="PT1M">
    <SupplementalProperty schemeIdUri="urn:example:adbreak" value="Ad"/>
    <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001f">
      <SegmentTemplate media="adbreak_$Number$.m4s" timescale="1000" startNumber="1">
        <SegmentTimeline>
          <S d="1000"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" width="1280" height="720" bandwidth="9000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn multi_period_groups_merge_and_ads_are_skipped() {
    let variants = extract(MULTI_PERIOD_MPD, &[]).await.unwrap();
    assert_eq!(variants.len(), 1, "ad period must contribute nothing");

    let variant = &variants[0];
    // Mean of 2000 and 6000, with the identifier recomputed for the new
    // bandwidth.
    assert_eq!(variant.bandwidth, 4000);
    assert_eq!(variant.id, "b229fe0d529823bb19a264feb7ad36fa");

    let Addressing::Explicit(info) = &variant.addressing else {
        panic!("expected explicit addressing");
    };
    assert_eq!(
        info.urls,
        vec![
            "https://cdn.example.com/content/seg_1.m4s",
            "https://cdn.example.com/content/seg_2.m4s",
            "https://cdn.example.com/content/seg_1.m4s",
        ],
        "urls concatenate in period order"
    );
    assert_eq!(info.segment_durations, vec![4000, 4000, 2000]);
}

#[tokio::test]
async fn dynamic_presentations_are_rejected() {
    let manifest = r#"<MPD type="dynamic"><Period/></MPD>"#;
    let err = extract(manifest, &[]).await.unwrap_err();
    assert!(matches!(err, ExtractorError::NotStatic));
}

#[tokio::test]
async fn segment_list_addressing_is_not_implemented() {
    let manifest = r#"<MPD type="static">
  <Period duration="PT1M">
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <Representation id="v0" width="640" height="360" bandwidth="300000">
        <SegmentList duration="4"><SegmentURL media="s1.m4s"/></SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let err = extract(manifest, &[]).await.unwrap_err();
    assert!(matches!(err, ExtractorError::SegmentListUnsupported));
}

#[tokio::test]
async fn representation_without_addressing_fails() {
    let manifest = r#"<MPD type="static">
  <Period duration="PT1M">
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <Representation id="v0" width="640" height="360" bandwidth="300000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let err = extract(manifest, &[]).await.unwrap_err();
    assert!(matches!(err, ExtractorError::UnknownAddressing));
}

#[tokio::test]
async fn empty_mpd_has_no_variants() {
    let manifest = r#"<MPD type="static"></MPD>"#;
    let err = extract(manifest, &[]).await.unwrap_err();
    assert!(matches!(err, ExtractorError::NoVariants));
}
