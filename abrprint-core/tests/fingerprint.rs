use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use abrprint_core::service::{DefaultFingerprinter, FingerprinterError, RetryPolicy};
use abrprint_core::{
    Addressing, ExplicitAddressing, Fingerprint, HostLimits, IndexedAddressing, Transport, Variant,
};

fn transport() -> Transport {
    Transport::new(Arc::new(reqwest::cookie::Jar::default()), HostLimits::default()).unwrap()
}

fn file_url(path: &Path) -> String {
    Url::from_file_path(path).unwrap().to_string()
}

fn indexed_variant(mime_type: &str, url: String, index_range: &str) -> Variant {
    Variant {
        id: String::new(),
        mime_type: mime_type.to_string(),
        codecs: String::new(),
        width: 0,
        height: 0,
        bandwidth: 0,
        addressing: Addressing::Indexed(IndexedAddressing {
            url,
            index_range: index_range.to_string(),
        }),
        fingerprint: None,
    }
}

/// Assemble a version-0 `sidx` box from (size, duration) pairs.
fn sidx_box(timescale: u32, references: &[(u32, u32)]) -> Vec<u8> {
    let payload_len = 24 + references.len() * 12;
    let total = (8 + payload_len) as u32;

    let mut data = Vec::with_capacity(total as usize);
    data.extend_from_slice(&total.to_be_bytes());
    data.extend_from_slice(b"sidx");
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(&timescale.to_be_bytes());
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(&0u16.to_be_bytes());
    data.extend_from_slice(&(references.len() as u16).to_be_bytes());
    for (size, duration) in references {
        data.extend_from_slice(&(size & 0x7fff_ffff).to_be_bytes());
        data.extend_from_slice(&duration.to_be_bytes());
        data.extend_from_slice(&0x9000_0000u32.to_be_bytes());
    }
    data
}

fn plain_box(box_type: &[u8; 4], payload_len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + payload_len);
    data.extend_from_slice(&((8 + payload_len) as u32).to_be_bytes());
    data.extend_from_slice(box_type);
    data.extend(std::iter::repeat(0u8).take(payload_len));
    data
}

#[tokio::test]
async fn indexed_mp4_fingerprint_follows_sidx_references() {
    let dir = tempfile::tempdir().unwrap();
    let mut contents = plain_box(b"ftyp", 16);
    contents.extend(sidx_box(
        90_000,
        &[(1500, 180_000), (1400, 180_000), (1300, 90_000)],
    ));
    let path = dir.path().join("video.mp4");
    std::fs::write(&path, &contents).unwrap();

    let fingerprinter = DefaultFingerprinter::new(transport(), None);
    let variant = indexed_variant("video/mp4", path.to_string_lossy().into_owned(), "");

    // An empty range defaults to probing the first 64 KiB.
    let fingerprint = fingerprinter
        .fingerprint(&variant, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fingerprint.timescale, 90_000);
    assert_eq!(fingerprint.segment_sizes, vec![1500, 1400, 1300]);
    assert_eq!(fingerprint.segment_durations, vec![180_000, 180_000, 90_000]);
    assert_eq!(
        fingerprint.segment_sizes.len(),
        fingerprint.segment_durations.len()
    );
}

#[tokio::test]
async fn explicit_index_range_skips_leading_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let leading = plain_box(b"ftyp", 16);
    let offset = leading.len();
    let mut contents = leading;
    contents.extend(sidx_box(1000, &[(4096, 4000)]));
    let path = dir.path().join("video.mp4");
    std::fs::write(&path, &contents).unwrap();

    let fingerprinter = DefaultFingerprinter::new(transport(), None);
    let range = format!("{offset}-{}", contents.len() - 1);
    let variant = indexed_variant("video/mp4", file_url(&path), &range);

    let fingerprint = fingerprinter
        .fingerprint(&variant, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fingerprint.segment_sizes, vec![4096]);
    assert_eq!(fingerprint.segment_durations, vec![4000]);
    assert_eq!(fingerprint.timescale, 1000);
}

#[tokio::test]
async fn missing_sidx_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("video.mp4");
    std::fs::write(&path, plain_box(b"ftyp", 32)).unwrap();

    let fingerprinter = DefaultFingerprinter::new(transport(), None);
    let variant = indexed_variant("video/mp4", path.to_string_lossy().into_owned(), "");
    let err = fingerprinter
        .fingerprint(&variant, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FingerprinterError::SidxNotFound));
}

#[tokio::test]
async fn non_mp4_indexed_mime_types_are_rejected() {
    let fingerprinter = DefaultFingerprinter::new(transport(), None);
    let cancel = CancellationToken::new();

    let webm = indexed_variant("video/webm", "video.webm".to_string(), "");
    assert!(matches!(
        fingerprinter.fingerprint(&webm, &cancel).await.unwrap_err(),
        FingerprinterError::WebmNotImplemented
    ));

    let other = indexed_variant("video/mp2t", "video.ts".to_string(), "");
    assert!(matches!(
        fingerprinter.fingerprint(&other, &cancel).await.unwrap_err(),
        FingerprinterError::UnsupportedMime(_)
    ));
}

#[tokio::test]
async fn explicit_probe_preserves_manifest_order() {
    let dir = tempfile::tempdir().unwrap();
    let sizes = [3000usize, 1000, 2000];
    let mut urls = Vec::new();
    for (index, size) in sizes.iter().enumerate() {
        let path = dir.path().join(format!("seg_{index}.m4s"));
        std::fs::write(&path, vec![0u8; *size]).unwrap();
        urls.push(file_url(&path));
    }

    let variant = Variant {
        id: String::new(),
        mime_type: "video/mp4".to_string(),
        codecs: String::new(),
        width: 0,
        height: 0,
        bandwidth: 0,
        addressing: Addressing::Explicit(ExplicitAddressing {
            template_url: String::new(),
            urls,
            servers: Vec::new(),
            segment_durations: vec![4000, 4000, 2000],
            timescale: 1000,
        }),
        fingerprint: None,
    };

    let fingerprinter = DefaultFingerprinter::new(transport(), None);
    let fingerprint = fingerprinter
        .fingerprint(&variant, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fingerprint.segment_sizes, vec![3000, 1000, 2000]);
    assert_eq!(fingerprint.segment_durations, vec![4000, 4000, 2000]);
}

#[tokio::test]
async fn one_failing_segment_fails_the_variant() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.m4s");
    std::fs::write(&good, vec![0u8; 512]).unwrap();

    let variant = Variant {
        id: String::new(),
        mime_type: "video/mp4".to_string(),
        codecs: String::new(),
        width: 0,
        height: 0,
        bandwidth: 0,
        addressing: Addressing::Explicit(ExplicitAddressing {
            template_url: String::new(),
            urls: vec![
                file_url(&good),
                file_url(&dir.path().join("missing.m4s")),
            ],
            servers: Vec::new(),
            segment_durations: vec![4000, 4000],
            timescale: 1000,
        }),
        fingerprint: None,
    };

    // Zero back-off keeps the exhausted retry loop fast and deterministic.
    let fingerprinter = DefaultFingerprinter::new(transport(), None).with_retry_policy(RetryPolicy {
        attempts: 2,
        attempt_timeout: Duration::from_secs(1),
        backoff_cap: Duration::ZERO,
    });

    let err = fingerprinter
        .fingerprint(&variant, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FingerprinterError::Io { .. }));
}

#[tokio::test]
async fn embedded_fingerprint_passes_through_unchanged() {
    let embedded = Fingerprint {
        segment_sizes: vec![10, 20],
        segment_durations: vec![4000, 4000],
        timescale: 1000,
    };
    let variant = Variant {
        id: String::new(),
        mime_type: "video/mp4".to_string(),
        codecs: String::new(),
        width: 0,
        height: 0,
        bandwidth: 0,
        addressing: Addressing::Fingerprinted(embedded.clone()),
        fingerprint: None,
    };

    let fingerprinter = DefaultFingerprinter::new(transport(), None);
    let fingerprint = fingerprinter
        .fingerprint(&variant, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fingerprint, embedded);
}

#[tokio::test]
async fn cancelled_probe_aborts_immediately() {
    let variant = Variant {
        id: String::new(),
        mime_type: "video/mp4".to_string(),
        codecs: String::new(),
        width: 0,
        height: 0,
        bandwidth: 0,
        addressing: Addressing::Explicit(ExplicitAddressing {
            template_url: String::new(),
            urls: vec!["missing.m4s".to_string()],
            servers: Vec::new(),
            segment_durations: vec![4000],
            timescale: 1000,
        }),
        fingerprint: None,
    };

    let cancel = CancellationToken::new();
    cancel.cancel();

    let fingerprinter = DefaultFingerprinter::new(transport(), None);
    let err = fingerprinter.fingerprint(&variant, &cancel).await.unwrap_err();
    assert!(matches!(err, FingerprinterError::Cancelled));
}
