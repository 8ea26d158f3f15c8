//! Line-oriented M3U8 parsing for master and media playlists, covering the
//! attributes variant extraction needs: stream resolution, bandwidth and
//! codecs on the master side, segment durations and byte ranges on the
//! media side.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("invalid {tag} value {value:?}")]
    InvalidTag { tag: &'static str, value: String },
}

pub type PlaylistResult<T> = Result<T, PlaylistError>;

#[derive(Debug)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

#[derive(Debug, Default)]
pub struct MasterPlaylist {
    pub variants: Vec<MasterVariant>,
}

/// One `EXT-X-STREAM-INF` entry of a master playlist.
#[derive(Debug, Default)]
pub struct MasterVariant {
    pub uri: String,
    pub bandwidth: u64,
    pub resolution: Option<String>,
    pub codecs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MediaPlaylist {
    pub segments: Vec<MediaSegment>,
}

#[derive(Debug, Default)]
pub struct MediaSegment {
    pub uri: String,
    /// Seconds, from `EXTINF`.
    pub duration: f64,
    pub byte_range_length: Option<u64>,
    pub byte_range_start: Option<u64>,
}

/// Parse a playlist, deciding master vs media by the presence of
/// `EXT-X-STREAM-INF` entries.
pub fn parse(contents: &str) -> PlaylistResult<Playlist> {
    if !contents.trim_start().starts_with("#EXTM3U") {
        return Err(PlaylistError::MissingHeader);
    }

    if contents.contains("#EXT-X-STREAM-INF") {
        parse_master(contents).map(Playlist::Master)
    } else {
        parse_media(contents).map(Playlist::Media)
    }
}

fn parse_master(contents: &str) -> PlaylistResult<MasterPlaylist> {
    let mut playlist = MasterPlaylist::default();
    let mut pending: Option<MasterVariant> = None;

    for line in contents.lines().map(str::trim) {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let mut variant = MasterVariant::default();
            for (key, value) in attribute_list(attrs) {
                match key.as_str() {
                    "BANDWIDTH" => {
                        variant.bandwidth =
                            value.parse().map_err(|_| PlaylistError::InvalidTag {
                                tag: "BANDWIDTH",
                                value: value.clone(),
                            })?;
                    }
                    "RESOLUTION" => variant.resolution = Some(value),
                    "CODECS" => {
                        variant.codecs =
                            value.split(',').map(|c| c.trim().to_string()).collect();
                    }
                    _ => {}
                }
            }
            pending = Some(variant);
        } else if line.starts_with('#') || line.is_empty() {
            continue;
        } else if let Some(mut variant) = pending.take() {
            variant.uri = line.to_string();
            playlist.variants.push(variant);
        }
    }

    Ok(playlist)
}

fn parse_media(contents: &str) -> PlaylistResult<MediaPlaylist> {
    let mut playlist = MediaPlaylist::default();
    let mut pending_duration: Option<f64> = None;
    let mut pending_range: Option<(u64, Option<u64>)> = None;

    for line in contents.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration = value
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .parse()
                .map_err(|_| PlaylistError::InvalidTag {
                    tag: "EXTINF",
                    value: value.to_string(),
                })?;
            pending_duration = Some(duration);
        } else if let Some(value) = line.strip_prefix("#EXT-X-BYTERANGE:") {
            pending_range = Some(parse_byte_range(value)?);
        } else if line.starts_with('#') || line.is_empty() {
            continue;
        } else if let Some(duration) = pending_duration.take() {
            let (byte_range_length, byte_range_start) = match pending_range.take() {
                Some((length, start)) => (Some(length), start),
                None => (None, None),
            };
            playlist.segments.push(MediaSegment {
                uri: line.to_string(),
                duration,
                byte_range_length,
                byte_range_start,
            });
        }
    }

    Ok(playlist)
}

/// `<length>[@<start>]`
fn parse_byte_range(value: &str) -> PlaylistResult<(u64, Option<u64>)> {
    let invalid = || PlaylistError::InvalidTag {
        tag: "EXT-X-BYTERANGE",
        value: value.to_string(),
    };
    match value.split_once('@') {
        Some((length, start)) => Ok((
            length.parse().map_err(|_| invalid())?,
            Some(start.parse().map_err(|_| invalid())?),
        )),
        None => Ok((value.parse().map_err(|_| invalid())?, None)),
    }
}

/// Split an attribute list (`KEY=VALUE,KEY="quoted,value",...`), honoring
/// quoted values that contain commas.
fn attribute_list(input: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some((key, tail)) = rest.split_once('=') else {
            break;
        };
        let (value, tail) = if let Some(quoted) = tail.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((value, tail)) => (value, tail.trim_start_matches(',')),
                None => (quoted, ""),
            }
        } else {
            match tail.split_once(',') {
                Some((value, tail)) => (value, tail),
                None => (tail, ""),
            }
        };
        attributes.push((key.trim().to_string(), value.to_string()));
        rest = tail;
    }

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-VERSION:7\n\
#EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=1280x720,CODECS=\"avc1.64001f,mp4a.40.2\"\n\
720p.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080,CODECS=\"avc1.640028\"\n\
1080p.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=96000,CODECS=\"mp4a.40.2\"\n\
audio.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
#EXT-X-VERSION:7\n\
#EXT-X-TARGETDURATION:4\n\
#EXTINF:4.000,\n\
seg_1.m4s\n\
#EXTINF:3.5,\n\
seg_2.m4s\n\
#EXT-X-ENDLIST\n";

    const MEDIA_RANGED: &str = "#EXTM3U\n\
#EXT-X-TARGETDURATION:4\n\
#EXTINF:4.000,\n\
#EXT-X-BYTERANGE:1000@0\n\
all.mp4\n\
#EXTINF:4.000,\n\
#EXT-X-BYTERANGE:2000@1000\n\
all.mp4\n\
#EXT-X-ENDLIST\n";

    #[test]
    fn master_playlist_attributes() {
        let Playlist::Master(master) = parse(MASTER).unwrap() else {
            panic!("expected master playlist");
        };
        assert_eq!(master.variants.len(), 3);

        let variant = &master.variants[0];
        assert_eq!(variant.uri, "720p.m3u8");
        assert_eq!(variant.bandwidth, 1_000_000);
        assert_eq!(variant.resolution.as_deref(), Some("1280x720"));
        assert_eq!(variant.codecs, vec!["avc1.64001f", "mp4a.40.2"]);

        assert!(master.variants[2].resolution.is_none());
    }

    #[test]
    fn media_playlist_segments() {
        let Playlist::Media(media) = parse(MEDIA).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(media.segments.len(), 2);
        assert_eq!(media.segments[0].uri, "seg_1.m4s");
        assert_eq!(media.segments[0].duration, 4.0);
        assert!(media.segments[0].byte_range_length.is_none());
        assert_eq!(media.segments[1].duration, 3.5);
    }

    #[test]
    fn media_playlist_byte_ranges() {
        let Playlist::Media(media) = parse(MEDIA_RANGED).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(media.segments[0].byte_range_length, Some(1000));
        assert_eq!(media.segments[0].byte_range_start, Some(0));
        assert_eq!(media.segments[1].byte_range_length, Some(2000));
        assert_eq!(media.segments[1].byte_range_start, Some(1000));
    }

    #[test]
    fn missing_header_fails() {
        assert!(matches!(
            parse("#EXT-X-VERSION:7\n"),
            Err(PlaylistError::MissingHeader)
        ));
    }
}
