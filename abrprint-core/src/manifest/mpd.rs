//! Minimal MPD document model covering what variant extraction consumes:
//! the presentation type, hierarchical base URLs, period durations and
//! ad markers, and per-representation addressing elements.

use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MpdError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("invalid attribute {name}: {value:?}")]
    InvalidAttr { name: &'static str, value: String },
}

pub type MpdResult<T> = Result<T, MpdError>;

#[derive(Debug, Default)]
pub struct Mpd {
    pub mpd_type: Option<String>,
    pub base_urls: Vec<String>,
    pub periods: Vec<Period>,
}

#[derive(Debug, Default)]
pub struct Period {
    pub duration: Option<Duration>,
    pub supplemental_properties: Vec<Property>,
    pub base_urls: Vec<String>,
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Default)]
pub struct Property {
    pub scheme_id_uri: String,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct AdaptationSet {
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub base_urls: Vec<String>,
    pub segment_template: Option<SegmentTemplate>,
    pub representations: Vec<Representation>,
}

#[derive(Debug, Default)]
pub struct Representation {
    pub id: Option<String>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub width: u32,
    pub height: u32,
    pub bandwidth: u32,
    pub base_urls: Vec<String>,
    pub segment_base: Option<SegmentBase>,
    pub segment_template: Option<SegmentTemplate>,
    pub has_segment_list: bool,
}

#[derive(Debug, Default)]
pub struct SegmentBase {
    pub index_range: Option<String>,
}

#[derive(Debug, Default)]
pub struct SegmentTemplate {
    pub media: Option<String>,
    pub timescale: Option<u32>,
    pub start_number: Option<u64>,
    pub timeline: Option<Vec<TimelineSegment>>,
}

/// One `S` element of a `SegmentTimeline`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimelineSegment {
    pub t: Option<u64>,
    pub d: u64,
    pub r: i64,
}

impl Mpd {
    /// The presentation type defaults to `static` when absent.
    pub fn is_static(&self) -> bool {
        self.mpd_type.as_deref().map_or(true, |t| t == "static")
    }

    pub fn parse(xml: &str) -> MpdResult<Self> {
        let mut reader = Reader::from_str(xml);
        let mut builder = Builder::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) => builder.open(&e, false)?,
                Event::Empty(e) => builder.open(&e, true)?,
                Event::End(e) => builder.close(e.local_name().as_ref()),
                Event::Text(t) => {
                    if builder.pending_base {
                        let text = t.unescape()?;
                        builder.push_base_url(text.trim());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(builder.mpd)
    }
}

/// Which element a just-parsed `SegmentTemplate` belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TemplateOwner {
    AdaptationSet,
    Representation,
}

#[derive(Default)]
struct Builder {
    mpd: Mpd,
    period: Option<Period>,
    set: Option<AdaptationSet>,
    representation: Option<Representation>,
    template: Option<(SegmentTemplate, TemplateOwner)>,
    in_timeline: bool,
    pending_base: bool,
}

impl Builder {
    fn open(&mut self, element: &BytesStart<'_>, self_closing: bool) -> MpdResult<()> {
        match element.local_name().as_ref() {
            b"MPD" => {
                for attr in element.attributes() {
                    let attr = attr?;
                    if attr.key.local_name().as_ref() == b"type" {
                        self.mpd.mpd_type = Some(attr.unescape_value()?.to_string());
                    }
                }
            }
            b"Period" => {
                let mut period = Period::default();
                for attr in element.attributes() {
                    let attr = attr?;
                    if attr.key.local_name().as_ref() == b"duration" {
                        period.duration = parse_iso_duration(&attr.unescape_value()?);
                    }
                }
                self.period = Some(period);
                if self_closing {
                    self.close(b"Period");
                }
            }
            b"SupplementalProperty" => {
                // Period-level markers only; an ad flag deeper in the tree
                // does not exclude the whole period.
                if let (Some(period), None) = (self.period.as_mut(), self.set.as_ref()) {
                    let mut property = Property::default();
                    for attr in element.attributes() {
                        let attr = attr?;
                        let value = attr.unescape_value()?.to_string();
                        match attr.key.local_name().as_ref() {
                            b"schemeIdUri" => property.scheme_id_uri = value,
                            b"value" => property.value = value,
                            _ => {}
                        }
                    }
                    period.supplemental_properties.push(property);
                }
            }
            b"AdaptationSet" => {
                let mut set = AdaptationSet::default();
                for attr in element.attributes() {
                    let attr = attr?;
                    let value = attr.unescape_value()?.to_string();
                    match attr.key.local_name().as_ref() {
                        b"contentType" => set.content_type = Some(value),
                        b"mimeType" => set.mime_type = Some(value),
                        b"codecs" => set.codecs = Some(value),
                        _ => {}
                    }
                }
                self.set = Some(set);
                if self_closing {
                    self.close(b"AdaptationSet");
                }
            }
            b"Representation" => {
                let mut representation = Representation::default();
                for attr in element.attributes() {
                    let attr = attr?;
                    let value = attr.unescape_value()?.to_string();
                    match attr.key.local_name().as_ref() {
                        b"id" => representation.id = Some(value),
                        b"mimeType" => representation.mime_type = Some(value),
                        b"codecs" => representation.codecs = Some(value),
                        b"width" => representation.width = parse_attr("width", &value)?,
                        b"height" => representation.height = parse_attr("height", &value)?,
                        b"bandwidth" => representation.bandwidth = parse_attr("bandwidth", &value)?,
                        _ => {}
                    }
                }
                self.representation = Some(representation);
                if self_closing {
                    self.close(b"Representation");
                }
            }
            b"BaseURL" => {
                self.pending_base = !self_closing;
            }
            b"SegmentBase" => {
                if let Some(representation) = self.representation.as_mut() {
                    let mut base = SegmentBase::default();
                    for attr in element.attributes() {
                        let attr = attr?;
                        if attr.key.local_name().as_ref() == b"indexRange" {
                            base.index_range = Some(attr.unescape_value()?.to_string());
                        }
                    }
                    representation.segment_base = Some(base);
                }
            }
            b"SegmentList" => {
                if let Some(representation) = self.representation.as_mut() {
                    representation.has_segment_list = true;
                }
            }
            b"SegmentTemplate" => {
                let mut template = SegmentTemplate::default();
                for attr in element.attributes() {
                    let attr = attr?;
                    let value = attr.unescape_value()?.to_string();
                    match attr.key.local_name().as_ref() {
                        b"media" => template.media = Some(value),
                        b"timescale" => template.timescale = Some(parse_attr("timescale", &value)?),
                        b"startNumber" => {
                            template.start_number = Some(parse_attr("startNumber", &value)?)
                        }
                        _ => {}
                    }
                }
                let owner = if self.representation.is_some() {
                    TemplateOwner::Representation
                } else {
                    TemplateOwner::AdaptationSet
                };
                self.template = Some((template, owner));
                if self_closing {
                    self.close(b"SegmentTemplate");
                }
            }
            b"SegmentTimeline" => {
                self.in_timeline = !self_closing;
                if let Some((template, _)) = self.template.as_mut() {
                    template.timeline.get_or_insert_with(Vec::new);
                }
            }
            b"S" => {
                if self.in_timeline {
                    if let Some((template, _)) = self.template.as_mut() {
                        let mut segment = TimelineSegment::default();
                        for attr in element.attributes() {
                            let attr = attr?;
                            let value = attr.unescape_value()?.to_string();
                            match attr.key.local_name().as_ref() {
                                b"t" => segment.t = Some(parse_attr("t", &value)?),
                                b"d" => segment.d = parse_attr("d", &value)?,
                                b"r" => segment.r = parse_attr("r", &value)?,
                                _ => {}
                            }
                        }
                        template.timeline.get_or_insert_with(Vec::new).push(segment);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, tag: &[u8]) {
        match tag {
            b"BaseURL" => self.pending_base = false,
            b"SegmentTimeline" => self.in_timeline = false,
            b"SegmentTemplate" => {
                if let Some((template, owner)) = self.template.take() {
                    match owner {
                        TemplateOwner::Representation => {
                            if let Some(representation) = self.representation.as_mut() {
                                representation.segment_template = Some(template);
                            }
                        }
                        TemplateOwner::AdaptationSet => {
                            if let Some(set) = self.set.as_mut() {
                                set.segment_template = Some(template);
                            }
                        }
                    }
                }
            }
            b"Representation" => {
                if let (Some(representation), Some(set)) =
                    (self.representation.take(), self.set.as_mut())
                {
                    set.representations.push(representation);
                }
            }
            b"AdaptationSet" => {
                if let (Some(set), Some(period)) = (self.set.take(), self.period.as_mut()) {
                    period.adaptation_sets.push(set);
                }
            }
            b"Period" => {
                if let Some(period) = self.period.take() {
                    self.mpd.periods.push(period);
                }
            }
            _ => {}
        }
    }

    fn push_base_url(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        let target = if let Some(representation) = self.representation.as_mut() {
            &mut representation.base_urls
        } else if let Some(set) = self.set.as_mut() {
            &mut set.base_urls
        } else if let Some(period) = self.period.as_mut() {
            &mut period.base_urls
        } else {
            &mut self.mpd.base_urls
        };
        target.push(value.to_string());
    }
}

fn parse_attr<T: std::str::FromStr>(name: &'static str, value: &str) -> MpdResult<T> {
    value.parse().map_err(|_| MpdError::InvalidAttr {
        name,
        value: value.to_string(),
    })
}

fn parse_iso_duration(value: &str) -> Option<Duration> {
    iso8601_duration::Duration::parse(value)
        .ok()
        .and_then(|d| d.to_std())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT1H">
  <BaseURL>https://cdn.example.com/content/</BaseURL>
  <Period duration="PT30M">
    <SupplementalProperty schemeIdUri="urn:example:period" value="main"/>
    <BaseURL>p0/</BaseURL>
    <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001f">
      <SegmentTemplate media="video_$Number$.m4s" timescale="1000" startNumber="5">
        <SegmentTimeline>
          <S t="0" d="4000" r="2"/>
          <S d="2000"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" width="1280" height="720" bandwidth="1000000"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" mimeType="audio/mp4">
      <Representation id="a0" bandwidth="96000"/>
    </AdaptationSet>
  </Period>
  <Period duration="PT1M">
    <SupplementalProperty schemeIdUri="urn:example:period" value="Ad"/>
    <AdaptationSet contentType="video">
      <Representation id="v1" mimeType="video/mp4" width="640" height="360" bandwidth="300000">
        <SegmentBase indexRange="804-1023"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parses_hierarchy() {
        let mpd = Mpd::parse(FIXTURE).unwrap();
        assert!(mpd.is_static());
        assert_eq!(mpd.base_urls, vec!["https://cdn.example.com/content/"]);
        assert_eq!(mpd.periods.len(), 2);

        let period = &mpd.periods[0];
        assert_eq!(period.duration, Some(Duration::from_secs(30 * 60)));
        assert_eq!(period.base_urls, vec!["p0/"]);
        assert_eq!(period.supplemental_properties[0].value, "main");
        assert_eq!(period.adaptation_sets.len(), 2);

        let set = &period.adaptation_sets[0];
        assert_eq!(set.content_type.as_deref(), Some("video"));
        assert_eq!(set.mime_type.as_deref(), Some("video/mp4"));

        let template = set.segment_template.as_ref().unwrap();
        assert_eq!(template.media.as_deref(), Some("video_$Number$.m4s"));
        assert_eq!(template.timescale, Some(1000));
        assert_eq!(template.start_number, Some(5));
        let timeline = template.timeline.as_ref().unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].t, Some(0));
        assert_eq!(timeline[0].d, 4000);
        assert_eq!(timeline[0].r, 2);
        assert_eq!(timeline[1].r, 0);

        let representation = &set.representations[0];
        assert_eq!(representation.width, 1280);
        assert_eq!(representation.bandwidth, 1_000_000);
        assert!(representation.segment_template.is_none());
    }

    #[test]
    fn parses_segment_base_and_ad_marker() {
        let mpd = Mpd::parse(FIXTURE).unwrap();
        let period = &mpd.periods[1];
        assert_eq!(period.supplemental_properties[0].value, "Ad");
        let representation = &period.adaptation_sets[0].representations[0];
        let base = representation.segment_base.as_ref().unwrap();
        assert_eq!(base.index_range.as_deref(), Some("804-1023"));
    }

    #[test]
    fn dynamic_type_is_not_static() {
        let mpd = Mpd::parse(r#"<MPD type="dynamic"></MPD>"#).unwrap();
        assert!(!mpd.is_static());
        let mpd = Mpd::parse(r#"<MPD></MPD>"#).unwrap();
        assert!(mpd.is_static());
    }
}
