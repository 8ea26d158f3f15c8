//! Prime Video. Catalog discovery rides on JustWatch; detail pages and
//! playback resources come from Amazon's JSON APIs. Playback-resource
//! calls go to the sibling domain (amazon <-> primevideo) to avoid 421
//! responses, and manifest URLs are forced to segment-base encoding.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use reqwest::header::{ORIGIN, REFERER};
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::config::AppConfig;
use crate::model::{one_title, AbrFormat, Reference, Video};
use crate::transport::{Transport, TransportError};

use super::{
    DefaultFingerprinter, DefaultVariantExtractor, ExtractedVideo, Fingerprinter,
    JustWatchUrlExtractor, Service, ServiceError, ServiceResult, UrlExtractor, VariantExtractor,
    VideoExtractor, VideoResult,
};

const AMAZON_ORIGIN: &str = "https://www.primevideo.com";
const JUST_WATCH_PACKAGES: [&str; 2] = ["amp", "prv"];

#[derive(Clone)]
pub struct Amazon {
    transport: Transport,
    matcher: Regex,
    just_watch: JustWatchUrlExtractor,
    variant_extractor: DefaultVariantExtractor,
    fingerprinter: DefaultFingerprinter,
}

impl Amazon {
    pub fn new(config: Arc<AppConfig>, transport: Transport) -> ServiceResult<Self> {
        Ok(Self {
            matcher: Regex::new(
                r"((?:amazon|primevideo)\.[^/]+).*(?:(?:(?:gti|asin|creativeASIN)=|(?:detail|dp)/)([\w\.\-]+))",
            )?,
            just_watch: JustWatchUrlExtractor::new(
                config,
                transport.clone(),
                &JUST_WATCH_PACKAGES,
            ),
            variant_extractor: DefaultVariantExtractor::new(
                transport.clone(),
                Some(AMAZON_ORIGIN.to_string()),
            ),
            fingerprinter: DefaultFingerprinter::new(
                transport.clone(),
                Some(AMAZON_ORIGIN.to_string()),
            ),
            transport,
        })
    }

    async fn extract_detail_page_widgets(
        &self,
        domain: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<DetailPageWidgets> {
        let mut response = self.fetch_detail_page(domain, id, "", cancel).await?;

        if !response.widgets.buy_box.action.available_with_prime() {
            return Err(ServiceError::Provider(format!(
                "unavailable with prime {id:?}"
            )));
        }

        loop {
            let token = response
                .widgets
                .episode_list
                .actions
                .pagination
                .iter()
                .find(|p| p.token_type == "NextPage")
                .map(|p| p.token.clone());
            let Some(token) = token else {
                break;
            };

            let page = self.fetch_detail_page(domain, id, &token, cancel).await?;
            response
                .widgets
                .episode_list
                .episodes
                .extend(page.widgets.episode_list.episodes);
            response.widgets.episode_list.actions.pagination =
                page.widgets.episode_list.actions.pagination;
        }

        Ok(response.widgets)
    }

    async fn fetch_detail_page(
        &self,
        domain: &str,
        id: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<DetailPageResponse> {
        let (url, referer) = create_urls(domain, id, token);
        let url = Url::parse(&url)
            .map_err(|_| ServiceError::Provider(format!("invalid detail url for {id:?}")))?;

        let request = self
            .transport
            .request(Method::GET, url)
            .header(REFERER, referer)
            .header("x-requested-with", "XMLHttpRequest");

        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status()));
        }
        Ok(response.json().await.map_err(TransportError::Http)?)
    }

    async fn send_movie(
        &self,
        domain: &str,
        id: &str,
        movie: Movie,
        sender: mpsc::Sender<VideoResult>,
        cancel: &CancellationToken,
    ) {
        let result = match self.extract_video_references(domain, &movie.gti, cancel).await {
            Ok(references) => Ok(ExtractedVideo {
                video: Video {
                    id: movie.gti,
                    title: movie.title,
                    playback_url: format!("https://www.{domain}{}", movie.link),
                    duration: movie.duration,
                    expires_at: None,
                    variants: Vec::new(),
                },
                references,
            }),
            Err(error) => Err(ServiceError::Provider(format!(
                "extract movie reference {id:?}: {error}"
            ))),
        };
        let _ = sender.send(result).await;
    }

    async fn send_series(
        &self,
        domain: &str,
        id: &str,
        season: Season,
        sender: mpsc::Sender<VideoResult>,
        cancel: &CancellationToken,
    ) {
        let mut tasks = JoinSet::new();
        for season_id in season.additional_season_ids.clone() {
            let this = self.clone();
            let domain = domain.to_string();
            let sender = sender.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                match this
                    .extract_detail_page_widgets(&domain, &season_id, &cancel)
                    .await
                {
                    Ok(widgets) => {
                        this.send_season(&domain, &season_id, widgets.season(), sender, &cancel)
                            .await;
                    }
                    Err(error) => {
                        let _ = sender.send(Err(error)).await;
                    }
                }
            });
        }

        self.send_season(domain, id, season, sender, cancel).await;
        while tasks.join_next().await.is_some() {}
    }

    async fn send_season(
        &self,
        domain: &str,
        id: &str,
        season: Season,
        sender: mpsc::Sender<VideoResult>,
        cancel: &CancellationToken,
    ) {
        let mut tasks = JoinSet::new();
        for episode in season.episodes {
            let this = self.clone();
            let domain = domain.to_string();
            let id = id.to_string();
            let series_title = season.series_title.clone();
            let season_number = season.number;
            let sender = sender.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = match this
                    .extract_video_references(&domain, &episode.gti, &cancel)
                    .await
                {
                    Ok(references) => Ok(ExtractedVideo {
                        video: Video {
                            id: episode.gti,
                            title: one_title(
                                &series_title,
                                &episode.title,
                                season_number,
                                episode.number,
                            ),
                            playback_url: format!("https://www.{domain}{}", episode.link),
                            duration: episode.duration,
                            expires_at: None,
                            variants: Vec::new(),
                        },
                        references,
                    }),
                    Err(error) => Err(ServiceError::Provider(format!(
                        "extract season reference {id:?}: {error}"
                    ))),
                };
                let _ = sender.send(result).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Resolve manifest references for both device profiles; each profile
    /// surfaces a different encoded ladder.
    async fn extract_video_references(
        &self,
        domain: &str,
        gti: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<Vec<Reference>> {
        if gti.is_empty() {
            return Err(ServiceError::Provider("empty GTI".to_string()));
        }

        let references = futures::future::try_join_all(
            ["sd", "hd"]
                .into_iter()
                .map(|quality| self.extract_video_reference(domain, gti, quality, cancel)),
        )
        .await
        .map_err(|error| {
            ServiceError::Provider(format!("extract video reference {gti:?}: {error}"))
        })?;

        Ok(references.into_iter().flatten().collect())
    }

    async fn extract_video_reference(
        &self,
        domain: &str,
        gti: &str,
        quality: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<Option<Reference>> {
        let response = self
            .fetch_playback_resources(domain, gti, quality, cancel)
            .await?;

        if let Some(error) = &response.error {
            return Err(ServiceError::Provider(format!(
                "playback resources {gti:?}: {}: {}",
                error.error_code, error.message
            )));
        }
        if let Some(error) = &response.errors_by_resource.playback_urls {
            return Err(ServiceError::Provider(format!(
                "playback urls {gti:?}: {}: {}",
                error.error_code, error.message
            )));
        }

        let url_set_id = &response.playback_urls.default_url_set_id;
        let manifest = &response
            .playback_urls
            .url_sets
            .get(url_set_id)
            .ok_or_else(|| ServiceError::Provider(format!("missing url set {url_set_id:?}")))?
            .urls
            .manifest;

        let format = match manifest.streaming_technology.to_lowercase().as_str() {
            "dash" => AbrFormat::Dash,
            "hls" => AbrFormat::Hls,
            other => {
                debug!(format = other, "dropping reference with unknown format");
                return Ok(None);
            }
        };

        // Multi-period timeline addressing is useless for indexing; ask
        // the CDN for the segment-base rendition instead.
        let mut url = manifest.url.clone();
        if !url.contains("encoding=segmentBase") {
            let mut parsed = Url::parse(&url)
                .map_err(|_| ServiceError::Provider(format!("invalid manifest url {url:?}")))?;
            let query = match parsed.query() {
                Some(existing) if !existing.is_empty() => {
                    format!("{existing}&encoding=segmentBase")
                }
                _ => "encoding=segmentBase".to_string(),
            };
            parsed.set_query(Some(&query));
            url = parsed.to_string();
        }

        Ok(Some(Reference {
            id: url_set_id.clone(),
            format,
            url,
            servers: Vec::new(),
        }))
    }

    async fn fetch_playback_resources(
        &self,
        domain: &str,
        gti: &str,
        quality: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<PlaybackResourcesResponse> {
        let (device_id, operating_system) = match quality {
            "sd" => ("479f9d33-f548-4567-89b5-4a36e898b576", "Linux"),
            _ => ("49e8621c-a610-4ba6-9e3a-786b3a2f35cc", "Mac%20OS%20X"),
        };

        let query = format!(
            "?deviceID={device_id}\
             &deviceTypeID=AOAGZA014O5RE\
             &firmware=1\
             &operatingSystemName={operating_system}\
             &asin={gti}\
             &consumptionType=Streaming\
             &desiredResources=PlaybackUrls,CuepointPlaylist\
             &resourceUsage=CacheResources\
             &videoMaterialType=Feature\
             &displayWidth=3840\
             &displayHeight=2160\
             &vodStreamSupportOverride=Auxiliary\
             &deviceStreamingTechnologyOverride=DASH\
             &deviceDrmOverride=CENC\
             &deviceAdInsertionTypeOverride=SSAI\
             &deviceVideoCodecOverride=H264\
             &deviceVideoQualityOverride=HD\
             &deviceBitrateAdaptationsOverride=CVBR,CBR\
             &supportedDRMKeyScheme=DUAL_KEY\
             &ssaiSegmentInfoSupport=Base\
             &ssaiStitchType=MultiPeriod"
        );

        let switched = switch_domain(domain);
        let url = format!("https://atv-ps.{switched}.com/cdp/catalog/GetPlaybackResources{query}");
        let url = Url::parse(&url)
            .map_err(|_| ServiceError::Provider(format!("invalid playback url for {gti:?}")))?;

        let request = self
            .transport
            .request(Method::POST, url)
            .header(ORIGIN, format!("https://www.{switched}.com"))
            .header(REFERER, format!("https://www.{switched}.com/"));

        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status()));
        }
        Ok(response.json().await.map_err(TransportError::Http)?)
    }
}

impl Service for Amazon {
    fn id(&self) -> &str {
        "amazon"
    }

    fn url_extractor(&self) -> Option<&dyn UrlExtractor> {
        Some(&self.just_watch)
    }

    fn video_extractor(&self) -> Option<&dyn VideoExtractor> {
        Some(self)
    }

    fn variant_extractor(&self) -> Option<&dyn VariantExtractor> {
        Some(&self.variant_extractor)
    }

    fn fingerprinter(&self) -> Option<&dyn Fingerprinter> {
        Some(&self.fingerprinter)
    }
}

impl VideoExtractor for Amazon {
    fn matches(&self, url: &str) -> bool {
        self.matcher.is_match(url)
    }

    fn video_extract(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<VideoResult> {
        let (sender, receiver) = mpsc::channel(1);
        let this = self.clone();
        let url = url.to_string();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let captures = this.matcher.captures(&url);
            let (domain, id) = match captures {
                Some(captures) => (
                    captures.get(1).map(|m| m.as_str().to_string()),
                    captures.get(2).map(|m| m.as_str().to_string()),
                ),
                None => (None, None),
            };
            let (Some(domain), Some(id)) = (domain, id) else {
                let _ = sender.send(Err(ServiceError::NoServiceMatch { url })).await;
                return;
            };

            let widgets = match this.extract_detail_page_widgets(&domain, &id, &cancel).await {
                Ok(widgets) => widgets,
                Err(error) => {
                    let _ = sender.send(Err(error)).await;
                    return;
                }
            };

            match widgets.page_context.sub_page_type.as_str() {
                "Movie" => {
                    this.send_movie(&domain, &id, widgets.movie(), sender, &cancel)
                        .await;
                }
                "Season" => {
                    this.send_series(&domain, &id, widgets.season(), sender, &cancel)
                        .await;
                }
                other => {
                    let _ = sender
                        .send(Err(ServiceError::Provider(format!("page type {other:?}"))))
                        .await;
                }
            }
        });

        receiver
    }
}

fn create_urls(domain: &str, id: &str, token: &str) -> (String, String) {
    let path_prefix = if domain.starts_with("amazon") {
        "/gp/video"
    } else {
        ""
    };
    let base_url = format!("https://www.{domain}{path_prefix}");

    let referer = if id.starts_with("amzn1") {
        format!("{base_url}/detail?gti={id}/")
    } else {
        format!("{base_url}/detail/{id}/")
    };

    let url = if token.is_empty() {
        let widgets: String = url::form_urlencoded::byte_serialize(
            br#"{"atf":["Self","Header","BuyBox","SeasonSelector"],"btf":["Episodes","Bonus"]}"#,
        )
        .collect();
        format!("{base_url}/api/getDetailPage?titleID={id}&sections=Atf&sections=Btf&widgets={widgets}")
    } else {
        let widgets: String = url::form_urlencoded::byte_serialize(
            format!(r#"[{{"widgetType":"EpisodeList","widgetToken":"{token}"}}]"#).as_bytes(),
        )
        .collect();
        format!("{base_url}/api/getDetailWidgets?titleID={id}&widgets={widgets}")
    };

    (url, referer)
}

// Playback resources are requested from the sibling storefront domain.
fn switch_domain(domain: &str) -> &'static str {
    match domain.split('.').next() {
        Some("amazon") => "primevideo",
        _ => "amazon",
    }
}

#[derive(Debug, Default, Deserialize)]
struct DetailPageResponse {
    #[serde(default)]
    widgets: DetailPageWidgets,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailPageWidgets {
    #[serde(default)]
    page_context: PageContext,
    #[serde(default, rename = "self")]
    own: DetailSelf,
    #[serde(default)]
    header: DetailHeader,
    #[serde(default, rename = "buybox")]
    buy_box: BuyBox,
    #[serde(default)]
    season_selector: Vec<SeasonSelectorEntry>,
    #[serde(default)]
    episode_list: EpisodeList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageContext {
    #[serde(default)]
    sub_page_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct DetailSelf {
    #[serde(default)]
    gti: String,
    #[serde(default)]
    link: String,
}

#[derive(Debug, Default, Deserialize)]
struct DetailHeader {
    #[serde(default)]
    detail: DetailInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailInfo {
    #[serde(default)]
    parent_title: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: i32,
    #[serde(default)]
    season_number: i32,
    #[serde(default)]
    episode_number: i32,
}

#[derive(Debug, Default, Deserialize)]
struct BuyBox {
    #[serde(default)]
    action: DetailPageAction,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailPageAction {
    #[serde(default)]
    acquisition_actions: AcquisitionActions,
    #[serde(default)]
    playback_actions: PlaybackActions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcquisitionActions {
    #[serde(default)]
    primary_ways_to_watch: Vec<WaysToWatch>,
    #[serde(default)]
    more_ways_to_watch: WaysToWatch,
}

#[derive(Debug, Default, Deserialize)]
struct WaysToWatch {
    #[serde(default)]
    children: Vec<WayToWatchChild>,
}

#[derive(Debug, Default, Deserialize)]
struct WayToWatchChild {
    #[serde(default, rename = "sType")]
    s_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct PlaybackActions {
    #[serde(default)]
    main: PlaybackMain,
}

#[derive(Debug, Default, Deserialize)]
struct PlaybackMain {
    #[serde(default)]
    children: Vec<PlaybackChild>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackChild {
    #[serde(default)]
    benefit_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct SeasonSelectorEntry {
    #[serde(default, rename = "titleID")]
    title_id: String,
    #[serde(default, rename = "isSelected")]
    is_selected: bool,
}

#[derive(Debug, Default, Deserialize)]
struct EpisodeList {
    #[serde(default)]
    actions: EpisodeListActions,
    #[serde(default)]
    episodes: Vec<EpisodeEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct EpisodeListActions {
    #[serde(default)]
    pagination: Vec<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    #[serde(default)]
    token: String,
    #[serde(default)]
    token_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct EpisodeEntry {
    #[serde(default, rename = "self")]
    own: DetailSelf,
    #[serde(default)]
    detail: DetailInfo,
}

impl DetailPageAction {
    fn available_with_prime(&self) -> bool {
        let prime_way = self
            .acquisition_actions
            .primary_ways_to_watch
            .iter()
            .flat_map(|w| &w.children)
            .chain(&self.acquisition_actions.more_ways_to_watch.children)
            .any(|child| child.s_type == "PRIME");
        if prime_way {
            return true;
        }

        self.playback_actions
            .main
            .children
            .iter()
            .any(|child| child.benefit_id == "freewithads" || child.benefit_id == "FVOD")
    }
}

#[derive(Debug)]
struct Movie {
    gti: String,
    link: String,
    title: String,
    duration: i32,
}

#[derive(Debug)]
struct Season {
    series_title: String,
    number: i32,
    additional_season_ids: Vec<String>,
    episodes: Vec<SeasonEpisode>,
}

#[derive(Debug)]
struct SeasonEpisode {
    gti: String,
    link: String,
    title: String,
    duration: i32,
    number: i32,
}

impl DetailPageWidgets {
    fn movie(&self) -> Movie {
        Movie {
            gti: self.own.gti.clone(),
            link: self.own.link.clone(),
            title: self.header.detail.title.clone(),
            duration: self.header.detail.duration,
        }
    }

    fn season(&self) -> Season {
        Season {
            series_title: self.header.detail.parent_title.clone(),
            number: self.header.detail.season_number,
            additional_season_ids: self
                .season_selector
                .iter()
                .filter(|entry| !entry.is_selected)
                .map(|entry| entry.title_id.clone())
                .collect(),
            episodes: self
                .episode_list
                .episodes
                .iter()
                .map(|episode| SeasonEpisode {
                    gti: episode.own.gti.clone(),
                    link: episode.own.link.clone(),
                    title: episode.detail.title.clone(),
                    duration: episode.detail.duration,
                    number: episode.detail.episode_number,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackResourcesResponse {
    #[serde(default)]
    playback_urls: PlaybackUrls,
    #[serde(default)]
    errors_by_resource: ErrorsByResource,
    #[serde(default)]
    error: Option<PlaybackResourcesError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackUrls {
    #[serde(default)]
    default_url_set_id: String,
    #[serde(default)]
    url_sets: HashMap<String, UrlSet>,
}

#[derive(Debug, Default, Deserialize)]
struct UrlSet {
    #[serde(default)]
    urls: UrlSetUrls,
}

#[derive(Debug, Default, Deserialize)]
struct UrlSetUrls {
    #[serde(default)]
    manifest: ManifestInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestInfo {
    #[serde(default)]
    streaming_technology: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorsByResource {
    #[serde(default, rename = "PlaybackUrls")]
    playback_urls: Option<PlaybackResourcesError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackResourcesError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}
