//! Swedish public-service player. Catalog discovery and video lookup go
//! through SVT's GraphQL and video APIs; media fetches reuse the generic
//! extractor and fingerprinter with the svtplay origin.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::{NoExpand, Regex};
use reqwest::header::{CONTENT_TYPE, ORIGIN, REFERER};
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
    DefaultFingerprinter, DefaultVariantExtractor, ExtractedVideo, Fingerprinter, Service,
    ServiceError, ServiceResult, UrlExtractor, VariantExtractor, VideoExtractor, VideoResult,
};

const SVT_ORIGIN: &str = "https://www.svtplay.se";
const GRAPHQL_URL: &str = "https://api.svt.se/contento/graphql";
const VIDEO_API: &str = "https://video.svt.se/video/";

const URLS_QUERY: &str = "query { programAtillO(filter: {includeFullOppetArkiv: true}) \
     { flat { episodes { urls { svtplay } hasVideoReferences \
     restrictions { onlyAvailableInSweden } } } } }";

#[derive(Clone)]
pub struct Svt {
    config: Arc<AppConfig>,
    transport: Transport,
    matcher: Regex,
    akamai: Regex,
    variant_extractor: DefaultVariantExtractor,
    fingerprinter: DefaultFingerprinter,
}

impl Svt {
    pub fn new(config: Arc<AppConfig>, transport: Transport) -> ServiceResult<Self> {
        Ok(Self {
            config,
            matcher: Regex::new(r"svtplay\.se/(video/\w+|[\w-]+)")?,
            akamai: Regex::new(r"[a-zA-Z]\.akamaized\.net")?,
            variant_extractor: DefaultVariantExtractor::new(
                transport.clone(),
                Some(SVT_ORIGIN.to_string()),
            ),
            fingerprinter: DefaultFingerprinter::new(
                transport.clone(),
                Some(SVT_ORIGIN.to_string()),
            ),
            transport,
        })
    }

    async fn graphql<T: serde::de::DeserializeOwned>(
        &self,
        query: String,
        cancel: &CancellationToken,
    ) -> ServiceResult<T> {
        let url = Url::parse(GRAPHQL_URL)
            .map_err(|_| ServiceError::Provider("invalid graphql endpoint".to_string()))?;
        let body = serde_json::json!({ "query": query });
        let request = self
            .transport
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/json")
            .header(ORIGIN, SVT_ORIGIN)
            .header(REFERER, format!("{SVT_ORIGIN}/"))
            .body(body.to_string());

        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status()));
        }
        Ok(response.json().await.map_err(TransportError::Http)?)
    }

    async fn extract_path_ids(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<Vec<String>> {
        let query = format!(
            "query {{ detailsPageByPath(path: \"/{path}\", filter: {{includeFullOppetArkiv: true}}) \
             {{ video {{ svtId }} associatedContent(include: [productionPeriod, season]) \
             {{ items(filter: {{includeFullOppetArkiv: true}}) {{ item {{ videoSvtId }} }} }} }} }}"
        );
        let response: GraphQlPathIdsResponse = self.graphql(query, cancel).await?;
        if let Some(error) = response.errors.first() {
            return Err(ServiceError::GraphQl(error.extensions.classification.clone()));
        }

        let ids = response.data.path_ids();
        if ids.is_empty() {
            return Err(ServiceError::Provider(format!("no ids for {path:?}")));
        }
        Ok(ids)
    }

    async fn send_videos(
        &self,
        ids: Vec<String>,
        sender: mpsc::Sender<VideoResult>,
        cancel: &CancellationToken,
    ) {
        let mut tasks = JoinSet::new();
        for id in ids {
            let this = self.clone();
            let sender = sender.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                this.send_video(&id, sender, &cancel).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn send_video(
        &self,
        id: &str,
        sender: mpsc::Sender<VideoResult>,
        cancel: &CancellationToken,
    ) {
        let result = match self.fetch_video(id, cancel).await {
            Ok(response) => Ok(ExtractedVideo {
                references: response.references(&self.akamai),
                video: response.video(),
            }),
            Err(error) => Err(ServiceError::Provider(format!(
                "fetch video {id:?}: {error}"
            ))),
        };
        let _ = sender.send(result).await;
    }

    async fn fetch_video(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<VideoResponse> {
        let url = Url::parse(&format!("{VIDEO_API}{id}"))
            .map_err(|_| ServiceError::Provider(format!("invalid video id {id:?}")))?;
        let request = self
            .transport
            .request(Method::GET, url)
            .header(ORIGIN, SVT_ORIGIN)
            .header(REFERER, format!("{SVT_ORIGIN}/"));

        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status()));
        }
        Ok(response.json().await.map_err(TransportError::Http)?)
    }
}

impl Service for Svt {
    fn id(&self) -> &str {
        "svt"
    }

    fn url_extractor(&self) -> Option<&dyn UrlExtractor> {
        Some(self)
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

#[async_trait]
impl UrlExtractor for Svt {
    async fn extract_urls(&self, cancel: &CancellationToken) -> ServiceResult<Vec<String>> {
        let response: GraphQlUrlResponse = self.graphql(URLS_QUERY.to_string(), cancel).await?;
        if let Some(error) = response.errors.first() {
            return Err(ServiceError::GraphQl(error.extensions.classification.clone()));
        }
        Ok(response.data.urls(&self.config.country_code))
    }
}

impl VideoExtractor for Svt {
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
            let matched = this
                .matcher
                .captures(&url)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            let Some(matched) = matched else {
                let _ = sender.send(Err(ServiceError::NoServiceMatch { url })).await;
                return;
            };

            let ids = match matched.strip_prefix("video/") {
                Some(id) => vec![id.to_string()],
                None => match this.extract_path_ids(&matched, &cancel).await {
                    Ok(ids) => ids,
                    Err(error) => {
                        let _ = sender.send(Err(error)).await;
                        return;
                    }
                },
            };

            this.send_videos(ids, sender, &cancel).await;
        });

        receiver
    }
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlUrlResponse {
    #[serde(default)]
    data: GraphQlUrlData,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlUrlData {
    #[serde(default)]
    program_atill_o: ProgramListing,
}

#[derive(Debug, Default, Deserialize)]
struct ProgramListing {
    #[serde(default)]
    flat: Vec<FlatProgram>,
}

#[derive(Debug, Default, Deserialize)]
struct FlatProgram {
    #[serde(default)]
    episodes: Vec<Episode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Episode {
    #[serde(default)]
    urls: EpisodeUrls,
    #[serde(default)]
    has_video_references: bool,
    #[serde(default)]
    restrictions: Restrictions,
}

#[derive(Debug, Default, Deserialize)]
struct EpisodeUrls {
    #[serde(default)]
    svtplay: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Restrictions {
    #[serde(default)]
    only_available_in_sweden: bool,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    extensions: GraphQlErrorExtensions,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlErrorExtensions {
    #[serde(default)]
    classification: String,
}

impl GraphQlUrlData {
    fn urls(&self, country: &str) -> Vec<String> {
        let mut paths = HashSet::new();
        for program in &self.program_atill_o.flat {
            for episode in &program.episodes {
                let geo_blocked = country != "SE" && episode.restrictions.only_available_in_sweden;
                if !episode.urls.svtplay.is_empty()
                    && episode.has_video_references
                    && !geo_blocked
                {
                    paths.insert(episode.urls.svtplay.clone());
                }
            }
        }
        paths
            .into_iter()
            .map(|path| format!("{SVT_ORIGIN}{path}"))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlPathIdsResponse {
    #[serde(default)]
    data: GraphQlPathIdsData,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlPathIdsData {
    #[serde(default)]
    details_page_by_path: DetailsPage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsPage {
    #[serde(default)]
    video: DetailsVideo,
    #[serde(default)]
    associated_content: Vec<AssociatedContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsVideo {
    #[serde(default)]
    svt_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct AssociatedContent {
    #[serde(default)]
    items: Vec<AssociatedItem>,
}

#[derive(Debug, Default, Deserialize)]
struct AssociatedItem {
    #[serde(default)]
    item: AssociatedInner,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociatedInner {
    #[serde(default)]
    video_svt_id: String,
}

impl GraphQlPathIdsData {
    fn path_ids(&self) -> Vec<String> {
        let mut ids = HashSet::new();
        let page = &self.details_page_by_path;
        if !page.video.svt_id.is_empty() {
            ids.insert(page.video.svt_id.clone());
        }
        for content in &page.associated_content {
            for item in &content.items {
                if !item.item.video_svt_id.is_empty() {
                    ids.insert(item.item.video_svt_id.clone());
                }
            }
        }
        ids.into_iter().collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResponse {
    #[serde(default)]
    svt_id: String,
    #[serde(default)]
    program_title: String,
    #[serde(default)]
    episode_title: String,
    #[serde(default)]
    content_duration: i32,
    #[serde(default)]
    rights: Rights,
    #[serde(default)]
    video_references: Vec<VideoReference>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Rights {
    #[serde(default)]
    valid_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoReference {
    #[serde(default)]
    url: String,
    #[serde(default)]
    format: String,
}

const SERVERS: [&str; 3] = ["a", "b", "c"];

impl VideoResponse {
    fn video(&self) -> Video {
        Video {
            id: self.svt_id.clone(),
            title: one_title(&self.program_title, &self.episode_title, 0, 0),
            playback_url: format!("{SVT_ORIGIN}/video/{}", self.svt_id),
            duration: self.content_duration,
            expires_at: self.rights.valid_to,
            variants: Vec::new(),
        }
    }

    /// Map the raw video references to extraction references, rewriting
    /// lettered akamaized hosts to the `$Server$` placeholder.
    fn references(&self, akamai: &Regex) -> Vec<Reference> {
        let mut references = Vec::with_capacity(self.video_references.len());
        for reference in &self.video_references {
            let format = if reference.format.starts_with("dash") {
                AbrFormat::Dash
            } else if reference.format.starts_with("hls") {
                AbrFormat::Hls
            } else {
                debug!(format = %reference.format, "dropping reference with unknown format");
                continue;
            };
            references.push(Reference {
                id: reference.format.clone(),
                format,
                url: akamai
                    .replace_all(&reference.url, NoExpand("$Server$.akamaized.net"))
                    .into_owned(),
                servers: SERVERS.iter().map(|s| s.to_string()).collect(),
            });
        }
        references
    }
}
