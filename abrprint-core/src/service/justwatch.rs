//! Shared catalog discovery through JustWatch's popular-titles GraphQL
//! API, used by providers whose own catalog has no crawlable index. Titles
//! are swept in release-year buckets so no single query exceeds the API's
//! result window.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use reqwest::header::{CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::Method;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::AppConfig;
use crate::transport::{Transport, TransportError};

use super::{ServiceError, ServiceResult, UrlExtractor};

const JUSTWATCH_ORIGIN: &str = "https://www.justwatch.com";
const GRAPHQL_URL: &str = "https://apis.justwatch.com/graphql";

// The API silently caps pagination; a filter matching more titles than
// this must be narrowed.
const MAX_RETURNED: usize = 1900;
const PAGE_SIZE: usize = 100;

const QUERY: &str = "query GetPopularTitles($country: Country! $first: Int! = 100 $after: String \
     $popularTitlesFilter: TitleFilter $popularTitlesSortBy: PopularTitlesSorting! = ALPHABETICAL \
     $sortRandomSeed: Int! = 0 $watchNowFilter: WatchNowOfferFilter! $offset: Int = 0) \
     { popularTitles(country: $country filter: $popularTitlesFilter first: $first \
     sortBy: $popularTitlesSortBy sortRandomSeed: $sortRandomSeed offset: $offset \
     after: $after) { edges { node { ...PopularTitleGraphql } } pageInfo { endCursor \
     hasNextPage } totalCount } } fragment PopularTitleGraphql on MovieOrShow { watchNowOffer(\
     country: $country, platform: WEB, filter: $watchNowFilter) { standardWebURL } }";

#[derive(Clone)]
pub struct JustWatchUrlExtractor {
    config: Arc<AppConfig>,
    transport: Transport,
    packages: Vec<String>,
}

impl JustWatchUrlExtractor {
    pub fn new(config: Arc<AppConfig>, transport: Transport, packages: &[&str]) -> Self {
        Self {
            config,
            transport,
            packages: packages.iter().map(|p| p.to_string()).collect(),
        }
    }

    async fn extract_bucket(
        &self,
        min_year: i32,
        max_year: i32,
        cancel: &CancellationToken,
    ) -> ServiceResult<Vec<String>> {
        let filter = serde_json::json!({
            "releaseYear": { "min": min_year, "max": max_year },
            "excludeIrrelevantTitles": false,
            "packages": self.packages,
        });

        let mut urls = Vec::new();
        let mut cursor = String::new();
        let mut country = self.config.country_code.clone();

        for _ in 0..=(MAX_RETURNED / PAGE_SIZE) {
            let response = self.fetch_page(&filter, &country, &cursor, cancel).await?;
            if let Some(error) = response.errors.first() {
                // An unsupported locale is retried once against the US
                // catalog; everything else surfaces.
                if error.message.contains("locale") && country != "US" {
                    country = "US".to_string();
                    continue;
                }
                return Err(ServiceError::GraphQl(format!(
                    "{}: {}",
                    error.extensions.code, error.message
                )));
            }

            let titles = &response.data.popular_titles;
            if titles.total_count > MAX_RETURNED {
                return Err(ServiceError::Provider(format!(
                    "too many titles ({}): restrict filter",
                    titles.total_count
                )));
            }

            urls.extend(response.data.urls());
            if !titles.page_info.has_next_page {
                return Ok(urls);
            }
            cursor = titles.page_info.end_cursor.clone();
        }

        Err(ServiceError::Provider("too many iterations".to_string()))
    }

    async fn fetch_page(
        &self,
        filter: &serde_json::Value,
        country: &str,
        cursor: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<GraphQlResponse> {
        let body = serde_json::json!({
            "operationName": "GetPopularTitles",
            "variables": {
                "after": cursor,
                "offset": null,
                "popularTitlesFilter": filter,
                "watchNowFilter": { "packages": self.packages },
                "country": country,
            },
            "query": QUERY,
        });

        let url = Url::parse(GRAPHQL_URL)
            .map_err(|_| ServiceError::Provider("invalid graphql endpoint".to_string()))?;
        let request = self
            .transport
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/json")
            .header(ORIGIN, JUSTWATCH_ORIGIN)
            .header(REFERER, format!("{JUSTWATCH_ORIGIN}/"))
            .body(body.to_string());

        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status()));
        }
        Ok(response.json().await.map_err(TransportError::Http)?)
    }
}

#[async_trait]
impl UrlExtractor for JustWatchUrlExtractor {
    async fn extract_urls(&self, cancel: &CancellationToken) -> ServiceResult<Vec<String>> {
        let current_year = chrono::Utc::now().year();

        let buckets = (1950..=current_year).map(|year| {
            // The first bucket sweeps everything back to 1900.
            let min_year = if year == 1950 { 1900 } else { year };
            self.extract_bucket(min_year, year, cancel)
        });

        let results = futures::future::try_join_all(buckets).await?;

        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for url in results.into_iter().flatten() {
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }
        Ok(urls)
    }
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: GraphQlData,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlData {
    #[serde(default)]
    popular_titles: PopularTitles,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PopularTitles {
    #[serde(default)]
    edges: Vec<Edge>,
    #[serde(default)]
    page_info: PageInfo,
    #[serde(default)]
    total_count: usize,
}

#[derive(Debug, Default, Deserialize)]
struct Edge {
    #[serde(default)]
    node: Node,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    #[serde(default)]
    watch_now_offer: WatchNowOffer,
}

#[derive(Debug, Default, Deserialize)]
struct WatchNowOffer {
    #[serde(default, rename = "standardWebURL")]
    standard_web_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    end_cursor: String,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    extensions: GraphQlErrorExtensions,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlErrorExtensions {
    #[serde(default)]
    code: String,
}

impl GraphQlData {
    fn urls(&self) -> Vec<String> {
        self.popular_titles
            .edges
            .iter()
            .filter(|edge| !edge.node.watch_now_offer.standard_web_url.is_empty())
            .map(|edge| edge.node.watch_now_offer.standard_web_url.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_skip_titles_without_offers() {
        let data: GraphQlData = serde_json::from_value(serde_json::json!({
            "popularTitles": {
                "edges": [
                    { "node": { "watchNowOffer": { "standardWebURL": "https://a.example/t1" } } },
                    { "node": { "watchNowOffer": { "standardWebURL": "" } } },
                    { "node": {} }
                ],
                "pageInfo": { "endCursor": "x", "hasNextPage": false },
                "totalCount": 3
            }
        }))
        .unwrap();
        assert_eq!(data.urls(), vec!["https://a.example/t1"]);
    }
}
