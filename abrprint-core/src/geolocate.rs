//! Country-code lookup against a geolocation API, used when the caller
//! does not supply one. Catalog queries are geo-sensitive, so a wrong
//! country silently skews results; failing here is preferable.

use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::transport::{Transport, TransportError};

const ENDPOINT: &str = "https://api.ipapi.is";
const DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GeolocateError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("status {0}")]
    Status(reqwest::StatusCode),
    #[error("no country code in response")]
    Missing,
    #[error("geolocation deadline exceeded")]
    Timeout,
}

pub type GeolocateResult<T> = Result<T, GeolocateError>;

#[derive(Debug, Default, Deserialize)]
struct GeolocateResponse {
    #[serde(default)]
    location: Location,
}

#[derive(Debug, Default, Deserialize)]
struct Location {
    #[serde(default)]
    country_code: String,
}

pub async fn country_code(
    transport: &Transport,
    cancel: &CancellationToken,
) -> GeolocateResult<String> {
    let lookup = async {
        let url = crate::transport::parse_url(ENDPOINT)?;
        let response = transport.send(transport.request(Method::GET, url), cancel).await?;
        if !response.status().is_success() {
            return Err(GeolocateError::Status(response.status()));
        }
        let body: GeolocateResponse = response.json().await.map_err(TransportError::Http)?;
        Ok(body)
    };

    let body = tokio::time::timeout(DEADLINE, lookup)
        .await
        .map_err(|_| GeolocateError::Timeout)??;

    if body.location.country_code.is_empty() {
        return Err(GeolocateError::Missing);
    }
    Ok(body.location.country_code)
}
