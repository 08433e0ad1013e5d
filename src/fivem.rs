use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use snafu::{ResultExt as _, Snafu};
use tracing::instrument;
use url::Url;

use crate::config::FivemConfig;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const ACCEPT: &str = "application/json, text/plain, */*";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const REFERER: &str = "https://servers.fivem.net/";
const ORIGIN: &str = "https://servers.fivem.net";

pub type Result<T, E = ServerListingError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServerListingError {
    #[snafu(display("could not build the listing client: {source}"))]
    Client { source: reqwest::Error },

    #[snafu(display("request to `{url}` failed: {source}"))]
    Request { url: Url, source: reqwest::Error },

    #[snafu(display("`{url}` responded with {status}"))]
    Status { url: Url, status: StatusCode },

    #[snafu(display("`{url}` returned a body that is not json: {source}"))]
    Decode { url: Url, source: serde_json::Error },
}

/// Client for the single-server endpoint of the FiveM server listing.
///
/// The listing rejects requests that do not look like they come from its own
/// web frontend, so every request carries browser headers.
#[derive(Debug, Clone)]
pub struct ServerListing {
    url: Url,
    http: reqwest::Client,
}

impl ServerListing {
    pub fn new(config: &FivemConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));
        headers.insert(header::REFERER, HeaderValue::from_static(REFERER));
        headers.insert(header::ORIGIN, HeaderValue::from_static(ORIGIN));

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context(ClientSnafu)?;

        Ok(Self {
            url: config.server_url.clone(),
            http,
        })
    }

    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch(&self) -> Result<Value> {
        let url = &self.url;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .context(RequestSnafu { url: url.clone() })?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu { url: url.clone(), status }.fail();
        }

        let body = response
            .text()
            .await
            .context(RequestSnafu { url: url.clone() })?;
        serde_json::from_str(&body).context(DecodeSnafu { url: url.clone() })
    }

    pub async fn player_count(&self) -> Result<i64> {
        let body = self.fetch().await?;
        Ok(extract_player_count(&body))
    }
}

/// `Data.selfReportedClients`, or 0 when any part of the path is missing.
pub fn extract_player_count(body: &Value) -> i64 {
    body.get("Data")
        .and_then(|data| data.get("selfReportedClients"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}
