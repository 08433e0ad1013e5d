use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, Stream};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use snafu::{ResultExt as _, Snafu};
use tracing::instrument;
use url::Url;

use crate::config::{base_url, TwitchConfig};

/// Largest page the streams endpoint serves.
pub const PAGE_SIZE: u8 = 100;

pub type Result<T, E = TwitchError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TwitchError {
    #[snafu(display("the client id is not a valid header value: {source}"))]
    InvalidClientId { source: InvalidHeaderValue },

    #[snafu(display("could not build the twitch client: {source}"))]
    Client { source: reqwest::Error },

    #[snafu(display("could not build the {endpoint} url: {source}"))]
    Endpoint {
        endpoint: &'static str,
        source: url::ParseError,
    },

    #[snafu(display("request to {endpoint} failed: {source}"))]
    Request {
        endpoint: &'static str,
        source: reqwest::Error,
    },

    #[snafu(display("{endpoint} responded with {status}: {message}"))]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        message: String,
    },

    #[snafu(display("{endpoint} returned a body that is not json: {source}"))]
    Decode {
        endpoint: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("{endpoint} returned an unexpected shape: {source}"))]
    Shape {
        endpoint: &'static str,
        source: serde_json::Error,
    },
}

impl TwitchError {
    /// Failures of the exchange itself, as opposed to a response whose
    /// content is not what the API documents.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TwitchError::Request { .. } | TwitchError::Status { .. } | TwitchError::Decode { .. }
        )
    }
}

/// App access token from the client-credentials grant.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Games {
    #[serde(default)]
    data: Vec<Game>,
}

#[derive(Debug, Deserialize)]
struct Game {
    id: String,
}

/// One page of `GET /helix/streams`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamPage {
    #[serde(default)]
    pub data: Vec<LiveStream>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl StreamPage {
    /// Cursor of the next page; an empty cursor means there is none.
    pub fn cursor(&self) -> Option<&str> {
        self.pagination.cursor.as_deref().filter(|cursor| !cursor.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Entry of a streams page. Only `title` is required of every entry; the
/// other fields are checked once a stream is kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LiveStream {
    pub title: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub viewer_count: Option<u64>,
}

enum Cursor {
    First,
    After(String),
    Done,
}

/// Helix client authenticated as an application.
#[derive(Clone)]
pub struct Twitch {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_url: Url,
    helix_url: Url,
    page_pause: Duration,
}

impl Twitch {
    pub fn new(config: &TwitchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let client_id = HeaderValue::from_str(&config.client_id).context(InvalidClientIdSnafu)?;
        headers.insert("client-id", client_id);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context(ClientSnafu)?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_url: config.auth_url.clone(),
            helix_url: base_url(&config.helix_url),
            page_pause: config.page_pause,
        })
    }

    /// Exchanges the client id and secret for an app access token.
    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<AccessToken> {
        let request = self.http.post(self.auth_url.clone()).query(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ]);

        let body = send("token", request).await?;
        let token: TokenResponse = shape("token", body)?;

        Ok(AccessToken(token.access_token))
    }

    /// Looks up the id of the game called `name`.
    ///
    /// A failed request is reported the same way as an unknown game: both
    /// return `None`.
    #[instrument(skip(self, token))]
    pub async fn game_id(&self, token: &AccessToken, name: &str) -> Result<Option<String>> {
        let url = self.endpoint("games")?;
        let request = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .query(&[("name", name)]);

        let body = match send("games", request).await {
            Ok(body) => body,
            Err(error) if error.is_transport() => {
                tracing::error!(%error, game = name, "failed to fetch game id");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let games: Games = shape("games", body)?;
        let Some(game) = games.data.into_iter().next() else {
            tracing::warn!(game = name, "no game found with that name");
            return Ok(None);
        };

        Ok(Some(game.id))
    }

    /// Live streams of `game_id`, one item per page.
    ///
    /// Nothing is requested until the stream is polled, and every call starts
    /// again from the first page. Pages are fetched while the API hands out a
    /// cursor, waiting `page_pause` between fetches. The first error is
    /// yielded and ends the stream.
    pub fn stream_pages<'a>(
        &'a self, token: &'a AccessToken, game_id: &'a str,
    ) -> impl Stream<Item = Result<StreamPage>> + Send + 'a {
        paginate(self.page_pause, move |after: Option<String>| async move {
            self.stream_page(token, game_id, after.as_deref()).await
        })
    }

    #[instrument(skip(self, token))]
    async fn stream_page(
        &self, token: &AccessToken, game_id: &str, after: Option<&str>,
    ) -> Result<StreamPage> {
        let url = self.endpoint("streams")?;
        let mut request = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .query(&[("game_id", game_id)])
            .query(&[("first", PAGE_SIZE)]);

        if let Some(after) = after {
            request = request.query(&[("after", after)]);
        }

        let body = send("streams", request).await?;
        let page: StreamPage = shape("streams", body)?;
        tracing::debug!(streams = page.data.len(), has_next = page.cursor().is_some(), "fetched page");

        Ok(page)
    }

    fn endpoint(&self, endpoint: &'static str) -> Result<Url> {
        self.helix_url.join(endpoint).context(EndpointSnafu { endpoint })
    }
}

/// Calls `fetch` with the cursor of the previous page (`None` first) until a
/// page comes back without one or a fetch fails, sleeping `pause` before every
/// fetch but the first.
pub(crate) fn paginate<F, Fut>(pause: Duration, fetch: F) -> impl Stream<Item = Result<StreamPage>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<StreamPage>>,
{
    stream::unfold((Cursor::First, fetch), move |(cursor, mut fetch)| async move {
        let after = match cursor {
            Cursor::Done => return None,
            Cursor::First => None,
            Cursor::After(after) => {
                tokio::time::sleep(pause).await;
                Some(after)
            }
        };

        match fetch(after).await {
            Ok(page) => {
                let next = match page.cursor() {
                    Some(cursor) => Cursor::After(cursor.to_string()),
                    None => Cursor::Done,
                };
                Some((Ok(page), (next, fetch)))
            }
            Err(error) => Some((Err(error), (Cursor::Done, fetch))),
        }
    })
}

async fn send(endpoint: &'static str, request: RequestBuilder) -> Result<Value> {
    let response = request.send().await.context(RequestSnafu { endpoint })?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return StatusSnafu { endpoint, status, message }.fail();
    }

    let body = response.text().await.context(RequestSnafu { endpoint })?;
    serde_json::from_str(&body).context(DecodeSnafu { endpoint })
}

fn shape<T: DeserializeOwned>(endpoint: &'static str, body: Value) -> Result<T> {
    serde_json::from_value(body).context(ShapeSnafu { endpoint })
}
