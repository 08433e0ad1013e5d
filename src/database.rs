use std::future::Future;

use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Serialize;
use snafu::{ResultExt as _, Snafu};
use tracing::instrument;
use url::Url;

use crate::config::{base_url, SupabaseConfig};

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DatabaseError {
    #[snafu(display("the database key is not a valid header value: {source}"))]
    InvalidKey { source: InvalidHeaderValue },

    #[snafu(display("could not build the database client: {source}"))]
    Client { source: reqwest::Error },

    #[snafu(display("`{url}` is not a valid table endpoint: {source}"))]
    Endpoint { url: Url, source: url::ParseError },

    #[snafu(display("failed to insert into `{table}`: {source}"))]
    Request { table: String, source: reqwest::Error },

    #[snafu(display("insert into `{table}` was rejected with {status}: {message}"))]
    Rejected {
        table: String,
        status: StatusCode,
        message: String,
    },
}

/// An append-only destination for records.
pub trait Table {
    /// Inserts one record as one row of `table`.
    fn insert<R>(&self, table: &str, record: &R) -> impl Future<Output = Result<()>> + Send
    where
        R: Serialize + Sync;
}

/// Supabase project reached through its PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct Supabase {
    rest: Url,
    http: reqwest::Client,
}

impl Supabase {
    pub fn connect(config: &SupabaseConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.key).context(InvalidKeySnafu)?;
        let bearer =
            HeaderValue::from_str(&format!("Bearer {}", config.key)).context(InvalidKeySnafu)?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("prefer", HeaderValue::from_static("return=minimal"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context(ClientSnafu)?;

        let rest = base_url(&config.url)
            .join("rest/v1/")
            .context(EndpointSnafu { url: config.url.clone() })?;

        Ok(Self { rest, http })
    }
}

impl Table for Supabase {
    #[instrument(skip(self, record))]
    async fn insert<R>(&self, table: &str, record: &R) -> Result<()>
    where
        R: Serialize + Sync,
    {
        let url = self
            .rest
            .join(table)
            .context(EndpointSnafu { url: self.rest.clone() })?;

        let response = self
            .http
            .post(url)
            .json(record)
            .send()
            .await
            .context(RequestSnafu { table })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return RejectedSnafu { table, status, message }.fail();
        }

        tracing::debug!(table, "inserted row");
        Ok(())
    }
}
