use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use derive_new::new;
use snafu::{ResultExt as _, Snafu};
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::database::{DatabaseError, Table};
use crate::fivem::{ServerListing, ServerListingError};
use crate::model::{self, PlayerCountRecord};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PlayerCountError {
    #[snafu(display("{source}"))]
    Listing { source: ServerListingError },

    #[snafu(display("{source}"))]
    Insert { source: DatabaseError },
}

/// Polls the server listing once per request and appends the count to
/// `player_counts`.
#[derive(Debug, Clone, new)]
pub struct PlayerCountJob<T> {
    listing: ServerListing,
    table: T,
    server_id: String,
}

impl<T: Table> PlayerCountJob<T> {
    /// One poll: exactly one upstream request and at most one insert.
    #[instrument(skip(self), fields(server_id = %self.server_id))]
    pub async fn run(&self) -> Result<PlayerCountRecord, PlayerCountError> {
        let player_count = self.listing.player_count().await.context(ListingSnafu)?;

        let record = PlayerCountRecord::new(
            model::iso8601(model::now()),
            player_count,
            self.server_id.clone(),
        );

        self.table
            .insert(PlayerCountRecord::TABLE, &record)
            .await
            .context(InsertSnafu)?;

        tracing::info!(player_count, "saved player count");
        Ok(record)
    }
}

pub fn router<T>(job: PlayerCountJob<T>) -> Router
where
    T: Table + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(handle::<T>))
        .layer(TraceLayer::new_for_http())
        .with_state(job)
}

/// Runs the job and reports the outcome as plain text.
pub async fn handle<T>(State(job): State<PlayerCountJob<T>>) -> (StatusCode, String)
where
    T: Table + Clone + Send + Sync + 'static,
{
    match job.run().await {
        Ok(record) => (
            StatusCode::OK,
            format!(
                "[{}] Successfully saved player count: {}",
                record.timestamp, record.player_count
            ),
        ),
        Err(PlayerCountError::Listing { source }) => {
            tracing::error!(error = %source, "server listing request failed");
            failure(format!("API request error: {source}"))
        }
        Err(error) => {
            tracing::error!(%error, "could not save player count");
            failure(format!("Unexpected error: {error}"))
        }
    }
}

fn failure(message: String) -> (StatusCode, String) {
    let timestamp = model::iso8601(model::now());
    (StatusCode::INTERNAL_SERVER_ERROR, format!("[{timestamp}] {message}"))
}

#[cfg(test)]
mod tests {
    use axum::Json;
    use axum_test::TestServer;
    use serde_json::json;

    use super::*;
    use crate::config::FivemConfig;
    use crate::database::memory::MemoryTable;
    use crate::test_support::serve;

    async fn listing(upstream: Router) -> ServerListing {
        let base = serve(upstream).await;
        let config = FivemConfig {
            server_url: base.join("api/servers/single/o3re8y").unwrap(),
            server_id: "o3re8y".into(),
        };
        ServerListing::new(&config).unwrap()
    }

    fn upstream(body: serde_json::Value) -> Router {
        Router::new().route(
            "/api/servers/single/o3re8y",
            get(move || async move { Json(body) }),
        )
    }

    fn server(listing: ServerListing, table: MemoryTable) -> TestServer {
        let job = PlayerCountJob::new(listing, table, "o3re8y".into());
        TestServer::new(router(job)).unwrap()
    }

    #[tokio::test]
    async fn saves_reported_count() {
        let table = MemoryTable::default();
        let listing = listing(upstream(json!({ "Data": { "selfReportedClients": 211 } }))).await;

        let response = server(listing, table.clone()).get("/").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let content_type = response.header("content-type");
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
        let text = response.text();
        assert!(text.starts_with('['), "missing timestamp: {text}");
        assert!(text.ends_with("Successfully saved player count: 211"), "{text}");

        let rows = table.rows(PlayerCountRecord::TABLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["player_count"], 211);
        assert_eq!(rows[0]["server_id"], "o3re8y");
        assert!(rows[0]["timestamp"].as_str().is_some_and(|ts| ts.ends_with('Z')));
    }

    #[tokio::test]
    async fn absent_count_is_saved_as_zero() {
        let table = MemoryTable::default();
        let listing = listing(upstream(json!({ "Data": { "hostname": "offline" } }))).await;

        let response = server(listing, table.clone()).get("/").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(response.text().ends_with("Successfully saved player count: 0"));
        assert_eq!(table.rows(PlayerCountRecord::TABLE)[0]["player_count"], 0);
    }

    #[tokio::test]
    async fn upstream_rejection_is_reported_as_request_error() {
        let table = MemoryTable::default();
        let rejecting = Router::new().route(
            "/api/servers/single/o3re8y",
            get(|| async { StatusCode::FORBIDDEN }),
        );
        let listing = listing(rejecting).await;

        let response = server(listing, table.clone()).get("/").await;

        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let content_type = response.header("content-type");
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
        let text = response.text();
        assert!(text.starts_with('['), "missing timestamp: {text}");
        assert!(text.contains("API request error"), "{text}");
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn failed_insert_is_reported_as_unexpected_error() {
        let table = MemoryTable::fail_after(0);
        let listing = listing(upstream(json!({ "Data": { "selfReportedClients": 5 } }))).await;

        let response = server(listing, table.clone()).get("/").await;

        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().contains("Unexpected error"));
        assert_eq!(table.len(), 0);
    }
}
