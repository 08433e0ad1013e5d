use futures::future::ready;
use futures::{StreamExt as _, TryStreamExt as _};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::instrument;

use crate::config::{StreamIngestConfig, TwitchConfig};
use crate::database::{DatabaseError, Supabase, Table};
use crate::model::StreamRecord;
use crate::twitch::{AccessToken, LiveStream, StreamPage, Twitch, TwitchError};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IngestError {
    #[snafu(display("could not build the twitch client: {source}"))]
    Client { source: TwitchError },

    #[snafu(display("could not connect to the database: {source}"))]
    Connect { source: DatabaseError },

    #[snafu(display("failed to obtain twitch oauth token: {source}"))]
    Token { source: TwitchError },

    #[snafu(display("could not resolve the id of `{game}`: {source}"))]
    Game { game: String, source: TwitchError },

    #[snafu(display("could not read the stream listing: {source}"))]
    Streams { source: TwitchError },

    #[snafu(display("matching stream `{title}` has no `{field}`"))]
    IncompleteStream { title: String, field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSummary {
    /// The game could not be resolved; nothing was fetched or written.
    GameNotFound,
    Completed { matched: usize, inserted: usize },
}

/// Keeps live streams whose title mentions the keyword, ignoring case.
#[derive(Debug, Clone)]
pub struct StreamFilter {
    keyword: String,
    game_name: String,
    server_id: String,
}

impl StreamFilter {
    pub fn new(keyword: &str, game_name: &str, server_id: &str) -> Self {
        Self {
            keyword: keyword.to_lowercase(),
            game_name: game_name.to_string(),
            server_id: server_id.to_string(),
        }
    }

    pub fn matches(&self, stream: &LiveStream) -> bool {
        stream.title.to_lowercase().contains(&self.keyword)
    }

    /// Records of the matching streams on `page`. A match missing its
    /// streamer name or viewer count is an error; non-matches are not checked.
    pub fn records<'a>(
        &'a self, page: &'a StreamPage,
    ) -> impl Iterator<Item = Result<StreamRecord, IngestError>> + 'a {
        page.data
            .iter()
            .filter(|stream| self.matches(stream))
            .map(|stream| self.record(stream))
    }

    fn record(&self, stream: &LiveStream) -> Result<StreamRecord, IngestError> {
        let title = &stream.title;
        let streamer_name = stream
            .user_name
            .clone()
            .context(IncompleteStreamSnafu { title, field: "user_name" })?;
        let viewer_count = stream
            .viewer_count
            .context(IncompleteStreamSnafu { title, field: "viewer_count" })?;

        Ok(StreamRecord::new(
            streamer_name,
            title.clone(),
            viewer_count,
            self.game_name.clone(),
            self.server_id.clone(),
        ))
    }
}

pub struct StreamIngest<T> {
    twitch: Twitch,
    table: T,
    game_name: String,
    filter: StreamFilter,
}

impl StreamIngest<Supabase> {
    pub fn connect(config: &StreamIngestConfig) -> Result<Self, IngestError> {
        let table = Supabase::connect(&config.supabase).context(ConnectSnafu)?;
        StreamIngest::new(&config.twitch, table)
    }
}

impl<T: Table> StreamIngest<T> {
    pub fn new(config: &TwitchConfig, table: T) -> Result<Self, IngestError> {
        let twitch = Twitch::new(config).context(ClientSnafu)?;
        let filter = StreamFilter::new(&config.keyword, &config.game_name, &config.server_id);

        Ok(Self {
            twitch,
            table,
            game_name: config.game_name.clone(),
            filter,
        })
    }

    /// Token, game lookup, pagination, then persistence.
    #[instrument(skip(self), fields(game = %self.game_name, keyword = %self.filter.keyword))]
    pub async fn run(&self) -> Result<RunSummary, IngestError> {
        let token = self
            .twitch
            .access_token()
            .await
            .inspect_err(|error| tracing::error!(%error, "failed to obtain twitch oauth token"))
            .context(TokenSnafu)?;

        let game_id = self
            .twitch
            .game_id(&token, &self.game_name)
            .await
            .context(GameSnafu { game: &self.game_name })?;

        let Some(game_id) = game_id else {
            tracing::error!("could not find the game id, skipping the stream listing");
            return Ok(RunSummary::GameNotFound);
        };

        let streams = self.matching_streams(&token, &game_id).await?;
        tracing::info!(matched = streams.len(), "found streams with the keyword in their title");

        let inserted = self.persist(&streams).await;

        Ok(RunSummary::Completed {
            matched: streams.len(),
            inserted,
        })
    }

    /// Walks every page, keeping the matches. A transport failure ends the
    /// walk early with what was gathered so far; a malformed page or an
    /// incomplete match aborts.
    async fn matching_streams(
        &self, token: &AccessToken, game_id: &str,
    ) -> Result<Vec<StreamRecord>, IngestError> {
        self.twitch
            .stream_pages(token, game_id)
            .filter_map(|page| {
                ready(match page {
                    Err(error) if error.is_transport() => {
                        tracing::error!(%error, "failed to fetch streams, keeping the pages read so far");
                        None
                    }
                    page => Some(page),
                })
            })
            .map_err(|source| IngestError::Streams { source })
            .try_fold(Vec::new(), |mut matches, page| {
                let found = self
                    .filter
                    .records(&page)
                    .collect::<Result<Vec<_>, _>>()
                    .map(|found| {
                        matches.extend(found);
                        matches
                    });
                ready(found)
            })
            .await
    }

    /// Inserts one row per stream and returns how many were written. Stops at
    /// the first failed insert; earlier rows stay written.
    async fn persist(&self, streams: &[StreamRecord]) -> usize {
        if streams.is_empty() {
            tracing::info!("no streams to log to the database");
            return 0;
        }

        let mut inserted = 0;
        for stream in streams {
            if let Err(error) = self.table.insert(StreamRecord::TABLE, stream).await {
                tracing::error!(%error, inserted, "failed to log streams to the database");
                return inserted;
            }
            inserted += 1;
        }

        tracing::info!(inserted, "logged streams to the database");
        inserted
    }
}

/// One complete run against Supabase.
pub async fn run(config: &StreamIngestConfig) -> Result<RunSummary, IngestError> {
    StreamIngest::connect(config)?.run().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::config::tests::stream_vars;
    use crate::database::memory::MemoryTable;
    use crate::test_support::serve;
    use crate::twitch::tests::{config, page, FakeHelix};

    async fn ingest(fake: &FakeHelix, table: MemoryTable) -> StreamIngest<MemoryTable> {
        let base = serve(fake.router()).await;
        StreamIngest::new(&config(&base), table).unwrap()
    }

    fn stream(user_name: &str, title: &str, viewer_count: u64) -> serde_json::Value {
        json!({
            "id": "1",
            "user_name": user_name,
            "title": title,
            "viewer_count": viewer_count,
            "type": "live",
        })
    }

    #[test]
    fn keyword_match_ignores_case() {
        let page: StreamPage = serde_json::from_value(json!({
            "data": [
                { "title": "Epic Unscripted RP", "user_name": "Alice", "viewer_count": 42 },
                { "title": "Scripted only", "user_name": "Bob", "viewer_count": 5 },
            ],
            "pagination": {},
        }))
        .unwrap();
        let filter = StreamFilter::new("unscripted", "Grand Theft Auto V", "o3re8y");

        let records: Vec<_> = filter.records(&page).collect::<Result<_, _>>().unwrap();

        assert_eq!(
            records,
            vec![StreamRecord::new(
                "Alice".into(),
                "Epic Unscripted RP".into(),
                42,
                "Grand Theft Auto V".into(),
                "o3re8y".into(),
            )]
        );
    }

    #[test]
    fn keyword_is_a_plain_substring() {
        let filter = StreamFilter::new("UNSCRIPTED", "Grand Theft Auto V", "o3re8y");
        let stream = |title: &str| LiveStream {
            title: title.into(),
            user_name: Some("Carol".into()),
            viewer_count: Some(1),
        };

        assert!(filter.matches(&stream("[unscripted]nopixel")));
        assert!(filter.matches(&stream("UnScRiPtEd")));
        assert!(!filter.matches(&stream("un scripted")));
    }

    #[tokio::test]
    async fn inserts_matches_from_every_page() {
        let fake = FakeHelix::new(vec![
            Some(page(
                json!([stream("Alice", "Epic Unscripted RP", 42), stream("Bob", "Scripted only", 5)]),
                Some("c1"),
            )),
            Some(page(json!([stream("Carol", "unscripted day 3", 7)]), None)),
        ]);
        let table = MemoryTable::default();

        let summary = ingest(&fake, table.clone()).await.run().await.unwrap();

        assert_eq!(summary, RunSummary::Completed { matched: 2, inserted: 2 });
        let rows = table.rows(StreamRecord::TABLE);
        assert_eq!(rows[0]["streamer_name"], "Alice");
        assert_eq!(rows[0]["viewer_count"], 42);
        assert_eq!(rows[0]["game_name"], "Grand Theft Auto V");
        assert_eq!(rows[0]["serverId"], "o3re8y");
        assert_eq!(rows[1]["streamer_name"], "Carol");
    }

    #[tokio::test]
    async fn unknown_game_fetches_and_writes_nothing() {
        let fake = FakeHelix {
            games: json!({ "data": [] }),
            ..FakeHelix::new(vec![Some(page(json!([stream("Alice", "unscripted", 1)]), None))])
        };
        let table = MemoryTable::default();

        let summary = ingest(&fake, table.clone()).await.run().await.unwrap();

        assert_eq!(summary, RunSummary::GameNotFound);
        assert_eq!(fake.stream_requests(), 0);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn failed_page_keeps_earlier_matches() {
        let fake = FakeHelix::new(vec![
            Some(page(json!([stream("Alice", "unscripted 1", 10)]), Some("c1"))),
            Some(page(json!([stream("Bob", "UNSCRIPTED 2", 20)]), Some("c2"))),
            None,
            Some(page(json!([stream("Dave", "unscripted 4", 40)]), None)),
        ]);
        let table = MemoryTable::default();

        let summary = ingest(&fake, table.clone()).await.run().await.unwrap();

        assert_eq!(summary, RunSummary::Completed { matched: 2, inserted: 2 });
        assert_eq!(fake.stream_requests(), 3);
        let names: Vec<_> = table
            .rows(StreamRecord::TABLE)
            .iter()
            .map(|row| row["streamer_name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn no_matches_skips_the_write() {
        let fake = FakeHelix::new(vec![Some(page(json!([stream("Bob", "Scripted only", 5)]), None))]);
        let table = MemoryTable::default();

        let summary = ingest(&fake, table.clone()).await.run().await.unwrap();

        assert_eq!(summary, RunSummary::Completed { matched: 0, inserted: 0 });
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn insert_failure_keeps_rows_already_written() {
        let fake = FakeHelix::new(vec![Some(page(
            json!([
                stream("Alice", "unscripted", 3),
                stream("Bob", "unscripted", 2),
                stream("Carol", "unscripted", 1),
            ]),
            None,
        ))]);
        let table = MemoryTable::fail_after(1);

        let summary = ingest(&fake, table.clone()).await.run().await.unwrap();

        assert_eq!(summary, RunSummary::Completed { matched: 3, inserted: 1 });
        assert_eq!(table.rows(StreamRecord::TABLE)[0]["streamer_name"], "Alice");
    }

    #[tokio::test]
    async fn token_failure_aborts_before_streams() {
        let fake = FakeHelix {
            token_status: Some(axum::http::StatusCode::UNAUTHORIZED),
            ..FakeHelix::new(vec![Some(page(json!([stream("Alice", "unscripted", 1)]), None))])
        };
        let table = MemoryTable::default();

        let error = ingest(&fake, table.clone()).await.run().await.unwrap_err();

        assert!(matches!(error, IngestError::Token { .. }), "unexpected error: {error}");
        assert_eq!(fake.game_requests.load(Ordering::SeqCst), 0);
        assert_eq!(fake.stream_requests(), 0);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn stream_without_title_aborts_the_run() {
        let fake = FakeHelix::new(vec![
            Some(page(json!([stream("Alice", "unscripted", 1)]), Some("c1"))),
            Some(page(json!([{ "user_name": "Bob", "viewer_count": 2 }]), None)),
        ]);
        let table = MemoryTable::default();

        let error = ingest(&fake, table.clone()).await.run().await.unwrap_err();

        assert!(matches!(error, IngestError::Streams { .. }), "unexpected error: {error}");
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn incomplete_streams_only_matter_when_they_match() {
        let fake = FakeHelix::new(vec![Some(page(
            json!([
                { "title": "Epic Unscripted RP", "user_name": "Alice", "viewer_count": 42 },
                { "title": "Scripted only", "viewer_count": 5 },
                { "title": "Scripted too", "user_name": "Bob" },
            ]),
            None,
        ))]);
        let table = MemoryTable::default();

        let summary = ingest(&fake, table.clone()).await.run().await.unwrap();

        assert_eq!(summary, RunSummary::Completed { matched: 1, inserted: 1 });
        assert_eq!(table.rows(StreamRecord::TABLE)[0]["streamer_name"], "Alice");
    }

    #[tokio::test]
    async fn matching_stream_without_streamer_aborts_the_run() {
        let fake = FakeHelix::new(vec![Some(page(
            json!([
                { "title": "Epic Unscripted RP", "user_name": "Alice", "viewer_count": 42 },
                { "title": "unscripted, nameless", "viewer_count": 5 },
            ]),
            None,
        ))]);
        let table = MemoryTable::default();

        let error = ingest(&fake, table.clone()).await.run().await.unwrap_err();

        assert!(
            matches!(error, IngestError::IncompleteStream { field: "user_name", .. }),
            "unexpected error: {error}"
        );
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn missing_configuration_makes_no_requests() {
        let fake = FakeHelix::new(vec![Some(page(json!([]), None))]);
        let base = serve(fake.router()).await;

        for required in [
            "TWITCH_CLIENT_ID",
            "TWITCH_CLIENT_SECRET",
            "SUPABASE_URL",
            "SUPABASE_KEY",
        ] {
            let mut vars: Vec<_> = stream_vars()
                .into_iter()
                .filter(|(key, _)| key != required)
                .collect();
            vars.push(("TWITCH_AUTH_URL".into(), base.join("oauth2/token").unwrap().into()));
            vars.push(("TWITCH_HELIX_URL".into(), base.join("helix").unwrap().into()));

            assert!(StreamIngestConfig::from_iter(vars).is_err(), "loaded without {required}");
        }

        assert_eq!(fake.token_requests.load(Ordering::SeqCst), 0);
        assert_eq!(fake.game_requests.load(Ordering::SeqCst), 0);
        assert_eq!(fake.stream_requests(), 0);
    }
}
