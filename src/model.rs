use chrono::{SecondsFormat, Utc};
use derive_new::new;
use serde::{Deserialize, Serialize};

pub type Timestamp = chrono::DateTime<Utc>;

pub fn now() -> Timestamp {
    Utc::now()
}

/// ISO-8601 rendering used for the `timestamp` column and response bodies.
pub fn iso8601(timestamp: Timestamp) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One row of the `player_counts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct PlayerCountRecord {
    pub timestamp: String,
    pub player_count: i64,
    pub server_id: String,
}

impl PlayerCountRecord {
    pub const TABLE: &'static str = "player_counts";
}

/// One row of the `twitch_streams` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct StreamRecord {
    pub streamer_name: String,
    pub stream_title: String,
    pub viewer_count: u64,
    pub game_name: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
}

impl StreamRecord {
    pub const TABLE: &'static str = "twitch_streams";
}
