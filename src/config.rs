use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use snafu::{ensure, ResultExt as _, Snafu};
use url::Url;

pub const FIVEM_SERVER_URL: &str = "https://servers-frontend.fivem.net/api/servers/single/o3re8y";
pub const FIVEM_SERVER_ID: &str = "o3re8y";
pub const TWITCH_AUTH_URL: &str = "https://id.twitch.tv/oauth2/token";
pub const TWITCH_HELIX_URL: &str = "https://api.twitch.tv/helix";
pub const GAME_NAME: &str = "Grand Theft Auto V";
pub const KEYWORD: &str = "unscripted";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("could not read configuration from the environment: {source}"))]
    Load { source: envy::Error },

    #[snafu(display("environment variable {name} is not set"))]
    Empty { name: &'static str },
}

/// Configuration of the player-count server.
#[derive(Debug, Deserialize, Clone)]
pub struct PlayerCountConfig {
    #[serde(rename = "host_address", default = "default_host")]
    pub host: SocketAddr,
    #[serde(flatten)]
    pub log: LogConfig,
    #[serde(flatten)]
    pub supabase: SupabaseConfig,
    #[serde(flatten)]
    pub fivem: FivemConfig,
}

impl PlayerCountConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::from_env::<Self>().context(LoadSnafu)?.validate()
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars).context(LoadSnafu)?.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        self.supabase.validate()?;
        Ok(self)
    }
}

/// Configuration of one stream ingest run.
#[derive(Debug, Deserialize, Clone)]
pub struct StreamIngestConfig {
    #[serde(flatten)]
    pub log: LogConfig,
    #[serde(flatten)]
    pub supabase: SupabaseConfig,
    #[serde(flatten)]
    pub twitch: TwitchConfig,
}

impl StreamIngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::from_env::<Self>().context(LoadSnafu)?.validate()
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars).context(LoadSnafu)?.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        self.twitch.validate()?;
        self.supabase.validate()?;
        Ok(self)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    /// Directory for the rolling JSON log. Console only when unset.
    #[serde(rename = "log_dir", default)]
    pub dir: Option<PathBuf>,
}

impl LogConfig {
    /// Reads only the logging settings, so the logger can be up before the
    /// rest of the configuration is validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::from_env::<Self>().context(LoadSnafu)
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars).context(LoadSnafu)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupabaseConfig {
    #[serde(rename = "supabase_url")]
    pub url: Url,
    #[serde(rename = "supabase_key")]
    pub key: String,
}

impl SupabaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.key.trim().is_empty(), EmptySnafu { name: "SUPABASE_KEY" });
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FivemConfig {
    #[serde(rename = "fivem_server_url", default = "default_server_url")]
    pub server_url: Url,
    #[serde(rename = "fivem_server_id", default = "default_server_id")]
    pub server_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwitchConfig {
    #[serde(rename = "twitch_client_id")]
    pub client_id: String,
    #[serde(rename = "twitch_client_secret")]
    pub client_secret: String,

    #[serde(rename = "twitch_auth_url", default = "default_auth_url")]
    pub auth_url: Url,
    #[serde(rename = "twitch_helix_url", default = "default_helix_url")]
    pub helix_url: Url,

    #[serde(rename = "twitch_game_name", default = "default_game_name")]
    pub game_name: String,
    #[serde(rename = "twitch_keyword", default = "default_keyword")]
    pub keyword: String,
    /// Tag written to the `serverId` column of every matched stream.
    #[serde(rename = "fivem_server_id", default = "default_server_id")]
    pub server_id: String,

    #[serde(
        rename = "twitch_page_pause",
        default = "default_page_pause",
        deserialize_with = "humantime_duration"
    )]
    pub page_pause: Duration,
}

impl TwitchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.client_id.trim().is_empty(),
            EmptySnafu { name: "TWITCH_CLIENT_ID" }
        );
        ensure!(
            !self.client_secret.trim().is_empty(),
            EmptySnafu { name: "TWITCH_CLIENT_SECRET" }
        );
        Ok(())
    }
}

/// `url` with a trailing slash, so that joining a relative path appends to it
/// instead of replacing its last segment.
pub(crate) fn base_url(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn default_host() -> SocketAddr {
    (Ipv4Addr::UNSPECIFIED, 3000).into()
}

fn default_server_url() -> Url {
    Url::parse(FIVEM_SERVER_URL).expect("listing url constant is valid")
}

fn default_server_id() -> String {
    FIVEM_SERVER_ID.to_string()
}

fn default_auth_url() -> Url {
    Url::parse(TWITCH_AUTH_URL).expect("auth url constant is valid")
}

fn default_helix_url() -> Url {
    Url::parse(TWITCH_HELIX_URL).expect("helix url constant is valid")
}

fn default_game_name() -> String {
    GAME_NAME.to_string()
}

fn default_keyword() -> String {
    KEYWORD.to_string()
}

fn default_page_pause() -> Duration {
    Duration::from_millis(500)
}

fn humantime_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}
