use crate::state::SongKey;
use once_cell::sync::Lazy;
use reqwest::Client;
use thiserror::Error;

// Shared HTTP client with reasonable defaults for timeouts
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
});

pub const USER_AGENT: &str = concat!("SyncLyrics/", env!("CARGO_PKG_VERSION"));

/// Provider result: raw synced lyrics text, or `None` when nothing matched.
pub type ProviderResult = Result<Option<String>, LyricsError>;

#[derive(Error, Debug)]
pub enum LyricsError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// What a lyric lookup needs to know about the track.
#[derive(Debug, Clone, PartialEq)]
pub struct LyricQuery {
    pub key: SongKey,
    pub artist: String,
    pub title: String,
    pub album: String,
    pub duration: Option<f64>,
}

impl LyricQuery {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            key: SongKey::new(artist, title),
            artist: artist.trim().to_string(),
            title: title.trim().to_string(),
            album: String::new(),
            duration: None,
        }
    }

    pub fn with_album(mut self, album: Option<&str>) -> Self {
        self.album = album.unwrap_or_default().trim().to_string();
        self
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration.filter(|d| d.is_finite() && *d > 0.0);
        self
    }
}

/// Provider selection and credentials, taken from the runtime options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSettings {
    pub providers: Vec<String>,
    pub musixmatch_token: Option<String>,
}

// Re-export HTTP client for providers within the lyrics module
pub(crate) fn http_client() -> &'static Client {
    &HTTP_CLIENT
}
