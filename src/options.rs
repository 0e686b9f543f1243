// options.rs: Runtime options mapping, reloaded from disk on every poll tick

use crate::lyrics::ProviderSettings;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_ENTITY: &str = "media_player.spotify_user";
// Only providers that return synced lyrics; plain-text sources can't drive the display.
const DEFAULT_PROVIDERS: [&str; 2] = ["lrclib", "musixmatch"];

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Options must be a JSON object")]
    NotAnObject,
}

/// Flat key/value options. Equality is structural, so key order in the file
/// never causes a spurious change.
#[derive(Debug, Clone, PartialEq)]
pub struct Options(Map<String, Value>);

impl Default for Options {
    fn default() -> Self {
        let defaults = json!({
            "spotify_entity": DEFAULT_ENTITY,
            "cache_size_mb": 100,
            "show_header": true,
            "show_progress_bar": true,
            "show_background": true,
            "game_mode_enabled": false,
            "lyric_providers": DEFAULT_PROVIDERS,
        });
        match defaults {
            Value::Object(map) => Self(map),
            _ => Self(Map::new()),
        }
    }
}

impl Options {
    pub fn from_value(value: Value) -> Result<Self, OptionsError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(OptionsError::NotAnObject),
        }
    }

    /// Media player entity to observe.
    pub fn entity_id(&self) -> &str {
        self.0
            .get("spotify_entity")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_ENTITY)
    }

    /// Provider names in preferred order. Accepts a JSON array or a
    /// comma-separated string, then falls back to `LYRIC_PROVIDERS`.
    pub fn providers(&self) -> Vec<String> {
        let configured = match self.0.get("lyric_providers") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            Some(Value::String(s)) => split_providers(s),
            _ => Vec::new(),
        };
        if !configured.is_empty() {
            return configured;
        }
        if let Ok(s) = std::env::var("LYRIC_PROVIDERS") {
            let parts = split_providers(&s);
            if !parts.is_empty() {
                return parts;
            }
        }
        DEFAULT_PROVIDERS.iter().map(|p| p.to_string()).collect()
    }

    pub fn musixmatch_token(&self) -> Option<String> {
        self.non_empty_str("musixmatch_token")
    }

    /// MQTT topic for the artwork colour; unset disables publishing.
    pub fn mqtt_topic(&self) -> Option<String> {
        self.non_empty_str("mqtt_topic")
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            providers: self.providers(),
            musixmatch_token: self.musixmatch_token(),
        }
    }

    /// The mapping as sent to subscribers. Credentials (`*_token`) stay server-side.
    pub fn public_view(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .filter(|(k, _)| !k.ends_with("_token"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    fn non_empty_str(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

fn split_providers(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Read options from `path`. `Ok(None)` means the file does not exist.
pub async fn read_options(path: &Path) -> Result<Option<Options>, OptionsError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value: Value = serde_json::from_str(&contents)?;
    Options::from_value(value).map(Some)
}

/// Reloads options each tick, keeping the last good copy across bad edits.
pub struct OptionsLoader {
    path: PathBuf,
    last_good: Option<Options>,
}

impl OptionsLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_good: None,
        }
    }

    pub async fn load(&mut self) -> Options {
        match read_options(&self.path).await {
            Ok(Some(options)) => {
                self.last_good = Some(options.clone());
                options
            }
            Ok(None) => Options::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read options, keeping previous");
                self.last_good.clone().unwrap_or_default()
            }
        }
    }
}
