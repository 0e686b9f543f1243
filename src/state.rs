// state.rs: Song identity, per-tick snapshots and the reconciled "current song" record

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// One observation of the external player, produced per poll tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSnapshot {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork_ref: Option<String>,
    pub raw_position: Option<f64>,
    pub raw_position_timestamp: Option<String>,
    pub duration: Option<f64>,
    pub playback_state: String,
}

impl PlayerSnapshot {
    /// Identity of the playing track, or `None` when the title carries no data.
    pub fn song_key(&self) -> Option<SongKey> {
        let title = self.title.as_deref().filter(|t| !t.trim().is_empty())?;
        Some(SongKey::new(self.artist.as_deref().unwrap_or_default(), title))
    }
}

/// Normalized `(artist, title)` identity used for change detection and cache addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SongKey {
    artist: String,
    title: String,
}

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\s/\\:*?"<>|\x00-\x1f]+"#).unwrap());

/// Longest file stem we emit, in bytes; leaves room for the extension.
const MAX_STEM_BYTES: usize = 200;

impl SongKey {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            artist: normalize(artist),
            title: normalize(title),
        }
    }

    /// Filesystem-safe encoding: `artist_title` with whitespace and path
    /// metacharacters folded to `_`.
    pub fn file_stem(&self) -> String {
        let joined = format!("{}_{}", self.artist, self.title);
        let mut stem = UNSAFE_FILE_CHARS.replace_all(&joined, "_").into_owned();
        if stem.starts_with('.') {
            stem.replace_range(..1, "_");
        }
        if stem.len() > MAX_STEM_BYTES {
            let mut cut = MAX_STEM_BYTES;
            while !stem.is_char_boundary(cut) {
                cut -= 1;
            }
            stem.truncate(cut);
        }
        stem
    }
}

impl std::fmt::Display for SongKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The authoritative current-song record. Only the reconciliation loop writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledState {
    pub song_key: SongKey,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub artwork_ref: Option<String>,
    pub duration: Option<f64>,
    pub estimated_position: Option<f64>,
    pub playback_state: String,
    pub lyrics: Option<String>,
    pub last_broadcast_position: Option<f64>,
    pub last_broadcast_state: String,
    pub last_broadcast_at: DateTime<Utc>,
}

impl ReconciledState {
    pub fn from_snapshot(
        song_key: SongKey,
        snapshot: &PlayerSnapshot,
        estimated_position: Option<f64>,
        lyrics: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            song_key,
            title: snapshot.title.clone().unwrap_or_default(),
            artist: snapshot.artist.clone().unwrap_or_default(),
            album: snapshot.album.clone(),
            artwork_ref: snapshot.artwork_ref.clone(),
            duration: snapshot.duration,
            estimated_position,
            playback_state: snapshot.playback_state.clone(),
            lyrics,
            last_broadcast_position: estimated_position,
            last_broadcast_state: snapshot.playback_state.clone(),
            last_broadcast_at: now,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback_state == crate::timer::PLAYING
    }

    /// Record a playback observation as the last thing subscribers were told.
    pub fn mark_broadcast(&mut self, position: Option<f64>, playback_state: &str, now: DateTime<Utc>) {
        self.estimated_position = position;
        self.playback_state = playback_state.to_string();
        self.last_broadcast_position = position;
        self.last_broadcast_state = playback_state.to_string();
        self.last_broadcast_at = now;
    }
}
