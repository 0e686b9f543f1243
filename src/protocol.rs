//! Text frames pushed to WebSocket subscribers.
//!
//! Two message kinds exist: `update` carries the full song (metadata, lyrics
//! and the effective display options) and `sync` carries only position and
//! playback state for the song the subscriber already knows about.

use crate::state::ReconciledState;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// A serialized message, shared by every subscriber it is delivered to.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SongPayload {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub image: Option<String>,
    pub position: Option<f64>,
    pub duration: Option<f64>,
    pub state: String,
    pub lyrics: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncPayload {
    pub position: Option<f64>,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Update { data: SongPayload, options: Value },
    Sync { data: SyncPayload },
}

impl Message {
    /// Full-state message; `position` overrides the stored estimate (late-join replay).
    pub fn update(state: &ReconciledState, position: Option<f64>, options: &Value) -> Self {
        Message::Update {
            data: SongPayload {
                title: state.title.clone(),
                artist: state.artist.clone(),
                album: state.album.clone(),
                image: state.artwork_ref.clone(),
                position,
                duration: state.duration,
                state: state.playback_state.clone(),
                lyrics: state.lyrics.clone(),
            },
            options: options.clone(),
        }
    }

    pub fn sync(state: &ReconciledState) -> Self {
        Message::Sync {
            data: SyncPayload {
                position: state.estimated_position,
                state: state.playback_state.clone(),
            },
        }
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}
