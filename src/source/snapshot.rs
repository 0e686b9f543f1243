//! Home Assistant media_player state → [`PlayerSnapshot`].

use crate::source::SourceError;
use crate::state::PlayerSnapshot;
use serde_json::Value;

static NO_ATTRIBUTES: Value = Value::Null;

/// Parse a `/api/states/<entity>` body.
///
/// Only the top-level `state` is mandatory; every media attribute may be
/// missing (idle players report none of them).
pub fn snapshot_from_state(body: &Value) -> Result<PlayerSnapshot, SourceError> {
    let playback_state = body
        .get("state")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Malformed("missing `state`".to_string()))?;
    let attr = match body.get("attributes") {
        None | Some(Value::Null) => &NO_ATTRIBUTES,
        Some(v @ Value::Object(_)) => v,
        Some(_) => return Err(SourceError::Malformed("`attributes` is not an object".to_string())),
    };

    Ok(PlayerSnapshot {
        title: string_attr(attr, "media_title"),
        artist: string_attr(attr, "media_artist"),
        album: string_attr(attr, "media_album_name"),
        artwork_ref: string_attr(attr, "entity_picture"),
        raw_position: number_attr(attr, "media_position"),
        raw_position_timestamp: string_attr(attr, "media_position_updated_at"),
        duration: number_attr(attr, "media_duration"),
        playback_state: playback_state.to_string(),
    })
}

fn string_attr(attr: &Value, key: &str) -> Option<String> {
    attr.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number_attr(attr: &Value, key: &str) -> Option<f64> {
    let value = match attr.get(key)? {
        Value::Number(n) => n.as_f64(),
        // Some integrations report numbers as strings.
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}
