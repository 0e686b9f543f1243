use chrono::{DateTime, Utc};
use std::time::Duration;

/// Playback state string reported by the source while a track advances.
pub const PLAYING: &str = "playing";

/// Estimate where playback is *now* from a possibly stale report.
///
/// `raw_timestamp` is the RFC 3339 instant at which the source claims
/// `raw_position` was true. Paused or stopped tracks do not advance, so the
/// raw value comes back untouched. While playing, the wall-clock time elapsed
/// since the report is added linearly, starting from a position clamped to
/// be non-negative. A timestamp that does not parse yields
/// zero drift instead of failing the tick, and a timestamp from the future
/// (clock skew between hosts) is treated the same way.
pub fn estimate_position(
    raw_position: Option<f64>,
    raw_timestamp: Option<&str>,
    playback_state: &str,
    now: DateTime<Utc>,
) -> Option<f64> {
    let position = raw_position?;
    if playback_state != PLAYING {
        return Some(position);
    }
    let position = sanitize_position(position);
    let Some(timestamp) = raw_timestamp else {
        return Some(position);
    };
    let drift = match DateTime::parse_from_rfc3339(timestamp) {
        Ok(reported_at) => {
            let elapsed = now.signed_duration_since(reported_at.with_timezone(&Utc));
            elapsed.to_std().map(|d| d.as_secs_f64()).unwrap_or(0.0)
        }
        Err(e) => {
            tracing::debug!(timestamp, error = %e, "Unparseable position timestamp, skipping drift");
            0.0
        }
    };
    let estimate = position + drift;
    if estimate.is_finite() { Some(estimate) } else { Some(position) }
}

/// Project a known position forward by `elapsed` when playing.
pub fn project(position: f64, playing: bool, elapsed: Duration) -> f64 {
    if !playing {
        return position;
    }
    let val = position + elapsed.as_secs_f64();
    if val.is_finite() { val } else { position }
}

/// Wall-clock time between two instants, clamped at zero.
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    later
        .signed_duration_since(earlier)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

pub fn sanitize_position(p: f64) -> f64 {
    if p.is_nan() || !p.is_finite() {
        0.0
    } else if p < 0.0 {
        // Negative positions are not meaningful; clamp to zero.
        0.0
    } else {
        p
    }
}
