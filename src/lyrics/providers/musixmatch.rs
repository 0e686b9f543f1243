use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::lyrics::types::{LyricQuery, LyricsError, ProviderResult, http_client};

const MACRO_SUBTITLES_URL: &str = "https://apic-desktop.musixmatch.com/ws/1.1/macro.subtitles.get?format=json&namespace=lyrics_richsynched&subtitle_format=mxm&app_id=web-desktop-app-v1.0&";
const TOKEN_URL: &str = "https://apic-desktop.musixmatch.com/ws/1.1/token.get?app_id=web-desktop-app-v1.0";

// Anonymous desktop token, fetched on first use and reused until rejected
static ANONYMOUS_TOKEN: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Fetch lyrics using Musixmatch desktop "usertoken" (apic-desktop.musixmatch.com).
///
/// Returns LRC text built from the synced subtitle body. A configured token
/// is used as-is; without one an anonymous token is requested from
/// `token.get` and cached for later lookups.
pub async fn fetch_lyrics_from_musixmatch_usertoken(
    query: &LyricQuery,
    token: Option<&str>,
) -> ProviderResult {
    let configured = token.map(str::trim).filter(|t| !t.is_empty());
    let token = match configured {
        Some(t) => t.to_string(),
        None => anonymous_token().await?,
    };

    let duration = query.duration.map(|d| (d.round() as i64).to_string());
    let mut params = vec![
        ("q_artist", query.artist.as_str()),
        ("q_track", query.title.as_str()),
        ("usertoken", token.as_str()),
    ];
    if !query.album.is_empty() {
        params.push(("q_album", query.album.as_str()));
    }
    if let Some(d) = duration.as_deref() {
        params.push(("q_duration", d));
    }

    let final_url = MACRO_SUBTITLES_URL.to_string()
        + &params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

    let resp = http_client()
        .get(&final_url)
        .header("Cookie", format!("x-mxm-token-guid={}", token))
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(LyricsError::Api(format!(
            "musixmatch desktop macro.subtitles.get: {}",
            resp.status()
        )));
    }

    let json: Value = resp.json().await?;
    if configured.is_none() && header_status(&json) == Some(401) {
        // Anonymous token expired or was revoked; fetch a fresh one next time.
        ANONYMOUS_TOKEN.lock().await.take();
        return Err(LyricsError::Api("musixmatch: anonymous token rejected".to_string()));
    }
    Ok(lrc_from_macro_response(&json))
}

async fn anonymous_token() -> Result<String, LyricsError> {
    let mut cached = ANONYMOUS_TOKEN.lock().await;
    if let Some(token) = cached.as_ref() {
        return Ok(token.clone());
    }

    let resp = http_client()
        .get(TOKEN_URL)
        .header("Cookie", "AWSELB=0; AWSELBCORS=0")
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(LyricsError::Api(format!("musixmatch token.get: {}", resp.status())));
    }
    let json: Value = resp.json().await?;
    let token = user_token_from_response(&json)
        .ok_or_else(|| LyricsError::Api("musixmatch token.get: no usable token".to_string()))?;
    tracing::debug!("Obtained anonymous Musixmatch token");
    *cached = Some(token.clone());
    Ok(token)
}

fn header_status(json: &Value) -> Option<i64> {
    json.pointer("/message/header/status_code").and_then(|v| v.as_i64())
}

/// `user_token` from a `token.get` response. The service hands out the
/// placeholder `UpdateNeeded` when it refuses the client; that is not a token.
fn user_token_from_response(json: &Value) -> Option<String> {
    if header_status(json) != Some(200) {
        return None;
    }
    json.pointer("/message/body/user_token")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty() && *t != "UpdateNeeded")
        .map(str::to_string)
}

/// Pull the synced subtitle body out of a `macro.subtitles.get` response.
fn lrc_from_macro_response(json: &Value) -> Option<String> {
    let macro_calls = json.pointer("/message/body/macro_calls")?;

    let matcher_status = macro_calls
        .pointer("/matcher.track.get/message/header/status_code")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if matcher_status != 200 {
        return None;
    }

    let subs = macro_calls.get("track.subtitles.get")?;
    let status = subs
        .pointer("/message/header/status_code")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if status != 200 {
        return None;
    }

    let sub_body = subs
        .pointer("/message/body/subtitle_list")
        .and_then(|v| v.as_array())
        .and_then(|list| list.first())
        .and_then(|first| first.pointer("/subtitle/subtitle_body"))
        .and_then(|v| v.as_str())?;
    let lines: Value = serde_json::from_str(sub_body).ok()?;
    let lrc = subtitle_lines_to_lrc(lines.as_array()?);
    if lrc.is_empty() { None } else { Some(lrc) }
}

fn subtitle_lines_to_lrc(lines: &[Value]) -> String {
    let mut out = String::new();
    for line in lines {
        let t = line
            .pointer("/time/total")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let text = line
            .get("text")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("\u{266a}");
        let ms = (t.max(0.0) * 1000.0).round() as u64;
        let minutes = ms / 60000;
        let seconds = (ms % 60000) / 1000;
        let centi = ms % 1000 / 10;
        out.push_str(&format!("[{:02}:{:02}.{:02}]{}\n", minutes, seconds, centi, text));
    }
    out
}
