use serde::Deserialize;

use crate::lyrics::types::{LyricQuery, LyricsError, ProviderResult, USER_AGENT, http_client};

const LRCLIB_BASE: &str = "https://lrclib.net/api";

#[derive(Deserialize)]
#[allow(non_snake_case)]
struct LrcLibResponse {
    syncedLyrics: Option<String>,
}

/// Fetch synced lyrics from lrclib.net API.
///
/// The exact-match `get` endpoint is tried first (album and duration improve
/// matching). When it has nothing, the fuzzy `search` endpoint is consulted
/// and the first candidate carrying synced lyrics wins.
pub async fn fetch_lyrics_from_lrclib(query: &LyricQuery) -> ProviderResult {
    if let Some(synced) = lrclib_get(query).await? {
        return Ok(Some(synced));
    }
    lrclib_search(query).await
}

async fn lrclib_get(query: &LyricQuery) -> ProviderResult {
    let url = build_get_url(query);
    let resp = http_client()
        .get(&url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;

    // 404 means no lyrics found - not an error
    if resp.status().as_u16() == 404 {
        return Ok(None);
    }

    if !resp.status().is_success() {
        return Err(LyricsError::Api(format!("lrclib: HTTP {}", resp.status())));
    }

    let response: LrcLibResponse = resp.json().await?;
    Ok(non_empty(response.syncedLyrics))
}

async fn lrclib_search(query: &LyricQuery) -> ProviderResult {
    let url = format!(
        "{}/search?artist_name={}&track_name={}",
        LRCLIB_BASE,
        urlencoding::encode(&query.artist),
        urlencoding::encode(&query.title)
    );
    let resp = http_client()
        .get(&url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(LyricsError::Api(format!("lrclib search: HTTP {}", resp.status())));
    }

    let candidates: Vec<LrcLibResponse> = resp.json().await?;
    Ok(first_synced(candidates))
}

fn first_synced(candidates: Vec<LrcLibResponse>) -> Option<String> {
    candidates.into_iter().find_map(|c| non_empty(c.syncedLyrics))
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|s| !s.trim().is_empty())
}

/// Build lrclib API URL with query parameters.
fn build_get_url(query: &LyricQuery) -> String {
    let mut params = vec![
        format!("artist_name={}", urlencoding::encode(&query.artist)),
        format!("track_name={}", urlencoding::encode(&query.title)),
    ];

    if !query.album.is_empty() {
        params.push(format!("album_name={}", urlencoding::encode(&query.album)));
    }

    if let Some(d) = query.duration {
        // API expects duration in seconds (integer)
        params.push(format!("duration={}", d.round() as i64));
    }

    format!("{}/get?{}", LRCLIB_BASE, params.join("&"))
}
