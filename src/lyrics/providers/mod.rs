pub mod lrclib;
pub mod musixmatch;

pub use lrclib::fetch_lyrics_from_lrclib;
pub use musixmatch::fetch_lyrics_from_musixmatch_usertoken;

use crate::lyrics::types::{LyricQuery, LyricsError, ProviderResult, ProviderSettings};
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};

/// External lyric search. Implementations may be slow; callers run them
/// off the reconciliation loop.
#[async_trait]
pub trait LyricSearch: Send + Sync {
    async fn search(&self, query: &LyricQuery) -> ProviderResult;

    /// Install provider selection and credentials from the current options.
    fn configure(&self, _settings: &ProviderSettings) {}
}

/// Walks configured providers in order and returns the first synced result.
#[derive(Debug, Default)]
pub struct ProviderChain {
    settings: RwLock<ProviderSettings>,
}

impl ProviderChain {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    fn settings(&self) -> ProviderSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LyricSearch for ProviderChain {
    async fn search(&self, query: &LyricQuery) -> ProviderResult {
        let settings = self.settings();
        let mut last_err: Option<LyricsError> = None;

        for prov in &settings.providers {
            let result = match prov.as_str() {
                "lrclib" => fetch_lyrics_from_lrclib(query).await,
                "musixmatch" => {
                    fetch_lyrics_from_musixmatch_usertoken(query, settings.musixmatch_token.as_deref())
                        .await
                }
                other => {
                    tracing::warn!(provider = other, "Unsupported lyric provider, skipping");
                    continue;
                }
            };
            match result {
                Ok(Some(lyrics)) => {
                    tracing::info!(provider = prov.as_str(), song = %query.key, "Lyrics found");
                    return Ok(Some(lyrics));
                }
                Ok(None) => { /* no lyrics from this provider, try next */ }
                Err(e) => {
                    tracing::warn!(provider = prov.as_str(), song = %query.key, error = %e, "Lyric provider failed");
                    last_err = Some(e);
                }
            }
        }

        // Nothing found anywhere: surface the last failure so callers can log it.
        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn configure(&self, settings: &ProviderSettings) {
        let mut guard = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        if *guard != *settings {
            tracing::debug!(providers = ?settings.providers, "Lyric providers reconfigured");
            *guard = settings.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_providers_are_skipped() {
        let chain = ProviderChain::new(ProviderSettings {
            providers: vec!["genius".into(), "azlyrics".into()],
            musixmatch_token: None,
        });
        let result = chain.search(&LyricQuery::new("a", "b")).await;
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn configure_replaces_settings() {
        let chain = ProviderChain::default();
        let settings = ProviderSettings {
            providers: vec!["musixmatch".into(), "lrclib".into()],
            musixmatch_token: Some("tok".into()),
        };
        chain.configure(&settings);
        assert_eq!(chain.settings(), settings);
    }
}
