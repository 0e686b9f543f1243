//! On-disk lyrics cache.
//!
//! One file per song, named after the song key's filesystem-safe stem and
//! holding the provider's raw synced-lyrics text. Entries are written once
//! and never invalidated; a missing file means "never fetched, or every
//! fetch so far failed", so failures are simply retried next time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Fetch Request   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ File Check      │───── Hit ──────▶ Return contents
//! └────────┬────────┘
//!          │ Miss
//!          ▼
//! ┌─────────────────┐
//! │ Spawned Search  │───── None/Err ─▶ Return None (nothing written)
//! └────────┬────────┘
//!          │ Some
//!          ▼
//! ┌─────────────────┐
//! │ Write File      │───────────────▶ Return lyrics
//! └─────────────────┘
//! ```

use crate::lyrics::providers::LyricSearch;
use crate::lyrics::types::{LyricQuery, ProviderSettings};
use crate::state::SongKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;

const ENTRY_EXTENSION: &str = "lrc";

/// Outcome of a lookup bounded by a timeout.
#[derive(Debug)]
pub enum Lookup {
    /// The lookup finished (hit, filled, or nothing found).
    Ready(Option<String>),
    /// The provider is still running; the task fills the cache when done.
    Pending(JoinHandle<Option<String>>),
}

pub struct LyricCache {
    dir: PathBuf,
    search: Arc<dyn LyricSearch>,
}

impl LyricCache {
    pub fn new(dir: impl Into<PathBuf>, search: Arc<dyn LyricSearch>) -> Self {
        Self {
            dir: dir.into(),
            search,
        }
    }

    pub fn path_for(&self, key: &SongKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.file_stem(), ENTRY_EXTENSION))
    }

    /// Forward provider settings to the search backend.
    pub fn configure(&self, settings: &ProviderSettings) {
        self.search.configure(settings);
    }

    /// Cached lyrics for `key`, if a cache file exists and is readable.
    pub async fn read_cached(&self, key: &SongKey) -> Option<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable cache entry, treating as miss");
                None
            }
        }
    }

    /// Cache hit, or a provider lookup that gives up waiting after `timeout`.
    /// The spawned lookup keeps running and still writes the cache on success.
    pub async fn fetch(&self, query: &LyricQuery, timeout: Duration) -> Lookup {
        if let Some(hit) = self.read_cached(&query.key).await {
            tracing::debug!(song = %query.key, "Lyrics cache hit");
            return Lookup::Ready(Some(hit));
        }
        let mut handle = self.spawn_lookup(query.clone());
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => Lookup::Ready(flatten_join(joined)),
            Err(_) => {
                tracing::warn!(song = %query.key, timeout_secs = timeout.as_secs_f64(), "Lyric lookup still running, continuing without lyrics");
                Lookup::Pending(handle)
            }
        }
    }

    /// Run the provider search on its own task so slow providers never stall the caller.
    fn spawn_lookup(&self, query: LyricQuery) -> JoinHandle<Option<String>> {
        let search = Arc::clone(&self.search);
        let path = self.path_for(&query.key);
        tokio::spawn(async move { search_and_store(search, path, query).await })
    }
}

async fn search_and_store(search: Arc<dyn LyricSearch>, path: PathBuf, query: LyricQuery) -> Option<String> {
    match search.search(&query).await {
        Ok(Some(lyrics)) if !lyrics.trim().is_empty() => {
            if let Err(e) = write_entry(&path, &lyrics).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write lyrics cache entry");
            } else {
                tracing::info!(song = %query.key, path = %path.display(), "Cached lyrics");
            }
            Some(lyrics)
        }
        Ok(_) => {
            tracing::info!(song = %query.key, "No lyrics found");
            None
        }
        Err(e) => {
            tracing::warn!(song = %query.key, error = %e, "Lyric search failed");
            None
        }
    }
}

/// Write through a temp file so readers never observe a partial entry.
async fn write_entry(path: &Path, lyrics: &str) -> std::io::Result<()> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("{}.tmp", ENTRY_EXTENSION));
    fs::write(&tmp, lyrics.as_bytes()).await?;
    fs::rename(&tmp, path).await
}

/// Await a lookup task, treating a panicked or cancelled search as "no lyrics".
pub async fn join_lookup(handle: JoinHandle<Option<String>>) -> Option<String> {
    flatten_join(handle.await)
}

fn flatten_join(joined: Result<Option<String>, tokio::task::JoinError>) -> Option<String> {
    match joined {
        Ok(lyrics) => lyrics,
        Err(e) => {
            tracing::warn!(error = %e, "Lyric lookup task failed");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lyrics::types::{LyricsError, ProviderResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted search backend that counts calls.
    #[derive(Default)]
    pub(crate) struct FakeSearch {
        pub calls: AtomicUsize,
        pub queries: Mutex<Vec<String>>,
        pub answer: Mutex<Option<String>>,
        pub fail: bool,
        pub delay: Option<Duration>,
    }

    impl FakeSearch {
        pub fn answering(text: &str) -> Self {
            Self {
                answer: Mutex::new(Some(text.to_string())),
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LyricSearch for FakeSearch {
        async fn search(&self, query: &LyricQuery) -> ProviderResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().unwrap().push(query.title.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(LyricsError::Api("boom".into()));
            }
            Ok(self.answer.lock().unwrap().clone())
        }
    }

    async fn fetch_now(cache: &LyricCache, q: &LyricQuery) -> Option<String> {
        match cache.fetch(q, Duration::from_secs(5)).await {
            Lookup::Ready(lyrics) => lyrics,
            Lookup::Pending(handle) => join_lookup(handle).await,
        }
    }

    #[tokio::test]
    async fn miss_fills_cache_and_hit_skips_provider() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch::answering("[00:01.00]line\n"));
        let cache = LyricCache::new(dir.path().join("nested/lyrics"), search.clone());
        let q = LyricQuery::new("Artist", "Title");

        assert_eq!(fetch_now(&cache, &q).await.as_deref(), Some("[00:01.00]line\n"));
        assert_eq!(search.call_count(), 1);
        assert!(cache.path_for(&q.key).exists());

        *search.answer.lock().unwrap() = Some("different".into());
        let again = fetch_now(&cache, &LyricQuery::new(" ARTIST ", "title")).await;
        assert_eq!(again.as_deref(), Some("[00:01.00]line\n"));
        assert_eq!(search.call_count(), 1);
    }

    #[tokio::test]
    async fn existing_file_is_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch::answering("unused"));
        let cache = LyricCache::new(dir.path(), search.clone());
        let q = LyricQuery::new("a", "b");
        std::fs::write(cache.path_for(&q.key), "raw \u{1F3B5} bytes\r\n").unwrap();

        assert_eq!(fetch_now(&cache, &q).await.as_deref(), Some("raw \u{1F3B5} bytes\r\n"));
        assert_eq!(search.call_count(), 0);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch {
            fail: true,
            ..Default::default()
        });
        let cache = LyricCache::new(dir.path(), search.clone());
        let q = LyricQuery::new("a", "b");

        assert_eq!(fetch_now(&cache, &q).await, None);
        assert_eq!(fetch_now(&cache, &q).await, None);
        assert_eq!(search.call_count(), 2);
        assert!(!cache.path_for(&q.key).exists());
    }

    #[tokio::test]
    async fn no_match_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch::default());
        let cache = LyricCache::new(dir.path(), search.clone());
        let q = LyricQuery::new("a", "b");

        assert_eq!(fetch_now(&cache, &q).await, None);
        *search.answer.lock().unwrap() = Some("[00:00.50]now".into());
        assert_eq!(fetch_now(&cache, &q).await.as_deref(), Some("[00:00.50]now"));
        assert_eq!(search.call_count(), 2);
    }

    #[tokio::test]
    async fn slow_provider_returns_pending_and_still_fills_cache() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch {
            answer: Mutex::new(Some("late".into())),
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let cache = LyricCache::new(dir.path(), search.clone());
        let q = LyricQuery::new("a", "b");

        let handle = match cache.fetch(&q, Duration::from_millis(10)).await {
            Lookup::Pending(handle) => handle,
            Lookup::Ready(r) => panic!("expected pending, got {:?}", r),
        };
        assert_eq!(join_lookup(handle).await.as_deref(), Some("late"));
        assert_eq!(cache.read_cached(&q.key).await.as_deref(), Some("late"));
    }
}
