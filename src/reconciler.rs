//! Per-tick decision core.
//!
//! Given a fresh [`PlayerSnapshot`] and the options read this tick, decide
//! whether the external player is still playing the same song (at most a
//! lightweight `sync`) or something meaningful changed (lyric lookup plus a
//! full `update`). The reconciler owns the single [`ReconciledState`].

use crate::lyrics::cache::join_lookup;
use crate::lyrics::{LyricCache, LyricQuery, Lookup};
use crate::options::Options;
use crate::state::{PlayerSnapshot, ReconciledState, SongKey};
use crate::timer::{self, PLAYING};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Position disagreement, in seconds, beyond which playback counts as a seek.
pub const SEEK_THRESHOLD_SECS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    SongChanged,
    OptionsChanged,
    LyricsArrived,
}

/// What the tick produced for subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No usable data (empty title); nothing changed.
    Skip,
    /// Same song, steady playback; nothing to send.
    Silent,
    /// Seek or playback-state transition within the current song.
    Sync,
    /// Full state must go out.
    Update(UpdateReason),
}

/// A lookup that outlived its timeout, still working for `key`.
struct PendingLyrics {
    key: SongKey,
    handle: JoinHandle<Option<String>>,
}

pub struct Reconciler {
    cache: Arc<LyricCache>,
    lyrics_timeout: Duration,
    state: Option<ReconciledState>,
    last_options: Option<Options>,
    pending: Option<PendingLyrics>,
}

impl Reconciler {
    pub fn new(cache: Arc<LyricCache>, lyrics_timeout: Duration) -> Self {
        Self {
            cache,
            lyrics_timeout,
            state: None,
            last_options: None,
            pending: None,
        }
    }

    pub fn state(&self) -> Option<&ReconciledState> {
        self.state.as_ref()
    }

    pub fn has_pending_lyrics(&self) -> bool {
        self.pending.is_some()
    }

    pub async fn tick(&mut self, snapshot: &PlayerSnapshot, options: &Options, now: DateTime<Utc>) -> Decision {
        let estimated = timer::estimate_position(
            snapshot.raw_position,
            snapshot.raw_position_timestamp.as_deref(),
            &snapshot.playback_state,
            now,
        );
        let Some(key) = snapshot.song_key() else {
            return Decision::Skip;
        };

        let song_changed = self.state.as_ref().is_none_or(|s| s.song_key != key);
        let options_changed = self.last_options.as_ref() != Some(options);

        if song_changed || options_changed {
            let reason = if song_changed {
                UpdateReason::SongChanged
            } else {
                UpdateReason::OptionsChanged
            };
            if song_changed {
                tracing::info!(song = %key, "Song changed");
            } else {
                tracing::info!(song = %key, "Options changed, forcing full update");
            }
            self.cache.configure(&options.provider_settings());
            let started = Instant::now();
            let lyrics = self.resolve_lyrics(&key, snapshot).await;
            // The lookup may have taken seconds; the update must carry where playback is
            // when it goes out, not where it was when the tick began.
            let now = now + TimeDelta::from_std(started.elapsed()).unwrap_or(TimeDelta::zero());
            let estimated = timer::estimate_position(
                snapshot.raw_position,
                snapshot.raw_position_timestamp.as_deref(),
                &snapshot.playback_state,
                now,
            );
            self.state = Some(ReconciledState::from_snapshot(key, snapshot, estimated, lyrics, now));
            self.last_options = Some(options.clone());
            return Decision::Update(reason);
        }

        if self.take_arrived_lyrics(&key).await {
            if let Some(state) = self.state.as_mut() {
                state.mark_broadcast(estimated, &snapshot.playback_state, now);
            }
            return Decision::Update(UpdateReason::LyricsArrived);
        }

        let Some(state) = self.state.as_mut() else {
            return Decision::Silent;
        };
        let expected = state.last_broadcast_position.map(|p| {
            timer::project(
                p,
                state.last_broadcast_state == PLAYING,
                timer::elapsed_between(state.last_broadcast_at, now),
            )
        });
        let seek = match (estimated, expected) {
            (Some(e), Some(x)) => (e - x).abs() > SEEK_THRESHOLD_SECS,
            (Some(_), None) | (None, Some(_)) => true,
            (None, None) => false,
        };
        let transition = snapshot.playback_state != state.last_broadcast_state;

        if seek || transition {
            tracing::debug!(
                song = %state.song_key,
                position = ?estimated,
                expected = ?expected,
                state = snapshot.playback_state.as_str(),
                seek,
                transition,
                "Playback sync"
            );
            state.mark_broadcast(estimated, &snapshot.playback_state, now);
            Decision::Sync
        } else {
            Decision::Silent
        }
    }

    /// Lyrics for a newly current song. The only path allowed to wait on the cache,
    /// bounded by the lookup timeout.
    async fn resolve_lyrics(&mut self, key: &SongKey, snapshot: &PlayerSnapshot) -> Option<String> {
        if let Some(pending) = &self.pending {
            if pending.key == *key {
                // Same song still being looked up; don't start a second search.
                return None;
            }
            tracing::debug!(song = %pending.key, "Abandoning lookup for previous song");
            self.pending = None;
        }

        let query = LyricQuery::new(
            snapshot.artist.as_deref().unwrap_or_default(),
            snapshot.title.as_deref().unwrap_or_default(),
        )
        .with_album(snapshot.album.as_deref())
        .with_duration(snapshot.duration);

        match self.cache.fetch(&query, self.lyrics_timeout).await {
            Lookup::Ready(lyrics) => lyrics,
            Lookup::Pending(handle) => {
                self.pending = Some(PendingLyrics { key: key.clone(), handle });
                None
            }
        }
    }

    /// Store lyrics from a finished background lookup for the current song.
    async fn take_arrived_lyrics(&mut self, key: &SongKey) -> bool {
        let finished = self
            .pending
            .as_ref()
            .is_some_and(|p| p.handle.is_finished());
        if !finished {
            return false;
        }
        let Some(pending) = self.pending.take() else {
            return false;
        };
        if pending.key != *key {
            return false;
        }
        match join_lookup(pending.handle).await {
            Some(lyrics) => {
                if let Some(state) = self.state.as_mut() {
                    tracing::info!(song = %key, "Late lyrics arrived");
                    state.lyrics = Some(lyrics);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::cache::tests::FakeSearch;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Mutex;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn snap(title: Option<&str>, pos: f64, state: &str, reported_at: DateTime<Utc>) -> PlayerSnapshot {
        PlayerSnapshot {
            title: title.map(str::to_string),
            artist: Some("Artist".into()),
            album: Some("Album".into()),
            artwork_ref: Some("/art".into()),
            raw_position: Some(pos),
            raw_position_timestamp: Some(reported_at.to_rfc3339()),
            duration: Some(180.0),
            playback_state: state.into(),
        }
    }

    fn setup(search: FakeSearch) -> (Reconciler, Arc<FakeSearch>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(search);
        let cache = Arc::new(LyricCache::new(dir.path(), search.clone()));
        (Reconciler::new(cache, Duration::from_secs(5)), search, dir)
    }

    #[tokio::test]
    async fn four_tick_scenario() {
        let (mut rec, search, _dir) = setup(FakeSearch::answering("[00:00.00]x"));
        let opts = Options::default();

        assert_eq!(rec.tick(&snap(None, 0.0, "playing", at(0)), &opts, at(0)).await, Decision::Skip);
        assert!(rec.state().is_none());

        assert_eq!(
            rec.tick(&snap(Some("A"), 0.0, "playing", at(1000)), &opts, at(1000)).await,
            Decision::Update(UpdateReason::SongChanged)
        );
        assert_eq!(rec.state().unwrap().lyrics.as_deref(), Some("[00:00.00]x"));

        assert_eq!(
            rec.tick(&snap(Some("A"), 1.0, "playing", at(2000)), &opts, at(2000)).await,
            Decision::Silent
        );

        assert_eq!(
            rec.tick(&snap(Some("B"), 0.0, "playing", at(3000)), &opts, at(3000)).await,
            Decision::Update(UpdateReason::SongChanged)
        );
        assert_eq!(rec.state().unwrap().title, "B");
        assert_eq!(*search.queries.lock().unwrap(), ["A", "B"]);
    }

    #[tokio::test]
    async fn steady_playback_stays_silent_over_many_ticks() {
        let (mut rec, _search, _dir) = setup(FakeSearch::default());
        let opts = Options::default();
        rec.tick(&snap(Some("A"), 0.0, "playing", at(0)), &opts, at(0)).await;
        for i in 1..30 {
            let d = rec
                .tick(&snap(Some("A"), i as f64, "playing", at(i * 1000)), &opts, at(i * 1000 + 200))
                .await;
            assert_eq!(d, Decision::Silent, "tick {i}");
        }
    }

    #[tokio::test]
    async fn position_jump_is_a_seek() {
        let (mut rec, _search, _dir) = setup(FakeSearch::default());
        let opts = Options::default();
        rec.tick(&snap(Some("A"), 10.0, "playing", at(0)), &opts, at(0)).await;
        let d = rec.tick(&snap(Some("A"), 40.0, "playing", at(1000)), &opts, at(1000)).await;
        assert_eq!(d, Decision::Sync);
        assert_eq!(rec.state().unwrap().last_broadcast_position, Some(40.0));
    }

    #[tokio::test]
    async fn backwards_seek_is_detected() {
        let (mut rec, _search, _dir) = setup(FakeSearch::default());
        let opts = Options::default();
        rec.tick(&snap(Some("A"), 90.0, "playing", at(0)), &opts, at(0)).await;
        let d = rec.tick(&snap(Some("A"), 5.0, "playing", at(1000)), &opts, at(1000)).await;
        assert_eq!(d, Decision::Sync);
    }

    #[tokio::test]
    async fn pause_is_a_transition() {
        let (mut rec, _search, _dir) = setup(FakeSearch::default());
        let opts = Options::default();
        rec.tick(&snap(Some("A"), 20.0, "playing", at(0)), &opts, at(0)).await;
        let d = rec.tick(&snap(Some("A"), 20.0, "paused", at(0)), &opts, at(0)).await;
        assert_eq!(d, Decision::Sync);
        let state = rec.state().unwrap();
        assert_eq!(state.playback_state, "paused");
        assert_eq!(state.estimated_position, Some(20.0));

        // Held while paused: no drift expected, no message.
        let d = rec.tick(&snap(Some("A"), 20.0, "paused", at(0)), &opts, at(5000)).await;
        assert_eq!(d, Decision::Silent);
    }

    #[tokio::test]
    async fn same_key_with_metadata_noise_is_same_song() {
        let (mut rec, search, _dir) = setup(FakeSearch::default());
        let opts = Options::default();
        rec.tick(&snap(Some("Song"), 0.0, "playing", at(0)), &opts, at(0)).await;
        let mut noisy = snap(Some("  SONG "), 1.0, "playing", at(1000));
        noisy.album = Some("Deluxe Edition".into());
        noisy.artwork_ref = Some("/other".into());
        assert_eq!(rec.tick(&noisy, &opts, at(1000)).await, Decision::Silent);
        assert_eq!(search.call_count(), 1);
    }

    #[tokio::test]
    async fn options_change_forces_update_without_song_change() {
        let (mut rec, _search, _dir) = setup(FakeSearch::answering("lrc"));
        let opts = Options::default();
        rec.tick(&snap(Some("A"), 0.0, "playing", at(0)), &opts, at(0)).await;

        let changed = Options::from_value(json!({"show_header": false})).unwrap();
        let d = rec.tick(&snap(Some("A"), 1.0, "playing", at(1000)), &changed, at(1000)).await;
        assert_eq!(d, Decision::Update(UpdateReason::OptionsChanged));
        assert_eq!(rec.state().unwrap().lyrics.as_deref(), Some("lrc"));

        let d = rec.tick(&snap(Some("A"), 2.0, "playing", at(2000)), &changed, at(2000)).await;
        assert_eq!(d, Decision::Silent);
    }

    #[tokio::test]
    async fn skipped_tick_keeps_state() {
        let (mut rec, _search, _dir) = setup(FakeSearch::default());
        let opts = Options::default();
        rec.tick(&snap(Some("A"), 3.0, "playing", at(0)), &opts, at(0)).await;
        let before = rec.state().cloned();
        assert_eq!(rec.tick(&snap(Some(""), 99.0, "paused", at(0)), &opts, at(0)).await, Decision::Skip);
        assert_eq!(rec.state().cloned(), before);
    }

    #[tokio::test]
    async fn missing_lyrics_are_retried_on_next_occurrence() {
        let (mut rec, search, _dir) = setup(FakeSearch::default());
        let opts = Options::default();
        rec.tick(&snap(Some("A"), 0.0, "playing", at(0)), &opts, at(0)).await;
        rec.tick(&snap(Some("B"), 0.0, "playing", at(1000)), &opts, at(1000)).await;
        rec.tick(&snap(Some("A"), 0.0, "playing", at(2000)), &opts, at(2000)).await;
        assert_eq!(search.call_count(), 3);
    }

    #[tokio::test]
    async fn slow_lookup_updates_without_lyrics_then_fills_in() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch {
            answer: Mutex::new(Some("late lrc".into())),
            delay: Some(Duration::from_millis(150)),
            ..Default::default()
        });
        let cache = Arc::new(LyricCache::new(dir.path(), search.clone()));
        let mut rec = Reconciler::new(cache, Duration::from_millis(10));
        let opts = Options::default();

        let d = rec.tick(&snap(Some("A"), 0.0, "playing", at(0)), &opts, at(0)).await;
        assert_eq!(d, Decision::Update(UpdateReason::SongChanged));
        assert_eq!(rec.state().unwrap().lyrics, None);
        assert!(rec.has_pending_lyrics());

        tokio::time::sleep(Duration::from_millis(400)).await;

        let d = rec.tick(&snap(Some("A"), 1.0, "playing", at(1000)), &opts, at(1000)).await;
        assert_eq!(d, Decision::Update(UpdateReason::LyricsArrived));
        assert_eq!(rec.state().unwrap().lyrics.as_deref(), Some("late lrc"));
        assert!(!rec.has_pending_lyrics());
        assert_eq!(search.call_count(), 1);
    }

    #[tokio::test]
    async fn update_position_accounts_for_lookup_wait() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch {
            answer: Mutex::new(Some("lrc".into())),
            delay: Some(Duration::from_millis(400)),
            ..Default::default()
        });
        let cache = Arc::new(LyricCache::new(dir.path(), search.clone()));
        let mut rec = Reconciler::new(cache, Duration::from_secs(5));
        let opts = Options::default();

        let d = rec.tick(&snap(Some("A"), 0.0, "playing", at(0)), &opts, at(0)).await;
        assert_eq!(d, Decision::Update(UpdateReason::SongChanged));
        let state = rec.state().unwrap();
        assert_eq!(state.lyrics.as_deref(), Some("lrc"));
        let sent_at = state.estimated_position.unwrap();
        assert!(sent_at >= 0.39, "update position {sent_at} ignores the lookup wait");
        assert!(state.last_broadcast_at >= at(390));

        // Next poll one second after the update went out: steady playback, nothing to correct.
        let next = state.last_broadcast_at + TimeDelta::seconds(1);
        let pos = timer::estimate_position(Some(0.0), Some(&at(0).to_rfc3339()), "playing", next).unwrap();
        let d = rec.tick(&snap(Some("A"), pos, "playing", next), &opts, next).await;
        assert_eq!(d, Decision::Silent);
    }

    #[tokio::test]
    async fn paused_update_is_not_shifted_by_lookup_wait() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let cache = Arc::new(LyricCache::new(dir.path(), search));
        let mut rec = Reconciler::new(cache, Duration::from_secs(5));

        rec.tick(&snap(Some("A"), 33.0, "paused", at(0)), &Options::default(), at(0)).await;
        assert_eq!(rec.state().unwrap().estimated_position, Some(33.0));
    }

    #[tokio::test]
    async fn abandoned_lookup_still_fills_cache() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch {
            answer: Mutex::new(Some("late".into())),
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let cache = Arc::new(LyricCache::new(dir.path(), search.clone()));
        let mut rec = Reconciler::new(cache.clone(), Duration::from_millis(5));
        let opts = Options::default();

        rec.tick(&snap(Some("A"), 0.0, "playing", at(0)), &opts, at(0)).await;
        rec.tick(&snap(Some("B"), 0.0, "playing", at(1000)), &opts, at(1000)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Only B's result is applied; A's lookup was abandoned but wrote its entry.
        let d = rec.tick(&snap(Some("B"), 1.0, "playing", at(2000)), &opts, at(2000)).await;
        assert_eq!(d, Decision::Update(UpdateReason::LyricsArrived));
        assert_eq!(rec.state().unwrap().title, "B");
        assert_eq!(cache.read_cached(&SongKey::new("Artist", "A")).await.as_deref(), Some("late"));

        // A replays straight from disk now.
        rec.tick(&snap(Some("A"), 0.0, "playing", at(3000)), &opts, at(3000)).await;
        assert_eq!(rec.state().unwrap().lyrics.as_deref(), Some("late"));
        assert_eq!(search.call_count(), 2);
    }
}
