// pool.rs: Central polling loop feeding the reconciler and the subscriber hub

use crate::artwork::{ArtworkHook, ArtworkJob, spawn_artwork_hook};
use crate::hub::Hub;
use crate::options::{Options, OptionsLoader};
use crate::reconciler::{Decision, Reconciler, UpdateReason};
use crate::source::{SourceError, StateSource};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Everything one reconciliation loop needs, owned by the loop task.
pub struct Poller {
    source: Arc<dyn StateSource>,
    reconciler: Reconciler,
    hub: Arc<Hub>,
    options: OptionsLoader,
    artwork: Option<Arc<dyn ArtworkHook>>,
    interval: Duration,
    token_backoff: Duration,
}

impl Poller {
    pub fn new(
        source: Arc<dyn StateSource>,
        reconciler: Reconciler,
        hub: Arc<Hub>,
        options: OptionsLoader,
        interval: Duration,
        token_backoff: Duration,
    ) -> Self {
        Self {
            source,
            reconciler,
            hub,
            options,
            artwork: None,
            interval,
            token_backoff,
        }
    }

    pub fn with_artwork_hook(mut self, hook: Arc<dyn ArtworkHook>) -> Self {
        self.artwork = Some(hook);
        self
    }

    /// One reconciliation pass. Source failures abort the tick untouched.
    pub async fn tick(&mut self) -> Result<Decision, SourceError> {
        let options = self.options.load().await;
        let snapshot = self.source.fetch(options.entity_id()).await?;
        let decision = self.reconciler.tick(&snapshot, &options, Utc::now()).await;
        self.dispatch(decision, &options);
        Ok(decision)
    }

    fn dispatch(&self, decision: Decision, options: &Options) {
        let Some(state) = self.reconciler.state() else {
            return;
        };
        match decision {
            Decision::Update(reason) => {
                let delivered = self.hub.publish_update(state, &options.public_view());
                tracing::info!(
                    song = %state.song_key,
                    reason = ?reason,
                    has_lyrics = state.lyrics.is_some(),
                    lyrics_pending = self.reconciler.has_pending_lyrics(),
                    delivered,
                    "Broadcast update"
                );
                if reason != UpdateReason::LyricsArrived {
                    self.schedule_artwork(options);
                }
            }
            Decision::Sync => {
                let delivered = self.hub.publish_sync(state);
                tracing::debug!(position = ?state.estimated_position, state = state.playback_state.as_str(), delivered, "Broadcast sync");
            }
            Decision::Skip | Decision::Silent => {}
        }
    }

    fn schedule_artwork(&self, options: &Options) {
        let (Some(hook), Some(state), Some(topic)) = (&self.artwork, self.reconciler.state(), options.mqtt_topic())
        else {
            return;
        };
        let Some(image) = state.artwork_ref.clone() else {
            return;
        };
        spawn_artwork_hook(
            Arc::clone(hook),
            ArtworkJob {
                image,
                topic,
                title: state.title.clone(),
                artist: state.artist.clone(),
            },
        );
    }

    /// Sleep before the next tick, given how this one went.
    fn next_delay(&self, result: &Result<Decision, SourceError>) -> Duration {
        match result {
            Err(e) if e.needs_backoff() => self.token_backoff,
            _ => self.interval,
        }
    }
}

/// Runs the reconciliation loop until a shutdown signal arrives.
pub async fn listen(mut poller: Poller, mut shutdown_rx: mpsc::Receiver<()>) {
    tracing::info!(interval_ms = poller.interval.as_millis() as u64, "Reconciliation loop started");
    loop {
        let result = poller.tick().await;
        match &result {
            Ok(_) => {}
            Err(e) if e.needs_backoff() => {
                tracing::warn!(retry_in_secs = poller.token_backoff.as_secs(), "{}; backing off", e);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to fetch player state"),
        }
        let delay = poller.next_delay(&result);
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::info!("Reconciliation loop stopped");
}
