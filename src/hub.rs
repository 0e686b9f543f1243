//! Subscriber registry and broadcaster.
//!
//! Every subscriber is a bounded channel drained by its connection task.
//! The registry also keeps the last published song so that a subscriber
//! joining mid-song is replayed a full `update` before any live frame.
//! Replay-record updates and fan-out happen under one lock acquisition,
//! which is what keeps a late joiner from ever seeing a `sync` for a song
//! it was not told about.

use crate::protocol::{Frame, Message};
use crate::state::ReconciledState;
use crate::timer;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Frames buffered per subscriber before it is considered stalled and dropped.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receiving half handed to a connection.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub frames: mpsc::Receiver<Frame>,
}

struct Replay {
    state: ReconciledState,
    options: Value,
    captured_at: DateTime<Utc>,
}

impl Replay {
    fn message(&self, now: DateTime<Utc>) -> Message {
        let position = self.state.estimated_position.map(|p| {
            timer::project(p, self.state.is_playing(), timer::elapsed_between(self.captured_at, now))
        });
        Message::update(&self.state, position, &self.options)
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Frame>>,
    current: Option<Replay>,
}

impl Registry {
    /// Push a frame to every subscriber, dropping the ones that cannot take it.
    fn deliver(&mut self, frame: &Frame) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = %id, "Subscriber gone, removing");
                false
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscriber = %id, "Subscriber stalled, removing");
                false
            }
        });
        delivered
    }
}

pub struct Hub {
    registry: Mutex<Registry>,
    buffer: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Hub {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber. When a song is current, its replay is queued first.
    pub fn register(&self) -> Subscription {
        let (tx, frames) = mpsc::channel(self.buffer);
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = SubscriberId(registry.next_id);

        if let Some(replay) = &registry.current {
            match replay.message(Utc::now()).to_frame() {
                // Fresh channel with capacity >= 1 cannot be full or closed here.
                Ok(frame) => {
                    let _ = tx.try_send(frame);
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode replay frame"),
            }
        }

        registry.subscribers.insert(id, tx);
        tracing::info!(subscriber = %id, total = registry.subscribers.len(), "Subscriber connected");
        Subscription { id, frames }
    }

    /// Remove a subscriber; unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        let mut registry = self.lock();
        if registry.subscribers.remove(&id).is_some() {
            tracing::info!(subscriber = %id, total = registry.subscribers.len(), "Subscriber disconnected");
        }
    }

    /// Deliver `message` to every live subscriber, returning how many accepted it.
    /// `record` updates the replay slot under the same lock as the fan-out.
    fn broadcast(&self, message: &Message, record: impl FnOnce(&mut Option<Replay>)) -> usize {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode frame");
                return 0;
            }
        };
        let mut registry = self.lock();
        record(&mut registry.current);
        registry.deliver(&frame)
    }

    /// Record `state` as the replay target and broadcast it as an `update`.
    pub fn publish_update(&self, state: &ReconciledState, options: &Value) -> usize {
        let message = Message::update(state, state.estimated_position, options);
        self.broadcast(&message, |current| {
            *current = Some(Replay {
                state: state.clone(),
                options: options.clone(),
                captured_at: Utc::now(),
            });
        })
    }

    /// Refresh the replay record's playback fields and broadcast a `sync`.
    pub fn publish_sync(&self, state: &ReconciledState) -> usize {
        self.broadcast(&Message::sync(state), |current| {
            if let Some(replay) = current.as_mut() {
                replay.state = state.clone();
                replay.captured_at = Utc::now();
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Title of the song a new subscriber would be replayed, if any.
    pub fn current_title(&self) -> Option<String> {
        self.lock().current.as_ref().map(|r| r.state.title.clone())
    }
}
