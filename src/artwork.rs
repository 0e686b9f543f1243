//! Fire-and-forget artwork side effect: dominant colour → MQTT.
//!
//! Triggered on every full update that carries artwork. Nothing here may
//! influence reconciliation; failures are logged and dropped.

use crate::source::{HomeAssistant, SourceError};
use async_trait::async_trait;
use image::imageops::FilterType;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum ArtworkError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Image has no usable pixels")]
    Empty,
}

/// Everything the hook needs about the song whose artwork changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtworkJob {
    pub image: String,
    pub topic: String,
    pub title: String,
    pub artist: String,
}

#[async_trait]
pub trait ArtworkHook: Send + Sync {
    async fn on_artwork(&self, job: &ArtworkJob) -> Result<(), ArtworkError>;
}

/// Run the hook on its own task. The caller never waits and never sees errors.
pub fn spawn_artwork_hook(hook: Arc<dyn ArtworkHook>, job: ArtworkJob) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = hook.on_artwork(&job).await {
            tracing::warn!(image = job.image.as_str(), error = %e, "Artwork hook failed");
        }
    })
}

/// Publishes the artwork's dominant colour through Home Assistant's
/// `mqtt.publish` service.
pub struct ColorPublisher {
    ha: Arc<HomeAssistant>,
}

impl ColorPublisher {
    pub fn new(ha: Arc<HomeAssistant>) -> Self {
        Self { ha }
    }
}

#[async_trait]
impl ArtworkHook for ColorPublisher {
    async fn on_artwork(&self, job: &ArtworkJob) -> Result<(), ArtworkError> {
        let bytes = self.ha.fetch_bytes(&job.image).await?;
        // Decoding is CPU-bound; keep it off the async workers.
        let rgb = tokio::task::spawn_blocking(move || dominant_color(&bytes)).await??;
        let payload = json!({
            "color": to_hex(rgb),
            "rgb": rgb,
            "image": job.image,
            "title": job.title,
            "artist": job.artist,
        });
        self.ha
            .call_service(
                "mqtt",
                "publish",
                &json!({ "topic": job.topic, "payload": payload.to_string(), "retain": true }),
            )
            .await?;
        tracing::debug!(topic = job.topic.as_str(), color = %to_hex(rgb), "Published artwork colour");
        Ok(())
    }
}

/// Most common colour of an encoded image.
///
/// Pixels are bucketed at 4 bits per channel on a 64×64 thumbnail, ignoring
/// near-black, near-white and transparent pixels when anything else is left.
/// The winning bucket's pixels are averaged.
pub fn dominant_color(bytes: &[u8]) -> Result<[u8; 3], ArtworkError> {
    let img = image::load_from_memory(bytes)?
        .resize(64, 64, FilterType::Triangle)
        .to_rgba8();

    let mut buckets: HashMap<u16, (u32, [u32; 3])> = HashMap::new();
    let mut fallback: HashMap<u16, (u32, [u32; 3])> = HashMap::new();
    for px in img.pixels() {
        let [r, g, b, a] = px.0;
        if a < 128 {
            continue;
        }
        let bucket = ((r as u16 >> 4) << 8) | ((g as u16 >> 4) << 4) | (b as u16 >> 4);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let target = if max < 24 || min > 232 { &mut fallback } else { &mut buckets };
        let entry = target.entry(bucket).or_insert((0, [0; 3]));
        entry.0 += 1;
        entry.1[0] += r as u32;
        entry.1[1] += g as u32;
        entry.1[2] += b as u32;
    }

    let pool = if buckets.is_empty() { &fallback } else { &buckets };
    let (count, sums) = pool
        .iter()
        // Ties go to the lower bucket so the result is deterministic.
        .max_by(|(ka, (ca, _)), (kb, (cb, _))| ca.cmp(cb).then(kb.cmp(ka)))
        .map(|(_, v)| *v)
        .ok_or(ArtworkError::Empty)?;
    Ok([
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
    ])
}

pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}
