// lyrics/mod.rs - lyric lookup: provider chain plus the on-disk cache in front of it
pub mod cache;
pub mod providers;
pub mod types;

pub use cache::{LyricCache, Lookup};
pub use providers::ProviderChain;
pub use types::{LyricQuery, ProviderSettings};
