//! # Player Module
//!
//! Per-guild continuous playback scheduling.
//!
//! This module provides the core playback functionality including:
//! - Two-tier priority queue with strict FIFO within each tier
//! - A per-guild playback loop with watchdog recovery of stuck decodes
//! - Gapless pre-fetching of the next track's stream URL and metadata
//! - Idle-session reaping with an always-on exemption
//!
//! ## Architecture
//!
//! The playback system is built around five components:
//!
//! ### [`queue`] - Playback Queue
//! - Ordered by `(tier, sequence)`: user requests before autoplay
//! - Items are shared so the prefetcher can prime them in place
//!
//! ### [`playback`] - Playback Loop
//! - One long-lived task per guild, the only writer of `current`
//! - Watchdog deadline of duration + margin (or a fixed ceiling)
//! - Every per-item failure is logged and skipped, never fatal
//!
//! ### [`prefetch`] - Prefetcher
//! - Keeps the head of the queue ready ahead of need
//! - Refills from the discovery collaborator when the queue runs dry
//!
//! ### [`reaper`] - Idle Reaper
//! - Releases connections after sustained inactivity
//!
//! ### [`driver`] - Voice Driver
//! - The songbird-backed connection seam the loop plays through

pub mod driver;
pub mod engine;
pub mod guild;
pub mod playback;
pub mod prefetch;
pub mod queue;
pub mod reaper;

#[cfg(test)]
pub(crate) mod testutil;

pub use driver::{ActiveTrack, SongbirdConnection, VoiceConnection};
pub use engine::{PlayerEngine, Services};
pub use guild::{GuildPlayer, PlayerRegistry, PlayerState};
pub use prefetch::Prefetcher;
pub use queue::{PlaybackQueue, QueueItem, SharedItem, Tier, TrackOrigin};
pub use reaper::IdleReaper;
