//! # Vexo Music
//!
//! Per-guild music playback engine with gapless scheduling and
//! multi-source metadata consensus.
//!
//! The crate exposes a [`player::PlayerEngine`] that external command
//! handlers drive (enqueue, skip, stop, autoplay) and that status
//! collaborators read through snapshots. Stream resolution, metadata
//! providers, discovery and persistence are all trait seams so the
//! engine can be exercised end-to-end without Discord.

pub mod config;
pub mod discovery;
pub mod error;
pub mod metadata;
pub mod player;
pub mod sources;
pub mod storage;
