//! Audio/video playback engine.
//!
//! The audio output device pulls decoded, resampled s16 audio from
//! [`pipeline::AudioPipeline`], which advances the shared [`clock::AudioClock`].
//! A timer-driven [`pipeline::VideoPipeline`] presents frames and lets
//! [`sync::Synchronizer`] stretch or shrink its delay to follow that clock.
//! [`controller::PlaybackController`] owns both and enforces the player state machine.

pub mod backend;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod player;
pub mod resample;
pub mod source;
pub mod state;
pub mod status;
pub mod sync;

#[cfg(test)]
mod testing;

pub use av_player_types::{MediaInfo, PlayerEvent, PlayerState, PlayerStatus, format_position};
pub use backend::DefaultBackend;
pub use config::{PlaybackConfig, SyncConfig};
pub use controller::PlaybackController;
pub use error::PlayerError;
pub use output::CpalOutputFactory;
pub use player::{PlayerCommand, PlayerHandle, spawn_player};
