use av_player_types::PlayerState;
use thiserror::Error;

/// Failures surfaced by the playback engine.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Bad path or unreadable container.
    #[error("cannot open source {path}: {reason}")]
    SourceOpen { path: String, reason: String },

    /// The container has no track of the requested kind.
    #[error("no {kind} stream found")]
    StreamNotFound { kind: &'static str },

    /// No matching decoder, or the decoder context could not be created.
    #[error("decoder init failed: {0}")]
    DecoderInit(String),

    /// Resampler construction or rebuild failed.
    #[error("resampler error: {0}")]
    Resampler(String),

    /// The seek target could not be reached.
    #[error("seek to {target_ms} ms failed: {reason}")]
    Seek { target_ms: u64, reason: String },

    /// A buffer could not be sized.
    #[error("allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },

    /// A single packet or frame failed to decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// The audio output device failed.
    #[error("audio output error: {0}")]
    Output(String),

    /// The command is not valid in the current state.
    #[error("{command} is not valid while {state:?}")]
    InvalidState {
        command: &'static str,
        state: PlayerState,
    },

    /// The player thread has exited.
    #[error("player stopped")]
    Stopped,
}

impl PlayerError {
    pub(crate) fn source_open(path: &std::path::Path, reason: impl ToString) -> Self {
        PlayerError::SourceOpen {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// `true` for errors that only affect the current packet.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlayerError::Decode(_))
    }
}
