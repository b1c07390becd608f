//! Player state machine rules.

use av_player_types::PlayerState;

use crate::error::PlayerError;

/// Commands that move the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Open,
    Play,
    Pause,
    Resume,
    Seek,
    VideoEnded,
    Stop,
}

impl Transition {
    fn label(self) -> &'static str {
        match self {
            Transition::Open => "open",
            Transition::Play => "play",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Seek => "seek",
            Transition::VideoEnded => "end",
            Transition::Stop => "stop",
        }
    }
}

/// Target state of `transition` from `from`, or `InvalidState`.
///
/// Returning `from` itself means the command is accepted as a no-op.
pub fn next_state(from: PlayerState, transition: Transition) -> Result<PlayerState, PlayerError> {
    use PlayerState::*;
    let to = match (from, transition) {
        (_, Transition::Stop) => Idle,
        (Idle, Transition::Open) => Ready,
        (Ready | Paused | Ended, Transition::Play) => Playing,
        (Playing, Transition::Play | Transition::Resume) => Playing,
        (Ready | Paused, Transition::Resume) => Playing,
        (Playing, Transition::Pause) => Paused,
        (Paused, Transition::Pause) => Paused,
        (Ready | Playing | Paused, Transition::Seek) => from,
        (Ended, Transition::Seek) => Paused,
        (Playing, Transition::VideoEnded) => Ended,
        _ => {
            return Err(PlayerError::InvalidState {
                command: transition.label(),
                state: from,
            });
        }
    };
    Ok(to)
}
