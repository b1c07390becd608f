use serde::{Deserialize, Serialize};

/// Lifecycle state of a playback session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// No source is open.
    #[default]
    Idle,
    /// A source is open and both pipelines are initialized, playback not started.
    Ready,
    /// Audio output and the video pump are running.
    Playing,
    /// Output is suspended; the audio clock is frozen.
    Paused,
    /// Video decoding reached end-of-stream.
    Ended,
}

impl PlayerState {
    /// Short lowercase label used by front-ends.
    pub fn label(self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Ready => "ready",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Ended => "ended",
        }
    }
}

/// Notifications emitted by the player.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// The controller moved to a new state.
    StateChanged { state: PlayerState },
    /// Audible position, rate-limited by audio progress.
    PositionChanged { position_ms: u64 },
    /// The audio stream drained completely. Emitted once per completed stream.
    PlaybackFinished,
    /// A command or pipeline failed.
    Error { reason: String },
}

/// Static description of an opened source.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    /// Path the source was opened from.
    pub path: String,
    /// Total duration in milliseconds when the container reports it.
    pub duration_ms: Option<u64>,
    /// Audio codec label (best-effort).
    pub audio_codec: Option<String>,
    /// Native audio sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Native audio channel count.
    pub channels: Option<u16>,
    /// Native audio sample format label.
    pub sample_format: Option<String>,
    /// Video codec label (best-effort).
    pub video_codec: Option<String>,
    /// Video width in pixels.
    pub width: Option<u32>,
    /// Video height in pixels.
    pub height: Option<u32>,
    /// Average video frame rate.
    pub frame_rate: Option<f64>,
    /// Source pixel format label.
    pub pixel_format: Option<String>,
}

/// Point-in-time view of the player.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayerState,
    /// Audio clock position in milliseconds.
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub volume: f32,
    pub speed: f64,
    pub media: Option<MediaInfo>,
}

impl PlayerStatus {
    /// `true` when output is not advancing.
    pub fn paused(&self) -> bool {
        !matches!(self.state, PlayerState::Playing)
    }
}

/// Render a `current / total` clock label.
///
/// Uses `MM:SS` fields unless the total reaches an hour, in which case the total
/// gets an hours field and the current position only shows hours when it has any.
pub fn format_position(current_ms: u64, total_ms: u64) -> String {
    let (ch, cm, cs) = split_hms(current_ms / 1000);
    let (th, tm, ts) = split_hms(total_ms / 1000);
    if th > 0 {
        if ch > 0 {
            format!("{ch:02}:{cm:02}:{cs:02} / {th:02}:{tm:02}:{ts:02}")
        } else {
            format!("{cm:02}:{cs:02} / {th:02}:{tm:02}:{ts:02}")
        }
    } else {
        format!("{:02}:{cs:02} / {tm:02}:{ts:02}", cm + ch * 60)
    }
}

fn split_hms(secs: u64) -> (u64, u64, u64) {
    (secs / 3600, (secs % 3600) / 60, secs % 60)
}
