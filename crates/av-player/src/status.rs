use std::sync::{Arc, Mutex, PoisonError};

use av_player_types::{PlayerState, PlayerStatus};

/// Shared status updated by the player thread and read by front-ends.
#[derive(Debug, Default)]
pub struct PlayerStatusState {
    /// Latest controller snapshot.
    pub status: PlayerStatus,
    /// Whether the audio stream of the current source drained.
    pub audio_finished: bool,
    /// Message of the most recent failed command.
    pub last_error: Option<String>,
}

impl PlayerStatusState {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Copy of the current controller status.
    pub fn snapshot(&self) -> PlayerStatus {
        self.status.clone()
    }

    /// Replace the snapshot; a new source clears the finished flag.
    pub fn publish(&mut self, status: PlayerStatus, audio_finished: bool) {
        let reopened = status.media.as_ref().map(|m| &m.path)
            != self.status.media.as_ref().map(|m| &m.path);
        if reopened {
            self.last_error = None;
        }
        self.status = status;
        self.audio_finished = audio_finished;
    }

    pub fn record_error(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
    }

    /// Both end conditions reached: video ended and audio drained.
    pub fn is_complete(&self) -> bool {
        self.status.state == PlayerState::Ended && self.audio_finished
    }

    /// Clear source-specific fields after a stop.
    pub fn clear_playback(&mut self) {
        self.status.state = PlayerState::Idle;
        self.status.position_ms = 0;
        self.status.duration_ms = None;
        self.status.media = None;
        self.audio_finished = false;
    }
}

/// Lock helper that recovers the data of a poisoned store.
pub fn read(store: &Mutex<PlayerStatusState>) -> PlayerStatus {
    store
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_player_types::MediaInfo;

    fn playing(path: &str) -> PlayerStatus {
        PlayerStatus {
            state: PlayerState::Playing,
            position_ms: 1500,
            duration_ms: Some(60_000),
            volume: 1.0,
            speed: 1.0,
            media: Some(MediaInfo {
                path: path.to_string(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn snapshot_reflects_last_publish() {
        let store = PlayerStatusState::shared();
        store.lock().unwrap().publish(playing("a.mp4"), false);
        let snap = read(&store);
        assert_eq!(snap.position_ms, 1500);
        assert_eq!(snap.state, PlayerState::Playing);
    }

    #[test]
    fn complete_needs_ended_and_audio_drained() {
        let mut state = PlayerStatusState::default();
        let mut status = playing("a.mp4");
        status.state = PlayerState::Ended;
        state.publish(status.clone(), false);
        assert!(!state.is_complete());
        state.publish(status, true);
        assert!(state.is_complete());
    }

    #[test]
    fn new_source_clears_error() {
        let mut state = PlayerStatusState::default();
        state.publish(playing("a.mp4"), false);
        state.record_error("seek failed");
        state.publish(playing("a.mp4"), false);
        assert_eq!(state.last_error.as_deref(), Some("seek failed"));
        state.publish(playing("b.mp4"), false);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn clear_playback_resets_source_fields() {
        let mut state = PlayerStatusState::default();
        state.publish(playing("a.mp4"), true);
        state.clear_playback();
        assert_eq!(state.status.state, PlayerState::Idle);
        assert!(state.status.media.is_none());
        assert!(state.status.duration_ms.is_none());
        assert!(!state.audio_finished);
    }
}
