//! Player worker thread.
//!
//! Owns the [`PlaybackController`] and serializes every command onto one thread.
//! Between commands it sleeps until the video timer's next deadline and runs the
//! pump tick. It also wakes when the audio stream drains so the published status
//! reflects completion even after the video timer has stopped.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use av_player_types::{PlayerEvent, PlayerStatus};
use crossbeam_channel::{Receiver, Sender, select};

use crate::controller::PlaybackController;
use crate::error::PlayerError;
use crate::status::{self, PlayerStatusState};

/// Commands accepted by the worker thread.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerCommand {
    Open(PathBuf),
    Play,
    Pause,
    Resume,
    Stop,
    Seek(u64),
    SetVolume(f32),
    SetSpeed(f64),
    Shutdown,
}

/// Handle for talking to the worker.
pub struct PlayerHandle {
    cmd_tx: Sender<PlayerCommand>,
    events: Receiver<PlayerEvent>,
    status: Arc<Mutex<PlayerStatusState>>,
    join: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    /// Queue a command; fails only when the worker is gone.
    pub fn send(&self, cmd: PlayerCommand) -> Result<(), PlayerError> {
        self.cmd_tx.send(cmd).map_err(|_| PlayerError::Stopped)
    }

    pub fn commands(&self) -> Sender<PlayerCommand> {
        self.cmd_tx.clone()
    }

    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events
    }

    pub fn status(&self) -> PlayerStatus {
        status::read(&self.status)
    }

    /// Video ended and audio drained.
    pub fn is_complete(&self) -> bool {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_complete()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error
            .clone()
    }

    /// Stop playback and join the worker.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!("player thread panicked");
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Spawn the worker. `build` runs on the worker thread so the controller and its
/// audio output never cross threads.
pub fn spawn_player<F>(build: F) -> PlayerHandle
where
    F: FnOnce(Sender<PlayerEvent>) -> PlaybackController + Send + 'static,
{
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let (event_tx, events) = crossbeam_channel::unbounded();
    let status = PlayerStatusState::shared();
    let status_thread = status.clone();
    let join = std::thread::Builder::new()
        .name("av-player".to_string())
        .spawn(move || {
            let controller = build(event_tx);
            player_thread_main(controller, cmd_rx, status_thread);
        });
    let join = match join {
        Ok(join) => Some(join),
        Err(e) => {
            tracing::error!(error = %e, "failed to spawn player thread");
            status
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record_error(e.to_string());
            None
        }
    };
    PlayerHandle {
        cmd_tx,
        events,
        status,
        join,
    }
}

fn player_thread_main(
    mut controller: PlaybackController,
    cmd_rx: Receiver<PlayerCommand>,
    status: Arc<Mutex<PlayerStatusState>>,
) {
    let audio_done = controller.audio_done();
    publish(&controller, &status);
    loop {
        let timer = match controller.next_deadline() {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };
        select! {
            recv(cmd_rx) -> msg => match msg {
                Ok(PlayerCommand::Shutdown) | Err(_) => break,
                Ok(cmd) => {
                    if let Err(e) = apply(&mut controller, cmd.clone()) {
                        tracing::warn!(command = ?cmd, error = %e, "command failed");
                        status
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .record_error(e.to_string());
                    }
                }
            },
            recv(timer) -> _ => controller.tick(Instant::now()),
            recv(audio_done) -> _ => tracing::debug!("audio drained"),
        }
        publish(&controller, &status);
    }

    controller.stop();
    status
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear_playback();
    tracing::debug!("player thread exiting");
}

fn apply(controller: &mut PlaybackController, cmd: PlayerCommand) -> Result<(), PlayerError> {
    match cmd {
        PlayerCommand::Open(path) => controller.open(&path).map(|_| ()),
        PlayerCommand::Play => controller.play(),
        PlayerCommand::Pause => controller.pause(),
        PlayerCommand::Resume => controller.resume(),
        PlayerCommand::Stop => {
            controller.stop();
            Ok(())
        }
        PlayerCommand::Seek(ms) => controller.seek(ms).map(|_| ()),
        PlayerCommand::SetVolume(v) => {
            controller.set_volume(v);
            Ok(())
        }
        PlayerCommand::SetSpeed(s) => controller.set_speed(s).map(|_| ()),
        PlayerCommand::Shutdown => Ok(()),
    }
}

fn publish(controller: &PlaybackController, status: &Mutex<PlayerStatusState>) {
    let snapshot = controller.status();
    let finished = controller.audio_finished();
    status
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .publish(snapshot, finished);
}
