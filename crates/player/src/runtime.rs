//! Player runtime: spawns the engine, feeds it commands and reports progress.

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use av_player::{
    CpalOutputFactory, DefaultBackend, MediaInfo, PlaybackController, PlayerCommand, PlayerEvent,
    PlayerHandle, PlayerState, format_position, spawn_player,
};
use crossbeam_channel::{Receiver, select};

use crate::commands::{self, Input};
use crate::config::PlayerConfig;
use crate::sink::{SinkStats, StatsSink};

const OPEN_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Print output device names to stdout.
pub fn list_devices() -> Result<()> {
    for (i, name) in av_player::device::list_default_devices()?.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

/// Play `config.path` until both streams end, the user quits or Ctrl-C arrives.
pub fn run(config: PlayerConfig) -> Result<()> {
    if !DefaultBackend::supports_video() {
        tracing::warn!("built without the `ffmpeg` feature; video sources cannot be opened");
    }

    let sink = StatsSink::new(config.dump.clone());
    let stats = sink.stats();
    let outputs = CpalOutputFactory::new(config.device.clone(), config.playback.device_buffer_frames);
    let playback = config.playback.clone();
    let handle = spawn_player(move |events| {
        PlaybackController::new(
            Box::new(DefaultBackend::new()),
            Box::new(outputs),
            Box::new(sink),
            playback,
            events,
        )
    });

    handle.send(PlayerCommand::Open(config.path.clone()))?;
    let media = wait_for_open(&handle, config.json)?;

    if config.info_only {
        print_media(&media, config.json)?;
        handle.shutdown();
        return Ok(());
    }
    if !config.json {
        print_media(&media, false)?;
    }

    handle.send(PlayerCommand::SetVolume(config.volume))?;
    handle.send(PlayerCommand::SetSpeed(config.speed))?;
    if let Some(ms) = config.start_ms {
        handle.send(PlayerCommand::Seek(ms))?;
    }
    handle.send(PlayerCommand::Play)?;

    let (input_tx, input_rx) = crossbeam_channel::unbounded();
    if config.interactive {
        commands::spawn_stdin_reader(input_tx.clone());
    }
    let interrupt_tx = input_tx;
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(Input::Quit);
    }) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }

    event_loop(&handle, &input_rx, &stats, config.json)?;

    tracing::info!(frames = stats.presented(), "playback finished");
    handle.shutdown();
    Ok(())
}

/// Wait for the open to succeed (`Ready`) or fail (`Error`).
fn wait_for_open(handle: &PlayerHandle, json: bool) -> Result<MediaInfo> {
    let timeout = crossbeam_channel::after(OPEN_TIMEOUT);
    loop {
        select! {
            recv(handle.events()) -> event => {
                let event = event.map_err(|_| anyhow!("player stopped during open"))?;
                if json {
                    print_json(&event)?;
                }
                match event {
                    PlayerEvent::StateChanged { state: PlayerState::Ready } => {
                        return opened_media(handle);
                    }
                    PlayerEvent::Error { reason } => bail!("open failed: {reason}"),
                    _ => {}
                }
            }
            recv(timeout) -> _ => bail!("timed out opening source"),
        }
    }
}

/// The status snapshot is published right after the state event; give it a moment.
fn opened_media(handle: &PlayerHandle) -> Result<MediaInfo> {
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        if let Some(media) = handle.status().media {
            return Ok(media);
        }
        if Instant::now() >= deadline {
            bail!("source opened without media info");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn event_loop(
    handle: &PlayerHandle,
    input_rx: &Receiver<Input>,
    stats: &SinkStats,
    json: bool,
) -> Result<()> {
    let ticker = crossbeam_channel::tick(STATUS_INTERVAL);
    loop {
        select! {
            recv(handle.events()) -> event => {
                let Ok(event) = event else { return Ok(()) };
                report_event(&event, json)?;
            }
            recv(input_rx) -> input => match input {
                Ok(Input::Command(cmd)) => handle.send(cmd)?,
                Ok(Input::Invalid(msg)) => eprintln!("{msg}"),
                Ok(Input::Quit) => {
                    tracing::info!("quit requested");
                    return Ok(());
                }
                Err(_) => {}
            },
            recv(ticker) -> _ => {
                let status = handle.status();
                if !json {
                    let total = status.duration_ms.unwrap_or(0);
                    eprint!(
                        "\r{:<8} {}  video {}  x{:.2}  vol {:.2}   ",
                        status.state.label(),
                        format_position(status.position_ms, total),
                        format_position(stats.last_pts_ms(), total),
                        status.speed,
                        status.volume,
                    );
                }
            }
        }
        if handle.is_complete() {
            if !json {
                eprintln!();
            }
            return Ok(());
        }
    }
}

fn report_event(event: &PlayerEvent, json: bool) -> Result<()> {
    if json {
        return print_json(event);
    }
    match event {
        PlayerEvent::StateChanged { state } => tracing::info!(state = state.label(), "state"),
        PlayerEvent::PositionChanged { position_ms } => {
            tracing::debug!(position_ms, "position");
        }
        PlayerEvent::PlaybackFinished => tracing::info!("audio finished"),
        PlayerEvent::Error { reason } => tracing::error!(%reason, "player error"),
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_media(media: &MediaInfo, json: bool) -> Result<()> {
    if json {
        return print_json(media);
    }
    println!("file:     {}", media.path);
    if let Some(ms) = media.duration_ms {
        println!("duration: {:.3} s", ms as f64 / 1000.0);
    }
    if let Some(codec) = &media.video_codec {
        println!(
            "video:    {codec} {}x{} @ {:.3} fps ({})",
            media.width.unwrap_or(0),
            media.height.unwrap_or(0),
            media.frame_rate.unwrap_or(0.0),
            media.pixel_format.as_deref().unwrap_or("?"),
        );
    }
    if let Some(codec) = &media.audio_codec {
        println!(
            "audio:    {codec} {} Hz, {} ch ({})",
            media.sample_rate.unwrap_or(0),
            media.channels.unwrap_or(0),
            media.sample_format.as_deref().unwrap_or("?"),
        );
    }
    Ok(())
}
