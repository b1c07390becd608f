//! Interactive stdin commands.
//!
//! One command per line:
//! - `p` pause, `r` resume/play
//! - `s <ms>` seek
//! - `v <volume>` set volume, `x <speed>` set speed
//! - `o <path>` open another file
//! - `q` quit

use std::io::BufRead;

use av_player::PlayerCommand;
use crossbeam_channel::Sender;

#[derive(Debug, PartialEq)]
pub enum Input {
    Command(PlayerCommand),
    Quit,
    Invalid(String),
}

pub fn parse_line(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (verb, arg) = match line.split_once(char::is_whitespace) {
        Some((v, a)) => (v, a.trim()),
        None => (line, ""),
    };
    let input = match verb {
        "p" | "pause" => Input::Command(PlayerCommand::Pause),
        "r" | "resume" | "play" => Input::Command(PlayerCommand::Play),
        "q" | "quit" => Input::Quit,
        "s" | "seek" => match arg.parse::<u64>() {
            Ok(ms) => Input::Command(PlayerCommand::Seek(ms)),
            Err(_) => Input::Invalid(format!("bad seek position: {arg:?}")),
        },
        "v" | "volume" => match arg.parse::<f32>() {
            Ok(v) => Input::Command(PlayerCommand::SetVolume(v)),
            Err(_) => Input::Invalid(format!("bad volume: {arg:?}")),
        },
        "x" | "speed" => match arg.parse::<f64>() {
            Ok(s) => Input::Command(PlayerCommand::SetSpeed(s)),
            Err(_) => Input::Invalid(format!("bad speed: {arg:?}")),
        },
        "o" | "open" if !arg.is_empty() => Input::Command(PlayerCommand::Open(arg.into())),
        other => Input::Invalid(format!("unknown command: {other:?}")),
    };
    Some(input)
}

/// Read stdin lines on a background thread until EOF.
pub fn spawn_stdin_reader(tx: Sender<Input>) {
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if let Some(input) = parse_line(&line)
                    && tx.send(input).is_err()
                {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "stdin reader unavailable");
    }
}
