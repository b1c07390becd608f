//! Headless video sink: counts presented frames and optionally dumps them as PPM.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use av_player::source::{VideoFrame, VideoSink};
use crossbeam_channel::{Sender, TrySendError};

use crate::config::DumpConfig;

/// Frames waiting for the writer before new dumps are dropped.
const DUMP_QUEUE: usize = 4;

/// Counters readable from the front-end thread.
#[derive(Clone, Debug, Default)]
pub struct SinkStats {
    presented: Arc<AtomicU64>,
    last_pts_ms: Arc<AtomicU64>,
}

impl SinkStats {
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn last_pts_ms(&self) -> u64 {
        self.last_pts_ms.load(Ordering::Relaxed)
    }
}

/// Background thread writing dumped frames, off the video pump.
struct FrameWriter {
    tx: Option<Sender<(PathBuf, VideoFrame)>>,
    failed: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FrameWriter {
    fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<(PathBuf, VideoFrame)>(DUMP_QUEUE);
        let failed = Arc::new(AtomicBool::new(false));
        let failed_thread = failed.clone();
        let join = std::thread::Builder::new()
            .name("frame-dump".to_string())
            .spawn(move || {
                for (path, frame) in rx {
                    if let Err(e) = write_ppm(&path, &frame) {
                        tracing::warn!(path = %path.display(), error = %e, "frame dump failed; disabling");
                        failed_thread.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            failed,
            join: Some(join),
        })
    }

    fn submit(&self, path: PathBuf, frame: &VideoFrame) {
        if self.failed.load(Ordering::Relaxed) {
            return;
        }
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send((path, frame.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full((path, _))) => {
                tracing::debug!(path = %path.display(), "frame writer busy; dump skipped");
            }
            Err(TrySendError::Disconnected(_)) => self.failed.store(true, Ordering::Relaxed),
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        // Closing the channel lets the writer finish the queue and exit.
        self.tx.take();
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!("frame writer panicked");
        }
    }
}

pub struct StatsSink {
    stats: SinkStats,
    every: u64,
    dir: PathBuf,
    writer: Option<FrameWriter>,
}

impl StatsSink {
    pub fn new(dump: Option<DumpConfig>) -> Self {
        let (dir, every) = match &dump {
            Some(d) => (d.dir.clone(), d.every.max(1)),
            None => (PathBuf::new(), 1),
        };
        let writer = dump.and_then(|_| match FrameWriter::spawn() {
            Ok(writer) => Some(writer),
            Err(e) => {
                tracing::warn!(error = %e, "frame writer unavailable; dumps disabled");
                None
            }
        });
        Self {
            stats: SinkStats::default(),
            every,
            dir,
            writer,
        }
    }

    pub fn stats(&self) -> SinkStats {
        self.stats.clone()
    }

    fn maybe_dump(&self, index: u64, frame: &VideoFrame) {
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        if index % self.every == 0 {
            writer.submit(frame_path(&self.dir, index), frame);
        }
    }
}

impl VideoSink for StatsSink {
    fn present(&mut self, frame: &VideoFrame) {
        let index = self.stats.presented.fetch_add(1, Ordering::Relaxed);
        let pts_ms = (frame.pts.max(0.0) * 1000.0).round() as u64;
        self.stats.last_pts_ms.store(pts_ms, Ordering::Relaxed);
        tracing::trace!(index, pts = frame.pts, "frame presented");
        self.maybe_dump(index, frame);
    }
}

fn frame_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("frame-{index:06}.ppm"))
}

fn write_ppm(path: &Path, frame: &VideoFrame) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    encode_ppm(&mut out, frame)?;
    out.flush()
}

/// Binary PPM (P6) of an RGB24 frame, dropping any row padding.
fn encode_ppm(out: &mut impl Write, frame: &VideoFrame) -> std::io::Result<()> {
    write!(out, "P6\n{} {}\n255\n", frame.width, frame.height)?;
    let row = frame.width as usize * 3;
    for line in frame.data.chunks(frame.stride).take(frame.height as usize) {
        out.write_all(&line[..row.min(line.len())])?;
    }
    Ok(())
}
