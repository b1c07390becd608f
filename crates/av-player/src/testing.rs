//! Synthetic media source, sinks and outputs for unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::PlayerError;
use crate::pipeline::AudioPull;
use crate::resample::write_s16;
use crate::source::{
    AudioDecoder, AudioFrame, AudioOutput, AudioOutputFactory, AudioStreamState, DecodeStatus,
    Demuxer, MediaBackend, MediaKind, Packet, StreamInfo, StreamParams, VideoDecoder, VideoFrame,
    VideoSink, VideoStreamState,
};

/// Shape of the generated source.
#[derive(Clone, Debug)]
pub struct FakeSourceSpec {
    pub duration: f64,
    pub fps: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames between keyframes.
    pub keyframe_interval: u64,
    pub audio_packet_frames: u64,
    pub width: u32,
    pub height: u32,
    pub with_audio: bool,
    pub with_video: bool,
    /// When false video packets carry no timestamp.
    pub video_pts: bool,
    /// Audio packet indices whose decode fails.
    pub corrupt_audio_packets: Vec<u64>,
    /// Seeking this stream kind fails.
    pub failing_seek: Option<MediaKind>,
}

impl Default for FakeSourceSpec {
    fn default() -> Self {
        Self {
            duration: 60.0,
            fps: 30.0,
            sample_rate: 48_000,
            channels: 2,
            keyframe_interval: 30,
            audio_packet_frames: 1024,
            width: 8,
            height: 6,
            with_audio: true,
            with_video: true,
            video_pts: true,
            corrupt_audio_packets: Vec::new(),
            failing_seek: None,
        }
    }
}

impl FakeSourceSpec {
    fn video_frames(&self) -> u64 {
        (self.duration * self.fps).round() as u64
    }

    fn audio_frames(&self) -> u64 {
        (self.duration * self.sample_rate as f64).round() as u64
    }

    fn audio_packets(&self) -> u64 {
        self.audio_frames().div_ceil(self.audio_packet_frames)
    }

    fn audio_packet_time(&self, idx: u64) -> f64 {
        (idx * self.audio_packet_frames) as f64 / self.sample_rate as f64
    }

    fn keyframe_at_or_before(&self, secs: f64) -> u64 {
        let frame = (secs * self.fps + 1e-9).floor().max(0.0) as u64;
        let last = self.video_frames().saturating_sub(1);
        frame.min(last) / self.keyframe_interval * self.keyframe_interval
    }

    fn streams(&self) -> Vec<StreamInfo> {
        let mut out = Vec::new();
        if self.with_video {
            out.push(StreamInfo {
                index: out.len(),
                codec: "fake-video".into(),
                params: StreamParams::Video(VideoStreamState {
                    width: self.width,
                    height: self.height,
                    avg_frame_rate: Some(self.fps),
                    pixel_format: "yuv420p".into(),
                }),
            });
        }
        if self.with_audio {
            out.push(StreamInfo {
                index: out.len(),
                codec: "fake-audio".into(),
                params: StreamParams::Audio(AudioStreamState {
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    sample_format: "f32".into(),
                    channel_layout: None,
                }),
            });
        }
        out
    }
}

/// Deterministic sample value for `frame` on `channel`.
pub fn fake_sample(frame: u64, channel: usize) -> f32 {
    let v = ((frame % 100) as f32 / 100.0 - 0.5) * 0.8;
    if channel % 2 == 0 { v } else { -v }
}

/// s16 bytes the fake source produces for its first `samples` interleaved samples.
pub fn expected_s16_bytes(samples: usize, channels: usize) -> Vec<u8> {
    let floats: Vec<f32> = (0..samples)
        .map(|i| fake_sample((i / channels) as u64, i % channels))
        .collect();
    let mut out = vec![0u8; samples * 2];
    write_s16(&floats, &mut out);
    out
}

pub struct FakeBackend {
    spec: FakeSourceSpec,
}

impl FakeBackend {
    pub fn new(spec: FakeSourceSpec) -> Self {
        Self { spec }
    }

    fn demuxer(&self, path: &Path) -> Result<FakeDemuxer, PlayerError> {
        let missing = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("missing"))
            .unwrap_or(true);
        if missing {
            return Err(PlayerError::source_open(path, "no such file"));
        }
        Ok(FakeDemuxer {
            streams: self.spec.streams(),
            spec: self.spec.clone(),
            next_video: 0,
            next_audio: 0,
        })
    }
}

impl MediaBackend for FakeBackend {
    fn open_audio(&self, path: &Path) -> Result<Box<dyn Demuxer + Send>, PlayerError> {
        Ok(Box::new(self.demuxer(path)?))
    }

    fn open_video(&self, path: &Path) -> Result<Box<dyn Demuxer>, PlayerError> {
        Ok(Box::new(self.demuxer(path)?))
    }
}

struct FakeDemuxer {
    spec: FakeSourceSpec,
    streams: Vec<StreamInfo>,
    next_video: u64,
    next_audio: u64,
}

impl FakeDemuxer {
    fn index_of(&self, audio: bool) -> Option<usize> {
        self.streams
            .iter()
            .find(|s| matches!(s.params, StreamParams::Audio(_)) == audio)
            .map(|s| s.index)
    }
}

fn encode_index(idx: u64) -> Box<[u8]> {
    idx.to_le_bytes().to_vec().into_boxed_slice()
}

fn decode_index(packet: &Packet) -> Result<u64, PlayerError> {
    let bytes: [u8; 8] = packet
        .data
        .as_ref()
        .try_into()
        .map_err(|_| PlayerError::Decode("short packet".into()))?;
    Ok(u64::from_le_bytes(bytes))
}

impl Demuxer for FakeDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, PlayerError> {
        let spec = &self.spec;
        let video = self
            .index_of(false)
            .filter(|_| self.next_video < spec.video_frames())
            .map(|i| (i, self.next_video as f64 / spec.fps));
        let audio = self
            .index_of(true)
            .filter(|_| self.next_audio < spec.audio_packets())
            .map(|i| (i, spec.audio_packet_time(self.next_audio)));

        let take_video = match (video, audio) {
            (None, None) => return Ok(None),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some((_, vt)), Some((_, at))) => vt <= at,
        };

        if take_video {
            let (stream_index, t) = video.ok_or(PlayerError::Decode("no video".into()))?;
            let idx = self.next_video;
            self.next_video += 1;
            Ok(Some(Packet {
                stream_index,
                pts: spec.video_pts.then_some(t),
                timestamp: Some(idx as i64),
                dts: Some(idx as i64),
                duration: 1,
                keyframe: idx % spec.keyframe_interval == 0,
                data: encode_index(idx),
            }))
        } else {
            let (stream_index, t) = audio.ok_or(PlayerError::Decode("no audio".into()))?;
            let idx = self.next_audio;
            self.next_audio += 1;
            Ok(Some(Packet {
                stream_index,
                pts: Some(t),
                timestamp: Some((idx * spec.audio_packet_frames) as i64),
                dts: None,
                duration: spec.audio_packet_frames,
                keyframe: true,
                data: encode_index(idx),
            }))
        }
    }

    fn seek(&mut self, stream: usize, secs: f64) -> Result<(), PlayerError> {
        let secs = secs.max(0.0);
        let spec = &self.spec;
        let kind = if Some(stream) == self.index_of(true) {
            MediaKind::Audio
        } else {
            MediaKind::Video
        };
        if spec.failing_seek == Some(kind) {
            return Err(PlayerError::Seek {
                target_ms: (secs * 1000.0) as u64,
                reason: "stream is not seekable".into(),
            });
        }
        if Some(stream) == self.index_of(false) {
            let kf = spec.keyframe_at_or_before(secs);
            self.next_video = kf;
            let kf_time = kf as f64 / spec.fps;
            self.next_audio =
                (kf_time * spec.sample_rate as f64 / spec.audio_packet_frames as f64) as u64;
        } else if Some(stream) == self.index_of(true) {
            let pkt = (secs * spec.sample_rate as f64 / spec.audio_packet_frames as f64) as u64;
            self.next_audio = pkt.min(spec.audio_packets().saturating_sub(1));
            self.next_video = spec.keyframe_at_or_before(secs);
        } else {
            return Err(PlayerError::Seek {
                target_ms: (secs * 1000.0) as u64,
                reason: format!("unknown stream {stream}"),
            });
        }
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        Some(self.spec.duration)
    }

    fn open_audio_decoder(
        &self,
        stream: &StreamInfo,
    ) -> Result<Box<dyn AudioDecoder + Send>, PlayerError> {
        if stream.audio().is_none() {
            return Err(PlayerError::DecoderInit("not an audio stream".into()));
        }
        Ok(Box::new(FakeAudioDecoder {
            spec: self.spec.clone(),
            queue: VecDeque::new(),
            eof: false,
        }))
    }

    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, PlayerError> {
        if stream.video().is_none() {
            return Err(PlayerError::DecoderInit("not a video stream".into()));
        }
        Ok(Box::new(FakeVideoDecoder {
            width: self.spec.width,
            height: self.spec.height,
            queue: VecDeque::new(),
            slot: None,
            eof: false,
        }))
    }
}

struct FakeAudioDecoder {
    spec: FakeSourceSpec,
    queue: VecDeque<u64>,
    eof: bool,
}

impl AudioDecoder for FakeAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), PlayerError> {
        let idx = decode_index(packet)?;
        if self.spec.corrupt_audio_packets.contains(&idx) {
            return Err(PlayerError::Decode(format!("corrupt audio packet {idx}")));
        }
        self.queue.push_back(idx);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), PlayerError> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus<AudioFrame>, PlayerError> {
        let Some(idx) = self.queue.pop_front() else {
            return Ok(if self.eof {
                DecodeStatus::Drained
            } else {
                DecodeStatus::Again
            });
        };
        let channels = self.spec.channels as usize;
        let start = idx * self.spec.audio_packet_frames;
        let end = (start + self.spec.audio_packet_frames).min(self.spec.audio_frames());
        let mut samples = Vec::with_capacity((end - start) as usize * channels);
        for frame in start..end {
            for ch in 0..channels {
                samples.push(fake_sample(frame, ch));
            }
        }
        Ok(DecodeStatus::Frame(AudioFrame {
            pts: Some(self.spec.audio_packet_time(idx)),
            channels,
            samples,
        }))
    }

    fn flush(&mut self) {
        self.queue.clear();
        self.eof = false;
    }
}

/// Video decoder with one frame of reorder delay.
struct FakeVideoDecoder {
    width: u32,
    height: u32,
    queue: VecDeque<(u64, Option<f64>)>,
    slot: Option<u64>,
    eof: bool,
}

impl VideoDecoder for FakeVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), PlayerError> {
        let idx = decode_index(packet)?;
        self.queue.push_back((idx, packet.pts));
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), PlayerError> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus<Option<f64>>, PlayerError> {
        if self.queue.len() > 1 || (self.eof && !self.queue.is_empty()) {
            if let Some((idx, pts)) = self.queue.pop_front() {
                self.slot = Some(idx);
                return Ok(DecodeStatus::Frame(pts));
            }
        }
        Ok(if self.eof {
            DecodeStatus::Drained
        } else {
            DecodeStatus::Again
        })
    }

    fn convert_into(&mut self, dst: &mut VideoFrame) -> Result<(), PlayerError> {
        let idx = self
            .slot
            .ok_or_else(|| PlayerError::Decode("no decoded frame".into()))?;
        if dst.width != self.width || dst.height != self.height {
            return Err(PlayerError::Decode("frame size mismatch".into()));
        }
        dst.data.fill((idx % 251) as u8);
        Ok(())
    }

    fn flush(&mut self) {
        self.queue.clear();
        self.slot = None;
        self.eof = false;
    }
}

/// Sink remembering every presented frame.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<VideoFrame>>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<VideoFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn probe(&self) -> SinkProbe {
        SinkProbe {
            frames: self.frames.clone(),
        }
    }
}

impl VideoSink for RecordingSink {
    fn present(&mut self, frame: &VideoFrame) {
        self.frames.lock().unwrap().push(frame.clone());
    }
}

/// Read side of a [`RecordingSink`] handed to a controller.
pub struct SinkProbe {
    frames: Arc<Mutex<Vec<VideoFrame>>>,
}

impl SinkProbe {
    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn pts(&self) -> Vec<f64> {
        self.frames.lock().unwrap().iter().map(|f| f.pts).collect()
    }
}

#[derive(Default)]
struct OutputFlags {
    opened: AtomicBool,
    running: AtomicBool,
    dropped: AtomicBool,
    pull: Mutex<Option<AudioPull>>,
}

/// Audio output factory whose devices are driven by the test.
#[derive(Default)]
pub struct ManualOutputFactory {
    flags: Arc<OutputFlags>,
    /// Device rate; `None` runs at the stream rate.
    rate: Option<u32>,
}

impl ManualOutputFactory {
    pub fn with_rate(rate: u32) -> Self {
        Self {
            rate: Some(rate),
            ..Self::default()
        }
    }

    pub fn probe(&self) -> OutputProbe {
        OutputProbe {
            flags: self.flags.clone(),
        }
    }
}

impl AudioOutputFactory for ManualOutputFactory {
    fn open(
        &mut self,
        stream: &AudioStreamState,
        pull: AudioPull,
    ) -> Result<Box<dyn AudioOutput>, PlayerError> {
        self.flags.opened.store(true, Ordering::SeqCst);
        self.flags.dropped.store(false, Ordering::SeqCst);
        *self.flags.pull.lock().unwrap() = Some(pull);
        Ok(Box::new(ManualOutput {
            flags: self.flags.clone(),
            rate: self.rate.unwrap_or(stream.sample_rate),
        }))
    }
}

struct ManualOutput {
    flags: Arc<OutputFlags>,
    rate: u32,
}

impl AudioOutput for ManualOutput {
    fn resume(&mut self) -> Result<(), PlayerError> {
        self.flags.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        self.flags.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }
}

impl Drop for ManualOutput {
    fn drop(&mut self) {
        self.flags.running.store(false, Ordering::SeqCst);
        self.flags.dropped.store(true, Ordering::SeqCst);
        *self.flags.pull.lock().unwrap() = None;
    }
}

pub struct OutputProbe {
    flags: Arc<OutputFlags>,
}

impl OutputProbe {
    pub fn opened(&self) -> bool {
        self.flags.opened.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> bool {
        self.flags.dropped.load(Ordering::SeqCst)
    }

    /// Pull one device buffer the way the output callback would.
    ///
    /// Returns `false` when no output is open.
    pub fn pull(&self, out: &mut [u8]) -> bool {
        let pull = self.flags.pull.lock().unwrap().clone();
        match pull {
            Some(pull) => {
                pull.pull(out);
                true
            }
            None => false,
        }
    }
}
