//! Media source collaborator: container demux, per-stream decoders and sinks.
//!
//! Backends implement these traits; the pipelines only ever see them. Timestamps
//! cross this boundary in seconds.

use std::path::Path;

use crate::error::PlayerError;

/// Kind of elementary stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn label(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// One compressed packet read from the container.
#[derive(Clone, Debug)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation time in seconds, when the container carries one.
    pub pts: Option<f64>,
    /// Raw presentation timestamp in the stream time base.
    pub timestamp: Option<i64>,
    pub dts: Option<i64>,
    /// Duration in the stream time base.
    pub duration: u64,
    pub keyframe: bool,
    pub data: Box<[u8]>,
}

/// Fixed audio parameters of a source.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioStreamState {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
    pub channel_layout: Option<u64>,
}

/// Fixed video parameters of a source.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoStreamState {
    pub width: u32,
    pub height: u32,
    /// Average frame rate; `None` when the container does not report one.
    pub avg_frame_rate: Option<f64>,
    pub pixel_format: String,
}

impl VideoStreamState {
    /// `1 / avg_frame_rate`, or the fallback rate's interval.
    pub fn frame_interval(&self, fallback_fps: f64) -> f64 {
        match self.avg_frame_rate {
            Some(fps) if fps.is_finite() && fps > 0.0 => 1.0 / fps,
            _ => 1.0 / fallback_fps,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamParams {
    Audio(AudioStreamState),
    Video(VideoStreamState),
    Other,
}

/// Stream entry reported by a demuxer.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub codec: String,
    pub params: StreamParams,
}

impl StreamInfo {
    pub fn kind(&self) -> Option<MediaKind> {
        match self.params {
            StreamParams::Audio(_) => Some(MediaKind::Audio),
            StreamParams::Video(_) => Some(MediaKind::Video),
            StreamParams::Other => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioStreamState> {
        match &self.params {
            StreamParams::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn video(&self) -> Option<&VideoStreamState> {
        match &self.params {
            StreamParams::Video(v) => Some(v),
            _ => None,
        }
    }
}

/// Result of pulling from a decoder.
#[derive(Debug, PartialEq)]
pub enum DecodeStatus<T> {
    Frame(T),
    /// More input is needed.
    Again,
    /// The decoder was sent end-of-stream and has nothing left.
    Drained,
}

/// Decoded interleaved audio.
#[derive(Clone, Debug, Default)]
pub struct AudioFrame {
    pub pts: Option<f64>,
    pub channels: usize,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

/// Packed RGB24 frame ready for presentation.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: usize,
    pub data: Vec<u8>,
    /// Presentation time in seconds after startup compensation.
    pub pts: f64,
}

impl VideoFrame {
    /// Allocate backing storage for a `width` x `height` RGB24 frame.
    pub fn allocate(width: u32, height: u32) -> Result<Self, PlayerError> {
        let stride = (width as usize).checked_mul(3);
        let bytes = stride.and_then(|s| s.checked_mul(height as usize));
        let (Some(stride), Some(bytes)) = (stride, bytes) else {
            return Err(PlayerError::Allocation { bytes: usize::MAX });
        };
        if bytes == 0 {
            return Err(PlayerError::Allocation { bytes });
        }
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| PlayerError::Allocation { bytes })?;
        data.resize(bytes, 0);
        Ok(Self {
            width,
            height,
            stride,
            data,
            pts: 0.0,
        })
    }
}

/// Opens containers by path.
pub trait MediaBackend: Send + Sync {
    /// Demuxer for the audio pipeline; it moves to the audio device thread.
    fn open_audio(&self, path: &Path) -> Result<Box<dyn Demuxer + Send>, PlayerError>;
    /// Demuxer for the video pump.
    fn open_video(&self, path: &Path) -> Result<Box<dyn Demuxer>, PlayerError>;
}

pub trait Demuxer {
    fn streams(&self) -> &[StreamInfo];

    /// Preferred stream of `kind`: the first stream of that kind.
    fn best_stream(&self, kind: MediaKind) -> Option<StreamInfo> {
        self.streams()
            .iter()
            .find(|s| s.kind() == Some(kind))
            .cloned()
    }

    /// Next packet from any stream; `Ok(None)` at end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>, PlayerError>;

    /// Seek so the next packets of `stream` start at the keyframe at or before `secs`.
    fn seek(&mut self, stream: usize, secs: f64) -> Result<(), PlayerError>;

    /// Container duration in seconds.
    fn duration(&self) -> Option<f64>;

    fn open_audio_decoder(
        &self,
        stream: &StreamInfo,
    ) -> Result<Box<dyn AudioDecoder + Send>, PlayerError>;

    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, PlayerError>;
}

pub trait AudioDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), PlayerError>;
    /// Enter draining mode.
    fn send_eof(&mut self) -> Result<(), PlayerError>;
    fn receive_frame(&mut self) -> Result<DecodeStatus<AudioFrame>, PlayerError>;
    /// Drop internal buffers (after a seek or speed change).
    fn flush(&mut self);
}

/// Video decoder holding its most recent frame in decode format.
pub trait VideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), PlayerError>;
    fn send_eof(&mut self) -> Result<(), PlayerError>;
    /// Decode the next frame into the internal slot; yields its timestamp in seconds.
    fn receive_frame(&mut self) -> Result<DecodeStatus<Option<f64>>, PlayerError>;
    /// Convert the slot into `dst` (presentation format).
    fn convert_into(&mut self, dst: &mut VideoFrame) -> Result<(), PlayerError>;
    fn flush(&mut self);
}

/// Displays presentation-format frames.
pub trait VideoSink: Send {
    fn present(&mut self, frame: &VideoFrame);
}

/// Handle on a running audio output device.
pub trait AudioOutput {
    fn resume(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self) -> Result<(), PlayerError>;
    /// Frames per second the device consumes; the pipeline resamples to it.
    fn sample_rate(&self) -> u32;
}

/// Builds audio outputs that repeatedly call [`crate::pipeline::AudioPull::pull`].
pub trait AudioOutputFactory: Send {
    fn open(
        &mut self,
        stream: &AudioStreamState,
        pull: crate::pipeline::AudioPull,
    ) -> Result<Box<dyn AudioOutput>, PlayerError>;
}
