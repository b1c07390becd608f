//! Audio demux/decode through Symphonia.
//!
//! Probes the container, exposes its audio tracks and decodes packets into
//! interleaved `f32`. Symphonia has no video codecs, so video tracks are listed as
//! [`StreamParams::Other`].

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::PlayerError;
use crate::source::{
    AudioDecoder, AudioFrame, AudioStreamState, DecodeStatus, Demuxer, MediaBackend, MediaKind,
    Packet, StreamInfo, StreamParams, VideoDecoder,
};

/// Backend decoding audio only.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaBackend;

impl SymphoniaBackend {
    pub fn open_demuxer(&self, path: &Path) -> Result<SymphoniaDemuxer, PlayerError> {
        SymphoniaDemuxer::open(path)
    }
}

impl MediaBackend for SymphoniaBackend {
    fn open_audio(&self, path: &Path) -> Result<Box<dyn Demuxer + Send>, PlayerError> {
        Ok(Box::new(self.open_demuxer(path)?))
    }

    fn open_video(&self, path: &Path) -> Result<Box<dyn Demuxer>, PlayerError> {
        Ok(Box::new(self.open_demuxer(path)?))
    }
}

struct Track {
    id: u32,
    time_base: Option<TimeBase>,
    params: CodecParameters,
}

/// Probed container.
pub struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    tracks: Vec<Track>,
    streams: Vec<StreamInfo>,
    default_track: Option<u32>,
    duration: Option<f64>,
}

impl SymphoniaDemuxer {
    pub fn open(path: &Path) -> Result<Self, PlayerError> {
        let file = File::open(path).map_err(|e| PlayerError::source_open(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlayerError::source_open(path, e))?;
        let format = probed.format;

        let tracks: Vec<Track> = format
            .tracks()
            .iter()
            .map(|t| Track {
                id: t.id,
                time_base: t.codec_params.time_base,
                params: t.codec_params.clone(),
            })
            .collect();
        let streams = tracks
            .iter()
            .enumerate()
            .map(|(index, t)| stream_info(index, &t.params))
            .collect();
        let default_track = format.default_track().map(|t| t.id);
        let duration = default_track
            .and_then(|id| tracks.iter().find(|t| t.id == id))
            .and_then(|t| duration_secs_from_codec_params(&t.params));

        tracing::debug!(path = %path.display(), tracks = tracks.len(), "container probed");

        Ok(Self {
            format,
            tracks,
            streams,
            default_track,
            duration,
        })
    }

    fn index_of_track(&self, id: u32) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }
}

fn stream_info(index: usize, params: &CodecParameters) -> StreamInfo {
    let codec = codec_name_from_params(params).unwrap_or_else(|| "unknown".to_string());
    let audio = match (params.sample_rate, params.channels) {
        (Some(rate), Some(channels)) if rate > 0 && channels.count() > 0 => {
            Some(AudioStreamState {
                sample_rate: rate,
                channels: channels.count() as u16,
                sample_format: sample_format_label(params),
                channel_layout: Some(channels.bits() as u64),
            })
        }
        _ => None,
    };
    StreamInfo {
        index,
        codec,
        params: audio.map(StreamParams::Audio).unwrap_or(StreamParams::Other),
    }
}

fn ts_to_secs(time_base: Option<TimeBase>, sample_rate: Option<u32>, ts: u64) -> Option<f64> {
    match (time_base, sample_rate) {
        (Some(tb), _) => {
            let t = tb.calc_time(ts);
            Some(t.seconds as f64 + t.frac)
        }
        (None, Some(rate)) if rate > 0 => Some(ts as f64 / rate as f64),
        _ => None,
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn best_stream(&self, kind: MediaKind) -> Option<StreamInfo> {
        if kind != MediaKind::Audio {
            return None;
        }
        let preferred = self
            .default_track
            .and_then(|id| self.index_of_track(id))
            .and_then(|i| self.streams.get(i))
            .filter(|s| s.kind() == Some(MediaKind::Audio));
        preferred
            .or_else(|| self.streams.iter().find(|s| s.kind() == Some(kind)))
            .cloned()
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, PlayerError> {
        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(PlayerError::Decode(format!("read packet: {e}"))),
        };
        let Some(stream_index) = self.index_of_track(packet.track_id()) else {
            return Err(PlayerError::Decode(format!(
                "packet for unknown track {}",
                packet.track_id()
            )));
        };
        let track = &self.tracks[stream_index];
        let ts = packet.ts();
        Ok(Some(Packet {
            stream_index,
            pts: ts_to_secs(track.time_base, track.params.sample_rate, ts),
            timestamp: i64::try_from(ts).ok(),
            dts: None,
            duration: packet.dur(),
            keyframe: true,
            data: packet.data,
        }))
    }

    fn seek(&mut self, stream: usize, secs: f64) -> Result<(), PlayerError> {
        let track_id = self.tracks.get(stream).map(|t| t.id);
        let secs = secs.max(0.0);
        let time = Time::new(secs.trunc() as u64, secs.fract());
        self.format
            .seek(SeekMode::Accurate, SeekTo::Time { time, track_id })
            .map_err(|e| PlayerError::Seek {
                target_ms: (secs * 1000.0) as u64,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn open_audio_decoder(
        &self,
        stream: &StreamInfo,
    ) -> Result<Box<dyn AudioDecoder + Send>, PlayerError> {
        let track = self
            .tracks
            .get(stream.index)
            .ok_or(PlayerError::StreamNotFound { kind: "audio" })?;
        let decoder = symphonia::default::get_codecs()
            .make(&track.params, &DecoderOptions::default())
            .map_err(|e| PlayerError::DecoderInit(e.to_string()))?;
        Ok(Box::new(SymphoniaAudioDecoder {
            decoder,
            track_id: track.id,
            time_base: track.time_base,
            sample_rate: track.params.sample_rate,
            ready: None,
            eof: false,
        }))
    }

    fn open_video_decoder(&self, _stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, PlayerError> {
        Err(PlayerError::DecoderInit(
            "symphonia does not decode video".to_string(),
        ))
    }
}

struct SymphoniaAudioDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: Option<u32>,
    /// Symphonia decodes one packet into one buffer; it waits here until received.
    ready: Option<AudioFrame>,
    eof: bool,
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), PlayerError> {
        let ts = packet.timestamp.and_then(|t| u64::try_from(t).ok()).unwrap_or(0);
        let sym_packet = symphonia::core::formats::Packet::new_from_boxed_slice(
            self.track_id,
            ts,
            packet.duration,
            packet.data.clone(),
        );
        let decoded = match self.decoder.decode(&sym_packet) {
            Ok(d) => d,
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Err(PlayerError::Decode("decoder reset required".into()));
            }
            Err(e) => return Err(PlayerError::Decode(e.to_string())),
        };
        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        self.ready = Some(AudioFrame {
            pts: packet
                .pts
                .or_else(|| ts_to_secs(self.time_base, self.sample_rate, ts)),
            channels,
            samples: sample_buf.samples().to_vec(),
        });
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), PlayerError> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus<AudioFrame>, PlayerError> {
        if let Some(frame) = self.ready.take() {
            return Ok(DecodeStatus::Frame(frame));
        }
        Ok(if self.eof {
            DecodeStatus::Drained
        } else {
            DecodeStatus::Again
        })
    }

    fn flush(&mut self) {
        self.decoder.reset();
        self.ready = None;
        self.eof = false;
    }
}

/// Best-effort duration in seconds from codec metadata.
fn duration_secs_from_codec_params(params: &CodecParameters) -> Option<f64> {
    let frames = params.n_frames?;
    match (params.time_base, params.sample_rate) {
        (Some(tb), _) => {
            let t = tb.calc_time(frames);
            Some(t.seconds as f64 + t.frac)
        }
        (None, Some(rate)) if rate > 0 => Some(frames as f64 / rate as f64),
        _ => None,
    }
}

/// Best-effort codec label.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

fn sample_format_label(params: &CodecParameters) -> String {
    if let Some(fmt) = params.sample_format {
        return format!("{fmt:?}").to_lowercase();
    }
    match params.bits_per_sample.or(params.bits_per_coded_sample) {
        Some(bits) => format!("s{bits}"),
        None => "unknown".to_string(),
    }
}
