//! Video demux/decode through the system FFmpeg libraries.
//!
//! Decoded frames stay in the codec's pixel format until the pump asks for one to
//! be presented; only then are they scaled into packed RGB24.

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type as FfmpegMediaType;
use ffmpeg::software::scaling::{Context as ScalerContext, Flags as ScalerFlags};
use ffmpeg::Rational;

use crate::error::PlayerError;
use crate::source::{
    AudioDecoder, DecodeStatus, Demuxer, MediaBackend, Packet, StreamInfo, StreamParams,
    VideoDecoder, VideoFrame, VideoStreamState,
};

/// Backend decoding video only.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn open_demuxer(&self, path: &Path) -> Result<FfmpegDemuxer, PlayerError> {
        FfmpegDemuxer::open(path)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_audio(&self, _path: &Path) -> Result<Box<dyn Demuxer + Send>, PlayerError> {
        Err(PlayerError::DecoderInit(
            "ffmpeg backend only decodes video".to_string(),
        ))
    }

    fn open_video(&self, path: &Path) -> Result<Box<dyn Demuxer>, PlayerError> {
        Ok(Box::new(self.open_demuxer(path)?))
    }
}

fn rational_secs(r: Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        f64::from(r.numerator()) / f64::from(r.denominator())
    }
}

pub struct FfmpegDemuxer {
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamInfo>,
    time_bases: Vec<f64>,
    duration: Option<f64>,
}

impl FfmpegDemuxer {
    pub fn open(path: &Path) -> Result<Self, PlayerError> {
        ffmpeg::init().map_err(|e| PlayerError::DecoderInit(format!("ffmpeg init: {e}")))?;
        let input = ffmpeg::format::input(&path).map_err(|e| PlayerError::source_open(path, e))?;

        let mut streams = Vec::new();
        let mut time_bases = Vec::new();
        for stream in input.streams() {
            let params = stream.parameters();
            let codec = params.id().name().to_string();
            let kind = match params.medium() {
                FfmpegMediaType::Video => video_state(&stream),
                _ => StreamParams::Other,
            };
            streams.push(StreamInfo {
                index: stream.index(),
                codec,
                params: kind,
            });
            time_bases.push(rational_secs(stream.time_base()));
        }

        let duration = match input.duration() {
            d if d > 0 => Some(d as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)),
            _ => None,
        };

        tracing::debug!(
            path = %path.display(),
            streams = streams.len(),
            duration = ?duration,
            "container opened"
        );

        Ok(Self {
            input,
            streams,
            time_bases,
            duration,
        })
    }
}

fn video_state(stream: &ffmpeg::format::stream::Stream) -> StreamParams {
    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().video());
    let Ok(decoder) = decoder else {
        return StreamParams::Other;
    };
    let rate = stream.avg_frame_rate();
    let avg_frame_rate = (rate.denominator() != 0 && rate.numerator() > 0).then(|| rational_secs(rate));
    StreamParams::Video(VideoStreamState {
        width: decoder.width(),
        height: decoder.height(),
        avg_frame_rate,
        pixel_format: format!("{:?}", decoder.format()).to_lowercase(),
    })
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, PlayerError> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) => return Err(PlayerError::Decode(format!("read packet: {e}"))),
        }
        let stream_index = packet.stream();
        let time_base = self.time_bases.get(stream_index).copied().unwrap_or(0.0);
        Ok(Some(Packet {
            stream_index,
            pts: packet.pts().map(|ts| ts as f64 * time_base),
            timestamp: packet.pts(),
            dts: packet.dts(),
            duration: u64::try_from(packet.duration()).unwrap_or(0),
            keyframe: packet.is_key(),
            data: packet.data().map(Box::from).unwrap_or_default(),
        }))
    }

    fn seek(&mut self, _stream: usize, secs: f64) -> Result<(), PlayerError> {
        let ts = (secs.max(0.0) * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        self.input.seek(ts, ..ts).map_err(|e| PlayerError::Seek {
            target_ms: (secs.max(0.0) * 1000.0) as u64,
            reason: e.to_string(),
        })
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn open_audio_decoder(
        &self,
        _stream: &StreamInfo,
    ) -> Result<Box<dyn AudioDecoder + Send>, PlayerError> {
        Err(PlayerError::DecoderInit(
            "ffmpeg backend only decodes video".to_string(),
        ))
    }

    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, PlayerError> {
        let st = self
            .input
            .stream(stream.index)
            .ok_or(PlayerError::StreamNotFound { kind: "video" })?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(st.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| PlayerError::DecoderInit(format!("video decoder: {e}")))?;
        Ok(Box::new(FfmpegVideoDecoder {
            scaler: None,
            rgb: ffmpeg::frame::Video::empty(),
            decoded: ffmpeg::frame::Video::empty(),
            decoder,
            time_base: rational_secs(st.time_base()),
        }))
    }
}

/// Fields drop in declaration order: scaler and frames go before the codec.
struct FfmpegVideoDecoder {
    scaler: Option<ScalerContext>,
    rgb: ffmpeg::frame::Video,
    decoded: ffmpeg::frame::Video,
    decoder: ffmpeg::decoder::Video,
    time_base: f64,
}

impl FfmpegVideoDecoder {
    fn ensure_scaler(&mut self) -> Result<(), PlayerError> {
        let (fmt, w, h) = (
            self.decoded.format(),
            self.decoded.width(),
            self.decoded.height(),
        );
        let stale = self.scaler.as_ref().is_none_or(|s| {
            let input = s.input();
            input.format != fmt || input.width != w || input.height != h
        });
        if stale {
            let scaler = ScalerContext::get(fmt, w, h, Pixel::RGB24, w, h, ScalerFlags::BILINEAR)
                .map_err(|e| PlayerError::Decode(format!("scaler: {e}")))?;
            self.scaler = Some(scaler);
        }
        Ok(())
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), PlayerError> {
        let mut pkt = ffmpeg::Packet::copy(&packet.data);
        pkt.set_pts(packet.timestamp);
        pkt.set_dts(packet.dts);
        self.decoder
            .send_packet(&pkt)
            .map_err(|e| PlayerError::Decode(format!("send packet: {e}")))
    }

    fn send_eof(&mut self) -> Result<(), PlayerError> {
        self.decoder
            .send_eof()
            .map_err(|e| PlayerError::Decode(format!("send eof: {e}")))
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus<Option<f64>>, PlayerError> {
        match self.decoder.receive_frame(&mut self.decoded) {
            Ok(()) => {
                let ts = self.decoded.timestamp().or_else(|| self.decoded.pts());
                Ok(DecodeStatus::Frame(ts.map(|t| t as f64 * self.time_base)))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(DecodeStatus::Again)
            }
            Err(ffmpeg::Error::Eof) => Ok(DecodeStatus::Drained),
            Err(e) => Err(PlayerError::Decode(format!("receive frame: {e}"))),
        }
    }

    fn convert_into(&mut self, dst: &mut VideoFrame) -> Result<(), PlayerError> {
        let (w, h) = (self.decoded.width(), self.decoded.height());
        if dst.width != w || dst.height != h {
            let pts = dst.pts;
            *dst = VideoFrame::allocate(w, h)?;
            dst.pts = pts;
        }
        self.ensure_scaler()?;
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(PlayerError::Decode("scaler unavailable".into()));
        };
        scaler
            .run(&self.decoded, &mut self.rgb)
            .map_err(|e| PlayerError::Decode(format!("scale: {e}")))?;

        let src_stride = self.rgb.stride(0);
        let src = self.rgb.data(0);
        let row = dst.stride;
        for (y, out) in dst.data.chunks_exact_mut(row).enumerate() {
            let start = y * src_stride;
            let Some(line) = src.get(start..start + row) else {
                return Err(PlayerError::Decode("short scaled frame".into()));
            };
            out.copy_from_slice(line);
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}
