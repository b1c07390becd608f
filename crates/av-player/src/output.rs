//! CPAL audio output.
//!
//! Builds the device stream whose real-time callback pulls s16 bytes from the
//! audio pipeline. The callback:
//! - pulls exactly one device buffer worth of frames, never blocking (the
//!   pipeline already produces them at the device rate)
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `i16` samples to the device sample format

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device;
use crate::error::PlayerError;
use crate::pipeline::AudioPull;
use crate::resample::BYTES_PER_SAMPLE;
use crate::source::{AudioOutput, AudioOutputFactory, AudioStreamState};

/// Opens CPAL output streams on a chosen device.
#[derive(Clone, Debug, Default)]
pub struct CpalOutputFactory {
    /// Substring of the device name; `None` uses the host default.
    pub device_name: Option<String>,
    /// Requested device buffer size in frames.
    pub buffer_frames: u32,
}

impl CpalOutputFactory {
    pub fn new(device_name: Option<String>, buffer_frames: u32) -> Self {
        Self {
            device_name,
            buffer_frames,
        }
    }

    fn build(&self, stream: &AudioStreamState, pull: AudioPull) -> anyhow::Result<CpalOutput> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, self.device_name.as_deref())?;
        let device_name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        let supported = device::pick_output_config(&device, stream.sample_rate, stream.channels)?;
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.config();
        if let Some(size) = device::pick_buffer_size(&supported, self.buffer_frames) {
            config.buffer_size = size;
        }
        if config.sample_rate != stream.sample_rate {
            tracing::info!(
                source_rate = stream.sample_rate,
                device_rate = config.sample_rate,
                "device cannot run at the source rate; audio will be resampled"
            );
        }

        tracing::info!(
            device = %device_name,
            sample_rate = config.sample_rate,
            channels = config.channels,
            format = ?sample_format,
            buffer = ?config.buffer_size,
            "audio output opened"
        );

        let src_channels = usize::from(stream.channels.max(1));
        let sample_rate = config.sample_rate;
        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, src_channels, pull),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, src_channels, pull),
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, src_channels, pull),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, src_channels, pull),
            other => Err(anyhow!("Unsupported sample format: {other:?}")),
        }?;
        // Streams may start running on creation; the controller resumes explicitly.
        stream.pause()?;
        Ok(CpalOutput {
            stream,
            sample_rate,
        })
    }
}

impl AudioOutputFactory for CpalOutputFactory {
    fn open(
        &mut self,
        stream: &AudioStreamState,
        pull: AudioPull,
    ) -> Result<Box<dyn AudioOutput>, PlayerError> {
        let output = self
            .build(stream, pull)
            .map_err(|e| PlayerError::Output(format!("{e:#}")))?;
        Ok(Box::new(output))
    }
}

/// Running CPAL stream; dropping it closes the device.
pub struct CpalOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}

impl AudioOutput for CpalOutput {
    fn resume(&mut self) -> Result<(), PlayerError> {
        self.stream
            .play()
            .map_err(|e| PlayerError::Output(e.to_string()))
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        self.stream
            .pause()
            .map_err(|e| PlayerError::Output(e.to_string()))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    src_channels: usize,
    pull: AudioPull,
) -> anyhow::Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = usize::from(config.channels.max(1));
    let mut scratch: Vec<u8> = Vec::new();
    let mut frame: Vec<i16> = vec![0; src_channels];

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            let bytes = frames * src_channels * BYTES_PER_SAMPLE;
            if scratch.len() < bytes {
                scratch.resize(bytes, 0);
            }
            pull.pull(&mut scratch[..bytes]);

            for (i, out) in data.chunks_exact_mut(channels_out).enumerate() {
                let base = i * src_channels * BYTES_PER_SAMPLE;
                for (ch, s) in frame.iter_mut().enumerate() {
                    let at = base + ch * BYTES_PER_SAMPLE;
                    *s = i16::from_ne_bytes([scratch[at], scratch[at + 1]]);
                }
                for (ch, dst) in out.iter_mut().enumerate() {
                    *dst = T::from_sample(map_channel(&frame, channels_out, ch));
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Output sample for `dst_ch` of a `dst_channels` frame from one source frame.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to the available source channels
fn map_channel(src: &[i16], dst_channels: usize, dst_ch: usize) -> i16 {
    let Some(last) = src.len().checked_sub(1) else {
        return 0;
    };
    match (src.len(), dst_channels) {
        (2, 1) => ((i32::from(src[0]) + i32::from(src[1])) / 2) as i16,
        _ => src[dst_ch.min(last)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_is_duplicated_to_stereo() {
        assert_eq!(map_channel(&[1200], 2, 0), 1200);
        assert_eq!(map_channel(&[1200], 2, 1), 1200);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        assert_eq!(map_channel(&[1000, -3000], 1, 0), -1000);
        assert_eq!(map_channel(&[i16::MAX, i16::MAX], 1, 0), i16::MAX);
    }

    #[test]
    fn wider_output_clamps_to_last_source_channel() {
        let src = [1, 2];
        assert_eq!(map_channel(&src, 2, 1), 2);
        assert_eq!(map_channel(&src, 6, 5), 2);
        assert_eq!(map_channel(&[], 2, 0), 0);
    }
}
