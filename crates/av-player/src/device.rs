//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config that runs at the source's native rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config for a source of `rate` Hz and `channels` channels.
///
/// Configs that can run at exactly `rate` win, then matching channel counts, then
/// the sample format rank. When no range covers `rate`, the closest rate is used
/// and the caller should expect pitch drift.
pub fn pick_output_config(
    device: &cpal::Device,
    rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let chosen = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), rate);
        let candidate = Candidate {
            exact_rate: chosen == rate,
            rate_distance: chosen.abs_diff(rate),
            channel_match: range.channels() == channels,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.beats(b)) {
            best = Some((candidate, range.with_sample_rate(chosen)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Fixed buffer size nearest to `preferred_frames` within what the device allows.
///
/// Returns `None` when the device only reports its default buffer size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    preferred_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => Some(cpal::BufferSize::Fixed(
            clamp_buffer_frames(*min, *max, preferred_frames),
        )),
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the host's output devices, in host order.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.name().to_string());
    }
    Ok(names)
}

/// Names of the default host's output devices.
pub fn list_default_devices() -> Result<Vec<String>> {
    list_devices(&cpal::default_host())
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    exact_rate: bool,
    rate_distance: u32,
    channel_match: bool,
    format_rank: u8,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.exact_rate != other.exact_rate {
            return self.exact_rate;
        }
        if self.rate_distance != other.rate_distance {
            return self.rate_distance < other.rate_distance;
        }
        if self.channel_match != other.channel_match {
            return self.channel_match;
        }
        self.format_rank < other.format_rank
    }
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn clamp_buffer_frames(min: u32, max: u32, preferred: u32) -> u32 {
    preferred.clamp(min, max.max(min))
}

/// The pipeline produces s16, so integer formats of at least 16 bits rank first.
fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

pub(crate) fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
