//! Output device selection for [`crate::playback::CpalAudioSink`].
//!
//! - pick a device (host default, or first name containing a substring)
//! - pick a stream config as close as possible to the track sample rate
//! - pick a fixed buffer size when the device advertises a range

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Device + stream config chosen for one audio track.
pub struct OutputSelection {
    pub device: cpal::Device,
    pub name: String,
    pub config: cpal::StreamConfig,
    pub sample_format: cpal::SampleFormat,
}

/// Resolve the output for a track playing at `track_rate`.
pub fn select_output(
    host: &cpal::Host,
    needle: Option<&str>,
    track_rate: u32,
) -> Result<OutputSelection> {
    let device = pick_device(host, needle)?;
    let name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    let supported = pick_output_config(&device, track_rate)
        .with_context(|| format!("no usable output config on {name}"))?;
    let sample_format = supported.sample_format();
    let mut config = supported.config();
    if let Some(size) = pick_buffer_size(&supported) {
        config.buffer_size = size;
    }
    tracing::info!(
        device = %name,
        rate_hz = config.sample_rate,
        channels = config.channels,
        format = ?sample_format,
        "audio output selected"
    );
    Ok(OutputSelection {
        device,
        name,
        config,
        sample_format,
    })
}

/// First output device whose name contains `needle` (case-insensitive), or the default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };
    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .map(|desc| matches_device_name(&desc.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Prefer a config that can run at `track_rate` exactly (no resampling), then the
/// closest rate above it, then the closest below. Ties go to the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    track_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<((u8, u32, u8), cpal::SupportedStreamConfig)> = None;
    for range in device.supported_output_configs()? {
        if range.channels() == 0 {
            continue;
        }
        let rate = track_rate.clamp(range.min_sample_rate(), range.max_sample_rate());
        let key = rate_rank(rate, track_rate, sample_format_rank(range.sample_format()));
        if best.as_ref().is_none_or(|(b, _)| key < *b) {
            best = Some((key, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Choose a fixed buffer size capped at 16k frames, or `None` for the device default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of every output device on `host`, in host order.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for d in host.output_devices().context("No output devices")? {
        names.push(d.description()?.to_string());
    }
    Ok(names)
}

/// Lower is better: exact match, then above target, then below; then distance; then format.
fn rate_rank(rate: u32, target: u32, format_rank: u8) -> (u8, u32, u8) {
    let side = match rate.cmp(&target) {
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => 2,
    };
    (side, rate.abs_diff(target), format_rank)
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn exact_rate_beats_everything() {
        assert!(rate_rank(44_100, 44_100, 3) < rate_rank(48_000, 44_100, 0));
    }

    #[test]
    fn upsampling_preferred_over_downsampling() {
        assert!(rate_rank(48_000, 44_100, 2) < rate_rank(32_000, 44_100, 0));
        assert!(rate_rank(48_000, 44_100, 0) < rate_rank(96_000, 44_100, 0));
    }

    #[test]
    fn format_breaks_ties() {
        assert!(rate_rank(48_000, 48_000, 0) < rate_rank(48_000, 48_000, 2));
    }
}
