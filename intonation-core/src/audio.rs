//! # Audio Capture Module
//!
//! Thin adapter over CPAL (Cross-Platform Audio Library) that plays the role of
//! the engine's external audio source. The engine itself never opens devices;
//! hosts call [`start_audio_capture`] and forward the blocks it produces.
//!
//! ## Features
//! - Default input device with the sample rate closest to 48 kHz
//! - Any channel count, downmixed to mono
//! - Fixed-size blocks delivered over a bounded channel, dropped when full
//! - Device errors returned unchanged to the caller

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::Sender;

/// Preferred capture rate in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Starts audio capture from the default input device.
///
/// # Arguments
/// * `sender` - Channel receiving mono blocks of exactly `block_size` samples
/// * `block_size` - Samples per delivered block (e.g. 4096)
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Running stream handle and its sample rate
/// * `Err(e)` - No device, no float input format, or a stream error
///
/// The stream stops when the returned handle is dropped.
pub fn start_audio_capture(sender: Sender<Vec<f32>>, block_size: usize) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    log::info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let sample_rate = cpal::SampleRate(
        TARGET_SAMPLE_RATE.clamp(supported_config.min_sample_rate().0, supported_config.max_sample_rate().0),
    );
    let config = supported_config.with_sample_rate(sample_rate);
    let channels = config.channels() as usize;
    let sample_rate_val = config.sample_rate().0;
    let config: cpal::StreamConfig = config.into();

    log::info!("Selected input: {} Hz, {} channel(s), {} samples per block", sample_rate_val, channels, block_size);

    let err_fn = |err| log::error!("An error occurred on the audio stream: {}", err);

    // Accumulates mono samples between callbacks.
    let mut pending = Vec::with_capacity(block_size * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if channels <= 1 {
                pending.extend_from_slice(data);
            } else {
                pending.extend(
                    data.chunks_exact(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                );
            }

            while pending.len() >= block_size {
                let block: Vec<f32> = pending.drain(..block_size).collect();
                // Drop the block if the consumer has fallen behind.
                let _ = sender.try_send(block);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate_val))
}

/// Picks the f32 input configuration best suited to `target_rate`.
///
/// Configurations whose range contains the target win, then mono over
/// multi-channel, then the smallest distance to the target.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (distance, c.channels())
        })
}
