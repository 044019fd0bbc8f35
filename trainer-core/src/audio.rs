//! # Audio Capture Module
//!
//! This module handles real-time microphone capture using CPAL (Cross-Platform Audio Library).
//! It selects an input device and configuration, downmixes to mono and streams
//! blocks of samples to the capture session.
//!
//! ## Features
//! - Automatic audio device selection
//! - Preferred sample rate with fallback to what the device offers
//! - f32, i16 and u16 sample formats
//! - Device errors mapped to the trainer's `AudioError` taxonomy

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, SupportedStreamConfigRange};
use crossbeam_channel::Sender;
use log::{error, info};

use crate::capture::{InputStream, MicrophoneSource};
use crate::error::AudioError;

/// Sample rate requested from the input device when it supports it.
pub const PREFERRED_SAMPLE_RATE: u32 = 44_100;

/// The system's default microphone.
#[derive(Debug, Clone)]
pub struct DeviceMicrophone {
    preferred_rate: u32,
}

impl DeviceMicrophone {
    pub fn new(preferred_rate: u32) -> Self {
        Self { preferred_rate }
    }
}

impl Default for DeviceMicrophone {
    fn default() -> Self {
        Self::new(PREFERRED_SAMPLE_RATE)
    }
}

impl MicrophoneSource for DeviceMicrophone {
    /// Starts audio capture from the default input device.
    ///
    /// This function:
    /// 1. Selects the default audio input device
    /// 2. Picks the configuration closest to the preferred sample rate
    /// 3. Sets up a callback that downmixes each block to mono and sends it
    ///    to `sink`
    /// 4. Forwards stream failures (device unplugged, backend errors) to
    ///    `errors`
    fn open(
        &self,
        sink: Sender<Vec<f32>>,
        errors: Sender<AudioError>,
    ) -> Result<Box<dyn InputStream>, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::HardwareUnavailable("No input device available".into()))?;

        info!(
            "Using audio input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let configs = device
            .supported_input_configs()
            .map_err(|e| AudioError::HardwareUnavailable(e.to_string()))?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, self.preferred_rate)
            .map_err(|e| AudioError::HardwareUnavailable(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        info!("Selected sample rate: {sample_rate} Hz ({channels} channel(s), {sample_format:?})");

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, sink, errors),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, sink, errors),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, sink, errors),
            other => {
                return Err(AudioError::HardwareUnavailable(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        }
        .map_err(classify_build_error)?;

        // Platforms that gate the microphone behind a permission prompt
        // refuse here or when the stream is built.
        stream
            .play()
            .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;

        Ok(Box::new(DeviceInputStream {
            stream,
            sample_rate,
        }))
    }
}

/// A running CPAL input stream; dropping it releases the microphone.
struct DeviceInputStream {
    stream: cpal::Stream,
    sample_rate: u32,
}

impl InputStream for DeviceInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pause(&self) -> Result<(), AudioError> {
        self.stream
            .pause()
            .map_err(|e| AudioError::Stream(e.to_string()))
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))
    }
}

impl Drop for DeviceInputStream {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            error!("Error pausing input stream on release: {e}");
        }
    }
}

fn classify_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::BackendSpecific { err } => {
            AudioError::PermissionDenied(err.description)
        }
        other => AudioError::HardwareUnavailable(other.to_string()),
    }
}

/// Finds the best supported input configuration for the target sample rate.
///
/// Prefers, in order: a range containing the target rate, f32 samples,
/// fewer channels. Ranges that don't contain the target are clamped to
/// their closest rate.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    configs
        .into_iter()
        .min_by_key(|c| {
            let rate = target_rate.clamp(c.min_sample_rate().0, c.max_sample_rate().0);
            let rate_penalty = rate.abs_diff(target_rate);
            let format_penalty = u32::from(c.sample_format() != cpal::SampleFormat::F32);
            (rate_penalty, format_penalty, c.channels())
        })
        .map(|c| {
            let rate = target_rate.clamp(c.min_sample_rate().0, c.max_sample_rate().0);
            c.with_sample_rate(cpal::SampleRate(rate))
        })
        .ok_or_else(|| anyhow!("No supported input configuration found"))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sink: Sender<Vec<f32>>,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let _ = sink.send(downmix(data, channels));
        },
        move |err| {
            error!("An error occurred on the input stream: {err}");
            let _ = errors.send(AudioError::Stream(err.to_string()));
        },
        None,
    )
}

/// Averages interleaved frames down to one channel.
fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let stereo = [0.5_f32, -0.5, 1.0, 0.0];
        assert_eq!(downmix(&stereo, 2), vec![0.0, 0.5]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn downmix_converts_integer_samples() {
        let mono = [i16::MAX, 0];
        let out = downmix(&mono, 1);
        assert!((out[0] - 1.0).abs() < 1e-3);
        assert_eq!(out[1], 0.0);
    }
}
