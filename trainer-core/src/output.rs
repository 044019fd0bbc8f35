//! # Audio Output Module
//!
//! Plays reference tones on the default output device using CPAL. The
//! stream runs for the lifetime of `AudioOutput` and renders whatever
//! `Voice` is currently loaded into its `VoiceSlot`; an empty slot renders
//! silence.

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use log::{error, info};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::AudioError;
use crate::synth::{Oscillator, ToneOutput, Voice};

/// Holds the single oscillator the output stream renders from.
pub struct VoiceSlot {
    sample_rate: u32,
    oscillator: Mutex<Option<Oscillator>>,
    failure: Mutex<Option<AudioError>>,
}

impl VoiceSlot {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            oscillator: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    /// Records a failure of the output stream and stops sounding. Only the
    /// first failure since the last `take_failure` is kept.
    pub fn report_failure(&self, error: AudioError) {
        self.silence();
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    pub fn is_sounding(&self) -> bool {
        self.oscillator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Fills an interleaved buffer, writing the same sample to every
    /// channel of a frame.
    ///
    /// This runs on the audio callback, so it never blocks: if the slot is
    /// being swapped the block is rendered silent.
    pub fn fill<T>(&self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        let mut guard = self.oscillator.try_lock().ok();
        match guard.as_deref_mut().and_then(Option::as_mut) {
            Some(oscillator) => {
                for frame in data.chunks_mut(channels.max(1)) {
                    let value = T::from_sample(oscillator.next_sample());
                    for sample in frame.iter_mut() {
                        *sample = value;
                    }
                }
            }
            None => data.fill(T::EQUILIBRIUM),
        }
    }
}

impl ToneOutput for VoiceSlot {
    fn start(&self, voice: Voice) -> Result<(), AudioError> {
        let oscillator = Oscillator::new(voice, self.sample_rate);
        *self
            .oscillator
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(oscillator);
        Ok(())
    }

    fn silence(&self) {
        self.oscillator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn take_failure(&self) -> Option<AudioError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// The default output device, kept open while the trainer runs.
pub struct AudioOutput {
    _stream: cpal::Stream,
    slot: Arc<VoiceSlot>,
    sample_rate: u32,
}

impl AudioOutput {
    /// Opens the default output device.
    ///
    /// # Returns
    /// * `Err(AudioError::HardwareUnavailable)` when there is no usable
    ///   output device; tone playback should then be disabled.
    pub fn open_default() -> Result<Self, AudioError> {
        Self::open().map_err(|e| {
            error!("Could not open audio output: {e:#}");
            AudioError::HardwareUnavailable(format!("{e:#}"))
        })
    }

    fn open() -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;

        info!("Using audio output device: {}", device.name()?);

        let supported = device.default_output_config()?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.config();
        let slot = Arc::new(VoiceSlot::new(sample_rate));

        let callback_slot = Arc::clone(&slot);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, callback_slot)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, callback_slot)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, callback_slot)?,
            other => return Err(anyhow!("Unsupported output sample format {other:?}")),
        };

        stream.play()?;
        info!("Output stream running at {sample_rate} Hz, {channels} channel(s)");

        Ok(Self {
            _stream: stream,
            slot,
            sample_rate,
        })
    }

    /// The handle `ToneSynth` plays through.
    pub fn tone_output(&self) -> Arc<dyn ToneOutput> {
        Arc::clone(&self.slot) as Arc<dyn ToneOutput>
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    slot: Arc<VoiceSlot>,
) -> anyhow::Result<cpal::Stream>
where
    T: Sample + SizedSample + FromSample<f32>,
{
    let failed_slot = Arc::clone(&slot);
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| slot.fill(data, channels),
        move |err| {
            error!("An error occurred on the output stream: {err}");
            failed_slot.report_failure(AudioError::Stream(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_renders_silence() {
        let slot = VoiceSlot::new(44_100);
        let mut data = vec![1.0_f32; 64];
        slot.fill(&mut data, 2);
        assert!(data.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn loaded_slot_writes_same_sample_to_each_channel() {
        let slot = VoiceSlot::new(44_100);
        slot.start(Voice::steady(440.0, 0.5)).unwrap();
        assert!(slot.is_sounding());

        let mut data = vec![0.0_f32; 2 * 2048];
        slot.fill(&mut data, 2);
        assert!(data.chunks(2).all(|frame| frame[0] == frame[1]));
        assert!(data.iter().any(|&s| s.abs() > 0.1));

        slot.silence();
        assert!(!slot.is_sounding());
        slot.fill(&mut data, 2);
        assert!(data.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn stream_failure_silences_and_is_reported_once() {
        let slot = VoiceSlot::new(44_100);
        assert!(slot.take_failure().is_none());
        slot.start(Voice::steady(440.0, 0.5)).unwrap();

        slot.report_failure(AudioError::Stream("device unplugged".into()));
        slot.report_failure(AudioError::Stream("later".into()));
        assert!(!slot.is_sounding());
        assert_eq!(
            slot.take_failure(),
            Some(AudioError::Stream("device unplugged".into()))
        );
        assert!(slot.take_failure().is_none());
    }

    #[test]
    fn integer_formats_are_converted() {
        let slot = VoiceSlot::new(44_100);
        let mut silent = vec![7_u16; 16];
        slot.fill(&mut silent, 1);
        assert!(silent.iter().all(|&s| s == u16::EQUILIBRIUM));
    }
}
