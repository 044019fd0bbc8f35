//! Test doubles for the audio devices.

#![allow(dead_code)]

use crossbeam_channel::Sender;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use trainer_core::AudioError;
use trainer_core::capture::{InputStream, MicrophoneSource};
use trainer_core::synth::{ToneOutput, Voice};

/// What a `RecordingOutput` has been asked to do.
#[derive(Debug, Default, Clone)]
pub struct OutputLog {
    pub started: Vec<Voice>,
    pub active: bool,
    /// Starts issued while another voice was still sounding.
    pub overlaps: usize,
    pub silenced: usize,
}

/// A `ToneOutput` that records calls instead of making sound.
#[derive(Default)]
pub struct RecordingOutput {
    log: Mutex<OutputLog>,
    fail: bool,
    device_failure: Mutex<Option<AudioError>>,
}

impl RecordingOutput {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Simulates the device failing in its audio callback.
    pub fn fail_device(&self, error: AudioError) {
        self.silence();
        *self.device_failure.lock().unwrap() = Some(error);
    }

    pub fn log(&self) -> OutputLog {
        self.log.lock().unwrap().clone()
    }
}

impl ToneOutput for RecordingOutput {
    fn start(&self, voice: Voice) -> Result<(), AudioError> {
        if self.fail {
            return Err(AudioError::HardwareUnavailable("test output".into()));
        }
        let mut log = self.log.lock().unwrap();
        if log.active {
            log.overlaps += 1;
        }
        log.active = true;
        log.started.push(voice);
        Ok(())
    }

    fn silence(&self) {
        let mut log = self.log.lock().unwrap();
        log.active = false;
        log.silenced += 1;
    }

    fn take_failure(&self) -> Option<AudioError> {
        self.device_failure.lock().unwrap().take()
    }
}

pub const MIC_RATE: u32 = 44_100;
const BLOCK_MS: u64 = 10;

/// A microphone that "hears" a steady sine tone.
pub struct SineMicrophone {
    frequency: f32,
    amplitude: f32,
    deny: AtomicBool,
    open_delay: Mutex<Duration>,
    stream_errors: Mutex<Option<Sender<AudioError>>>,
    pub opened: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

impl SineMicrophone {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude,
            deny: AtomicBool::new(false),
            open_delay: Mutex::new(Duration::ZERO),
            stream_errors: Mutex::new(None),
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the next `open` calls fail as if the user refused access.
    pub fn set_denied(&self, denied: bool) {
        self.deny.store(denied, Ordering::SeqCst);
    }

    /// Makes `open` take this long, like a pending permission prompt.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    /// Reports a failure on the currently open stream.
    pub fn fail_stream(&self, error: AudioError) {
        if let Some(errors) = self.stream_errors.lock().unwrap().as_ref() {
            let _ = errors.send(error);
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl MicrophoneSource for SineMicrophone {
    fn open(
        &self,
        sink: Sender<Vec<f32>>,
        errors: Sender<AudioError>,
    ) -> Result<Box<dyn InputStream>, AudioError> {
        let delay = *self.open_delay.lock().unwrap();
        thread::sleep(delay);
        if self.deny.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied("denied by test".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.stream_errors.lock().unwrap() = Some(errors);

        let running = Arc::new(AtomicBool::new(true));
        let paused = Arc::new(AtomicBool::new(false));
        let (frequency, amplitude) = (self.frequency, self.amplitude);
        let block_len = (MIC_RATE as u64 * BLOCK_MS / 1000) as usize;

        let feeder_running = Arc::clone(&running);
        let feeder_paused = Arc::clone(&paused);
        thread::spawn(move || {
            let mut position: u64 = 0;
            while feeder_running.load(Ordering::SeqCst) {
                if !feeder_paused.load(Ordering::SeqCst) {
                    let block: Vec<f32> = (0..block_len)
                        .map(|i| {
                            let t = (position + i as u64) as f32 / MIC_RATE as f32;
                            amplitude * (TAU * frequency * t).sin()
                        })
                        .collect();
                    position += block_len as u64;
                    if sink.send(block).is_err() {
                        break;
                    }
                }
                thread::sleep(Duration::from_millis(BLOCK_MS));
            }
        });

        Ok(Box::new(FakeStream {
            running,
            paused,
            released: Arc::clone(&self.released),
        }))
    }
}

struct FakeStream {
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    released: Arc<AtomicUsize>,
}

impl InputStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        MIC_RATE
    }

    fn pause(&self) -> Result<(), AudioError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
