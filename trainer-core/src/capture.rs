//! # Capture Session Module
//!
//! Bridges the microphone to the pitch estimator on a fixed cadence.
//!
//! ## Architecture
//! - **Owner thread**: `CaptureSession` methods (`start`, `pause`,
//!   `resume`, `clear`, `stop`) called from the UI.
//! - **Capture thread**: opens the microphone, owns the input stream and
//!   runs the analysis ticker. Dropping the stream on exit releases the
//!   hardware.
//! - **Communication**: crossbeam channels for raw audio, commands and
//!   estimates; a mutex-guarded `Shared` block for duration, status, the
//!   latest estimate and the recorded samples.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::TrainerConfig;
use crate::error::AudioError;
use crate::{PitchEstimate, pitch};

/// Estimates buffered for a consumer that falls behind; older ones are
/// dropped rather than blocking the capture thread.
const ESTIMATE_QUEUE: usize = 64;

/// A microphone that can be opened on demand.
///
/// `open` is called on the capture thread and may block (for example on a
/// permission prompt). Mono blocks of f32 samples in [-1, 1] must be sent
/// to `sink` until the returned stream is dropped. A failure of the running
/// stream is reported once on `errors`; the recording then stops.
pub trait MicrophoneSource: Send + Sync {
    fn open(
        &self,
        sink: Sender<Vec<f32>>,
        errors: Sender<AudioError>,
    ) -> Result<Box<dyn InputStream>, AudioError>;
}

/// A live microphone stream. Dropping it releases the device.
pub trait InputStream {
    fn sample_rate(&self) -> u32;
    fn pause(&self) -> Result<(), AudioError>;
    fn resume(&self) -> Result<(), AudioError>;
}

/// Lifecycle of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing recorded yet, or cleared.
    Idle,
    /// Waiting for the microphone to be opened or refused.
    Starting,
    Recording,
    /// Microphone held, nothing captured, clock frozen.
    Paused,
    /// Microphone released; a clip is available.
    Stopped,
}

/// Elapsed-time tracker that only advances while running.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    pub fn start_at(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    pub fn pause_at(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += now.saturating_duration_since(since);
        }
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + now.saturating_duration_since(since),
            None => self.accumulated,
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = None;
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }
}

/// A finalized recording, kept in memory for local playback only.
#[derive(Debug, Clone)]
pub struct Clip {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl Clip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    /// Encodes the clip as a 32-bit float mono WAV file in memory.
    pub fn to_wav_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.wav_spec())?;
            for &sample in self.samples.iter() {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    pub fn write_wav(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let mut writer = hound::WavWriter::create(path, self.wav_spec())?;
        for &sample in self.samples.iter() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// State visible to both the owner and the capture thread.
#[derive(Debug)]
struct Shared {
    state: CaptureState,
    stopwatch: Stopwatch,
    latest: Option<PitchEstimate>,
    samples: Vec<f32>,
    sample_rate: u32,
    clip: Option<Clip>,
    error: Option<AudioError>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            stopwatch: Stopwatch::default(),
            latest: None,
            samples: Vec::new(),
            sample_rate: 0,
            clip: None,
            error: None,
        }
    }

    /// Freezes the clock and turns the captured samples into a clip.
    fn finalize(&mut self) {
        self.stopwatch.pause();
        let samples = std::mem::take(&mut self.samples);
        self.clip = Some(Clip::new(samples, self.sample_rate));
        self.latest = None;
        self.state = CaptureState::Stopped;
    }
}

enum Command {
    Pause,
    Resume,
    Clear,
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct WorkerSettings {
    interval: Duration,
    frame_size: usize,
    max_duration: Option<Duration>,
}

struct Worker {
    commands: Sender<Command>,
    handle: JoinHandle<()>,
    /// Outcome of opening the microphone, until it has been seen.
    ready: Option<Receiver<Result<u32, AudioError>>>,
}

/// Owns the microphone for as long as a recording is in progress.
///
/// At most one capture thread exists per session; `start()` on an active
/// session stops the previous recording first.
pub struct CaptureSession {
    source: Arc<dyn MicrophoneSource>,
    settings: WorkerSettings,
    shared: Arc<Mutex<Shared>>,
    estimates_tx: Sender<PitchEstimate>,
    estimates_rx: Receiver<PitchEstimate>,
    worker: Option<Worker>,
}

impl CaptureSession {
    pub fn new(source: Arc<dyn MicrophoneSource>, config: &TrainerConfig) -> Self {
        let (estimates_tx, estimates_rx) = crossbeam_channel::bounded(ESTIMATE_QUEUE);
        Self {
            source,
            settings: WorkerSettings {
                interval: config.analysis_interval(),
                frame_size: config.frame_size,
                max_duration: config.max_recording(),
            },
            shared: Arc::new(Mutex::new(Shared::new())),
            estimates_tx,
            estimates_rx,
            worker: None,
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the microphone and starts recording and analysis.
    ///
    /// Blocks until the device has been opened or refused. On failure the
    /// error is also kept in [`CaptureSession::error`] and the session is
    /// left not recording, so `start()` can simply be retried. UI code
    /// should prefer [`CaptureSession::request_start`].
    pub fn start(&mut self) -> Result<(), AudioError> {
        self.request_start();
        match self.settle(true) {
            Some(result) => result,
            None => Err(self
                .error()
                .unwrap_or_else(|| AudioError::Stream("capture thread did not start".into()))),
        }
    }

    /// Begins acquiring the microphone without waiting for it.
    ///
    /// The session is `Starting` until the device opens (`Recording`) or is
    /// refused (`Idle` with [`CaptureSession::error`] set). The outcome is
    /// picked up by [`CaptureSession::poll`].
    pub fn request_start(&mut self) {
        if self.worker.is_some() {
            info!("Starting a new recording; stopping the previous one first");
            self.stop();
        }
        {
            let mut shared = self.shared();
            shared.error = None;
            shared.clip = None;
            shared.latest = None;
            shared.samples.clear();
            shared.stopwatch.reset();
            shared.state = CaptureState::Starting;
        }

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.shared);
        let estimates = self.estimates_tx.clone();
        let settings = self.settings;

        let spawned = thread::Builder::new()
            .name("capture".into())
            .spawn(move || run_capture(&*source, &shared, command_rx, ready_tx, estimates, settings));
        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker {
                    commands: command_tx,
                    handle,
                    ready: Some(ready_rx),
                });
            }
            Err(e) => {
                error!("Could not start capture thread: {e}");
                self.record_error(AudioError::Stream(e.to_string()));
            }
        }
    }

    /// Resolves a pending start. Returns `None` while the microphone is
    /// still being opened (only when not blocking) or if nothing is pending.
    fn settle(&mut self, block: bool) -> Option<Result<(), AudioError>> {
        let worker = self.worker.as_mut()?;
        let ready = worker.ready.as_ref()?;
        let outcome = if block {
            ready
                .recv()
                .unwrap_or_else(|_| Err(AudioError::Stream("capture thread exited".into())))
        } else {
            match ready.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    Err(AudioError::Stream("capture thread exited".into()))
                }
            }
        };

        match outcome {
            Ok(sample_rate) => {
                worker.ready = None;
                info!("Recording started at {sample_rate} Hz");
                Some(Ok(()))
            }
            Err(e) => {
                if let Some(worker) = self.worker.take() {
                    if worker.handle.join().is_err() {
                        error!("Capture thread panicked during start-up");
                    }
                }
                warn!("Could not start recording: {e}");
                Some(Err(self.record_error(e)))
            }
        }
    }

    fn record_error(&mut self, e: AudioError) -> AudioError {
        let mut shared = self.shared();
        shared.state = CaptureState::Idle;
        shared.error = Some(e.clone());
        e
    }

    /// Stops recording, releases the microphone and finalizes the clip.
    ///
    /// No estimate is delivered after this returns. Safe to call at any
    /// time and any number of times.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Stop);
            if worker.handle.join().is_err() {
                error!("Capture thread panicked");
                let mut shared = self.shared();
                if shared.state != CaptureState::Stopped {
                    shared.finalize();
                }
            }
            // A start that was refused while we waited.
            if let Some(Ok(Err(e))) = worker.ready.as_ref().map(Receiver::try_recv) {
                warn!("Could not start recording: {e}");
                self.record_error(e);
                return;
            }
            info!("Recording stopped after {:.1}s", self.duration().as_secs_f32());
        }
        while self.estimates_rx.try_recv().is_ok() {}
    }

    /// Suspends capture without releasing the microphone.
    pub fn pause(&mut self) {
        let Some(worker) = &self.worker else { return };
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.state == CaptureState::Recording {
            shared.stopwatch.pause();
            shared.state = CaptureState::Paused;
            let _ = worker.commands.send(Command::Pause);
            debug!("Recording paused");
        }
    }

    pub fn resume(&mut self) {
        let Some(worker) = &self.worker else { return };
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.state == CaptureState::Paused {
            shared.stopwatch.start();
            shared.state = CaptureState::Recording;
            let _ = worker.commands.send(Command::Resume);
            debug!("Recording resumed");
        }
    }

    /// Discards the clip and resets the duration to zero. An active
    /// recording keeps the microphone and continues from zero.
    pub fn clear(&mut self) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.clip = None;
        shared.samples.clear();
        shared.latest = None;
        shared.error = None;
        let running = shared.stopwatch.is_running();
        shared.stopwatch.reset();
        if running {
            shared.stopwatch.start();
        }
        if shared.state == CaptureState::Stopped {
            shared.state = CaptureState::Idle;
        }
        drop(shared);
        if let Some(worker) = &self.worker {
            let _ = worker.commands.send(Command::Clear);
        }
        while self.estimates_rx.try_recv().is_ok() {}
    }

    /// Resolves a pending [`CaptureSession::request_start`] and reaps a
    /// recording that stopped on its own (max duration or stream failure).
    /// Call this regularly from the UI loop.
    pub fn poll(&mut self) {
        if self.settle(false).is_some() {
            return;
        }
        let finished = self
            .worker
            .as_ref()
            .is_some_and(|w| w.handle.is_finished());
        if finished {
            self.stop();
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    /// Elapsed recording time, excluding pauses.
    pub fn duration(&self) -> Duration {
        let elapsed = self.shared().stopwatch.elapsed();
        match self.settings.max_duration {
            Some(max) => elapsed.min(max),
            None => elapsed,
        }
    }

    /// Elapsed recording time in whole seconds, for the on-screen timer.
    pub fn duration_secs(&self) -> u64 {
        self.duration().as_secs()
    }

    /// The most recent estimate while recording.
    pub fn latest(&self) -> Option<PitchEstimate> {
        self.shared().latest
    }

    /// Live estimates at the analysis cadence.
    pub fn estimates(&self) -> Receiver<PitchEstimate> {
        self.estimates_rx.clone()
    }

    /// The finalized recording, once stopped.
    pub fn clip(&self) -> Option<Clip> {
        self.shared().clip.clone()
    }

    /// The last acquisition or stream failure, if any.
    pub fn error(&self) -> Option<AudioError> {
        self.shared().error.clone()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Body of the capture thread: acquire, analyze until told to stop (or
/// the time limit is reached), release.
fn run_capture(
    source: &dyn MicrophoneSource,
    shared: &Mutex<Shared>,
    commands: Receiver<Command>,
    ready: Sender<Result<u32, AudioError>>,
    estimates: Sender<PitchEstimate>,
    settings: WorkerSettings,
) {
    let (raw_tx, raw_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
    // The sender stays alive here so `stream_errors` never disconnects.
    let (stream_error_tx, stream_errors) = crossbeam_channel::unbounded::<AudioError>();
    let stream = match source.open(raw_tx, stream_error_tx.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let sample_rate = stream.sample_rate();
    let frame_len = settings.frame_size.max(pitch::min_frame_len(sample_rate));
    let mut window: VecDeque<f32> = VecDeque::with_capacity(frame_len);

    {
        let mut state = lock(shared);
        state.sample_rate = sample_rate;
        state.state = CaptureState::Recording;
        state.stopwatch.reset();
        state.stopwatch.start();
    }
    let _ = ready.send(Ok(sample_rate));

    let ticker = crossbeam_channel::tick(settings.interval);
    loop {
        crossbeam_channel::select! {
            recv(commands) -> command => match command {
                Ok(Command::Pause) => {
                    // Audio queued before the pause was handled belongs to the clip.
                    {
                        let mut state = lock(shared);
                        for block in raw_rx.try_iter() {
                            state.samples.extend_from_slice(&block);
                        }
                    }
                    if let Err(e) = stream.pause() {
                        warn!("Could not pause input stream: {e}");
                    }
                }
                Ok(Command::Resume) => {
                    raw_rx.try_iter().for_each(drop);
                    if let Err(e) = stream.resume() {
                        error!("Could not resume input stream: {e}");
                        lock(shared).error = Some(e);
                        break;
                    }
                }
                Ok(Command::Clear) => {
                    raw_rx.try_iter().for_each(drop);
                    window.clear();
                }
                Ok(Command::Stop) | Err(_) => break,
            },
            recv(stream_errors) -> failure => {
                if let Ok(e) = failure {
                    error!("Input stream failed: {e}");
                    lock(shared).error = Some(e);
                    break;
                }
            },
            recv(ticker) -> _ => {
                let (blocks, elapsed) = {
                    let mut state = lock(shared);
                    // While paused, queued audio waits for the pause or resume handler.
                    if state.state != CaptureState::Recording {
                        continue;
                    }
                    let blocks: Vec<Vec<f32>> = raw_rx.try_iter().collect();
                    for block in &blocks {
                        state.samples.extend_from_slice(block);
                    }
                    (blocks, state.stopwatch.elapsed())
                };

                for block in &blocks {
                    window.extend(block.iter().copied());
                }
                while window.len() > frame_len {
                    window.pop_front();
                }
                if window.len() == frame_len {
                    // Estimate outside the lock so the UI never waits on analysis.
                    let estimate = pitch::estimate_pitch(window.make_contiguous(), sample_rate);
                    debug!("Estimate: {estimate:?}");
                    lock(shared).latest = Some(estimate);
                    let _ = estimates.try_send(estimate);
                }

                if settings.max_duration.is_some_and(|max| elapsed >= max) {
                    info!("Maximum recording duration reached");
                    break;
                }
            }
        }
    }

    drop(stream);
    drop(stream_error_tx);
    info!("Microphone released");

    let mut state = lock(shared);
    if state.state == CaptureState::Recording {
        for block in raw_rx.try_iter() {
            state.samples.extend_from_slice(&block);
        }
    }
    state.finalize();
}
