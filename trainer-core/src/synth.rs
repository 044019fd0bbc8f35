//! # Tone Synthesis Module
//!
//! Generates the reference pitches a learner imitates, without any
//! pre-recorded assets: single tones, step sequences and continuous glides
//! are described as data (`ToneSpec`) and rendered by a sine `Oscillator`.
//!
//! ## Playback model
//! - `ToneSynth` owns the output and at most one playback worker.
//! - Starting any playback stops the previous one first, so two tones never
//!   overlap.
//! - Every step boundary and wait checks a `CancelToken`; once `stop()`
//!   returns no further step can start.
//! - Output failures inside a worker are stored and read with
//!   `ToneSynth::take_error()`.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::AudioError;

/// Default playback volume; quiet enough to protect young ears and to
/// leave headroom against clipping.
pub const DEFAULT_VOLUME: f32 = 0.18;

/// Fade-in applied to every voice to avoid an audible click.
const ATTACK_SECS: f32 = 0.005;

/// One note of a reference sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneStep {
    pub frequency_hz: f32,
    pub duration_ms: u64,
    /// Silence after the note before the next step starts.
    #[serde(default)]
    pub gap_ms: u64,
}

impl ToneStep {
    pub fn new(frequency_hz: f32, duration_ms: u64) -> Self {
        Self {
            frequency_hz,
            duration_ms,
            gap_ms: 0,
        }
    }

    pub fn with_gap(mut self, gap_ms: u64) -> Self {
        self.gap_ms = gap_ms;
        self
    }
}

/// A reference tone as authored in lesson content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToneSpec {
    Tone {
        frequency_hz: f32,
        duration_ms: u64,
        #[serde(default)]
        volume: Option<f32>,
    },
    Sequence {
        steps: Vec<ToneStep>,
        #[serde(default)]
        volume: Option<f32>,
    },
    Glide {
        from_hz: f32,
        to_hz: f32,
        duration_ms: u64,
        #[serde(default)]
        volume: Option<f32>,
    },
}

impl ToneSpec {
    pub fn volume(&self) -> Option<f32> {
        match self {
            ToneSpec::Tone { volume, .. }
            | ToneSpec::Sequence { volume, .. }
            | ToneSpec::Glide { volume, .. } => *volume,
        }
    }

    /// The pitch a learner should end up singing: the tone itself, the
    /// first valid step of a sequence, or the end of a glide.
    pub fn target_hz(&self) -> Option<f32> {
        let target = match self {
            ToneSpec::Tone { frequency_hz, .. } => Some(*frequency_hz),
            ToneSpec::Sequence { steps, .. } => steps
                .iter()
                .map(|s| s.frequency_hz)
                .find(|f| valid_frequency(*f)),
            ToneSpec::Glide { to_hz, .. } => Some(*to_hz),
        };
        target.filter(|f| valid_frequency(*f))
    }

    /// Expands the tone spec into the segments a worker plays. Invalid tones are
    /// dropped with a warning rather than treated as faults.
    fn segments(&self, volume: f32) -> Vec<Segment> {
        match self {
            ToneSpec::Tone {
                frequency_hz,
                duration_ms,
                ..
            } => {
                if !valid_frequency(*frequency_hz) || *duration_ms == 0 {
                    warn!("Ignoring tone {frequency_hz} Hz for {duration_ms} ms");
                    return Vec::new();
                }
                vec![Segment {
                    voice: Voice::steady(*frequency_hz, volume),
                    hold: Duration::from_millis(*duration_ms),
                    gap: Duration::ZERO,
                }]
            }
            ToneSpec::Sequence { steps, .. } => steps
                .iter()
                .filter(|step| {
                    let valid = valid_frequency(step.frequency_hz);
                    if !valid {
                        warn!("Skipping sequence step at {} Hz", step.frequency_hz);
                    }
                    valid
                })
                .map(|step| Segment {
                    voice: Voice::steady(step.frequency_hz, volume),
                    hold: Duration::from_millis(step.duration_ms),
                    gap: Duration::from_millis(step.gap_ms),
                })
                .collect(),
            ToneSpec::Glide {
                from_hz,
                to_hz,
                duration_ms,
                ..
            } => {
                if !valid_frequency(*from_hz) || !valid_frequency(*to_hz) || *duration_ms == 0 {
                    warn!("Ignoring glide {from_hz} -> {to_hz} Hz over {duration_ms} ms");
                    return Vec::new();
                }
                let hold = Duration::from_millis(*duration_ms);
                vec![Segment {
                    voice: Voice::glide(*from_hz, *to_hz, hold, volume),
                    hold,
                    gap: Duration::ZERO,
                }]
            }
        }
    }
}

fn valid_frequency(hz: f32) -> bool {
    hz.is_finite() && hz > 0.0
}

/// What an output should be sounding right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub start_hz: f32,
    pub end_hz: f32,
    /// Time to ramp linearly from `start_hz` to `end_hz`.
    pub ramp: Duration,
    pub volume: f32,
}

impl Voice {
    pub fn steady(frequency_hz: f32, volume: f32) -> Self {
        Self {
            start_hz: frequency_hz,
            end_hz: frequency_hz,
            ramp: Duration::ZERO,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    pub fn glide(from_hz: f32, to_hz: f32, ramp: Duration, volume: f32) -> Self {
        Self {
            start_hz: from_hz,
            end_hz: to_hz,
            ramp,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    /// Instantaneous frequency `secs` after the voice started.
    pub fn frequency_at(&self, secs: f32) -> f32 {
        let ramp = self.ramp.as_secs_f32();
        if ramp <= 0.0 || secs >= ramp {
            return self.end_hz;
        }
        self.start_hz + (self.end_hz - self.start_hz) * (secs / ramp)
    }
}

/// Phase-accumulating sine renderer for one `Voice`.
#[derive(Debug, Clone)]
pub struct Oscillator {
    voice: Voice,
    sample_rate: f32,
    phase: f32,
    position: u64,
}

impl Oscillator {
    pub fn new(voice: Voice, sample_rate: u32) -> Self {
        Self {
            voice,
            sample_rate: sample_rate.max(1) as f32,
            phase: 0.0,
            position: 0,
        }
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    pub fn next_sample(&mut self) -> f32 {
        let secs = self.position as f32 / self.sample_rate;
        let envelope = (secs / ATTACK_SECS).min(1.0);
        let sample = (self.phase * TAU).sin() * self.voice.volume * envelope;

        let frequency = self.voice.frequency_at(secs);
        self.phase = (self.phase + frequency / self.sample_rate).fract();
        self.position += 1;
        sample
    }

    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample();
        }
    }
}

/// A device (or test double) that can sound one voice at a time.
///
/// `start` replaces whatever the output was sounding; `silence` must be
/// safe to call at any time.
pub trait ToneOutput: Send + Sync {
    fn start(&self, voice: Voice) -> Result<(), AudioError>;
    fn silence(&self);

    /// A failure of the underlying device that happened outside `start`,
    /// e.g. in an audio callback. Returned once.
    fn take_failure(&self) -> Option<AudioError> {
        None
    }
}

/// Cooperative cancellation shared between `ToneSynth` and a worker.
///
/// Cancelling wakes every pending `wait` immediately by disconnecting the
/// wake channel.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
    wake: Receiver<()>,
}

#[derive(Debug)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake_tx: Mutex<Option<Sender<()>>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake) = crossbeam_channel::bounded(0);
        Self {
            state: Arc::new(CancelState {
                cancelled: Mutex::new(false),
                wake_tx: Mutex::new(Some(wake_tx)),
            }),
            wake,
        }
    }

    pub fn cancel(&self) {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.state
            .wake_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` only if the token has not been cancelled. Cancellation
    /// cannot slip in between the check and the call.
    pub fn run_unless_cancelled<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *cancelled { None } else { Some(f()) }
    }

    /// Sleeps for `duration`. Returns `false` as soon as the token is
    /// cancelled, `true` if the full duration elapsed.
    pub fn wait(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        match self.wake.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => !self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// A single voice held for `hold`, followed by `gap` of silence.
#[derive(Debug, Clone, Copy)]
struct Segment {
    voice: Voice,
    hold: Duration,
    gap: Duration,
}

struct Playback {
    token: CancelToken,
    worker: JoinHandle<()>,
}

/// The process-wide owner of reference-tone playback.
///
/// Construct one at start-up and pass it by reference to whatever needs
/// to play tones.
pub struct ToneSynth {
    output: Arc<dyn ToneOutput>,
    default_volume: f32,
    current: Option<Playback>,
    error_tx: Sender<AudioError>,
    error_rx: Receiver<AudioError>,
}

impl ToneSynth {
    pub fn new(output: Arc<dyn ToneOutput>) -> Self {
        let (error_tx, error_rx) = crossbeam_channel::unbounded();
        Self {
            output,
            default_volume: DEFAULT_VOLUME,
            current: None,
            error_tx,
            error_rx,
        }
    }

    pub fn with_default_volume(mut self, volume: f32) -> Self {
        self.default_volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Plays a pure sine tone. Non-positive frequencies or a zero duration
    /// are ignored.
    pub fn play_tone(&mut self, frequency_hz: f32, duration_ms: u64, volume: Option<f32>) {
        self.play(&ToneSpec::Tone {
            frequency_hz,
            duration_ms,
            volume,
        });
    }

    /// Plays each step in order, honouring its gap before the next one.
    pub fn play_sequence(&mut self, steps: &[ToneStep], volume: Option<f32>) {
        self.play(&ToneSpec::Sequence {
            steps: steps.to_vec(),
            volume,
        });
    }

    /// Plays one tone ramped linearly from `from_hz` to `to_hz`.
    pub fn play_glide(&mut self, from_hz: f32, to_hz: f32, duration_ms: u64, volume: Option<f32>) {
        self.play(&ToneSpec::Glide {
            from_hz,
            to_hz,
            duration_ms,
            volume,
        });
    }

    /// Plays any tone spec, stopping the current playback first.
    pub fn play(&mut self, spec: &ToneSpec) {
        let volume = spec.volume().unwrap_or(self.default_volume).clamp(0.0, 1.0);
        let segments = spec.segments(volume);
        if segments.is_empty() {
            return;
        }

        self.stop();

        let token = CancelToken::new();
        let worker_token = token.clone();
        let output = Arc::clone(&self.output);
        let errors = self.error_tx.clone();
        debug!("Starting playback of {} segment(s)", segments.len());

        let spawned = thread::Builder::new()
            .name("tone-playback".into())
            .spawn(move || play_segments(&*output, &segments, &worker_token, &errors));

        match spawned {
            Ok(worker) => self.current = Some(Playback { token, worker }),
            Err(e) => {
                error!("Could not start playback thread: {e}");
                let _ = self.error_tx.send(AudioError::Stream(e.to_string()));
            }
        }
    }

    /// Stops whatever is playing and aborts any pending steps. Idempotent.
    pub fn stop(&mut self) {
        if let Some(playback) = self.current.take() {
            playback.token.cancel();
            if playback.worker.join().is_err() {
                error!("Playback thread panicked");
            }
            info!("Playback stopped");
        }
        self.output.silence();
    }

    /// Whether a playback worker is still running.
    pub fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|p| !p.worker.is_finished())
    }

    /// Blocks until the current playback has finished on its own.
    pub fn wait(&mut self) {
        if let Some(playback) = self.current.take() {
            if playback.worker.join().is_err() {
                error!("Playback thread panicked");
            }
        }
    }

    /// Returns the oldest output failure not yet seen by the caller,
    /// including failures of the output device itself.
    pub fn take_error(&self) -> Option<AudioError> {
        self.error_rx
            .try_recv()
            .ok()
            .or_else(|| self.output.take_failure())
    }
}

impl Drop for ToneSynth {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play_segments(
    output: &dyn ToneOutput,
    segments: &[Segment],
    token: &CancelToken,
    errors: &Sender<AudioError>,
) {
    for (index, segment) in segments.iter().enumerate() {
        if !segment.hold.is_zero() {
            match token.run_unless_cancelled(|| output.start(segment.voice)) {
                None => break,
                Some(Err(e)) => {
                    error!("Output failed on step {index}: {e}");
                    output.silence();
                    let _ = errors.send(e);
                    return;
                }
                Some(Ok(())) => debug!("Step {index}: {:?}", segment.voice),
            }
            let completed = token.wait(segment.hold);
            output.silence();
            if !completed {
                debug!("Playback cancelled during step {index}");
                return;
            }
        }
        if !token.wait(segment.gap) {
            debug!("Playback cancelled after step {index}");
            return;
        }
    }
}

/// Resolves the opaque audio ids used by lesson content to tone specs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToneLibrary {
    tones: HashMap<String, ToneSpec>,
}

impl ToneLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object mapping audio ids to tone specs.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let tones = serde_json::from_str(json)?;
        Ok(Self { tones })
    }

    pub fn insert(&mut self, audio_id: impl Into<String>, spec: ToneSpec) {
        self.tones.insert(audio_id.into(), spec);
    }

    pub fn resolve(&self, audio_id: &str) -> Option<&ToneSpec> {
        self.tones.get(audio_id)
    }

    pub fn len(&self) -> usize {
        self.tones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::estimate_pitch;
    use std::time::Instant;

    #[test]
    fn oscillator_output_is_detected_at_its_frequency() {
        let mut osc = Oscillator::new(Voice::steady(262.0, 0.5), 44_100);
        let mut buffer = vec![0.0; 4096];
        osc.render(&mut buffer);
        let freq = estimate_pitch(&buffer[1024..], 44_100)
            .frequency_hz
            .expect("pitch expected");
        assert!((freq - 262.0).abs() < 4.0, "got {freq}");
    }

    #[test]
    fn oscillator_respects_volume_and_attack() {
        let mut osc = Oscillator::new(Voice::steady(440.0, 0.2), 44_100);
        let mut buffer = vec![0.0; 4410];
        osc.render(&mut buffer);
        assert_eq!(buffer[0], 0.0);
        let peak = buffer.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.2 + 1e-6 && peak > 0.19, "peak {peak}");
    }

    #[test]
    fn glide_ramps_linearly_then_holds() {
        let voice = Voice::glide(200.0, 400.0, Duration::from_secs(2), 0.2);
        assert_eq!(voice.frequency_at(0.0), 200.0);
        assert_eq!(voice.frequency_at(1.0), 300.0);
        assert_eq!(voice.frequency_at(2.0), 400.0);
        assert_eq!(voice.frequency_at(5.0), 400.0);
    }

    #[test]
    fn voice_volume_is_clamped() {
        assert_eq!(Voice::steady(440.0, 3.0).volume, 1.0);
        assert_eq!(Voice::steady(440.0, -1.0).volume, 0.0);
    }

    #[test]
    fn cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || waiter.wait(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(!handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(token.is_cancelled());
        assert_eq!(token.run_unless_cancelled(|| 1), None);
    }

    #[test]
    fn uncancelled_wait_completes() {
        let token = CancelToken::new();
        assert!(token.wait(Duration::from_millis(10)));
        assert!(token.wait(Duration::ZERO));
        assert_eq!(token.run_unless_cancelled(|| 7), Some(7));
    }

    #[test]
    fn invalid_specs_expand_to_nothing() {
        let zero = ToneSpec::Tone {
            frequency_hz: 0.0,
            duration_ms: 500,
            volume: None,
        };
        let negative_glide = ToneSpec::Glide {
            from_hz: -10.0,
            to_hz: 440.0,
            duration_ms: 500,
            volume: None,
        };
        let silent = ToneSpec::Tone {
            frequency_hz: 440.0,
            duration_ms: 0,
            volume: None,
        };
        assert!(zero.segments(0.2).is_empty());
        assert!(negative_glide.segments(0.2).is_empty());
        assert!(silent.segments(0.2).is_empty());
    }

    #[test]
    fn sequence_skips_invalid_steps() {
        let spec = ToneSpec::Sequence {
            steps: vec![
                ToneStep::new(262.0, 300),
                ToneStep::new(0.0, 300),
                ToneStep::new(330.0, 300).with_gap(100),
            ],
            volume: Some(0.1),
        };
        let segments = spec.segments(0.1);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].voice.start_hz, 330.0);
        assert_eq!(segments[1].gap, Duration::from_millis(100));
        assert_eq!(spec.target_hz(), Some(262.0));
    }

    #[test]
    fn tone_spec_from_lesson_json() {
        let json = r#"{
            "warmup-a3": { "kind": "tone", "frequency_hz": 220.0, "duration_ms": 1500 },
            "steps-c-e-g": {
                "kind": "sequence",
                "volume": 0.15,
                "steps": [
                    { "frequency_hz": 261.63, "duration_ms": 600, "gap_ms": 100 },
                    { "frequency_hz": 329.63, "duration_ms": 600 },
                    { "frequency_hz": 392.0, "duration_ms": 600 }
                ]
            },
            "siren": { "kind": "glide", "from_hz": 220.0, "to_hz": 440.0, "duration_ms": 2000 }
        }"#;
        let library = ToneLibrary::from_json(json).unwrap();
        assert_eq!(library.len(), 3);
        assert_eq!(library.resolve("warmup-a3").unwrap().target_hz(), Some(220.0));
        match library.resolve("steps-c-e-g").unwrap() {
            ToneSpec::Sequence { steps, volume } => {
                assert_eq!(steps.len(), 3);
                assert_eq!(steps[0].gap_ms, 100);
                assert_eq!(steps[1].gap_ms, 0);
                assert_eq!(*volume, Some(0.15));
            }
            other => panic!("unexpected spec {other:?}"),
        }
        assert_eq!(library.resolve("siren").unwrap().target_hz(), Some(440.0));
        assert!(library.resolve("missing").is_none());
    }
}
