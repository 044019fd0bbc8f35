//! # Pitch Trainer GUI
//!
//! Desktop front end for the singing trainer. It plays reference tones,
//! listens to the learner through the microphone and shows how close the
//! sung pitch is to the target.
//!
//! ## Architecture
//! - **Main Thread**: Iced GUI application with dark theme
//! - **Capture Thread**: owned by `CaptureSession`, holds the microphone
//! - **Playback Thread**: owned by `ToneSynth`, sequences reference tones
//! - **Updates**: 60 FPS ticks drain pitch estimates from a crossbeam channel

mod ui;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::Receiver;
use iced::{Element, Subscription, Task, Theme};
use log::{error, info, warn};
use trainer_core::audio::DeviceMicrophone;
use trainer_core::capture::{CaptureSession, CaptureState, MicrophoneSource};
use trainer_core::music::{self, CentsSmoother};
use trainer_core::output::AudioOutput;
use trainer_core::synth::{ToneLibrary, ToneSpec, ToneStep, ToneSynth};
use trainer_core::{AudioError, PitchEstimate, PitchReading, TrainerConfig};
use ui::main_display::create_main_view;

/// Settings file read at startup, if present.
const CONFIG_PATH: &str = "trainer_config.json";

/// Optional lesson file that replaces the built-in exercises.
const EXERCISES_PATH: &str = "exercises.json";

/// Redraw cadence of the meter, roughly 60 FPS.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Built-in exercises in the order they appear in the sidebar.
pub const EXERCISES: &[(&str, &str)] = &[
    ("match_a3", "Match A3"),
    ("match_c4", "Match C4"),
    ("match_e4", "Match E4"),
    ("c_major_steps", "C major steps"),
    ("siren_up", "Siren up"),
];

pub fn main() -> iced::Result {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting pitch trainer");
    let result = iced::application("Pitch Trainer", TrainerApp::update, TrainerApp::view)
        .subscription(TrainerApp::subscription)
        .theme(TrainerApp::theme)
        .run();
    info!("Pitch trainer finished: {result:?}");
    result
}

/// Application message types for the Iced GUI framework.
#[derive(Debug, Clone)]
pub enum Message {
    // Reference tones
    PlayReference(&'static str), // Play the exercise with this audio id
    StopTone,

    // Listening and recording
    StartListening,
    PauseListening,
    ResumeListening,
    StopListening,
    ClearRecording,
    SaveRecording,

    // Application control
    Exit,

    // Continuous update message
    Tick,
}

/// Everything the view needs to draw one frame.
#[derive(Debug, Clone)]
pub struct AppDisplayData {
    pub reading: Option<PitchReading>,
    pub smoothed_cents: Option<f64>,
    pub capture_state: CaptureState,
    pub elapsed: String,
    pub active_exercise: Option<&'static str>,
    pub target_name: Option<String>,
    pub tone_playing: bool,
    pub output_available: bool,
    pub error: Option<String>,
    pub status: Option<String>,
    pub in_tune_cents: f64,
    pub close_cents: f64,
}

/// Error text for the banner. Capture errors mirror the session; a
/// playback error stays up until the next reference tone starts.
#[derive(Debug, Default)]
struct ErrorBanner {
    playback: Option<&'static str>,
    capture: Option<&'static str>,
}

impl ErrorBanner {
    fn playback_failed(&mut self, err: &AudioError) {
        self.playback = Some(err.user_message());
    }

    fn playback_started(&mut self) {
        self.playback = None;
    }

    fn capture_status(&mut self, err: Option<&AudioError>) {
        self.capture = err.map(AudioError::user_message);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn message(&self) -> Option<&'static str> {
        self.capture.or(self.playback)
    }
}

/// Main application state.
///
/// `synth` is declared before `_output` so playback stops before the
/// output stream is dropped.
struct TrainerApp {
    config: TrainerConfig,
    library: ToneLibrary,
    synth: Option<ToneSynth>,
    _output: Option<AudioOutput>,
    capture: CaptureSession,
    estimates: Receiver<PitchEstimate>,
    target_hz: Option<f64>,
    smoother: CentsSmoother,
    banner: ErrorBanner,
    display_data: AppDisplayData,
}

impl Default for TrainerApp {
    fn default() -> Self {
        let config = load_config();
        let library = load_exercises();

        let output = match AudioOutput::open_default() {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("Reference tones disabled: {e}");
                None
            }
        };
        let synth = output.as_ref().map(|output| {
            ToneSynth::new(output.tone_output()).with_default_volume(config.default_volume)
        });

        let microphone = Arc::new(DeviceMicrophone::new(config.sample_rate));
        let capture = CaptureSession::new(microphone as Arc<dyn MicrophoneSource>, &config);
        let estimates = capture.estimates();

        let display_data = AppDisplayData {
            reading: None,
            smoothed_cents: None,
            capture_state: CaptureState::Idle,
            elapsed: music::format_duration(0),
            active_exercise: None,
            target_name: None,
            tone_playing: false,
            output_available: output.is_some(),
            error: None,
            status: None,
            in_tune_cents: config.in_tune_cents,
            close_cents: config.close_cents,
        };

        Self {
            smoother: CentsSmoother::new(config.smoothing_frames),
            config,
            library,
            synth,
            _output: output,
            capture,
            estimates,
            target_hz: None,
            banner: ErrorBanner::default(),
            display_data,
        }
    }
}

impl TrainerApp {
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::PlayReference(audio_id) => self.play_reference(audio_id),
            Message::StopTone => {
                if let Some(synth) = &mut self.synth {
                    synth.stop();
                }
            }
            Message::StartListening => {
                self.smoother.clear();
                self.display_data.reading = None;
                self.display_data.smoothed_cents = None;
                self.display_data.status = None;
                // The outcome arrives on a later tick via `poll()`.
                self.capture.request_start();
                self.banner.capture_status(self.capture.error().as_ref());
            }
            Message::PauseListening => self.capture.pause(),
            Message::ResumeListening => self.capture.resume(),
            Message::StopListening => {
                self.capture.stop();
                self.smoother.clear();
            }
            Message::ClearRecording => {
                self.capture.clear();
                self.smoother.clear();
                self.display_data.reading = None;
                self.display_data.smoothed_cents = None;
                self.display_data.status = None;
                self.banner.clear();
            }
            Message::SaveRecording => self.save_recording(),
            Message::Exit => {
                info!("Exit requested, releasing audio devices");
                if let Some(synth) = &mut self.synth {
                    synth.stop();
                }
                self.capture.stop();
                return iced::exit();
            }
            Message::Tick => self.refresh(),
        }
        self.display_data.error = self.banner.message().map(str::to_string);
        Task::none()
    }

    /// Starts the reference for an exercise and makes its pitch the target.
    fn play_reference(&mut self, audio_id: &'static str) {
        let Some(spec) = self.library.resolve(audio_id) else {
            warn!("No exercise with audio id {audio_id:?}");
            return;
        };
        let Some(synth) = &mut self.synth else {
            let err = AudioError::HardwareUnavailable("no output device".into());
            self.banner.playback_failed(&err);
            return;
        };

        synth.play(spec);
        self.banner.playback_started();
        self.target_hz = spec.target_hz().map(f64::from);
        self.smoother.clear();
        self.display_data.active_exercise = Some(audio_id);
        self.display_data.target_name = self
            .target_hz
            .map(|hz| music::nearest_note(hz).name);
        info!("Playing exercise {audio_id}, target {:?} Hz", self.target_hz);
    }

    fn save_recording(&mut self) {
        let Some(clip) = self.capture.clip() else {
            self.display_data.status = Some("Nothing recorded yet".to_string());
            return;
        };
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = format!("recording-{stamp}.wav");
        match clip.write_wav(&path) {
            Ok(()) => {
                info!("Saved {:.1}s recording to {path}", clip.duration().as_secs_f32());
                self.display_data.status = Some(format!("Saved {path}"));
            }
            Err(e) => {
                error!("Failed to save recording: {e:#}");
                self.display_data.status = Some("Could not save the recording".to_string());
            }
        }
    }

    /// Pulls new estimates and session state into the display data.
    fn refresh(&mut self) {
        self.capture.poll();

        for estimate in self.estimates.try_iter() {
            let reading = PitchReading::from_estimate(estimate, self.target_hz);
            self.display_data.smoothed_cents = self.smoother.push(reading.cents_off);
            self.display_data.reading = Some(reading);
        }

        let state = self.capture.state();
        if state != CaptureState::Recording {
            self.display_data.reading = None;
            self.display_data.smoothed_cents = None;
        }
        self.display_data.capture_state = state;
        self.display_data.elapsed = music::format_duration(self.capture.duration_secs());

        if let Some(synth) = &self.synth {
            self.display_data.tone_playing = synth.is_playing();
            if let Some(err) = synth.take_error() {
                error!("Reference tone failed: {err}");
                self.banner.playback_failed(&err);
            }
        }
        self.banner.capture_status(self.capture.error().as_ref());
    }

    fn view(&self) -> Element<'_, Message> {
        create_main_view(&self.display_data)
    }

    fn subscription(&self) -> Subscription<Message> {
        iced::time::every(self.config.analysis_interval().min(FRAME_INTERVAL)).map(|_| Message::Tick)
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

fn load_config() -> TrainerConfig {
    if !Path::new(CONFIG_PATH).exists() {
        return TrainerConfig::default();
    }
    match TrainerConfig::load(CONFIG_PATH) {
        Ok(config) => {
            info!("Loaded settings from {CONFIG_PATH}");
            config
        }
        Err(e) => {
            warn!("Ignoring {CONFIG_PATH}: {e:#}");
            TrainerConfig::default()
        }
    }
}

fn load_exercises() -> ToneLibrary {
    if Path::new(EXERCISES_PATH).exists() {
        let loaded = std::fs::read_to_string(EXERCISES_PATH)
            .map_err(anyhow::Error::from)
            .and_then(|json| ToneLibrary::from_json(&json).map_err(anyhow::Error::from));
        match loaded {
            Ok(library) if EXERCISES.iter().all(|(id, _)| library.resolve(id).is_some()) => {
                info!("Loaded {} exercises from {EXERCISES_PATH}", library.len());
                return library;
            }
            Ok(_) => warn!("{EXERCISES_PATH} is missing built-in exercise ids, using defaults"),
            Err(e) => warn!("Ignoring {EXERCISES_PATH}: {e:#}"),
        }
    }
    builtin_exercises()
}

fn builtin_exercises() -> ToneLibrary {
    let mut library = ToneLibrary::new();
    library.insert("match_a3", ToneSpec::Tone {
        frequency_hz: 220.0,
        duration_ms: 2000,
        volume: None,
    });
    library.insert("match_c4", ToneSpec::Tone {
        frequency_hz: 261.63,
        duration_ms: 2000,
        volume: None,
    });
    library.insert("match_e4", ToneSpec::Tone {
        frequency_hz: 329.63,
        duration_ms: 2000,
        volume: None,
    });
    library.insert("c_major_steps", ToneSpec::Sequence {
        steps: [261.63, 293.66, 329.63, 349.23, 392.0]
            .iter()
            .map(|&hz| ToneStep::new(hz, 600).with_gap(150))
            .collect(),
        volume: None,
    });
    library.insert("siren_up", ToneSpec::Glide {
        from_hz: 196.0,
        to_hz: 392.0,
        duration_ms: 2500,
        volume: None,
    });
    library
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_reference_tone_clears_playback_error() {
        let mut banner = ErrorBanner::default();
        let err = AudioError::Stream("output lost".into());
        banner.playback_failed(&err);
        assert_eq!(banner.message(), Some(err.user_message()));

        banner.playback_started();
        assert_eq!(banner.message(), None);
    }

    #[test]
    fn capture_error_follows_the_session() {
        let mut banner = ErrorBanner::default();
        let denied = AudioError::PermissionDenied("refused".into());
        banner.playback_failed(&AudioError::Stream("output lost".into()));
        banner.capture_status(Some(&denied));
        assert_eq!(banner.message(), Some(denied.user_message()));

        // a successful retry clears the capture error, playback's stays
        banner.capture_status(None);
        assert_eq!(banner.message(), Some(AudioError::Stream(String::new()).user_message()));

        banner.clear();
        assert_eq!(banner.message(), None);
    }
}
