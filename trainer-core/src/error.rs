//! # Error Module
//!
//! Failures of the hardware-facing parts of the trainer. Pure computations
//! (note math, pitch estimation) never fail; a missing pitch is reported as
//! `PitchEstimate::frequency_hz == None`, not as an error.

use thiserror::Error;

/// Errors reported by audio capture and tone playback.
///
/// These are stored in an observable error field by the components that
/// produce them so the UI can tell the learner whether the system is
/// listening, in addition to being returned where a call can fail directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// The user or the operating system refused microphone access.
    #[error("microphone access was denied ({0})")]
    PermissionDenied(String),
    /// No usable input or output device could be initialized.
    #[error("audio device unavailable ({0})")]
    HardwareUnavailable(String),
    /// A stream that was already running failed.
    #[error("audio stream error ({0})")]
    Stream(String),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AudioError {
    /// A short instruction suitable for showing to a young learner or
    /// their parent.
    pub fn user_message(&self) -> &'static str {
        match self {
            AudioError::PermissionDenied(_) => {
                "The microphone is turned off for this app. Please allow microphone access in your system settings, then press Start again."
            }
            AudioError::HardwareUnavailable(_) => {
                "No working microphone or speaker was found, so live pitch feedback is unavailable."
            }
            AudioError::Stream(_) => "The audio stopped unexpectedly. Press Start to try again.",
            AudioError::InvalidConfig(_) => "The trainer settings file contains an invalid value.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_cause() {
        let err = AudioError::PermissionDenied("user dismissed prompt".into());
        assert_eq!(err.to_string(), "microphone access was denied (user dismissed prompt)");
    }

    #[test]
    fn permission_message_tells_user_what_to_do() {
        let err = AudioError::PermissionDenied(String::new());
        assert!(err.user_message().contains("allow microphone access"));
    }
}
