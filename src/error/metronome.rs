// Metronome error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Metronome error code constants
///
/// Single source of truth for the numeric codes reported to host bindings.
///
/// Error code range: 2001-2005
pub struct MetronomeErrorCodes {}

impl MetronomeErrorCodes {
    /// Audio bytes could not be decoded into a click sound
    pub const DECODE_ERROR: i32 = 2001;

    /// Parameter out of range (e.g. BPM of zero)
    pub const INVALID_PARAMETER: i32 = 2002;

    /// Playback engine failed to start or resume
    pub const ENGINE_START_FAILURE: i32 = 2003;

    /// Playback clock queried while the renderer is not rendering
    pub const CLOCK_UNAVAILABLE: i32 = 2004;

    /// Scheduler or asset lock was poisoned
    pub const LOCK_POISONED: i32 = 2005;
}

/// Log a metronome error with structured context
///
/// Logs the numeric code, the originating component and the message.
/// The logging is non-blocking and will not panic on failure.
pub fn log_metronome_error(err: &MetronomeError, context: &str) {
    error!(
        "Metronome error in {}: code={}, component=MetronomeEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Metronome errors
///
/// Covers decoding of click sounds, parameter validation, renderer start-up
/// and playback clock access.
///
/// Error code range: 2001-2005
#[derive(Debug, Clone, PartialEq)]
pub enum MetronomeError {
    /// Malformed audio bytes, or empty bytes where a sound is required
    DecodeError { reason: String },

    /// Parameter value rejected (non-positive BPM)
    InvalidParameter { name: &'static str, value: i64 },

    /// External renderer failed to start or resume
    EngineStartFailure { reason: String },

    /// Renderer not rendering when a clock reference was requested
    ClockUnavailable,

    /// Mutex was poisoned
    LockPoisoned { component: String },
}

impl ErrorCode for MetronomeError {
    fn code(&self) -> i32 {
        match self {
            MetronomeError::DecodeError { .. } => MetronomeErrorCodes::DECODE_ERROR,
            MetronomeError::InvalidParameter { .. } => MetronomeErrorCodes::INVALID_PARAMETER,
            MetronomeError::EngineStartFailure { .. } => {
                MetronomeErrorCodes::ENGINE_START_FAILURE
            }
            MetronomeError::ClockUnavailable => MetronomeErrorCodes::CLOCK_UNAVAILABLE,
            MetronomeError::LockPoisoned { .. } => MetronomeErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            MetronomeError::DecodeError { reason } => {
                format!("Failed to decode audio: {}", reason)
            }
            MetronomeError::InvalidParameter { name, value } => {
                format!("Invalid {}: must be greater than 0 (got {})", name, value)
            }
            MetronomeError::EngineStartFailure { reason } => {
                format!("Playback engine failed to start: {}", reason)
            }
            MetronomeError::ClockUnavailable => {
                "Playback clock unavailable. Renderer is not rendering.".to_string()
            }
            MetronomeError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
        }
    }
}

impl fmt::Display for MetronomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetronomeError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for MetronomeError {}

impl From<hound::Error> for MetronomeError {
    fn from(err: hound::Error) -> Self {
        MetronomeError::DecodeError {
            reason: err.to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for MetronomeError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        MetronomeError::LockPoisoned {
            component: "PlaybackSession".to_string(),
        }
    }
}
