//! # Error Handling
//!
//! Typed failures for the relay core. Codec problems (short containers, odd-length
//! PCM) are rejected locally with one of these variants and never panic.
//!
//! ## Propagation policy:
//! - **Codec errors**: returned to the caller as `MalformedContainer` / `MalformedBuffer`
//! - **Platform errors**: the recording path turns these into status text for the
//!   consumer; `DeviceUnavailable` exists so platform implementations have a typed
//!   way to report them
//! - **State misuse**: `InvalidState` is returned loudly, state is never coerced
//!
//! ## Usage Example:
//! ```rust
//! use pcm_relay::error::{AudioError, AudioResult};
//!
//! fn check(len: usize) -> AudioResult<()> {
//!     if len % 2 != 0 {
//!         return Err(AudioError::MalformedBuffer { len });
//!     }
//!     Ok(())
//! }
//! assert!(check(3).is_err());
//! ```

use thiserror::Error;

/// Every failure the relay core can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// A framed chunk was shorter than the fixed 44-byte WAV header, or its tags were wrong
    #[error("malformed container: {reason} ({len} bytes)")]
    MalformedContainer { len: usize, reason: &'static str },

    /// A PCM payload did not hold whole 16-bit samples
    #[error("malformed buffer: odd PCM length {len}")]
    MalformedBuffer { len: usize },

    /// The platform could not open or enumerate an audio device
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// An operation was called in a state that does not accept it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Non-positive sample rate or channel count handed to header construction
    #[error("caller configuration error: {0}")]
    CallerConfiguration(String),

    /// The output platform failed to turn a framed chunk into a playable segment
    #[error("decode failed: {0}")]
    Decode(String),

    /// Configuration file or environment variable problems
    #[error("configuration error: {0}")]
    Config(String),
}

impl AudioError {
    /// Shorthand for a container shorter than the header.
    pub fn short_container(len: usize) -> Self {
        AudioError::MalformedContainer {
            len,
            reason: "shorter than 44-byte header",
        }
    }
}

/// Configuration loading can fail for missing files or bad values; these are
/// surfaced as `Config` errors.
impl From<config::ConfigError> for AudioError {
    fn from(err: config::ConfigError) -> Self {
        AudioError::Config(err.to_string())
    }
}

/// Shorthand for `Result<T, AudioError>`.
pub type AudioResult<T> = Result<T, AudioError>;
