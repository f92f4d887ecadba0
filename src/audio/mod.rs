//! # Audio Module
//!
//! Capture, metering and scheduled playback of 16-bit PCM.
//!
//! ## Key Components:
//! - **WAV codec**: 44-byte header framing, stripping and decoding
//! - **Volume meter**: peak loudness of a PCM buffer as 0-100
//! - **Audio Buffer**: validated captured payload plus its volume
//! - **Recording Session**: Idle/Initializing/Recording/Stopping state machine
//! - **Playback Scheduler**: lookahead queue and gapless start-time arithmetic
//! - **Devices**: classification of platform device enumerations
//! - **Loopback**: virtual capture and output devices
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz by default, configurable
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: mono or stereo, interleaved
//! - **Encoding**: little-endian signed integers

pub mod buffer; // Captured buffers
pub mod devices; // Device enumeration
pub mod loopback; // Virtual platform
pub mod meter; // Peak volume
pub mod player; // Playback scheduling
pub mod session; // Recording lifecycle
pub mod wav; // Container codec

pub use buffer::AudioBuffer;
pub use player::{DecodedSegment, OutputBackend, OutputContext, PlaybackScheduler, TickOutcome};
pub use session::{CaptureEvent, CapturePlatform, RecordingSession, SessionOutputs, SessionState};
