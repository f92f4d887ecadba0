//! # pcm-relay
//!
//! Real-time PCM audio relay: capture microphone audio in fixed time slices,
//! meter its loudness, and play raw PCM back through a lookahead scheduler that
//! keeps consecutive buffers gapless.
//!
//! ## Architecture:
//! - **config**: layered settings (defaults, `relay.toml`, `RELAY_*` env vars)
//! - **error**: the crate-wide [`AudioError`] and [`AudioResult`]
//! - **audio**: codec, meter, recording session, playback scheduler, devices
//! - **bridge**: the [`AudioBridge`] facade an application talks to
//! - **state**: shared counters
//! - **health**: JSON status report

pub mod audio;
pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod state;

pub use bridge::AudioBridge;
pub use config::RelayConfig;
pub use error::{AudioError, AudioResult};
