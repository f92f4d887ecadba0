//! # pcm-relay demo
//!
//! Runs the relay end to end on the loopback platform: a virtual microphone
//! plays a sine tone, every captured buffer is metered and fed straight back
//! into the playback scheduler, and a status report is printed on exit.
//!
//! ## Usage:
//! `pcm-relay [seconds]` records for `seconds` (default 3) or until Ctrl+C.
//!
//! ## Environment Variables:
//! - `RUST_LOG`: log filter, falls back to `logging.filter` from the config
//! - `RELAY_*`: configuration overrides, see [`RelayConfig::load`]

use anyhow::{Context, Result};
use pcm_relay::audio::devices::MediaDevice;
use pcm_relay::audio::loopback::{LoopbackCapture, LoopbackClock, LoopbackOutput, LoopbackSource};
use pcm_relay::{health, AudioBridge, RelayConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let config = RelayConfig::load().context("loading relay configuration")?;
    init_tracing(&config.logging.filter)?;

    let seconds = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("invalid duration '{}'", arg))?,
        None => 3,
    };

    info!("Starting pcm-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        sample_rate = config.audio.sample_rate,
        channels = config.audio.channels,
        time_slice_ms = config.audio.time_slice_ms,
        "Configuration loaded"
    );

    let capture = LoopbackCapture::new(LoopbackSource::Tone {
        frequency: 440.0,
        amplitude: 0.6,
    })
    .with_devices(vec![
        MediaDevice::new("audioinput", "loopback-mic", "Loopback Microphone"),
        MediaDevice::new("audiooutput", "loopback-out", "Loopback Output"),
    ]);
    let output = LoopbackOutput::new(LoopbackClock::Tokio);

    let (bridge, outputs) =
        AudioBridge::new(config.clone(), Arc::new(capture), Arc::new(output.clone()));
    let bridge = Arc::new(bridge);
    let mut status_rx = outputs.status;
    let mut buffers = outputs.buffers;

    tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            info!(%status, "Status");
        }
    });

    let relay = Arc::clone(&bridge);
    tokio::spawn(async move {
        let mut first = true;
        while let Some(buffer) = buffers.recv().await {
            info!(bytes = buffer.len(), volume = buffer.volume_percent(), "Captured buffer");
            if let Err(e) = relay.play_byte_array(buffer.data(), first) {
                error!(error = %e, "Could not queue buffer for playback");
            }
            first = false;
        }
    });

    let devices = bridge.refresh_devices();
    info!(inputs = devices.audio_inputs.len(), "Using default input");

    bridge.start_recording("").await?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    bridge.stop_recording().await?;

    // Let queued audio play out before ending the run
    let tail = config.audio.time_slice() * config.timing.queue_depth_threshold as u32;
    tokio::time::sleep(tail).await;
    bridge.stop_playback();

    info!(dispatched = output.dispatches().len(), "Relay finished");
    println!("{}", serde_json::to_string_pretty(&health::status_report(&bridge))?);
    Ok(())
}

/// Console logging; `RUST_LOG` wins over the configured filter.
fn init_tracing(fallback: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(())
}
