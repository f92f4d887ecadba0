//! # Audio Bridge
//!
//! Host-facing facade that wires a [`RecordingSession`] to a
//! [`PlaybackScheduler`] and exposes the operations an application calls.
//!
//! ## Operations:
//! - `start_recording` / `stop_recording`: capture lifecycle; starting a
//!   recording also re-initializes the player with the stream format
//! - `play_byte_array`: frame raw PCM and queue it; playback starts once
//!   `buffers_before_playback` buffers have been submitted since the last
//!   `first_buffer`
//! - `stop_playback`: end the current playback run
//! - `refresh_devices` / `update_devices`: classify a device enumeration
//!
//! Captured buffers and status text come out of the [`SessionOutputs`]
//! returned by [`AudioBridge::new`].

use crate::audio::devices::{classify_devices, DeviceLists, MediaDevice, UnrecognizedDeviceHook};
use crate::audio::player::{OutputBackend, PlaybackScheduler, SchedulerSettings};
use crate::audio::session::{
    CapturePlatform, RecordingSession, SessionOutputs, SessionSettings, SessionState,
};
use crate::audio::wav::{frame_pcm, WavSpec};
use crate::config::RelayConfig;
use crate::error::{AudioError, AudioResult};
use crate::state::RelayMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct AudioBridge {
    config: RelayConfig,
    session: RecordingSession,
    player: PlaybackScheduler,
    /// Buffers submitted since the last `first_buffer`
    buffer_count: AtomicUsize,
    devices: RwLock<DeviceLists>,
    device_hook: Option<UnrecognizedDeviceHook>,
    metrics: Arc<RelayMetrics>,
    start_time: Instant,
}

impl AudioBridge {
    pub fn new(
        config: RelayConfig,
        capture: Arc<dyn CapturePlatform>,
        output: Arc<dyn OutputBackend>,
    ) -> (Self, SessionOutputs) {
        let metrics = Arc::new(RelayMetrics::default());
        let (session, outputs) = RecordingSession::new(
            SessionSettings::from(&config),
            capture,
            Arc::clone(&metrics),
        );
        let player = PlaybackScheduler::new(
            output,
            SchedulerSettings::from(&config),
            Arc::clone(&metrics),
        );

        let bridge = Self {
            config,
            session,
            player,
            buffer_count: AtomicUsize::new(0),
            devices: RwLock::new(DeviceLists::default()),
            device_hook: None,
            metrics,
            start_time: Instant::now(),
        };
        (bridge, outputs)
    }

    /// Receive device entries whose kind is not audio input, audio output or video input.
    pub fn with_device_hook(mut self, hook: UnrecognizedDeviceHook) -> Self {
        self.device_hook = Some(hook);
        self
    }

    /// Initialize the player for the configured format, then start capture.
    pub async fn start_recording(&self, device_id: &str) -> AudioResult<()> {
        let player = self.player.clone();
        self.session
            .start(device_id, move |channels, sample_rate| {
                player.initialize(channels, sample_rate)
            })
            .await
    }

    pub async fn stop_recording(&self) -> AudioResult<()> {
        self.session.stop().await
    }

    /// Open the player without recording, for playback-only use.
    pub fn initialize_player(&self) -> AudioResult<()> {
        self.player
            .initialize(self.config.audio.channels, self.config.audio.sample_rate)
    }

    /// Queue one buffer of raw 16-bit PCM for playback.
    ///
    /// `first_buffer` marks the start of a new stream and resets the counter
    /// that decides when playback begins.
    ///
    /// ## Errors:
    /// - `MalformedBuffer` for an odd-length payload
    /// - `InvalidState` if the player has not been initialized
    pub fn play_byte_array(&self, pcm: &[u8], first_buffer: bool) -> AudioResult<()> {
        if first_buffer {
            self.buffer_count.store(0, Ordering::SeqCst);
        }

        // Frame with the format the output context actually opened with
        let spec = WavSpec::pcm16(self.player.channels(), self.player.sample_rate());
        let framed = frame_pcm(&spec, pcm)?;
        self.player.add_buffer(framed)?;

        let count = self.buffer_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(count, bytes = pcm.len(), "Buffer queued for playback");
        if count == self.config.audio.buffers_before_playback {
            self.player.start_playing();
        }
        Ok(())
    }

    pub fn stop_playback(&self) {
        self.player.stop_playing();
    }

    /// Ask the capture platform for its devices and classify them.
    ///
    /// Failures are reported as status text and leave the previous lists in place.
    pub fn refresh_devices(&self) -> DeviceLists {
        match self.session.platform().enumerate_devices() {
            Ok(devices) if devices.is_empty() => {
                self.session.notify_status("no devices found");
                self.devices()
            }
            Ok(devices) => self.update_devices(devices),
            Err(e) => {
                let message = match e {
                    AudioError::DeviceUnavailable(message) => message,
                    other => other.to_string(),
                };
                warn!(error = %message, "Device enumeration failed");
                self.session.notify_status(message);
                self.devices()
            }
        }
    }

    /// Replace the device lists with a classification of `devices`.
    pub fn update_devices(&self, devices: Vec<MediaDevice>) -> DeviceLists {
        let lists = classify_devices(devices, self.device_hook.as_ref());
        info!(
            inputs = lists.audio_inputs.len(),
            outputs = lists.audio_outputs.len(),
            video = lists.video_inputs.len(),
            "Devices enumerated"
        );
        *self.devices.write().unwrap_or_else(|e| e.into_inner()) = lists.clone();
        self.session.notify_status("Devices");
        lists
    }

    pub fn devices(&self) -> DeviceLists {
        self.devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn recording_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn player(&self) -> &PlaybackScheduler {
        &self.player
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::loopback::{LoopbackCapture, LoopbackClock, LoopbackOutput, LoopbackSource};
    use std::sync::Mutex;

    fn bridge_with(capture: LoopbackCapture) -> (AudioBridge, SessionOutputs, LoopbackOutput) {
        let output = LoopbackOutput::new(LoopbackClock::manual());
        let (bridge, outputs) = AudioBridge::new(
            RelayConfig::default(),
            Arc::new(capture),
            Arc::new(output.clone()),
        );
        (bridge, outputs, output)
    }

    fn drain(outputs: &mut SessionOutputs) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = outputs.status.try_recv() {
            out.push(text);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_starts_at_fourth_buffer() {
        let (bridge, _outputs, output) = bridge_with(LoopbackCapture::new(LoopbackSource::Silence));
        bridge.initialize_player().unwrap();

        for i in 0..3 {
            bridge.play_byte_array(&[0u8; 3200], i == 0).unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(bridge.buffer_count(), 3);
        assert!(output.dispatches().is_empty());

        bridge.play_byte_array(&[0u8; 3200], false).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(output.dispatches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_frames_with_output_format() {
        let mut config = RelayConfig::default();
        config.audio.channels = 3;
        let output = LoopbackOutput::new(LoopbackClock::manual());
        let (bridge, _outputs) = AudioBridge::new(
            config,
            Arc::new(LoopbackCapture::new(LoopbackSource::Silence)),
            Arc::new(output.clone()),
        );
        bridge.initialize_player().unwrap();
        assert_eq!(bridge.player().channels(), 1);

        // 3200 bytes is 1600 mono frames but not a whole number of 3-channel frames
        for i in 0..4 {
            bridge.play_byte_array(&[0u8; 3200], i == 0).unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let dispatches = output.dispatches();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].channels, 1);
        assert_eq!(dispatches[0].frames, 1600);
    }

    #[tokio::test]
    async fn test_first_buffer_resets_counter() {
        let (bridge, _outputs, _) = bridge_with(LoopbackCapture::new(LoopbackSource::Silence));
        bridge.initialize_player().unwrap();

        bridge.play_byte_array(&[0u8; 32], true).unwrap();
        bridge.play_byte_array(&[0u8; 32], false).unwrap();
        assert_eq!(bridge.buffer_count(), 2);
        bridge.play_byte_array(&[0u8; 32], true).unwrap();
        assert_eq!(bridge.buffer_count(), 1);
    }

    #[tokio::test]
    async fn test_play_rejects_odd_payload() {
        let (bridge, _outputs, _) = bridge_with(LoopbackCapture::new(LoopbackSource::Silence));
        bridge.initialize_player().unwrap();
        assert_eq!(
            bridge.play_byte_array(&[0u8; 33], true),
            Err(AudioError::MalformedBuffer { len: 33 })
        );
        assert_eq!(bridge.buffer_count(), 0);
    }

    #[test]
    fn test_play_before_initialize() {
        let (bridge, _outputs, _) = bridge_with(LoopbackCapture::new(LoopbackSource::Silence));
        assert!(matches!(
            bridge.play_byte_array(&[0u8; 32], true),
            Err(AudioError::InvalidState(_))
        ));
    }

    #[test]
    fn test_refresh_devices() {
        let capture = LoopbackCapture::new(LoopbackSource::Silence).with_devices(vec![
            MediaDevice::new("audioinput", "mic-b", "Zed Mic"),
            MediaDevice::new("audioinput", "mic-a", "Alpha Mic"),
            MediaDevice::new("midiinput", "midi", "Keys"),
        ]);
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let (bridge, mut outputs, _) = bridge_with(capture);
        let bridge = bridge.with_device_hook(Arc::new(move |_: &MediaDevice| *counter.lock().unwrap() += 1));

        let lists = bridge.refresh_devices();
        assert_eq!(lists.audio_inputs[0].label, "Alpha Mic");
        assert_eq!(bridge.devices(), lists);
        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(drain(&mut outputs), vec!["Devices".to_string()]);
    }

    #[test]
    fn test_refresh_devices_failures() {
        let (bridge, mut outputs, _) = bridge_with(LoopbackCapture::new(LoopbackSource::Silence));
        assert!(bridge.refresh_devices().is_empty());
        assert_eq!(drain(&mut outputs), vec!["no devices found".to_string()]);

        let capture = LoopbackCapture::new(LoopbackSource::Silence)
            .with_enumeration_error("NotAllowedError: Permission denied");
        let (bridge, mut outputs, _) = bridge_with(capture);
        bridge.refresh_devices();
        assert_eq!(
            drain(&mut outputs),
            vec!["NotAllowedError: Permission denied".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_recording_initializes_player() {
        let (bridge, _outputs, output) = bridge_with(LoopbackCapture::new(LoopbackSource::Silence));
        bridge.start_recording("").await.unwrap();
        assert!(bridge.player().is_initialized());
        assert_eq!(output.opened(), 1);
        assert_eq!(bridge.recording_state(), SessionState::Recording);

        bridge.stop_recording().await.unwrap();
        assert_eq!(bridge.recording_state(), SessionState::Idle);
    }
}
