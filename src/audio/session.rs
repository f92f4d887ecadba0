//! # Recording Session
//!
//! Drives one capture stream at a time through a four-state lifecycle and turns
//! the platform's framed chunks into [`AudioBuffer`] events.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: no capture stream open
//! 2. **Initializing**: output prepared, waiting out the settle delay
//! 3. **Recording**: capture stream open, chunks flowing
//! 4. **Stopping**: stop requested, waiting for the platform to confirm
//!
//! ## Event flow:
//! The platform pushes [`CaptureEvent`]s into an unbounded channel. A pump task
//! owned by the session drains it, validates each chunk and forwards buffers and
//! status text to the receivers in [`SessionOutputs`]. The state lives in a
//! `tokio::sync::watch` channel so `stop()` can await the return to Idle instead
//! of polling.
//!
//! ## Failure handling:
//! A capture device that cannot be opened is reported as status text and the
//! session goes back to Idle; it is not an error for the caller. Chunks that
//! fail validation are logged and skipped without ending the recording.

use crate::audio::buffer::AudioBuffer;
use crate::audio::devices::MediaDevice;
use crate::config::RelayConfig;
use crate::error::{AudioError, AudioResult};
use crate::state::RelayMetrics;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Device id used when the caller passes an empty one.
pub const DEFAULT_DEVICE_ID: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Recording,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Recording => "recording",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Parameters for opening a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub device_id: String,
    pub channels: u16,
    pub sample_rate: u32,
    /// Audio per delivered chunk
    pub time_slice: Duration,
}

/// What a capture platform reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The device is open and recording
    Started,
    /// One framed chunk: 44-byte WAV header followed by 16-bit PCM
    Chunk(Vec<u8>),
    /// Free-form status text, forwarded verbatim
    Status(String),
    /// The stream finished after a stop request
    Stopped,
    /// The stream died; the text is forwarded as status
    Failed(String),
}

/// Platform side of audio capture.
///
/// Implementations spawn their own work and report through `events`. After
/// `request_stop` they must eventually send [`CaptureEvent::Stopped`] (or drop
/// the sender).
pub trait CapturePlatform: Send + Sync {
    fn open(
        &self,
        request: CaptureRequest,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> AudioResult<()>;

    fn request_stop(&self);

    /// Raw device enumeration. Platforms without one report nothing.
    fn enumerate_devices(&self) -> AudioResult<Vec<MediaDevice>> {
        Ok(Vec::new())
    }
}

/// Stream format and start-up timing for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub channels: u16,
    pub sample_rate: u32,
    pub time_slice: Duration,
    pub settle_delay: Duration,
}

impl From<&RelayConfig> for SessionSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            channels: config.audio.channels,
            sample_rate: config.audio.sample_rate,
            time_slice: config.audio.time_slice(),
            settle_delay: config.timing.settle_delay(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

/// Receiving ends of the session's event streams.
pub struct SessionOutputs {
    pub buffers: mpsc::UnboundedReceiver<AudioBuffer>,
    pub status: mpsc::UnboundedReceiver<String>,
}

/// The recording currently in progress.
#[derive(Debug, Clone)]
pub struct RecordingInfo {
    pub id: Uuid,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
}

struct SessionShared {
    platform: Arc<dyn CapturePlatform>,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
    current: Mutex<Option<RecordingInfo>>,
    buffers: mpsc::UnboundedSender<AudioBuffer>,
    status: mpsc::UnboundedSender<String>,
    metrics: Arc<RelayMetrics>,
}

/// Owns the capture lifecycle. Clones share the same session.
#[derive(Clone)]
pub struct RecordingSession {
    shared: Arc<SessionShared>,
}

impl RecordingSession {
    pub fn new(
        settings: SessionSettings,
        platform: Arc<dyn CapturePlatform>,
        metrics: Arc<RelayMetrics>,
    ) -> (Self, SessionOutputs) {
        let (buffer_tx, buffer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Idle);

        let session = Self {
            shared: Arc::new(SessionShared {
                platform,
                settings,
                state,
                current: Mutex::new(None),
                buffers: buffer_tx,
                status: status_tx,
                metrics,
            }),
        };
        let outputs = SessionOutputs {
            buffers: buffer_rx,
            status: status_rx,
        };
        (session, outputs)
    }

    /// Start recording from `device_id` (empty selects the default device).
    ///
    /// `prepare_output` runs first with the session's channel count and sample
    /// rate, so playback is ready before the first chunk arrives. After the
    /// settle delay the capture stream is opened.
    ///
    /// ## Errors:
    /// - `InvalidState` if the session is not Idle
    /// - whatever `prepare_output` returns; the session goes back to Idle
    ///
    /// A capture device that fails to open is reported on the status channel
    /// and still returns `Ok(())`. Dropping the future before the stream opens
    /// leaves the session Idle.
    pub async fn start<F>(&self, device_id: &str, prepare_output: F) -> AudioResult<()>
    where
        F: FnOnce(u16, u32) -> AudioResult<()>,
    {
        let mut refused = None;
        self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Initializing;
                true
            } else {
                refused = Some(*state);
                false
            }
        });
        if let Some(state) = refused {
            return Err(AudioError::InvalidState(format!(
                "cannot start recording while {}",
                state.as_str()
            )));
        }

        // Any exit before Recording, a dropped future included, goes back to Idle
        let mut guard = InitializingGuard {
            shared: &self.shared,
            armed: true,
        };

        let settings = self.shared.settings.clone();
        if let Err(e) = prepare_output(settings.channels, settings.sample_rate) {
            warn!(error = %e, "Output initialization failed");
            self.shared.emit_status(e.to_string());
            return Err(e);
        }

        tokio::time::sleep(settings.settle_delay).await;

        let device_id = if device_id.is_empty() {
            self.shared.emit_status("AudioInputDeviceId was ''");
            DEFAULT_DEVICE_ID.to_string()
        } else {
            device_id.to_string()
        };
        self.shared.emit_status(format!("INPUT DEVICE: {}", device_id));

        let info = RecordingInfo {
            id: Uuid::new_v4(),
            device_id: device_id.clone(),
            started_at: Utc::now(),
        };
        let span = tracing::info_span!("recording", session_id = %info.id, device = %device_id);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let request = CaptureRequest {
            device_id,
            channels: settings.channels,
            sample_rate: settings.sample_rate,
            time_slice: settings.time_slice,
        };

        if let Err(e) = self.shared.platform.open(request, event_tx) {
            let message = match e {
                AudioError::DeviceUnavailable(message) => message,
                other => other.to_string(),
            };
            span.in_scope(|| warn!(error = %message, "Capture device unavailable"));
            self.shared.metrics.record_device_failure();
            self.shared.emit_status(message);
            return Ok(());
        }

        guard.armed = false;
        *self.shared.lock_current() = Some(info);
        self.shared.metrics.record_recording_started();
        self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Initializing {
                *state = SessionState::Recording;
                true
            } else {
                false
            }
        });
        span.in_scope(|| info!("Recording started"));

        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.pump(event_rx).instrument(span));
        Ok(())
    }

    /// Stop recording and wait until the platform confirms.
    ///
    /// Returns immediately when already Idle. Concurrent callers all wait for
    /// the same Idle transition.
    ///
    /// ## Errors:
    /// `InvalidState` while Initializing.
    pub async fn stop(&self) -> AudioResult<()> {
        let mut requested = false;
        let mut refused = false;
        self.shared.state.send_if_modified(|state| match *state {
            SessionState::Recording => {
                *state = SessionState::Stopping;
                requested = true;
                true
            }
            SessionState::Initializing => {
                refused = true;
                false
            }
            _ => false,
        });
        if refused {
            return Err(AudioError::InvalidState(
                "cannot stop recording while initializing".to_string(),
            ));
        }

        let mut state_rx = self.shared.state.subscribe();
        if requested {
            info!("Stopping recording");
            self.shared.platform.request_stop();
        }

        state_rx
            .wait_for(|state| *state == SessionState::Idle)
            .await
            .map_err(|_| AudioError::InvalidState("recording session closed".to_string()))?;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn current_recording(&self) -> Option<RecordingInfo> {
        self.shared.lock_current().clone()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    pub fn platform(&self) -> &Arc<dyn CapturePlatform> {
        &self.shared.platform
    }

    /// Push text onto the status stream.
    pub fn notify_status(&self, text: impl Into<String>) {
        self.shared.emit_status(text);
    }
}

impl SessionShared {
    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<RecordingInfo>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_replace(next);
    }

    fn emit_status(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(status = %text, "Status");
        if self.status.send(text).is_err() {
            debug!("Status receiver dropped");
        }
    }

    async fn pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<CaptureEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                CaptureEvent::Started => {
                    info!("Capture stream open");
                    self.emit_status("Recording");
                }
                CaptureEvent::Chunk(bytes) => self.handle_chunk(&bytes),
                CaptureEvent::Status(text) => self.emit_status(text),
                CaptureEvent::Stopped => {
                    self.finish("Stopped");
                    return;
                }
                CaptureEvent::Failed(message) => {
                    warn!(error = %message, "Capture stream failed");
                    self.metrics.record_device_failure();
                    self.finish(message);
                    return;
                }
            }
        }

        warn!("Capture platform closed its event stream without stopping");
        self.finish("Stopped");
    }

    fn handle_chunk(&self, bytes: &[u8]) {
        let state = *self.state.borrow();
        if !matches!(state, SessionState::Recording | SessionState::Stopping) {
            debug!(state = state.as_str(), "Ignoring chunk outside a recording");
            return;
        }

        match AudioBuffer::from_wav_chunk(bytes) {
            Ok(buffer) => {
                self.metrics.record_chunk_emitted(buffer.len());
                debug!(bytes = buffer.len(), volume = buffer.volume_percent(), "Chunk captured");
                if self.buffers.send(buffer).is_err() {
                    debug!("Buffer receiver dropped");
                }
            }
            Err(e) => {
                self.metrics.record_chunk_dropped();
                warn!(error = %e, "Dropping malformed capture chunk");
            }
        }
    }

    fn finish(&self, status: impl Into<String>) {
        self.emit_status(status);
        if let Some(info) = self.lock_current().take() {
            let elapsed = Utc::now().signed_duration_since(info.started_at);
            info!(elapsed_ms = elapsed.num_milliseconds(), "Recording stopped");
        }
        self.metrics.record_recording_stopped();
        self.set_state(SessionState::Idle);
    }
}

/// Puts an unfinished start back to Idle when dropped armed.
struct InitializingGuard<'a> {
    shared: &'a SessionShared,
    armed: bool,
}

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Initializing {
                *state = SessionState::Idle;
                true
            } else {
                false
            }
        });
    }
}
