//! # Loopback Platform
//!
//! In-process stand-ins for a capture device and an output device. They let the
//! relay run end to end without audio hardware: the demo binary uses them, and
//! so do the tests.
//!
//! ## Components:
//! - [`LoopbackCapture`]: produces framed WAV chunks (silence, a sine tone, or
//!   a fixed script) once per time slice on the tokio clock
//! - [`LoopbackOutput`]: opens contexts whose clock is either manual or driven
//!   by tokio time, decodes with [`decode_segment`] and records every
//!   scheduled segment as a [`Dispatch`]
//!
//! Because both run on tokio time they behave deterministically under
//! `#[tokio::test(start_paused = true)]`.

use crate::audio::devices::MediaDevice;
use crate::audio::player::{DecodedSegment, OutputBackend, OutputContext};
use crate::audio::session::{CaptureEvent, CapturePlatform, CaptureRequest};
use crate::audio::wav::{decode_segment, frame_pcm, WavSpec};
use crate::error::{AudioError, AudioResult};
use futures_util::future::BoxFuture;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

/// What the loopback microphone hears.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopbackSource {
    Silence,
    /// `amplitude` is a fraction of full scale
    Tone { frequency: f32, amplitude: f32 },
    /// Pre-framed chunks delivered verbatim, one per time slice
    Script(Vec<Vec<u8>>),
}

/// Virtual capture device.
pub struct LoopbackCapture {
    source: LoopbackSource,
    max_chunks: Option<usize>,
    devices: Vec<MediaDevice>,
    enumeration_error: Option<String>,
    active: Mutex<Option<Arc<Notify>>>,
}

impl LoopbackCapture {
    pub fn new(source: LoopbackSource) -> Self {
        Self {
            source,
            max_chunks: None,
            devices: Vec::new(),
            enumeration_error: None,
            active: Mutex::new(None),
        }
    }

    /// Go quiet after `count` chunks; the stream stays open until stopped.
    pub fn with_max_chunks(mut self, count: usize) -> Self {
        self.max_chunks = Some(count);
        self
    }

    /// Devices reported by enumeration. When non-empty, opening an audio input
    /// that is not listed fails (the default device always opens).
    pub fn with_devices(mut self, devices: Vec<MediaDevice>) -> Self {
        self.devices = devices;
        self
    }

    /// Make enumeration fail with `message`.
    pub fn with_enumeration_error(mut self, message: &str) -> Self {
        self.enumeration_error = Some(message.to_string());
        self
    }

    fn knows_input(&self, device_id: &str) -> bool {
        self.devices.is_empty()
            || device_id == crate::audio::session::DEFAULT_DEVICE_ID
            || self
                .devices
                .iter()
                .any(|d| d.kind == "audioinput" && d.device_id == device_id)
    }
}

impl CapturePlatform for LoopbackCapture {
    fn open(
        &self,
        request: CaptureRequest,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> AudioResult<()> {
        if !self.knows_input(&request.device_id) {
            return Err(AudioError::DeviceUnavailable(
                "NotFoundError: Requested device not found".to_string(),
            ));
        }

        let stop = Arc::new(Notify::new());
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&stop));

        let mut generator = ChunkGenerator::new(self.source.clone(), &request);
        let max_chunks = self.max_chunks;
        info!(device = %request.device_id, "Loopback capture opened");

        tokio::spawn(async move {
            let _ = events.send(CaptureEvent::Started);

            let mut interval = tokio::time::interval(request.time_slice);
            // First tick completes immediately; chunks arrive one slice later
            interval.tick().await;

            let mut sent = 0usize;
            let mut exhausted = false;
            loop {
                let more = !exhausted && max_chunks.map_or(true, |max| sent < max);
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = interval.tick(), if more => {
                        match generator.next_chunk() {
                            Some(Ok(chunk)) => {
                                sent += 1;
                                if events.send(CaptureEvent::Chunk(chunk)).is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                let _ = events.send(CaptureEvent::Failed(e.to_string()));
                                return;
                            }
                            None => exhausted = true,
                        }
                    }
                }
            }

            debug!(chunks = sent, "Loopback capture stopped");
            let _ = events.send(CaptureEvent::Stopped);
        });
        Ok(())
    }

    fn request_stop(&self) {
        if let Some(stop) = self.active.lock().unwrap_or_else(|e| e.into_inner()).take() {
            stop.notify_one();
        }
    }

    fn enumerate_devices(&self) -> AudioResult<Vec<MediaDevice>> {
        match &self.enumeration_error {
            Some(message) => Err(AudioError::DeviceUnavailable(message.clone())),
            None => Ok(self.devices.clone()),
        }
    }
}

/// Produces consecutive framed chunks with a continuous phase.
struct ChunkGenerator {
    source: LoopbackSource,
    spec: WavSpec,
    frames_per_chunk: usize,
    position: u64,
    script_index: usize,
}

impl ChunkGenerator {
    fn new(source: LoopbackSource, request: &CaptureRequest) -> Self {
        let frames_per_chunk =
            (u128::from(request.sample_rate) * request.time_slice.as_millis() / 1000) as usize;
        Self {
            source,
            spec: WavSpec::pcm16(request.channels, request.sample_rate),
            frames_per_chunk,
            position: 0,
            script_index: 0,
        }
    }

    fn next_chunk(&mut self) -> Option<AudioResult<Vec<u8>>> {
        let channels = usize::from(self.spec.channels.max(1));
        let pcm: Vec<u8> = match &self.source {
            LoopbackSource::Script(chunks) => {
                let chunk = chunks.get(self.script_index)?.clone();
                self.script_index += 1;
                return Some(Ok(chunk));
            }
            LoopbackSource::Silence => vec![0u8; self.frames_per_chunk * channels * 2],
            LoopbackSource::Tone {
                frequency,
                amplitude,
            } => {
                let rate = self.spec.sample_rate as f32;
                let peak = amplitude.clamp(0.0, 1.0) * f32::from(i16::MAX);
                let mut pcm = Vec::with_capacity(self.frames_per_chunk * channels * 2);
                for i in 0..self.frames_per_chunk as u64 {
                    let t = (self.position + i) as f32 / rate;
                    let sample = ((2.0 * PI * frequency * t).sin() * peak) as i16;
                    for _ in 0..channels {
                        pcm.extend_from_slice(&sample.to_le_bytes());
                    }
                }
                pcm
            }
        };
        self.position += self.frames_per_chunk as u64;
        Some(frame_pcm(&self.spec, &pcm))
    }
}

/// How a loopback output context measures time.
#[derive(Debug, Clone)]
pub enum LoopbackClock {
    /// Moves only when the test sets it
    Manual(Arc<Mutex<f64>>),
    /// Seconds of tokio time since the context opened
    Tokio,
}

impl LoopbackClock {
    pub fn manual() -> Self {
        LoopbackClock::Manual(Arc::new(Mutex::new(0.0)))
    }

    /// Set a manual clock. No effect on a tokio clock.
    pub fn set(&self, seconds: f64) {
        if let LoopbackClock::Manual(value) = self {
            *value.lock().unwrap_or_else(|e| e.into_inner()) = seconds;
        }
    }
}

/// One segment handed to a loopback output context.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Which `open` call produced the context (1-based)
    pub context: usize,
    pub start_at: f64,
    pub frames: usize,
    pub channels: u16,
    pub sample_rate: u32,
    pub peak: f32,
}

/// Virtual output device. Clones share the dispatch log.
#[derive(Debug, Clone)]
pub struct LoopbackOutput {
    clock: LoopbackClock,
    decode_delay: Option<Duration>,
    log: Arc<Mutex<Vec<Dispatch>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl LoopbackOutput {
    pub fn new(clock: LoopbackClock) -> Self {
        Self {
            clock,
            decode_delay: None,
            log: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every decode take `delay` of tokio time.
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = Some(delay);
        self
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl OutputBackend for LoopbackOutput {
    fn open(&self, channels: u16, sample_rate: u32) -> AudioResult<Box<dyn OutputContext>> {
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(context = id, channels, sample_rate, "Loopback output opened");
        Ok(Box::new(LoopbackContext {
            id,
            clock: self.clock.clone(),
            origin: Instant::now(),
            decode_delay: self.decode_delay,
            log: Arc::clone(&self.log),
            closed_count: Arc::clone(&self.closed),
            closed: false,
        }))
    }
}

struct LoopbackContext {
    id: usize,
    clock: LoopbackClock,
    origin: Instant,
    decode_delay: Option<Duration>,
    log: Arc<Mutex<Vec<Dispatch>>>,
    closed_count: Arc<AtomicUsize>,
    closed: bool,
}

impl OutputContext for LoopbackContext {
    fn current_time(&self) -> f64 {
        match &self.clock {
            LoopbackClock::Manual(value) => *value.lock().unwrap_or_else(|e| e.into_inner()),
            LoopbackClock::Tokio => self.origin.elapsed().as_secs_f64(),
        }
    }

    fn decode(&self, framed: Vec<u8>) -> BoxFuture<'static, AudioResult<DecodedSegment>> {
        let delay = self.decode_delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            decode_segment(&framed)
        })
    }

    fn schedule(&mut self, segment: DecodedSegment, start_at: f64) -> AudioResult<()> {
        if self.closed {
            return Err(AudioError::InvalidState("output context is closed".to_string()));
        }
        let peak = segment
            .samples()
            .iter()
            .fold(0.0f32, |peak, s| peak.max(s.abs()));
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Dispatch {
                context: self.id,
                start_at,
                frames: segment.frames(),
                channels: segment.channels(),
                sample_rate: segment.sample_rate(),
                peak,
            });
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closed_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::AudioBuffer;

    fn request(ms: u64) -> CaptureRequest {
        CaptureRequest {
            device_id: "default".to_string(),
            channels: 1,
            sample_rate: 16000,
            time_slice: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_tone_chunks_are_framed() {
        let mut generator = ChunkGenerator::new(
            LoopbackSource::Tone {
                frequency: 440.0,
                amplitude: 0.5,
            },
            &request(100),
        );
        let chunk = generator.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.len(), 44 + 3200);

        let buffer = AudioBuffer::from_wav_chunk(&chunk).unwrap();
        assert!((48..=50).contains(&buffer.volume_percent()));
    }

    #[test]
    fn test_script_runs_out() {
        let mut generator =
            ChunkGenerator::new(LoopbackSource::Script(vec![vec![1, 2, 3]]), &request(100));
        assert_eq!(generator.next_chunk().unwrap().unwrap(), vec![1, 2, 3]);
        assert!(generator.next_chunk().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_delivers_until_stopped() {
        let capture = LoopbackCapture::new(LoopbackSource::Silence).with_max_chunks(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        capture.open(request(500), tx).unwrap();

        assert_eq!(rx.recv().await, Some(CaptureEvent::Started));
        for _ in 0..2 {
            match rx.recv().await {
                Some(CaptureEvent::Chunk(chunk)) => assert_eq!(chunk.len(), 44 + 16000),
                other => panic!("unexpected event {:?}", other),
            }
        }

        capture.request_stop();
        assert_eq!(rx.recv().await, Some(CaptureEvent::Stopped));
    }

    #[test]
    fn test_unknown_input_is_unavailable() {
        let capture = LoopbackCapture::new(LoopbackSource::Silence)
            .with_devices(vec![MediaDevice::new("audioinput", "mic-1", "Mic")]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut req = request(500);
        req.device_id = "mic-2".to_string();
        assert!(matches!(
            capture.open(req, tx),
            Err(AudioError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_time() {
        let output = LoopbackOutput::new(LoopbackClock::Tokio);
        let context = output.open(1, 16000).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!((context.current_time() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_closed_context_rejects_schedule() {
        let output = LoopbackOutput::new(LoopbackClock::manual());
        let mut context = output.open(1, 16000).unwrap();
        context.close();
        context.close();
        assert_eq!(output.closed(), 1);
        assert!(context
            .schedule(DecodedSegment::silence(10, 1, 16000), 0.0)
            .is_err());
    }
}
