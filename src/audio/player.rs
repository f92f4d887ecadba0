//! # Playback Scheduler
//!
//! Turns a stream of independently decoded segments into gapless output.
//!
//! ## How it works:
//! 1. **Enqueue**: `add_buffer` hands a framed chunk to the output platform's
//!    decoder; the decoded segment is appended to the queue when decoding finishes
//! 2. **Gate**: nothing is dispatched while fewer than `queue_depth_threshold`
//!    segments are queued, so arrival jitter never starves the output
//! 3. **Schedule**: the head segment is started at `start_time` on the output clock,
//!    then `start_time` advances by exactly that segment's duration
//!
//! The first segment of a run starts half its own duration in the future.
//!
//! ## Thread Safety:
//! Queue, clock anchor and output context live behind one `Mutex`. Decode
//! completions and the tick loop run as tokio tasks and only touch state through
//! that lock; it is never held across an `.await`.

use crate::config::RelayConfig;
use crate::error::{AudioError, AudioResult};
use crate::state::RelayMetrics;
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Sample rate used when the caller passes 0.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// A decoded, playable block of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSegment {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    frames: usize,
}

impl DecodedSegment {
    /// `samples` are interleaved by channel.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let frames = samples.len() / usize::from(channels.max(1));
        Self {
            samples,
            channels,
            sample_rate,
            frames,
        }
    }

    /// A segment of `frames` silent frames.
    pub fn silence(frames: usize, channels: u16, sample_rate: u32) -> Self {
        Self::new(
            vec![0.0; frames * usize::from(channels.max(1))],
            channels,
            sample_rate,
        )
    }

    /// Length in sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Playing time in seconds at the segment's own sample rate.
    pub fn duration(&self) -> f64 {
        self.frames as f64 / f64::from(self.sample_rate.max(1))
    }
}

/// Factory for output contexts, one per `initialize` call.
pub trait OutputBackend: Send + Sync {
    fn open(&self, channels: u16, sample_rate: u32) -> AudioResult<Box<dyn OutputContext>>;
}

/// An open output device with its own clock.
pub trait OutputContext: Send {
    /// Seconds elapsed on the output clock.
    fn current_time(&self) -> f64;

    /// Decode a framed chunk. Completion order across calls is not guaranteed.
    fn decode(&self, framed: Vec<u8>) -> BoxFuture<'static, AudioResult<DecodedSegment>>;

    /// Play `segment` starting exactly at `start_at` on the output clock.
    fn schedule(&mut self, segment: DecodedSegment, start_at: f64) -> AudioResult<()>;

    /// Release the native handle. Segments already scheduled may still finish.
    fn close(&mut self);
}

/// Segments waiting for output plus the running clock anchor.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    segments: VecDeque<DecodedSegment>,
    /// Output-clock time at which the next popped segment starts; 0 = not anchored
    start_time: f64,
    cancelled: bool,
}

impl PlaybackQueue {
    fn reset(&mut self) {
        self.segments.clear();
        self.start_time = 0.0;
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Result of one scheduling step.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Playback was stopped; the loop should end
    Cancelled,
    /// `initialize` has not been called, or the last open failed
    NotInitialized,
    /// Not enough lookahead queued yet
    Waiting { depth: usize },
    /// The head segment was scheduled
    Dispatched { start_at: f64, duration: f64 },
}

/// Tick cadence and lookahead, taken from [`RelayConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub queue_depth_threshold: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            queue_depth_threshold: 4,
        }
    }
}

impl From<&RelayConfig> for SchedulerSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            tick: config.timing.tick(),
            queue_depth_threshold: config.timing.queue_depth_threshold,
        }
    }
}

struct PlayerInner {
    context: Option<Box<dyn OutputContext>>,
    queue: PlaybackQueue,
    sample_rate: u32,
    channels: u16,
    /// Bumped by every `initialize`; decodes from older generations are dropped
    generation: u64,
    /// Bumped by every `start_playing`; older loops exit
    run: u64,
}

struct Shared {
    backend: Arc<dyn OutputBackend>,
    settings: SchedulerSettings,
    metrics: Arc<RelayMetrics>,
    inner: Mutex<PlayerInner>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the output context and the segment queue.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct PlaybackScheduler {
    shared: Arc<Shared>,
}

impl PlaybackScheduler {
    pub fn new(
        backend: Arc<dyn OutputBackend>,
        settings: SchedulerSettings,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                settings,
                metrics,
                inner: Mutex::new(PlayerInner {
                    context: None,
                    queue: PlaybackQueue::default(),
                    sample_rate: DEFAULT_SAMPLE_RATE,
                    channels: 1,
                    generation: 0,
                    run: 0,
                }),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Reset the queue and open a fresh output context.
    ///
    /// A zero `sample_rate` becomes 16000; any channel count other than 1 or 2
    /// becomes 1. The previous context is closed before the new one opens.
    pub fn initialize(&self, channels: u16, sample_rate: u32) -> AudioResult<()> {
        let sample_rate = if sample_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            sample_rate
        };
        let channels = if channels == 1 || channels == 2 { channels } else { 1 };

        let mut inner = self.shared.lock();
        if let Some(mut previous) = inner.context.take() {
            previous.close();
            debug!("Closed previous output context");
        }

        inner.queue.reset();
        inner.generation += 1;
        inner.sample_rate = sample_rate;
        inner.channels = channels;

        let context = self.shared.backend.open(channels, sample_rate)?;
        inner.context = Some(context);

        info!(channels, sample_rate, "Output context initialized");
        Ok(())
    }

    /// Submit a framed chunk for decoding; the segment joins the queue tail when ready.
    ///
    /// ## Errors:
    /// `InvalidState` if no output context is open.
    ///
    /// ## Panics:
    /// Outside a tokio runtime, since decoding completes on a spawned task.
    pub fn add_buffer(&self, framed: Vec<u8>) -> AudioResult<()> {
        let (decode, generation) = {
            let inner = self.shared.lock();
            let context = inner.context.as_ref().ok_or_else(|| {
                AudioError::InvalidState(
                    "add_buffer called before the audio player was initialized".to_string(),
                )
            })?;
            (context.decode(framed), inner.generation)
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            match decode.await {
                Ok(segment) => shared.enqueue(segment, generation),
                Err(e) => {
                    shared.metrics.record_decode_failure();
                    warn!(error = %e, "Dropping chunk that failed to decode");
                }
            }
        });
        Ok(())
    }

    /// Append an already-decoded segment.
    pub fn add_segment(&self, segment: DecodedSegment) -> AudioResult<()> {
        let generation = {
            let inner = self.shared.lock();
            if inner.context.is_none() {
                return Err(AudioError::InvalidState(
                    "add_segment called before the audio player was initialized".to_string(),
                ));
            }
            inner.generation
        };
        self.shared.enqueue(segment, generation);
        Ok(())
    }

    /// Begin a new playback run: clear the stop flag, drop the clock anchor and
    /// start ticking. A loop left over from an earlier run is retired.
    ///
    /// ## Panics:
    /// Outside a tokio runtime, since the tick loop is a spawned task.
    pub fn start_playing(&self) {
        let run = {
            let mut inner = self.shared.lock();
            inner.queue.cancelled = false;
            inner.queue.start_time = 0.0;
            inner.run += 1;
            inner.run
        };

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.settings.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if shared.lock().run != run {
                    break;
                }
                if shared.tick() == TickOutcome::Cancelled {
                    debug!(run, "Playback loop stopped");
                    break;
                }
            }
        });

        let mut slot = self
            .shared
            .loop_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        info!(run, "Playback started");
    }

    /// Ask the loop to stop at its next tick. Already scheduled audio plays out.
    pub fn stop_playing(&self) {
        self.shared.lock().queue.cancelled = true;
        info!("Playback stop requested");
    }

    /// Run one scheduling step immediately.
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }

    /// Stop playback, drop queued segments and close the output context.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        inner.queue.cancelled = true;
        inner.queue.reset();
        inner.generation += 1;
        if let Some(mut context) = inner.context.take() {
            context.close();
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Output-clock time of the next dispatch (0 when not yet anchored).
    pub fn start_time(&self) -> f64 {
        self.shared.lock().queue.start_time
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().queue.cancelled
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().context.is_some()
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.lock().sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.shared.lock().channels
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PlayerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(&self, segment: DecodedSegment, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("Discarding segment decoded for a previous output context");
            return;
        }
        inner.queue.segments.push_back(segment);
        self.metrics.record_segment_decoded();
    }

    fn tick(&self) -> TickOutcome {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.queue.cancelled {
            return TickOutcome::Cancelled;
        }
        let Some(context) = inner.context.as_mut() else {
            return TickOutcome::NotInitialized;
        };

        let depth = inner.queue.segments.len();
        if depth < self.settings.queue_depth_threshold {
            return TickOutcome::Waiting { depth };
        }
        let Some(segment) = inner.queue.segments.pop_front() else {
            return TickOutcome::Waiting { depth };
        };

        // Decoders need not resample to the context rate
        let duration = segment.duration();
        let now = context.current_time();

        if inner.queue.start_time == 0.0 {
            inner.queue.start_time = now + duration / 2.0;
        } else if inner.queue.start_time <= now {
            // Output clock overtook the schedule; anchor again like a first segment
            warn!(
                behind_secs = now - inner.queue.start_time,
                "Playback underrun, re-anchoring schedule"
            );
            self.metrics.record_underrun();
            inner.queue.start_time = now + duration / 2.0;
        }

        let start_at = inner.queue.start_time;
        if let Err(e) = context.schedule(segment, start_at) {
            warn!(error = %e, start_at, "Output rejected segment");
        } else {
            self.metrics.record_segment_dispatched();
        }
        inner.queue.start_time += duration;

        debug!(start_at, duration, remaining = inner.queue.segments.len(), "Segment dispatched");
        TickOutcome::Dispatched { start_at, duration }
    }
}
