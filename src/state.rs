//! # Relay Metrics
//!
//! Counters shared by the recording session and the playback scheduler.
//!
//! ## Thread Safety:
//! Every counter is an `AtomicU64`, so the capture pump, decode tasks and the
//! tick loop can all record events without taking a lock. Wrap one
//! `RelayMetrics` in an `Arc` and hand clones to each component.
//!
//! Reads go through [`RelayMetrics::snapshot`], which copies the counters into a
//! plain serializable struct for the health report.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RelayMetrics {
    recordings_started: AtomicU64,
    recordings_stopped: AtomicU64,
    device_failures: AtomicU64,
    chunks_emitted: AtomicU64,
    bytes_emitted: AtomicU64,
    chunks_dropped: AtomicU64,
    segments_decoded: AtomicU64,
    decode_failures: AtomicU64,
    segments_dispatched: AtomicU64,
    underruns: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub recordings_started: u64,
    pub recordings_stopped: u64,
    pub device_failures: u64,
    pub chunks_emitted: u64,
    pub bytes_emitted: u64,
    /// Malformed capture chunks that were logged and skipped
    pub chunks_dropped: u64,
    pub segments_decoded: u64,
    pub decode_failures: u64,
    pub segments_dispatched: u64,
    /// Times the output clock overtook the schedule
    pub underruns: u64,
}

impl RelayMetrics {
    pub fn record_recording_started(&self) {
        self.recordings_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recording_stopped(&self) {
        self.recordings_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_failure(&self) {
        self.device_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_emitted(&self, bytes: usize) {
        self.chunks_emitted.fetch_add(1, Ordering::Relaxed);
        self.bytes_emitted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_chunk_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_decoded(&self) {
        self.segments_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_dispatched(&self) {
        self.segments_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            recordings_started: self.recordings_started.load(Ordering::Relaxed),
            recordings_stopped: self.recordings_stopped.load(Ordering::Relaxed),
            device_failures: self.device_failures.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            bytes_emitted: self.bytes_emitted.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            segments_decoded: self.segments_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            segments_dispatched: self.segments_dispatched.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Share of capture chunks that were dropped as malformed (0.0 when none arrived).
    pub fn drop_rate(&self) -> f64 {
        let total = self.chunks_emitted + self.chunks_dropped;
        if total == 0 {
            0.0
        } else {
            self.chunks_dropped as f64 / total as f64
        }
    }
}
