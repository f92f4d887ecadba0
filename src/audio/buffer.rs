//! # Captured Audio Buffers
//!
//! One [`AudioBuffer`] is produced per capture time slice. It holds the raw PCM
//! payload (header already stripped) and the peak loudness of that payload.
//!
//! ## Key Features:
//! - **Validated on construction**: odd-length payloads are rejected, so every
//!   buffer holds whole 16-bit samples
//! - **Immutable**: no setters; ownership moves to whoever receives the event
//! - **Self-metering**: volume is computed once, when the buffer is built

use crate::audio::meter::{pcm16_samples, peak_volume_percent};
use crate::audio::wav::strip_header;
use crate::error::AudioResult;
use std::time::Duration;

/// Raw little-endian 16-bit PCM plus its peak volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    data: Vec<u8>,
    volume_percent: u8,
}

impl AudioBuffer {
    /// Build a buffer from raw PCM.
    ///
    /// ## Errors:
    /// `MalformedBuffer` when `data` has an odd length.
    pub fn from_pcm(data: Vec<u8>) -> AudioResult<Self> {
        let volume_percent = peak_volume_percent(&data)?;
        Ok(Self {
            data,
            volume_percent,
        })
    }

    /// Build a buffer from a framed WAV chunk as delivered by the capture platform.
    ///
    /// ## Errors:
    /// - `MalformedContainer` when the chunk is shorter than the header
    /// - `MalformedBuffer` when the remaining payload has an odd length
    pub fn from_wav_chunk(chunk: &[u8]) -> AudioResult<Self> {
        let pcm = strip_header(chunk)?;
        Self::from_pcm(pcm.to_vec())
    }

    /// Raw PCM bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Peak loudness, 0-100.
    pub fn volume_percent(&self) -> u8 {
        self.volume_percent
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of 16-bit samples across all channels.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Decoded samples. Cannot fail since the length was validated on construction.
    pub fn samples(&self) -> Vec<i16> {
        pcm16_samples(&self.data).unwrap_or_default()
    }

    /// Playing time of this buffer for the given stream format.
    ///
    /// ## Calculation:
    /// Duration = sample_count / channels / sample_rate
    pub fn duration(&self, channels: u16, sample_rate: u32) -> Duration {
        if channels == 0 || sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.sample_count() as f64 / f64::from(channels);
        Duration::from_secs_f64(frames / f64::from(sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{frame_pcm, WavSpec};
    use crate::error::AudioError;

    #[test]
    fn test_from_pcm() {
        let data: Vec<u8> = [100i16, -16384]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let buffer = AudioBuffer::from_pcm(data.clone()).unwrap();

        assert_eq!(buffer.data(), data.as_slice());
        assert_eq!(buffer.volume_percent(), 50);
        assert_eq!(buffer.sample_count(), 2);
        assert_eq!(buffer.samples(), vec![100, -16384]);
    }

    #[test]
    fn test_odd_length_rejected() {
        assert_eq!(
            AudioBuffer::from_pcm(vec![0u8; 9]),
            Err(AudioError::MalformedBuffer { len: 9 })
        );
    }

    #[test]
    fn test_from_wav_chunk() {
        let pcm = vec![0u8; 16000];
        let chunk = frame_pcm(&WavSpec::pcm16(1, 16000), &pcm).unwrap();
        let buffer = AudioBuffer::from_wav_chunk(&chunk).unwrap();

        assert_eq!(buffer.len(), 16000);
        assert_eq!(buffer.volume_percent(), 0);
        assert_eq!(buffer.duration(1, 16000), Duration::from_millis(500));

        assert!(matches!(
            AudioBuffer::from_wav_chunk(&chunk[..20]),
            Err(AudioError::MalformedContainer { len: 20, .. })
        ));
    }

    #[test]
    fn test_duration_stereo() {
        let buffer = AudioBuffer::from_pcm(vec![0u8; 64000]).unwrap();
        assert_eq!(buffer.duration(2, 16000), Duration::from_secs(1));
        assert_eq!(buffer.duration(0, 16000), Duration::ZERO);
    }
}
