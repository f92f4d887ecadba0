//! Peak volume metering over raw 16-bit PCM.

use crate::error::{AudioError, AudioResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Largest positive 16-bit magnitude; 100% on the meter.
pub const FULL_SCALE: u32 = i16::MAX as u32;

/// Loudest absolute sample in `pcm`, as a percentage of full scale.
///
/// All channels are pooled; there is no per-channel result. `i16::MIN` has a
/// magnitude one above `FULL_SCALE` and is clamped to 100.
pub fn peak_volume_percent(pcm: &[u8]) -> AudioResult<u8> {
    if pcm.len() % 2 != 0 {
        return Err(AudioError::MalformedBuffer { len: pcm.len() });
    }

    let mut cursor = Cursor::new(pcm);
    let mut peak: u32 = 0;
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        peak = peak.max(u32::from(sample.unsigned_abs()));
    }

    let percent = (peak * 100 / FULL_SCALE).min(100);
    Ok(percent as u8)
}

/// Decode little-endian 16-bit PCM into samples.
pub fn pcm16_samples(pcm: &[u8]) -> AudioResult<Vec<i16>> {
    if pcm.len() % 2 != 0 {
        return Err(AudioError::MalformedBuffer { len: pcm.len() });
    }

    let mut cursor = Cursor::new(pcm);
    let mut samples = Vec::with_capacity(pcm.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_silence_is_zero() {
        for len in [2usize, 4, 100, 16000] {
            assert_eq!(peak_volume_percent(&vec![0u8; len]).unwrap(), 0);
        }
        assert_eq!(peak_volume_percent(&[]).unwrap(), 0);
    }

    #[test]
    fn test_full_scale_is_exactly_100() {
        assert_eq!(peak_volume_percent(&pcm(&[0, i16::MAX, 5])).unwrap(), 100);
    }

    #[test]
    fn test_minimum_sample_is_clamped() {
        assert_eq!(peak_volume_percent(&pcm(&[i16::MIN])).unwrap(), 100);
        assert_eq!(peak_volume_percent(&pcm(&[3, i16::MIN, -7])).unwrap(), 100);
    }

    #[test]
    fn test_percent_floors() {
        // 16383 * 100 / 32767 = 49.99
        assert_eq!(peak_volume_percent(&pcm(&[16383])).unwrap(), 49);
        assert_eq!(peak_volume_percent(&pcm(&[-16384, 100])).unwrap(), 50);
        assert_eq!(peak_volume_percent(&pcm(&[327])).unwrap(), 0);
        assert_eq!(peak_volume_percent(&pcm(&[328])).unwrap(), 1);
    }

    #[test]
    fn test_channels_are_pooled() {
        // Interleaved stereo: left quiet, right loud
        let data = pcm(&[10, 20000, -10, -30000]);
        assert_eq!(peak_volume_percent(&data).unwrap(), 91);
    }

    #[test]
    fn test_odd_length_rejected() {
        assert_eq!(
            peak_volume_percent(&[0u8; 3]),
            Err(AudioError::MalformedBuffer { len: 3 })
        );
        assert!(pcm16_samples(&[1u8]).is_err());
    }

    #[test]
    fn test_pcm16_samples() {
        assert_eq!(pcm16_samples(&pcm(&[1, -1, 256])).unwrap(), vec![1, -1, 256]);
    }
}
