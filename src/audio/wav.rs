//! # WAV Container Codec
//!
//! Every chunk that crosses the wire is a complete, self-describing WAV file:
//! a fixed 44-byte header followed by the PCM payload.
//!
//! ## Header layout (all integers little-endian):
//! ```text
//! offset  size  field
//!      0     4  "RIFF"
//!      4     4  chunk size = payload bytes + 36
//!      8     4  "WAVE"
//!     12     4  "fmt "
//!     16     4  sub-chunk 1 size = 16
//!     20     2  audio format (1 = PCM, 3 = IEEE float)
//!     22     2  channel count
//!     24     4  sample rate
//!     28     4  byte rate = sample rate * channels * bits / 8
//!     32     2  block align = channels * bits / 8
//!     34     2  bits per sample
//!     36     4  "data"
//!     40     4  sub-chunk 2 size = payload bytes
//! ```
//! No extension chunks are written or accepted.

use crate::audio::player::DecodedSegment;
use crate::error::{AudioError, AudioResult};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

/// Size of the header produced by [`build_header`].
pub const HEADER_LEN: usize = 44;

const FMT_CHUNK_LEN: u32 = 16;

/// Sample encoding stored in the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavFormat {
    Pcm,
    IeeeFloat,
}

impl WavFormat {
    pub fn code(self) -> u16 {
        match self {
            WavFormat::Pcm => 1,
            WavFormat::IeeeFloat => 3,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(WavFormat::Pcm),
            3 => Some(WavFormat::IeeeFloat),
            _ => None,
        }
    }
}

/// Stream parameters carried by a WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub format: WavFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavSpec {
    /// 16-bit signed PCM, the format used on the wire.
    pub fn pcm16(channels: u16, sample_rate: u32) -> Self {
        Self {
            format: WavFormat::Pcm,
            channels,
            sample_rate,
            bits_per_sample: 16,
        }
    }

    /// 32-bit IEEE float.
    pub fn float32(channels: u16, sample_rate: u32) -> Self {
        Self {
            format: WavFormat::IeeeFloat,
            channels,
            sample_rate,
            bits_per_sample: 32,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    pub fn block_align(&self) -> u16 {
        self.channels.wrapping_mul(self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate
            .wrapping_mul(u32::from(self.channels))
            .wrapping_mul(u32::from(self.bits_per_sample / 8))
    }
}

/// A parsed header: the stream parameters plus the declared payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub spec: WavSpec,
    pub data_len: u32,
}

/// Build the 44-byte header for `total_sample_count` samples.
///
/// `total_sample_count` counts individual samples (all channels together), so the
/// payload is `total_sample_count * bits_per_sample / 8` bytes. Matching the payload
/// to that count is the caller's job.
///
/// ## Errors:
/// - `CallerConfiguration` when the sample rate, channel count or bit depth is zero,
///   or when the payload size does not fit the 32-bit size fields
pub fn build_header(spec: &WavSpec, total_sample_count: u32) -> AudioResult<[u8; HEADER_LEN]> {
    if spec.sample_rate == 0 {
        return Err(AudioError::CallerConfiguration(
            "sample rate must be positive".to_string(),
        ));
    }
    if spec.channels == 0 {
        return Err(AudioError::CallerConfiguration(
            "channel count must be positive".to_string(),
        ));
    }
    if spec.bits_per_sample < 8 {
        return Err(AudioError::CallerConfiguration(format!(
            "unsupported bit depth {}",
            spec.bits_per_sample
        )));
    }

    let data_len = total_sample_count
        .checked_mul(u32::from(spec.bits_per_sample / 8))
        .and_then(|len| len.checked_add(36).map(|_| len))
        .ok_or_else(|| {
            AudioError::CallerConfiguration(format!(
                "{} samples overflow the WAV size fields",
                total_sample_count
            ))
        })?;

    let mut header = Vec::with_capacity(HEADER_LEN);
    write_header(&mut header, spec, data_len).map_err(|e| {
        AudioError::CallerConfiguration(format!("failed to write header: {}", e))
    })?;

    let mut out = [0u8; HEADER_LEN];
    out.copy_from_slice(&header);
    Ok(out)
}

fn write_header(out: &mut Vec<u8>, spec: &WavSpec, data_len: u32) -> std::io::Result<()> {
    // RIFF chunk
    out.extend_from_slice(b"RIFF");
    out.write_u32::<LittleEndian>(data_len + 36)?;
    out.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    out.extend_from_slice(b"fmt ");
    out.write_u32::<LittleEndian>(FMT_CHUNK_LEN)?;
    out.write_u16::<LittleEndian>(spec.format.code())?;
    out.write_u16::<LittleEndian>(spec.channels)?;
    out.write_u32::<LittleEndian>(spec.sample_rate)?;
    out.write_u32::<LittleEndian>(spec.byte_rate())?;
    out.write_u16::<LittleEndian>(spec.block_align())?;
    out.write_u16::<LittleEndian>(spec.bits_per_sample)?;

    // data sub-chunk
    out.extend_from_slice(b"data");
    out.write_u32::<LittleEndian>(data_len)?;
    Ok(())
}

/// Drop the first 44 bytes of a framed chunk, returning the PCM payload.
pub fn strip_header(framed: &[u8]) -> AudioResult<&[u8]> {
    if framed.len() < HEADER_LEN {
        return Err(AudioError::short_container(framed.len()));
    }
    Ok(&framed[HEADER_LEN..])
}

/// Wrap raw PCM in a header, producing one self-contained WAV chunk.
///
/// The sample count is derived from the payload length, so the payload must hold
/// whole samples for `spec.bits_per_sample`.
pub fn frame_pcm(spec: &WavSpec, pcm: &[u8]) -> AudioResult<Vec<u8>> {
    let bytes_per_sample = spec.bytes_per_sample().max(1);
    if pcm.len() % bytes_per_sample != 0 {
        return Err(AudioError::MalformedBuffer { len: pcm.len() });
    }
    let sample_count = u32::try_from(pcm.len() / bytes_per_sample).map_err(|_| {
        AudioError::CallerConfiguration(format!("{} byte payload is too large", pcm.len()))
    })?;

    let header = build_header(spec, sample_count)?;
    let mut framed = Vec::with_capacity(HEADER_LEN + pcm.len());
    framed.extend_from_slice(&header);
    framed.extend_from_slice(pcm);
    Ok(framed)
}

/// Read back the fields written by [`build_header`].
pub fn parse_header(framed: &[u8]) -> AudioResult<WavHeader> {
    if framed.len() < HEADER_LEN {
        return Err(AudioError::short_container(framed.len()));
    }

    let malformed = |reason: &'static str| AudioError::MalformedContainer {
        len: framed.len(),
        reason,
    };

    if &framed[0..4] != b"RIFF" {
        return Err(malformed("missing RIFF tag"));
    }
    if &framed[8..12] != b"WAVE" {
        return Err(malformed("missing WAVE tag"));
    }
    if &framed[12..16] != b"fmt " {
        return Err(malformed("missing fmt tag"));
    }
    if LittleEndian::read_u32(&framed[16..20]) != FMT_CHUNK_LEN {
        return Err(malformed("unsupported fmt chunk size"));
    }
    if &framed[36..40] != b"data" {
        return Err(malformed("missing data tag"));
    }

    let format = WavFormat::from_code(LittleEndian::read_u16(&framed[20..22]))
        .ok_or_else(|| malformed("unsupported audio format"))?;

    let spec = WavSpec {
        format,
        channels: LittleEndian::read_u16(&framed[22..24]),
        sample_rate: LittleEndian::read_u32(&framed[24..28]),
        bits_per_sample: LittleEndian::read_u16(&framed[34..36]),
    };

    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(malformed("zero channels or sample rate"));
    }

    Ok(WavHeader {
        spec,
        data_len: LittleEndian::read_u32(&framed[40..44]),
    })
}

/// Default decoder: turn a framed chunk into a playable segment.
///
/// Accepts 16-bit PCM and 32-bit float. Samples are converted to interleaved `f32`
/// in [-1.0, 1.0]. The real payload length wins over the declared `data` size,
/// truncated to whole frames.
pub fn decode_segment(framed: &[u8]) -> AudioResult<DecodedSegment> {
    let header = parse_header(framed)?;
    let payload = strip_header(framed)?;
    let spec = header.spec;

    let samples: Vec<f32> = match (spec.format, spec.bits_per_sample) {
        (WavFormat::Pcm, 16) => payload
            .chunks_exact(2)
            .map(|b| f32::from(LittleEndian::read_i16(b)) / 32768.0)
            .collect(),
        (WavFormat::IeeeFloat, 32) => payload
            .chunks_exact(4)
            .map(LittleEndian::read_f32)
            .collect(),
        (format, bits) => {
            return Err(AudioError::Decode(format!(
                "unsupported sample encoding {:?}/{} bits",
                format, bits
            )))
        }
    };

    let channels = usize::from(spec.channels);
    let frames = samples.len() / channels;
    let mut samples = samples;
    samples.truncate(frames * channels);

    Ok(DecodedSegment::new(samples, spec.channels, spec.sample_rate))
}
