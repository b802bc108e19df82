//! Integer PCM at a fixed bit depth.
//!
//! Mixing happens in `f32`; everything handed to a sink or written to disk is
//! quantized first. Samples are held as `i32` regardless of width so one buffer
//! type covers every supported depth.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("unsupported bit depth: {0} (expected 8, 16, 24 or 32)")]
    UnsupportedBitDepth(u16),

    #[error("byte length {len} is not a multiple of the {width}-byte sample width")]
    MisalignedBytes { len: usize, width: usize },
}

/// Width of one signed integer PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum BitDepth {
    Eight,
    Sixteen,
    TwentyFour,
    ThirtyTwo,
}

impl BitDepth {
    pub fn new(bits: u16) -> Result<Self, FormatError> {
        match bits {
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            24 => Ok(Self::TwentyFour),
            32 => Ok(Self::ThirtyTwo),
            other => Err(FormatError::UnsupportedBitDepth(other)),
        }
    }

    #[inline]
    pub fn bits(self) -> u16 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
            Self::TwentyFour => 24,
            Self::ThirtyTwo => 32,
        }
    }

    #[inline]
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Largest representable sample value, `2^(bits-1) - 1`.
    #[inline]
    pub fn max_value(self) -> i32 {
        ((1i64 << (self.bits() - 1)) - 1) as i32
    }
}

impl TryFrom<u16> for BitDepth {
    type Error = FormatError;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        Self::new(bits)
    }
}

impl From<BitDepth> for u16 {
    fn from(depth: BitDepth) -> Self {
        depth.bits()
    }
}

impl std::fmt::Display for BitDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Interleaved integer PCM tagged with its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    pub samples: Vec<i32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: BitDepth,
}

impl PcmBuffer {
    pub fn empty(sample_rate: u32, channels: u16, bit_depth: BitDepth) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
            bit_depth,
        }
    }

    /// Quantize float samples in [-1, 1] by scaling with the depth's maximum and
    /// truncating toward zero.
    pub fn from_float(samples: &[f32], sample_rate: u32, channels: u16, bit_depth: BitDepth) -> Self {
        let max = bit_depth.max_value() as f64;
        Self {
            samples: samples.iter().map(|s| (*s as f64 * max) as i32).collect(),
            sample_rate,
            channels,
            bit_depth,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Convert to float in [-1, 1].
    pub fn to_float(&self) -> Vec<f32> {
        let max = self.bit_depth.max_value() as f64;
        self.samples.iter().map(|s| (*s as f64 / max) as f32).collect()
    }

    /// Little-endian bytes at the buffer's sample width.
    pub fn to_bytes(&self) -> Vec<u8> {
        let width = self.bit_depth.bytes();
        let mut bytes = Vec::with_capacity(self.samples.len() * width);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes()[..width]);
        }
        bytes
    }

    /// Inverse of [`PcmBuffer::to_bytes`].
    pub fn from_bytes(
        bytes: &[u8],
        sample_rate: u32,
        channels: u16,
        bit_depth: BitDepth,
    ) -> Result<Self, FormatError> {
        let width = bit_depth.bytes();
        if bytes.len() % width != 0 {
            return Err(FormatError::MisalignedBytes {
                len: bytes.len(),
                width,
            });
        }
        let shift = 32 - bit_depth.bits() as u32;
        let samples = bytes
            .chunks_exact(width)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..width].copy_from_slice(chunk);
                // sign-extend from the top of the word
                (i32::from_le_bytes(word) << shift) >> shift
            })
            .collect();
        Ok(Self {
            samples,
            sample_rate,
            channels,
            bit_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_depths() {
        assert_eq!(BitDepth::new(12), Err(FormatError::UnsupportedBitDepth(12)));
        assert_eq!(BitDepth::try_from(24), Ok(BitDepth::TwentyFour));
    }

    #[test]
    fn test_max_values() {
        assert_eq!(BitDepth::Eight.max_value(), 127);
        assert_eq!(BitDepth::Sixteen.max_value(), 32767);
        assert_eq!(BitDepth::TwentyFour.max_value(), 8_388_607);
        assert_eq!(BitDepth::ThirtyTwo.max_value(), i32::MAX);
    }

    #[test]
    fn test_quantize_truncates() {
        let pcm = PcmBuffer::from_float(&[1.0, -1.0, 0.5, 0.0], 44100, 2, BitDepth::Sixteen);
        assert_eq!(pcm.samples, vec![32767, -32767, 16383, 0]);
        assert_eq!(pcm.frames(), 2);
    }

    #[test]
    fn test_bytes_are_packed_little_endian() {
        let pcm = PcmBuffer {
            samples: vec![1, -2],
            sample_rate: 8000,
            channels: 1,
            bit_depth: BitDepth::TwentyFour,
        };
        let bytes = pcm.to_bytes();
        assert_eq!(bytes, vec![0x01, 0x00, 0x00, 0xfe, 0xff, 0xff]);

        let back = PcmBuffer::from_bytes(&bytes, 8000, 1, BitDepth::TwentyFour).unwrap();
        assert_eq!(back, pcm);
    }

    #[test]
    fn test_misaligned_bytes_fail() {
        let err = PcmBuffer::from_bytes(&[0, 1, 2], 8000, 1, BitDepth::Sixteen).unwrap_err();
        assert_eq!(err, FormatError::MisalignedBytes { len: 3, width: 2 });
    }
}
