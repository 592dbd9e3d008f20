//! Audio decoders turning encoded click bytes into [`ClickSound`] values.
//!
//! Decoding sits outside the scheduling core; the engine only depends on the
//! [`AudioDecoder`] trait.

use std::io::Cursor;

use crate::audio::click::ClickSound;
use crate::error::MetronomeError;

/// Decodes encoded audio bytes into a click sound.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<ClickSound, MetronomeError>;
}

/// RIFF/WAVE decoder backed by `hound`.
///
/// Channels stay interleaved; integer samples are normalised to [-1.0, 1.0].
#[derive(Debug, Default, Clone, Copy)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<ClickSound, MetronomeError> {
        if bytes.is_empty() {
            return Err(MetronomeError::DecodeError {
                reason: "empty WAV data".to_string(),
            });
        }

        let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(MetronomeError::DecodeError {
                reason: "WAV data has zero channels".to_string(),
            });
        }

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<f32>, _>>()?,
            hound::SampleFormat::Int => match spec.bits_per_sample {
                8 => reader
                    .samples::<i8>()
                    .map(|sample| sample.map(|v| v as f32 / i8::MAX as f32))
                    .collect::<Result<Vec<f32>, _>>()?,
                16 => reader
                    .samples::<i16>()
                    .map(|sample| sample.map(|v| v as f32 / i16::MAX as f32))
                    .collect::<Result<Vec<f32>, _>>()?,
                24 => reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|v| v as f32 / 8_388_607.0))
                    .collect::<Result<Vec<f32>, _>>()?,
                32 => reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|v| v as f32 / i32::MAX as f32))
                    .collect::<Result<Vec<f32>, _>>()?,
                bits => {
                    return Err(MetronomeError::DecodeError {
                        reason: format!("unsupported bits_per_sample={}", bits),
                    })
                }
            },
        };

        tracing::debug!(
            "[WavDecoder] Decoded {} samples ({} ch @ {} Hz)",
            samples.len(),
            spec.channels,
            spec.sample_rate
        );

        Ok(ClickSound::new(spec.channels, spec.sample_rate, samples))
    }
}

/// Headerless little-endian signed 16-bit PCM decoder.
#[derive(Debug, Clone, Copy)]
pub struct Pcm16Decoder {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Pcm16Decoder {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

impl AudioDecoder for Pcm16Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<ClickSound, MetronomeError> {
        if bytes.is_empty() {
            return Err(MetronomeError::DecodeError {
                reason: "empty PCM data".to_string(),
            });
        }
        if bytes.len() % 2 != 0 {
            return Err(MetronomeError::DecodeError {
                reason: format!("invalid byte length {} for PCM_16BIT", bytes.len()),
            });
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
            .collect();

        Ok(ClickSound::new(self.channels, self.sample_rate, samples))
    }
}
