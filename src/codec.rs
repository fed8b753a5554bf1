//! Stateless transcoding between wire PCM bytes and normalised in-core sample vectors.
//!
//! Mirrors `original_source/server/anc_server.py`'s `on_message` decode path
//! (`np.frombuffer` + conditional `byteswap` + divide-by-`MAX_AMPLITUDE`) and its
//! inverse encode path used before publishing the anti-noise chunk.
//!
//! The sample vector is `f64`, not `f32`: the original's `np.float32` cannot represent
//! every `i32` exactly (24-bit mantissa vs. 31-bit magnitude), which silently breaks the
//! bit-exact `encode(decode(b)) == b` round-trip this codec promises for 32-bit PCM.
//! `f64`'s 53-bit mantissa covers the full `i32` range exactly, so the guarantee holds
//! unconditionally for both bit depths instead of inheriting that rounding bug.

use crate::error::AncError;

/// PCM sample width on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BitDepth {
    Sixteen,
    ThirtyTwo,
}

impl BitDepth {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            BitDepth::Sixteen => 2,
            BitDepth::ThirtyTwo => 4,
        }
    }
}

/// Wire byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

/// Codec configuration. Cheap to clone; carried by value into each call site.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CodecConfig {
    pub bit_depth: BitDepth,
    pub endianness: Endianness,
    pub normalize: bool,
    pub max_amplitude: f64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            bit_depth: BitDepth::Sixteen,
            endianness: Endianness::Little,
            normalize: true,
            max_amplitude: 32767.0,
        }
    }
}

/// Stateless PCM codec. No allocation carries across calls; each call owns its buffers.
#[derive(Debug, Clone, Copy)]
pub struct PcmCodec {
    config: CodecConfig,
}

impl PcmCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Decode a wire PCM chunk into a normalised (or raw-widened) sample vector.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<f64>, AncError> {
        let bytes_per_sample = self.config.bit_depth.bytes_per_sample();
        if bytes.len() % bytes_per_sample != 0 {
            return Err(AncError::Format {
                len: bytes.len(),
                bytes_per_sample,
            });
        }

        let mut samples = Vec::with_capacity(bytes.len() / bytes_per_sample);
        for chunk in bytes.chunks_exact(bytes_per_sample) {
            let raw = self.decode_one(chunk);
            let sample = if self.config.normalize {
                raw / self.config.max_amplitude
            } else {
                raw
            };
            samples.push(sample);
        }
        Ok(samples)
    }

    fn decode_one(&self, chunk: &[u8]) -> f64 {
        match self.config.bit_depth {
            BitDepth::Sixteen => {
                let raw = [chunk[0], chunk[1]];
                let value = match self.config.endianness {
                    Endianness::Little => i16::from_le_bytes(raw),
                    Endianness::Big => i16::from_be_bytes(raw),
                };
                value as f64
            }
            BitDepth::ThirtyTwo => {
                let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
                let value = match self.config.endianness {
                    Endianness::Little => i32::from_le_bytes(raw),
                    Endianness::Big => i32::from_be_bytes(raw),
                };
                value as f64
            }
        }
    }

    /// Encode a sample vector back into wire PCM bytes, clamping to the representable
    /// integer range of the configured bit depth.
    pub fn encode(&self, samples: &[f64]) -> Vec<u8> {
        let bytes_per_sample = self.config.bit_depth.bytes_per_sample();
        let mut bytes = Vec::with_capacity(samples.len() * bytes_per_sample);
        for &sample in samples {
            let scaled = if self.config.normalize {
                sample * self.config.max_amplitude
            } else {
                sample
            };
            self.encode_one(scaled, &mut bytes);
        }
        bytes
    }

    fn encode_one(&self, scaled: f64, out: &mut Vec<u8>) {
        let rounded = scaled.round();
        match self.config.bit_depth {
            BitDepth::Sixteen => {
                let clamped = rounded.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                let raw = match self.config.endianness {
                    Endianness::Little => clamped.to_le_bytes(),
                    Endianness::Big => clamped.to_be_bytes(),
                };
                out.extend_from_slice(&raw);
            }
            BitDepth::ThirtyTwo => {
                let clamped = rounded.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                let raw = match self.config.endianness {
                    Endianness::Little => clamped.to_le_bytes(),
                    Endianness::Big => clamped.to_be_bytes(),
                };
                out.extend_from_slice(&raw);
            }
        }
    }
}
