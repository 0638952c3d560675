//! Audio frame types and utilities

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    #[default]
    Hz8000,
    /// 16kHz - Standard speech recognition
    Hz16000,
    /// 22.05kHz - TTS output
    Hz22050,
    /// 24kHz - Common TTS provider output
    Hz24000,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - Professional audio
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Parse a rate in Hz, returning `None` for unsupported values
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            22050 => Some(SampleRate::Hz22050),
            24000 => Some(SampleRate::Hz24000),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    /// Get frame size for 20ms chunk
    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }
}

/// Audio encoding formats seen at the transport edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit signed PCM (little-endian)
    Pcm16,
    /// G.711 mu-law (telephony)
    #[default]
    Mulaw,
}

/// Audio frame with metadata
///
/// Samples are mono f32 normalized to [-1.0, 1.0]. Frames are immutable once
/// built; stages that need different audio build a new frame.
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw audio samples
    pub samples: Arc<[f32]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Duration of this frame
    pub duration: Duration,
    /// Energy level in dB
    pub energy_db: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("energy_db", &self.energy_db)
            .finish()
    }
}

/// PCM16 normalization constant
const PCM16_NORMALIZE: f32 = 32768.0;
/// PCM16 scaling constant
const PCM16_SCALE: f32 = 32767.0;

impl AudioFrame {
    /// Create a new audio frame from f32 samples
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, sequence: u64) -> Self {
        let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate.as_u32() as f64);
        let energy_db = Self::calculate_energy_db(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            duration,
            energy_db,
        }
    }

    /// Calculate RMS energy in decibels
    fn calculate_energy_db(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return -96.0;
        }

        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();

        if rms > 0.0 {
            (20.0 * rms.log10()).max(-96.0)
        } else {
            -96.0
        }
    }

    /// Convert from PCM16 bytes (little-endian)
    pub fn from_pcm16(bytes: &[u8], sample_rate: SampleRate, sequence: u64) -> Self {
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|chunk| {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                sample as f32 / PCM16_NORMALIZE
            })
            .collect();

        Self::new(samples, sample_rate, sequence)
    }

    /// Convert to PCM16 bytes (little-endian)
    pub fn to_pcm16(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|&sample| to_i16(sample).to_le_bytes())
            .collect()
    }

    /// Decode G.711 mu-law bytes
    pub fn from_mulaw(bytes: &[u8], sample_rate: SampleRate, sequence: u64) -> Self {
        let samples: Vec<f32> = bytes
            .iter()
            .map(|&b| mulaw_to_linear(b) as f32 / PCM16_NORMALIZE)
            .collect();

        Self::new(samples, sample_rate, sequence)
    }

    /// Encode as G.711 mu-law bytes
    pub fn to_mulaw(&self) -> Vec<u8> {
        self.samples
            .iter()
            .map(|&sample| linear_to_mulaw(to_i16(sample)))
            .collect()
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Check if frame is likely silence based on energy
    pub fn is_likely_silence(&self, threshold_db: f32) -> bool {
        self.energy_db < threshold_db
    }

    /// Split frame into smaller chunks
    pub fn split(&self, chunk_samples: usize) -> Vec<AudioFrame> {
        let mut seq = self.sequence;
        let mut chunks = Vec::new();

        for chunk in self.samples.chunks(chunk_samples.max(1)) {
            chunks.push(AudioFrame::new(chunk.to_vec(), self.sample_rate, seq));
            seq += 1;
        }

        chunks
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16
}

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Encode one linear PCM16 sample as G.711 mu-law
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    magnitude = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while magnitude & mask == 0 && exponent > 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decode one G.711 mu-law byte to linear PCM16
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_parsing() {
        assert_eq!(SampleRate::from_hz(8000), Some(SampleRate::Hz8000));
        assert_eq!(SampleRate::from_hz(11025), None);
        assert_eq!(SampleRate::Hz8000.frame_size_20ms(), 160);
    }

    #[test]
    fn test_energy_db() {
        let silence = AudioFrame::new(vec![0.0; 160], SampleRate::Hz8000, 0);
        assert_eq!(silence.energy_db, -96.0);
        assert!(silence.is_likely_silence(-40.0));

        let loud = AudioFrame::new(vec![0.5; 160], SampleRate::Hz8000, 1);
        assert!(loud.energy_db > -10.0);
        assert_eq!(loud.duration_ms(), 20);
    }

    #[test]
    fn test_mulaw_silence_and_sign() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(mulaw_to_linear(0xFF), 0);
        assert!(mulaw_to_linear(linear_to_mulaw(-1000)) < 0);
    }

    #[test]
    fn test_mulaw_error_is_bounded() {
        for sample in [100i16, 1000, 8000, 20000, 32000, -12345] {
            let decoded = mulaw_to_linear(linear_to_mulaw(sample)) as i32;
            let error = (decoded - sample as i32).abs();
            assert!(error <= (sample as i32).abs() / 16 + 8, "sample {sample} decoded {decoded}");
        }
    }

    #[test]
    fn test_split() {
        let frame = AudioFrame::new(vec![0.1; 400], SampleRate::Hz8000, 7);
        let chunks = frame.split(160);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].sequence, 7);
        assert_eq!(chunks[2].samples.len(), 80);
    }
}
