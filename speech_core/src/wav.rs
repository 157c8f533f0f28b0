//! 16-bit little-endian PCM framing.
//!
//! The byte stream delivered by a provider carries mono samples as two bytes
//! each, low byte first. Decoding normalizes by 32768 so every sample lands in
//! `[-1.0, 1.0)`. The encode side produces the same framing from floats and can
//! wrap a rendered buffer into a RIFF/WAV container for offline playback.
use base64::{engine::general_purpose, Engine as _};
use std::io::Cursor;

use crate::error::Result;

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

const I16_SCALE: f32 = 32768.0;

/// Decode one little-endian sample pair into a normalized float.
#[inline]
pub fn decode_sample(lo: u8, hi: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / I16_SCALE
}

/// Decode `bytes` into `out`, padding with silence.
///
/// Writes `min(bytes.len() / 2, out.len())` decoded samples and zero-fills the
/// rest of `out`. A trailing odd byte is ignored. Returns the number of
/// decoded samples.
pub fn decode_block(bytes: &[u8], out: &mut [f32]) -> usize {
    let decoded = (bytes.len() / BYTES_PER_SAMPLE).min(out.len());
    for (dst, pair) in out[..decoded]
        .iter_mut()
        .zip(bytes.chunks_exact(BYTES_PER_SAMPLE))
    {
        *dst = decode_sample(pair[0], pair[1]);
    }
    out[decoded..].fill(0.0);
    decoded
}

/// Encode normalized floats as 16-bit little-endian PCM, appending to `out`.
pub fn encode_pcm16le(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Encode mono samples as a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // WAV header (44 bytes) + 2 bytes per sample
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Convenience: WAV bytes as standard Base64.
pub fn encode_wav_base64(samples: &[f32], sample_rate: u32) -> Result<String> {
    Ok(general_purpose::STANDARD.encode(encode_wav(samples, sample_rate)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_signed() {
        assert_eq!(decode_sample(0x00, 0x00), 0.0);
        assert_eq!(decode_sample(0x00, 0x80), -1.0);
        assert_eq!(decode_sample(0xFF, 0x7F), 32767.0 / 32768.0);
        assert_eq!(decode_sample(0xFF, 0xFF), -1.0 / 32768.0);
        assert_eq!(decode_sample(0x00, 0x40), 0.5);
    }

    #[test]
    fn decoded_range_is_half_open() {
        for hi in 0..=255u8 {
            for lo in [0u8, 1, 127, 128, 254, 255] {
                let s = decode_sample(lo, hi);
                let expected = ((hi as u16) << 8 | lo as u16) as i16 as f32 / 32768.0;
                assert_eq!(s, expected);
                assert!((-1.0..1.0).contains(&s));
            }
        }
    }

    #[test]
    fn short_block_is_zero_padded() {
        let mut out = [9.0f32; 4];
        let n = decode_block(&[0x00, 0x40, 0x00, 0xC0, 0x7F], &mut out);
        assert_eq!(n, 2);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn wav_has_riff_header_and_data() {
        let wav = encode_wav(&[0.0, 0.5, -0.5], 24_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 3 * 2);
        assert!(!encode_wav_base64(&[0.0], 24_000).unwrap().is_empty());
    }
}
