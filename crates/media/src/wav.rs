//! Minimal RIFF/WAVE reader for TTS provider responses.
//!
//! Accepts only what the providers actually emit: format tag 1 (PCM),
//! 16-bit depth, any channel count (downmixed to mono). Chunks are
//! walked by (id, size) pairs with the RIFF odd-size pad byte honored.

use vx_domain::{Error, Result};

use crate::resample::downmix_to_mono;
use crate::AudioPacket;

struct FmtChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// Parse a WAV byte buffer into mono PCM.
pub fn parse_wav(bytes: &[u8]) -> Result<AudioPacket> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(Error::Codec("not a RIFF/WAVE buffer".into()));
    }

    let mut fmt: Option<FmtChunk> = None;
    let mut data: Option<&[u8]> = None;

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body_start = offset + 8;
        let body_end = body_start
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| Error::Codec("WAV chunk overruns buffer".into()))?;
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(Error::Codec("fmt chunk too short".into()));
                }
                fmt = Some(FmtChunk {
                    format_tag: u16::from_le_bytes([body[0], body[1]]),
                    channels: u16::from_le_bytes([body[2], body[3]]),
                    sample_rate: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                    bits_per_sample: u16::from_le_bytes([body[14], body[15]]),
                });
            }
            b"data" => data = Some(body),
            _ => {}
        }

        // Chunk bodies are word-aligned; odd sizes carry a pad byte.
        offset = body_end + (size & 1);
    }

    let fmt = fmt.ok_or_else(|| Error::Codec("WAV missing fmt chunk".into()))?;
    let data = data.ok_or_else(|| Error::Codec("WAV missing data chunk".into()))?;

    if fmt.format_tag != 1 {
        return Err(Error::Codec(format!(
            "unsupported WAV format tag {} (want PCM)",
            fmt.format_tag
        )));
    }
    if fmt.bits_per_sample != 16 {
        return Err(Error::Codec(format!(
            "unsupported WAV bit depth {} (want 16)",
            fmt.bits_per_sample
        )));
    }
    if fmt.channels == 0 {
        return Err(Error::Codec("WAV reports zero channels".into()));
    }

    let interleaved: Vec<i16> = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let samples = downmix_to_mono(&interleaved, fmt.channels as usize);

    Ok(AudioPacket::new(samples, fmt.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_wav(sample_rate: u32, channels: u16, samples: &[i16], extra_chunk: bool) -> Vec<u8> {
        let mut data = Vec::new();
        for &s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }

        let mut body = Vec::new();
        body.extend_from_slice(b"WAVE");

        if extra_chunk {
            // An odd-sized vendor chunk before fmt, to exercise padding.
            body.extend_from_slice(b"LIST");
            body.extend_from_slice(&3u32.to_le_bytes());
            body.extend_from_slice(&[1, 2, 3, 0]); // 3 bytes + pad
        }

        body.extend_from_slice(b"fmt ");
        body.extend_from_slice(&16u32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes()); // PCM
        body.extend_from_slice(&channels.to_le_bytes());
        body.extend_from_slice(&sample_rate.to_le_bytes());
        let byte_rate = sample_rate * channels as u32 * 2;
        body.extend_from_slice(&byte_rate.to_le_bytes());
        body.extend_from_slice(&(channels * 2).to_le_bytes());
        body.extend_from_slice(&16u16.to_le_bytes());

        body.extend_from_slice(b"data");
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(&data);

        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(body.len() as u32).to_le_bytes());
        wav.extend_from_slice(&body);
        wav
    }

    #[test]
    fn parses_mono_pcm() {
        let wav = build_wav(16_000, 1, &[0, 100, -100, 32_000], false);
        let packet = parse_wav(&wav).unwrap();
        assert_eq!(packet.sample_rate, 16_000);
        assert_eq!(packet.samples, vec![0, 100, -100, 32_000]);
    }

    #[test]
    fn downmixes_stereo() {
        let wav = build_wav(8_000, 2, &[100, 200, -50, 50], false);
        let packet = parse_wav(&wav).unwrap();
        assert_eq!(packet.samples, vec![150, 0]);
    }

    #[test]
    fn walks_past_odd_sized_chunks() {
        let wav = build_wav(16_000, 1, &[7, 8, 9], true);
        let packet = parse_wav(&wav).unwrap();
        assert_eq!(packet.samples, vec![7, 8, 9]);
    }

    #[test]
    fn rejects_non_riff() {
        assert!(parse_wav(b"OggS garbage here").is_err());
    }

    #[test]
    fn rejects_non_pcm_format() {
        let mut wav = build_wav(16_000, 1, &[1, 2], false);
        // Patch the format tag to 3 (IEEE float).
        let fmt_pos = 12 + 8;
        wav[fmt_pos] = 3;
        let err = parse_wav(&wav).unwrap_err();
        assert!(err.to_string().contains("format tag"));
    }

    #[test]
    fn rejects_truncated_chunk() {
        let mut wav = build_wav(16_000, 1, &[1, 2, 3], false);
        wav.truncate(wav.len() - 2);
        assert!(parse_wav(&wav).is_err());
    }
}
