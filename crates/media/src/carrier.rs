//! Carrier media-stream payload conversion.
//!
//! Inbound `media` frames carry base64 μ-law at 8 kHz mono; outbound
//! frames must be the same. The room side works in wideband PCM, so the
//! outbound path resamples and downmixes before companding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use vx_domain::{Error, Result};

use crate::mulaw;
use crate::resample::{downmix_to_mono, resample_linear};
use crate::CARRIER_SAMPLE_RATE;

/// Decode an inbound media payload to linear PCM @ 8 kHz mono.
pub fn decode_inbound(payload_b64: &str) -> Result<Vec<i16>> {
    let bytes = BASE64
        .decode(payload_b64)
        .map_err(|e| Error::Codec(format!("media payload is not base64: {e}")))?;
    Ok(mulaw::decode(&bytes))
}

/// Encode PCM for the carrier: downmix, resample to 8 kHz by linear
/// interpolation, μ-law compress, base64.
pub fn encode_outbound(samples: &[i16], sample_rate: u32, channels: usize) -> String {
    let mono = downmix_to_mono(samples, channels);
    let narrow = resample_linear(&mono, sample_rate, CARRIER_SAMPLE_RATE);
    BASE64.encode(mulaw::encode(&narrow))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_carrier_rate_audio() {
        let samples: Vec<i16> = (0..160).map(|i| (i * 150) as i16).collect();
        let payload = encode_outbound(&samples, 8_000, 1);
        let decoded = decode_inbound(&payload).unwrap();
        assert_eq!(decoded.len(), samples.len());
        // Largest samples here sit in the top μ-law segment (step 1024).
        for (&orig, &dec) in samples.iter().zip(&decoded) {
            assert!((orig as i32 - dec as i32).abs() < 1024, "{orig} vs {dec}");
        }
    }

    #[test]
    fn wideband_input_is_resampled_to_two_samples() {
        // 4 samples @ 16 kHz become 2 @ 8 kHz.
        let samples = vec![0i16, 8_000, 16_000, 24_000];
        let payload = encode_outbound(&samples, 16_000, 1);
        let decoded = decode_inbound(&payload).unwrap();
        assert_eq!(decoded.len(), 2);
        // The resampled originals are [0, 16000]; μ-law tolerance at
        // 16000 magnitude is one 2^9 step.
        assert!((decoded[0] as i32).abs() <= 8);
        assert!((decoded[1] as i32 - 16_000).abs() <= 512);
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(decode_inbound("not//valid!!").is_err());
    }
}
