//! G.711 μ-law companding.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Compress one linear sample to μ-law. Sign-magnitude with the exponent
/// found by scanning the bias-adjusted magnitude from bit 0x4000 down.
pub fn encode_sample(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0 };
    let mut magnitude = (sample as i32).abs().min(CLIP);
    magnitude += BIAS;

    let mut exponent: u32 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Expand one μ-law byte back to linear PCM.
pub fn decode_sample(byte: u8) -> i16 {
    let b = !byte;
    let exponent = (b >> 4) & 0x07;
    let mantissa = (b & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if b & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

pub fn decode(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode_sample(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Worst-case quantization step for a μ-law segment containing the
    /// given magnitude.
    fn quant_step(sample: i16) -> i32 {
        let magnitude = (sample as i32).abs().min(CLIP) + BIAS;
        let mut step = 8;
        let mut top = 0x100;
        while magnitude >= top && top < 0x8000 {
            step <<= 1;
            top <<= 1;
        }
        step
    }

    #[test]
    fn zero_maps_to_silence() {
        assert_eq!(encode_sample(0), 0xFF);
        assert_eq!(decode_sample(0xFF), 0);
    }

    #[test]
    fn round_trip_within_quantization_error() {
        for raw in (-32_768i32..=32_767).step_by(17) {
            let sample = raw as i16;
            let decoded = decode_sample(encode_sample(sample));
            let reference = (sample as i32).clamp(-CLIP, CLIP);
            let error = (decoded as i32 - reference).abs();
            assert!(
                error <= quant_step(sample),
                "sample {sample} decoded to {decoded}, error {error}"
            );
        }
    }

    #[test]
    fn second_round_trip_is_stable() {
        // Once a value has been quantized, re-encoding must reproduce
        // the exact same byte and sample.
        for byte in 0u8..=255 {
            let sample = decode_sample(byte);
            let byte2 = encode_sample(sample);
            assert_eq!(decode_sample(byte2), sample, "byte {byte:#04x}");
        }
    }

    #[test]
    fn clipping_saturates() {
        assert_eq!(
            decode_sample(encode_sample(i16::MAX)),
            decode_sample(encode_sample(32_635))
        );
        assert_eq!(
            decode_sample(encode_sample(i16::MIN)),
            decode_sample(encode_sample(-32_635))
        );
    }

    #[test]
    fn sign_is_preserved() {
        // Magnitudes below 8 quantize to zero, so start at the first
        // representable step.
        for &s in &[-30_000i16, -1000, -8, 8, 1000, 30_000] {
            let decoded = decode_sample(encode_sample(s));
            assert_eq!(decoded.signum(), s.signum(), "sample {s}");
        }
    }
}
