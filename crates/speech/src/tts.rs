//! Text-to-speech synthesis.
//!
//! Providers are plain HTTP: POST the text and desired sample rate, get
//! audio back as raw PCM, a WAV container, or JSON with base64 audio.
//! Transient failures (408 / 429 / 5xx / network) retry with
//! `base * 2^attempt` backoff. If everything fails — or no provider is
//! configured — the session still speaks: a deterministic sine tone
//! whose length scales with the text stands in for real audio.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;

use vx_domain::config::{TtsConfig, TtsProvider};
use vx_domain::{Error, Result};
use vx_media::{wav, AudioPacket};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Synth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TtsSynth {
    cfg: TtsConfig,
    http: reqwest::Client,
}

impl TtsSynth {
    pub fn new(cfg: TtsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { cfg, http })
    }

    /// Synthesize speech. Never fails: provider trouble degrades to the
    /// tone stand-in so the call keeps moving.
    pub async fn synthesize(&self, text: &str) -> AudioPacket {
        if self.cfg.provider == TtsProvider::None {
            return fallback_tone(text, self.cfg.sample_rate);
        }

        match self.synthesize_remote(text).await {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, "tts synthesis failed, using tone stand-in");
                fallback_tone(text, self.cfg.sample_rate)
            }
        }
    }

    async fn synthesize_remote(&self, text: &str) -> Result<AudioPacket> {
        let url = self
            .cfg
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("tts provider selected but no url".into()))?;

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.cfg.max_retries {
            if attempt > 0 {
                let backoff =
                    Duration::from_millis(self.cfg.retry_base_ms * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let mut request = self.http.post(url).json(&serde_json::json!({
                "text": text,
                "sample_rate": self.cfg.sample_rate,
            }));
            if let Some(ref key) = self.cfg.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if retryable_status(status) {
                        last_err = Some(Error::Http(format!("tts returned {status}")));
                        continue;
                    }
                    if !status.is_success() {
                        return Err(Error::Http(format!("tts returned {status}")));
                    }
                    let response_rate = header_sample_rate(&response);
                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| Error::Http(e.to_string()))?;
                    return parse_audio_response(
                        &body,
                        response_rate.unwrap_or(self.cfg.sample_rate),
                    );
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(Error::Timeout(format!("tts request: {e}")));
                    continue;
                }
                Err(e) => {
                    last_err = Some(Error::Http(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Http("tts retries exhausted".into())))
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn header_sample_rate(response: &reqwest::Response) -> Option<u32> {
    response
        .headers()
        .get("x-sample-rate")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode a provider body: WAV container, JSON-with-base64, or raw
/// 16-bit little-endian PCM.
fn parse_audio_response(body: &[u8], default_rate: u32) -> Result<AudioPacket> {
    if body.starts_with(b"RIFF") {
        return wav::parse_wav(body);
    }

    if body.first() == Some(&b'{') {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| Error::Codec(format!("tts JSON response: {e}")))?;
        let audio_b64 = value
            .get("audio")
            .or_else(|| value.get("audio_b64"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::Codec("tts JSON response missing 'audio'".into()))?;
        let bytes = BASE64
            .decode(audio_b64)
            .map_err(|e| Error::Codec(format!("tts audio is not base64: {e}")))?;
        let rate = value
            .get("sample_rate")
            .and_then(serde_json::Value::as_u64)
            .map(|r| r as u32)
            .unwrap_or(default_rate);
        return Ok(AudioPacket::from_le_bytes(&bytes, rate));
    }

    Ok(AudioPacket::from_le_bytes(body, default_rate))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tone stand-in
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 6000.0;
const TONE_MIN_MS: u64 = 300;
const TONE_MAX_MS: u64 = 1800;
const TONE_MS_PER_CHAR: u64 = 60;

/// Deterministic sine tone, 300–1800 ms depending on text length.
pub fn fallback_tone(text: &str, sample_rate: u32) -> AudioPacket {
    let chars = text.chars().count() as u64;
    let duration_ms = (TONE_MIN_MS + chars * TONE_MS_PER_CHAR).clamp(TONE_MIN_MS, TONE_MAX_MS);
    let total = (sample_rate as u64 * duration_ms / 1000) as usize;

    let samples = (0..total)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            (TONE_AMPLITUDE * (2.0 * std::f64::consts::PI * TONE_HZ * t).sin()) as i16
        })
        .collect();

    AudioPacket::new(samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_length_scales_with_text_and_clamps() {
        let short = fallback_tone("", 16_000);
        assert_eq!(short.duration_ms(), 300);

        let medium = fallback_tone("hola mundo", 16_000); // 10 chars
        assert_eq!(medium.duration_ms(), 900);

        let long = fallback_tone(&"x".repeat(500), 16_000);
        assert_eq!(long.duration_ms(), 1800);
    }

    #[test]
    fn tone_is_deterministic() {
        let a = fallback_tone("misma frase", 8_000);
        let b = fallback_tone("misma frase", 8_000);
        assert_eq!(a, b);
    }

    #[test]
    fn raw_pcm_body_uses_default_rate() {
        let packet = parse_audio_response(&[0x10, 0x00, 0x20, 0x00], 16_000).unwrap();
        assert_eq!(packet.samples, vec![16, 32]);
        assert_eq!(packet.sample_rate, 16_000);
    }

    #[test]
    fn json_body_decodes_base64_audio() {
        let pcm: Vec<u8> = vec![0x00, 0x01, 0xFF, 0x7F];
        let body = serde_json::json!({
            "audio": BASE64.encode(&pcm),
            "sample_rate": 22_050,
        })
        .to_string();
        let packet = parse_audio_response(body.as_bytes(), 16_000).unwrap();
        assert_eq!(packet.sample_rate, 22_050);
        assert_eq!(packet.samples, vec![256, 32_767]);
    }

    #[test]
    fn json_body_without_audio_is_an_error() {
        assert!(parse_audio_response(br#"{"voice":"es"}"#, 16_000).is_err());
    }

    #[test]
    fn wav_body_is_parsed() {
        // 2 samples, mono, 8 kHz.
        let mut wav_bytes = Vec::new();
        wav_bytes.extend_from_slice(b"RIFF");
        wav_bytes.extend_from_slice(&36u32.to_le_bytes());
        wav_bytes.extend_from_slice(b"WAVE");
        wav_bytes.extend_from_slice(b"fmt ");
        wav_bytes.extend_from_slice(&16u32.to_le_bytes());
        wav_bytes.extend_from_slice(&1u16.to_le_bytes());
        wav_bytes.extend_from_slice(&1u16.to_le_bytes());
        wav_bytes.extend_from_slice(&8000u32.to_le_bytes());
        wav_bytes.extend_from_slice(&16000u32.to_le_bytes());
        wav_bytes.extend_from_slice(&2u16.to_le_bytes());
        wav_bytes.extend_from_slice(&16u16.to_le_bytes());
        wav_bytes.extend_from_slice(b"data");
        wav_bytes.extend_from_slice(&4u32.to_le_bytes());
        wav_bytes.extend_from_slice(&100i16.to_le_bytes());
        wav_bytes.extend_from_slice(&(-100i16).to_le_bytes());

        let packet = parse_audio_response(&wav_bytes, 16_000).unwrap();
        assert_eq!(packet.sample_rate, 8_000);
        assert_eq!(packet.samples, vec![100, -100]);
    }

    #[test]
    fn unconfigured_provider_synthesizes_tone() {
        let synth = TtsSynth::new(TtsConfig::default()).unwrap();
        let packet = futures_util::future::FutureExt::now_or_never(
            synth.synthesize("hola"),
        )
        .expect("no provider path is synchronous");
        assert!(packet.duration_ms() >= 300);
    }
}
