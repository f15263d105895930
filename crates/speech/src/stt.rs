//! Streaming speech-to-text adapters.
//!
//! The session owns an [`SttHandle`]: PCM frames go in through
//! `send_audio`, transcripts come back on the channel passed to
//! `start`. The socket pump lives in its own task so a slow provider
//! read never blocks audio ingestion.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use vx_domain::config::SttConfig;
use vx_domain::{Error, Result};

use crate::TranscriptEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter + handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which STT implementation a session runs.
#[derive(Debug, Clone)]
pub enum SttAdapter {
    Deepgram(SttConfig),
    /// Offline stand-in: swallows audio and plays back a script of
    /// transcripts, if one was provided.
    Mock { script: Vec<TranscriptEvent> },
}

impl SttAdapter {
    pub fn from_config(cfg: &SttConfig) -> Self {
        match cfg.provider {
            vx_domain::config::SttProvider::Deepgram => Self::Deepgram(cfg.clone()),
            vx_domain::config::SttProvider::Mock => Self::Mock { script: Vec::new() },
        }
    }

    /// Open the provider stream. Transcripts arrive on `events`.
    pub async fn start(&self, events: mpsc::Sender<TranscriptEvent>) -> Result<SttHandle> {
        match self {
            Self::Deepgram(cfg) => start_deepgram(cfg, events).await,
            Self::Mock { script } => Ok(start_mock(script.clone(), events)),
        }
    }
}

/// Live STT stream for one call.
pub struct SttHandle {
    audio_tx: mpsc::Sender<Vec<i16>>,
    shutdown: CancellationToken,
}

impl SttHandle {
    /// Forward one inbound PCM frame. Dropping frames when the pump is
    /// backed up is acceptable — transcription degrades, audio doesn't.
    pub fn send_audio(&self, frame: Vec<i16>) {
        if let Err(e) = self.audio_tx.try_send(frame) {
            tracing::debug!(error = %e, "stt audio frame dropped");
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deepgram
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn start_deepgram(
    cfg: &SttConfig,
    events: mpsc::Sender<TranscriptEvent>,
) -> Result<SttHandle> {
    let url = format!(
        "{}?encoding=linear16&sample_rate={}&channels=1",
        cfg.url, cfg.sample_rate
    );
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Speech {
            provider: "deepgram".into(),
            message: format!("bad STT url: {e}"),
        })?;
    if let Some(ref key) = cfg.api_key {
        request.headers_mut().insert(
            "Authorization",
            format!("Token {key}")
                .parse()
                .map_err(|_| Error::Auth("STT api key is not a valid header value".into()))?,
        );
    }

    let (socket, _response) = connect_async(request).await.map_err(|e| Error::Speech {
        provider: "deepgram".into(),
        message: format!("connect failed: {e}"),
    })?;
    let (mut write, mut read) = socket.split();

    let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<i16>>(64);
    let shutdown = CancellationToken::new();
    let pump_shutdown = shutdown.clone();
    let keepalive_every = Duration::from_secs(cfg.keepalive_sec.max(1));

    tokio::spawn(async move {
        let mut keepalive = tokio::time::interval(keepalive_every);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = pump_shutdown.cancelled() => {
                    let _ = write.send(Message::Text(r#"{"type":"CloseStream"}"#.into())).await;
                    let _ = write.close().await;
                    break;
                }
                _ = keepalive.tick() => {
                    if write
                        .send(Message::Text(r#"{"type":"KeepAlive"}"#.into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                frame = audio_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let mut bytes = Vec::with_capacity(frame.len() * 2);
                    for sample in frame {
                        bytes.extend_from_slice(&sample.to_le_bytes());
                    }
                    if write.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_deepgram_message(&text) {
                                if events.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "stt socket error");
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(SttHandle {
        audio_tx,
        shutdown,
    })
}

/// Extract a transcript from one provider message. Messages without an
/// alternative (metadata, empty results) yield nothing.
fn parse_deepgram_message(text: &str) -> Option<TranscriptEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let alternative = value
        .get("channel")?
        .get("alternatives")?
        .as_array()?
        .first()?;
    let transcript = alternative.get("transcript")?.as_str()?;
    if transcript.is_empty() {
        return None;
    }
    Some(TranscriptEvent {
        text: transcript.to_owned(),
        is_final: value
            .get("is_final")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        confidence: alternative
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0),
        provider: "deepgram",
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn start_mock(
    script: Vec<TranscriptEvent>,
    events: mpsc::Sender<TranscriptEvent>,
) -> SttHandle {
    let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<i16>>(64);
    let shutdown = CancellationToken::new();
    let pump_shutdown = shutdown.clone();

    tokio::spawn(async move {
        for event in script {
            if events.send(event).await.is_err() {
                return;
            }
        }
        // Keep draining audio until the session stops us.
        loop {
            tokio::select! {
                _ = pump_shutdown.cancelled() => break,
                frame = audio_rx.recv() => {
                    if frame.is_none() {
                        break;
                    }
                }
            }
        }
    });

    SttHandle {
        audio_tx,
        shutdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_transcript() {
        let message = r#"{
            "is_final": true,
            "channel": { "alternatives": [
                { "transcript": "quiero pagar mi factura", "confidence": 0.97 }
            ]}
        }"#;
        let event = parse_deepgram_message(message).unwrap();
        assert!(event.is_final);
        assert_eq!(event.text, "quiero pagar mi factura");
        assert!((event.confidence - 0.97).abs() < 1e-9);
        assert_eq!(event.provider, "deepgram");
    }

    #[test]
    fn interim_defaults_to_not_final() {
        let message = r#"{
            "channel": { "alternatives": [ { "transcript": "quiero" } ] }
        }"#;
        let event = parse_deepgram_message(message).unwrap();
        assert!(!event.is_final);
        assert_eq!(event.confidence, 0.0);
    }

    #[test]
    fn metadata_and_empty_results_are_skipped() {
        assert!(parse_deepgram_message(r#"{"type":"Metadata","duration":1.2}"#).is_none());
        assert!(parse_deepgram_message(
            r#"{"channel":{"alternatives":[{"transcript":""}]}}"#
        )
        .is_none());
        assert!(parse_deepgram_message("not json").is_none());
    }

    #[tokio::test]
    async fn mock_plays_back_script() {
        let (tx, mut rx) = mpsc::channel(8);
        let adapter = SttAdapter::Mock {
            script: vec![
                TranscriptEvent {
                    text: "hola".into(),
                    is_final: false,
                    confidence: 0.5,
                    provider: "mock",
                },
                TranscriptEvent {
                    text: "hola quiero ayuda".into(),
                    is_final: true,
                    confidence: 0.9,
                    provider: "mock",
                },
            ],
        };
        let handle = adapter.start(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(!first.is_final);
        let second = rx.recv().await.unwrap();
        assert!(second.is_final);
        assert_eq!(second.text, "hola quiero ayuda");

        handle.send_audio(vec![0i16; 160]);
        handle.stop();
    }
}
