//! Speech adapters for the per-call voice session.
//!
//! Three capability sets, each with a mock variant that tests and
//! `mock_mode` runs use as a first-class implementation:
//!
//! - [`stt`] — streaming speech-to-text. The Deepgram adapter keeps a
//!   provider WebSocket open for the life of the call and surfaces
//!   transcripts over a channel (no reentrant callbacks).
//! - [`tts`] — one-shot text-to-speech over HTTP, with a deterministic
//!   tone stand-in when no provider is configured or the provider fails.
//! - [`transport`] — the media-room connection audio is published to.

pub mod stt;
pub mod transport;
pub mod tts;

/// One transcription result from the STT provider.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    /// Finals trigger a turn; interims are observability only.
    pub is_final: bool,
    pub confidence: f64,
    pub provider: &'static str,
}
