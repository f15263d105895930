//! Per-call voice sessions.
//!
//! A session owns the call's STT stream, TTS synth and media transport.
//! State machine per call: NONE → STARTING → READY → {SPEAKING ↔
//! LISTENING} → CLOSED, where SPEAKING is simply `speaking_until_ms`
//! being in the future. Barge-in (a loud inbound frame during
//! SPEAKING) and the playback deadline passing are the only ways back
//! to LISTENING.

pub mod turns;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use vx_domain::config::Config;
use vx_speech::stt::{SttAdapter, SttHandle};
use vx_speech::transport::MediaTransport;
use vx_speech::tts::TtsSynth;
use vx_speech::TranscriptEvent;

use vx_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the launch request tells us about the call.
#[derive(Debug, Clone)]
pub struct SessionInput {
    pub call_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub trace_id: Uuid,
    pub room: String,
    pub twilio_call_sid: String,
    pub livekit_url: String,
}

/// Optional callbacks fired from inside the session.
#[derive(Clone, Default)]
pub struct SessionHooks {
    /// The caller spoke over agent playback.
    pub on_barge_in: Option<Arc<dyn Fn(Uuid) + Send + Sync>>,
    /// A final transcript arrived — run a turn.
    pub on_final_transcript: Option<Arc<dyn Fn(Uuid, TranscriptEvent) + Send + Sync>>,
}

/// What `start` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Voice runtime is switched off in config.
    Disabled,
    /// A session for this call already exists (idempotent relaunch).
    AlreadyStarted,
}

struct VoiceSessionRuntime {
    input: SessionInput,
    stt: Option<SttHandle>,
    tts: TtsSynth,
    transport: MediaTransport,
    /// Absolute epoch-ms when current agent playback is expected to
    /// end; 0 when idle.
    speaking_until_ms: AtomicU64,
    hooks: SessionHooks,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// RMS energy of an int16 frame, normalized to [0, 1].
pub fn frame_energy(frame: &[i16]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = frame
        .iter()
        .map(|&s| {
            let normalized = s as f64 / 32_768.0;
            normalized * normalized
        })
        .sum();
    (sum_squares / frame.len() as f64).sqrt()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide map of active voice sessions, keyed by call id. Each
/// call exclusively owns its runtime; handles never cross calls.
pub struct SessionManager {
    cfg: Arc<Config>,
    sessions: RwLock<HashMap<Uuid, Arc<VoiceSessionRuntime>>>,
}

impl SessionManager {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            cfg,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Bring up STT, TTS and the transport for a call.
    ///
    /// STT failure is tolerated (the call continues without
    /// transcription) unless `voice.stt_hard_fail` is set, in which
    /// case both halves are rolled back.
    pub async fn start(
        &self,
        input: SessionInput,
        join_token: &str,
        hooks: SessionHooks,
    ) -> Result<StartOutcome> {
        if !self.cfg.voice.enabled {
            return Ok(StartOutcome::Disabled);
        }
        if self.sessions.read().contains_key(&input.call_id) {
            return Ok(StartOutcome::AlreadyStarted);
        }

        let tts = TtsSynth::new(self.cfg.tts.clone())?;

        let transport = if self.cfg.voice.mock_transport {
            MediaTransport::mock().0
        } else {
            MediaTransport::connect_room(&input.livekit_url, &input.room, join_token).await?
        };

        let (events_tx, events_rx) = mpsc::channel::<TranscriptEvent>(32);
        let stt = match SttAdapter::from_config(&self.cfg.stt).start(events_tx).await {
            Ok(handle) => Some(handle),
            Err(e) if self.cfg.voice.stt_hard_fail => {
                transport.disconnect();
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(call_id = %input.call_id, error = %e, "stt unavailable, continuing without transcription");
                None
            }
        };

        let runtime = Arc::new(VoiceSessionRuntime {
            input: input.clone(),
            stt,
            tts,
            transport,
            speaking_until_ms: AtomicU64::new(0),
            hooks,
        });

        // Double-checked insert: a concurrent launch for the same call
        // loses and tears down its half-built runtime.
        {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&input.call_id) {
                drop(sessions);
                if let Some(ref stt) = runtime.stt {
                    stt.stop();
                }
                runtime.transport.disconnect();
                return Ok(StartOutcome::AlreadyStarted);
            }
            sessions.insert(input.call_id, runtime.clone());
        }

        self.spawn_transcript_pump(runtime, events_rx);

        tracing::info!(call_id = %input.call_id, trace_id = %input.trace_id, "voice session started");
        Ok(StartOutcome::Started)
    }

    fn spawn_transcript_pump(
        &self,
        runtime: Arc<VoiceSessionRuntime>,
        mut events_rx: mpsc::Receiver<TranscriptEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if event.is_final {
                    if let Some(ref hook) = runtime.hooks.on_final_transcript {
                        hook(runtime.input.call_id, event);
                    }
                } else {
                    tracing::debug!(
                        call_id = %runtime.input.call_id,
                        text = %event.text,
                        confidence = event.confidence,
                        "interim transcript"
                    );
                }
            }
        });
    }

    /// Synthesize and publish agent speech. Returns the synthesized
    /// packet so the route layer can mirror it to the carrier stream.
    pub async fn speak(&self, call_id: Uuid, text: &str) -> Result<vx_media::AudioPacket> {
        let runtime = self.runtime(call_id)?;

        let packet = runtime.tts.synthesize(text).await;
        let duration_ms = packet.duration_ms();
        runtime.transport.publish_audio(packet.clone());

        let hold = duration_ms.max(self.cfg.voice.barge_in.hold_ms);
        runtime
            .speaking_until_ms
            .store(now_ms() + hold, Ordering::SeqCst);

        Ok(packet)
    }

    /// Feed one inbound PCM frame: barge-in detection, then STT.
    pub fn ingest_inbound_audio(&self, call_id: Uuid, frame: &[i16]) -> Result<()> {
        let runtime = self.runtime(call_id)?;
        let barge = &self.cfg.voice.barge_in;

        if barge.enabled {
            let speaking_until = runtime.speaking_until_ms.load(Ordering::SeqCst);
            if speaking_until > 0 && now_ms() < speaking_until {
                let energy = frame_energy(frame);
                if energy >= barge.energy_threshold {
                    tracing::info!(call_id = %call_id, energy, "barge-in detected");
                    runtime.transport.interrupt_playback();
                    runtime.speaking_until_ms.store(0, Ordering::SeqCst);
                    if let Some(ref hook) = runtime.hooks.on_barge_in {
                        hook(call_id);
                    }
                }
            }
        }

        if let Some(ref stt) = runtime.stt {
            stt.send_audio(frame.to_vec());
        }
        Ok(())
    }

    /// Tear the session down and forget the call.
    pub fn stop(&self, call_id: Uuid) -> Result<()> {
        let runtime = self
            .sessions
            .write()
            .remove(&call_id)
            .ok_or_else(|| Error::NotFound(format!("no session for call {call_id}")))?;

        if let Some(ref stt) = runtime.stt {
            stt.stop();
        }
        runtime.transport.disconnect();
        tracing::info!(call_id = %call_id, "voice session stopped");
        Ok(())
    }

    pub fn is_active(&self, call_id: Uuid) -> bool {
        self.sessions.read().contains_key(&call_id)
    }

    /// The trace id the session was launched with.
    pub fn trace_of(&self, call_id: Uuid) -> Option<Uuid> {
        self.sessions.read().get(&call_id).map(|r| r.input.trace_id)
    }

    /// Whether agent playback is still expected to be audible.
    pub fn is_speaking(&self, call_id: Uuid) -> bool {
        self.sessions
            .read()
            .get(&call_id)
            .map(|r| {
                let until = r.speaking_until_ms.load(Ordering::SeqCst);
                until > 0 && now_ms() < until
            })
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn runtime(&self, call_id: Uuid) -> Result<Arc<VoiceSessionRuntime>> {
        self.sessions
            .read()
            .get(&call_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no session for call {call_id}")))
    }
}
