//! Carrier media bridge — the outbound half of the media stream.
//!
//! Each connected media stream registers a sender here keyed by call
//! id. Agent audio goes out as base64 μ-law `media` frames; barge-in
//! flushes the carrier's playback buffer with a `clear` frame so both
//! the room and the phone go quiet together.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use vx_media::carrier;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `{"event":"media",...}` — one chunk of outbound audio.
pub fn media_frame(stream_sid: &str, payload_b64: &str) -> String {
    serde_json::json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": payload_b64 },
    })
    .to_string()
}

/// `{"event":"clear",...}` — flush whatever the carrier is playing.
pub fn clear_frame(stream_sid: &str) -> String {
    serde_json::json!({
        "event": "clear",
        "streamSid": stream_sid,
    })
    .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Binding {
    stream_sid: String,
    outbound: mpsc::UnboundedSender<String>,
}

/// Process-wide map of live carrier streams, keyed by call id.
#[derive(Default)]
pub struct CarrierBridges {
    bindings: RwLock<HashMap<Uuid, Binding>>,
}

impl CarrierBridges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a freshly started stream to its call. Replaces any stale
    /// binding from a dropped socket.
    pub fn bind(&self, call_id: Uuid, stream_sid: String, outbound: mpsc::UnboundedSender<String>) {
        self.bindings
            .write()
            .insert(call_id, Binding { stream_sid, outbound });
    }

    pub fn unbind(&self, call_id: Uuid) {
        self.bindings.write().remove(&call_id);
    }

    pub fn is_bound(&self, call_id: Uuid) -> bool {
        self.bindings.read().contains_key(&call_id)
    }

    /// Send agent audio to the phone. A call without a live stream
    /// (e.g. a greeting spoken before the stream attaches) is dropped
    /// quietly — the room still gets the audio.
    pub fn send_media(&self, call_id: Uuid, samples: &[i16], sample_rate: u32) {
        let bindings = self.bindings.read();
        let Some(binding) = bindings.get(&call_id) else {
            tracing::debug!(call_id = %call_id, "no carrier stream bound, media frame skipped");
            return;
        };
        let payload = carrier::encode_outbound(samples, sample_rate, 1);
        let frame = media_frame(&binding.stream_sid, &payload);
        let _ = binding.outbound.send(frame);
    }

    /// Stop carrier-side playback immediately (barge-in).
    pub fn send_clear(&self, call_id: Uuid) {
        let bindings = self.bindings.read();
        let Some(binding) = bindings.get(&call_id) else {
            return;
        };
        let _ = binding.outbound.send(clear_frame(&binding.stream_sid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_shapes_match_the_wire_contract() {
        let media: serde_json::Value =
            serde_json::from_str(&media_frame("MZ1", "AAAA")).unwrap();
        assert_eq!(media["event"], "media");
        assert_eq!(media["streamSid"], "MZ1");
        assert_eq!(media["media"]["payload"], "AAAA");

        let clear: serde_json::Value = serde_json::from_str(&clear_frame("MZ1")).unwrap();
        assert_eq!(clear["event"], "clear");
        assert_eq!(clear["streamSid"], "MZ1");
    }

    #[tokio::test]
    async fn bound_stream_receives_media_and_clear() {
        let bridges = CarrierBridges::new();
        let call_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bridges.bind(call_id, "MZ1".into(), tx);
        assert!(bridges.is_bound(call_id));

        bridges.send_media(call_id, &[0i16; 160], 8_000);
        bridges.send_clear(call_id);

        let media: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(media["event"], "media");
        assert!(!media["media"]["payload"].as_str().unwrap().is_empty());

        let clear: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(clear["event"], "clear");

        bridges.unbind(call_id);
        assert!(!bridges.is_bound(call_id));
    }

    #[test]
    fn unbound_call_is_a_quiet_no_op() {
        let bridges = CarrierBridges::new();
        bridges.send_media(Uuid::new_v4(), &[1i16, 2, 3], 16_000);
        bridges.send_clear(Uuid::new_v4());
    }
}
