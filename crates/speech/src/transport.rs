//! Media-room transport.
//!
//! The session publishes agent audio here and yanks it back on
//! barge-in. The room variant keeps a WebSocket to the media-room
//! service with a writer task draining a publish queue;
//! `interrupt_playback` empties the queue so nothing more of the
//! current utterance reaches the room. The mock variant records what
//! would have been published and is used by tests and mock-mode runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use vx_domain::{Error, Result};
use vx_media::AudioPacket;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub enum MediaTransport {
    Room(RoomTransport),
    Mock(MockTransport),
}

impl MediaTransport {
    /// Connect to the room with a one-time join token.
    pub async fn connect_room(url: &str, room: &str, join_token: &str) -> Result<Self> {
        Ok(Self::Room(RoomTransport::connect(url, room, join_token).await?))
    }

    pub fn mock() -> (Self, MockTransport) {
        let mock = MockTransport::default();
        (Self::Mock(mock.clone()), mock)
    }

    /// Queue an audio packet for playback in the room.
    pub fn publish_audio(&self, packet: AudioPacket) {
        match self {
            Self::Room(room) => room.publish_audio(packet),
            Self::Mock(mock) => mock.publish_audio(packet),
        }
    }

    /// Drop everything queued but not yet played.
    pub fn interrupt_playback(&self) {
        match self {
            Self::Room(room) => room.interrupt_playback(),
            Self::Mock(mock) => mock.interrupt_playback(),
        }
    }

    pub fn disconnect(&self) {
        match self {
            Self::Room(room) => room.disconnect(),
            Self::Mock(_) => {}
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Room transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RoomTransport {
    queue: Arc<PublishQueue>,
    shutdown: CancellationToken,
}

struct PublishQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl PublishQueue {
    fn push(&self, frame: Vec<u8>) {
        self.frames.lock().push_back(frame);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Vec<u8>> {
        self.frames.lock().pop_front()
    }

    fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let dropped = frames.len();
        frames.clear();
        dropped
    }
}

impl RoomTransport {
    async fn connect(url: &str, room: &str, join_token: &str) -> Result<Self> {
        let endpoint = format!(
            "{}/rtc?room={}&access_token={}",
            url.trim_end_matches('/'),
            room,
            join_token
        );
        let (socket, _response) = connect_async(&endpoint).await.map_err(|e| Error::Speech {
            provider: "room".into(),
            message: format!("room connect failed: {e}"),
        })?;
        let (mut write, mut read) = socket.split();

        let queue = Arc::new(PublishQueue {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        let shutdown = CancellationToken::new();

        let writer_queue = queue.clone();
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => {
                        let _ = write.close().await;
                        break;
                    }
                    _ = writer_queue.notify.notified() => {
                        while let Some(frame) = writer_queue.pop() {
                            if write.send(Message::Binary(frame)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        // Remote audio tracks are subscribed but not consumed here —
        // caller audio reaches the session over the carrier stream.
        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    message = read.next() => {
                        match message {
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::debug!(error = %e, "room socket read error");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(Self { queue, shutdown })
    }

    fn publish_audio(&self, packet: AudioPacket) {
        let mut bytes = Vec::with_capacity(packet.samples.len() * 2);
        for sample in &packet.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self.queue.push(bytes);
    }

    fn interrupt_playback(&self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(frames = dropped, "publish queue drained on interrupt");
        }
    }

    fn disconnect(&self) {
        self.shutdown.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// No-op transport that records its inputs. Clones share state, so a
/// test can hold one clone while the session owns the other.
#[derive(Clone, Default)]
pub struct MockTransport {
    published: Arc<Mutex<Vec<AudioPacket>>>,
    interrupts: Arc<AtomicUsize>,
}

impl MockTransport {
    fn publish_audio(&self, packet: AudioPacket) {
        self.published.lock().push(packet);
    }

    fn interrupt_playback(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<AudioPacket> {
        self.published.lock().clone()
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_publishes_and_interrupts() {
        let (transport, probe) = MediaTransport::mock();
        transport.publish_audio(AudioPacket::new(vec![1, 2, 3], 16_000));
        transport.publish_audio(AudioPacket::new(vec![4], 16_000));
        transport.interrupt_playback();

        assert_eq!(probe.published().len(), 2);
        assert_eq!(probe.published()[0].samples, vec![1, 2, 3]);
        assert_eq!(probe.interrupt_count(), 1);
    }

    #[test]
    fn publish_queue_clear_reports_dropped() {
        let queue = PublishQueue {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        };
        queue.push(vec![0; 10]);
        queue.push(vec![0; 10]);
        assert_eq!(queue.clear(), 2);
        assert!(queue.pop().is_none());
    }
}
