//! Per-call turn serialization.
//!
//! Each call gets a FIFO: at most one user turn executes at a time, and
//! later turns wait for the earlier ones to settle. A failed turn
//! reports its failure to whoever enqueued it and nothing else — the
//! queue only guarantees order, not success. Closing a call drops every
//! queued turn without running it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vx_domain::{Error, Result};

#[derive(Clone)]
struct CallQueue {
    lock: Arc<Semaphore>,
    closed: CancellationToken,
}

/// Process-wide map of per-call turn queues.
#[derive(Default)]
pub struct TurnQueues {
    queues: Mutex<HashMap<Uuid, CallQueue>>,
}

impl TurnQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, call_id: Uuid) -> CallQueue {
        let mut queues = self.queues.lock();
        queues
            .entry(call_id)
            .or_insert_with(|| CallQueue {
                lock: Arc::new(Semaphore::new(1)),
                closed: CancellationToken::new(),
            })
            .clone()
    }

    /// Run `task` once every earlier turn for this call has settled.
    ///
    /// Semaphore acquisition is FIFO, so turns execute in enqueue
    /// order. If the call closes while a turn is still waiting, the
    /// turn is dropped unrun and the caller sees an error.
    pub async fn run_turn<F, Fut, T>(&self, call_id: Uuid, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let queue = self.queue_for(call_id);

        let _permit = tokio::select! {
            biased;
            _ = queue.closed.cancelled() => {
                return Err(Error::Other("call closed before turn started".into()));
            }
            permit = queue.lock.clone().acquire_owned() => {
                permit.map_err(|_| Error::Other("call closed before turn started".into()))?
            }
        };

        if queue.closed.is_cancelled() {
            return Err(Error::Other("call closed before turn started".into()));
        }

        task().await
    }

    /// Tear down the queue for a call: queued-but-unstarted turns are
    /// dropped; the running turn (if any) finishes on its own.
    pub fn close(&self, call_id: Uuid) {
        let queue = self.queues.lock().remove(&call_id);
        if let Some(queue) = queue {
            queue.closed.cancel();
            queue.lock.close();
        }
    }

    /// Number of calls with a live queue (for monitoring).
    pub fn call_count(&self) -> usize {
        self.queues.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn one_turn_at_a_time_per_call() {
        let queues = Arc::new(TurnQueues::new());
        let call = Uuid::new_v4();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlap_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queues = queues.clone();
            let in_flight = in_flight.clone();
            let overlap_seen = overlap_seen.clone();
            handles.push(tokio::spawn(async move {
                queues
                    .run_turn(call, || async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst);
                        if now > 0 {
                            overlap_seen.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(overlap_seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_propagate_without_blocking_the_queue() {
        let queues = TurnQueues::new();
        let call = Uuid::new_v4();

        let failed: Result<()> = queues
            .run_turn(call, || async { Err(Error::Other("turn exploded".into())) })
            .await;
        assert!(failed.is_err());

        // The queue is not poisoned.
        let ok = queues.run_turn(call, || async { Ok(42) }).await.unwrap();
        assert_eq!(ok, 42);
    }

    #[tokio::test]
    async fn different_calls_run_concurrently() {
        let queues = Arc::new(TurnQueues::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let queues_a = queues.clone();
        let first = tokio::spawn(async move {
            queues_a
                .run_turn(a, || async {
                    // Blocks until the other call's turn completes.
                    rx.await.map_err(|_| Error::Other("dropped".into()))?;
                    Ok(())
                })
                .await
        });

        queues
            .run_turn(b, || async {
                tx.send(()).map_err(|_| Error::Other("send".into()))?;
                Ok(())
            })
            .await
            .unwrap();

        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_drops_queued_turns() {
        let queues = Arc::new(TurnQueues::new());
        let call = Uuid::new_v4();
        let ran = Arc::new(AtomicUsize::new(0));

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let queues_running = queues.clone();
        let running = tokio::spawn(async move {
            queues_running
                .run_turn(call, || async {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok(())
                })
                .await
        });
        started_rx.await.unwrap();

        // Queue a second turn behind the running one, then close.
        let queues_queued = queues.clone();
        let ran_queued = ran.clone();
        let queued = tokio::spawn(async move {
            queues_queued
                .run_turn(call, || async move {
                    ran_queued.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        queues.close(call);
        assert!(queued.await.unwrap().is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0, "queued turn must not run");

        let _ = release_tx.send(());
        running.await.unwrap().unwrap();
    }
}
