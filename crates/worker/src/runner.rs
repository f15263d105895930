//! Poll-loop harness shared by all worker loops.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

/// Drive one worker loop until shutdown.
///
/// `tick` runs one claim-and-process batch and reports how many items
/// it handled. Tick errors — and panics — are logged and the loop
/// continues; failures stay isolated to the iteration that hit them.
/// The loop sleeps for the poll interval only after an empty batch, so
/// a deep backlog drains at full speed.
pub async fn run_loop<F, Fut>(
    name: &'static str,
    poll_interval: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = vx_domain::Result<usize>>,
{
    tracing::info!(loop_name = name, "worker loop started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let processed = match AssertUnwindSafe(tick()).catch_unwind().await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::error!(loop_name = name, error = %e, "worker tick failed");
                0
            }
            Err(_) => {
                tracing::error!(loop_name = name, "worker tick panicked");
                0
            }
        };

        if processed == 0 {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    tracing::info!(loop_name = name, "worker loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let tick_counter = ticks.clone();
        let stopper = shutdown.clone();
        let handle = tokio::spawn(run_loop(
            "test",
            Duration::from_millis(5),
            shutdown,
            move || {
                let ticks = tick_counter.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        stopper.cancel();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn tick_panics_do_not_kill_the_loop() {
        let shutdown = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let tick_counter = ticks.clone();
        let stopper = shutdown.clone();
        let handle = tokio::spawn(run_loop(
            "panicky",
            Duration::from_millis(5),
            shutdown,
            move || {
                let ticks = tick_counter.clone();
                async move {
                    if ticks.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first tick blows up");
                    }
                    Ok(0)
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        stopper.cancel();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2, "loop survived the panic");
    }

    #[tokio::test]
    async fn tick_errors_do_not_kill_the_loop() {
        let shutdown = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let tick_counter = ticks.clone();
        let stopper = shutdown.clone();
        let handle = tokio::spawn(run_loop(
            "flaky",
            Duration::from_millis(5),
            shutdown,
            move || {
                let ticks = tick_counter.clone();
                async move {
                    let n = ticks.fetch_add(1, Ordering::SeqCst);
                    if n % 2 == 0 {
                        Err(vx_domain::Error::Other("boom".into()))
                    } else {
                        Ok(0)
                    }
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        stopper.cancel();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }
}
