//! Periodic background passes.
//!
//! A pass runs to completion, then the task waits one period before the next
//! one starts. Passes of the same task never overlap and a slow pass simply
//! delays the next one.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn `pass` on the runtime, running it now and then `period` after each completion.
///
/// Cancelling `shutdown` stops the task at its next wait; a pass in progress
/// is never interrupted.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, period_secs = period.as_secs(), "periodic task started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            pass().await;
            debug!(task = name, "pass complete, next in {:?}", period);

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        info!(task = name, "periodic task stopped");
    })
}
