//! Fixed-interval background tasks.
//!
//! A poller runs its tick on a tokio interval until it is told to stop. A tick
//! that is still awaiting a reply when the stop signal arrives is allowed to
//! finish; the loop exits right after it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// When the first tick fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstTick {
    /// Immediately on spawn
    Immediate,
    /// One period after spawn
    AfterPeriod,
}

/// Handle to a running poller. Dropping it signals the task to stop.
#[derive(Debug)]
pub struct PollerHandle {
    name: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Returns `true` while the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(poller = self.name, error = %e, "Poller task ended abnormally");
            }
        }
        tracing::debug!(poller = self.name, "Poller stopped");
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Spawn `tick` every `period` until the returned handle is stopped or dropped.
///
/// Must be called from within a tokio runtime.
pub fn spawn_poller<F, Fut>(
    name: &'static str,
    period: Duration,
    first: FirstTick,
    mut tick: F,
) -> PollerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let start = match first {
            FirstTick::Immediate => Instant::now(),
            FirstTick::AfterPeriod => Instant::now() + period,
        };
        let mut ticker = time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                _ = &mut shutdown_rx => break,
            }
        }
    });

    tracing::debug!(poller = name, ?period, "Poller started");
    PollerHandle {
        name,
        shutdown_tx: Some(shutdown_tx),
        task_handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> + Send {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_poller_ticks_on_spawn_then_every_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let poller = spawn_poller(
            "test",
            Duration::from_secs(2),
            FirstTick::Immediate,
            counting(Arc::clone(&count)),
        );

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_poller_waits_one_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let poller = spawn_poller(
            "test",
            Duration::from_secs(1),
            FirstTick::AfterPeriod,
            counting(Arc::clone(&count)),
        );

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let poller = spawn_poller(
            "test",
            Duration::from_secs(1),
            FirstTick::Immediate,
            counting(Arc::clone(&count)),
        );
        time::sleep(Duration::from_millis(10)).await;
        assert!(poller.is_running());
        poller.stop().await;

        let after_stop = count.load(Ordering::SeqCst);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
