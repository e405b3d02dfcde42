//! Retry executor: the per-job state machine, plus the drain counter that
//! gates shutdown.
//!
//! Each accepted job runs its whole retry chain (delays included) on its own
//! spawned task, so one job's backoff never blocks the dispatch loop or any
//! other job. Retries are a loop, not recursion: attempt, evaluate, sleep,
//! attempt again.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::registry::JobWorker;

/// Count of jobs accepted but not yet terminally resolved.
///
/// The guard returned by [`InFlight::acquire`] travels with the job's whole
/// retry chain and decrements on drop, so every job decrements exactly once
/// no matter which terminal state it reaches.
#[derive(Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    notify: Notify,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acquire(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            inner: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until no job is in flight.
    pub async fn drained(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking, so a decrement landing
            // between the check and the await cannot be missed.
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct InFlightGuard {
    inner: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

/// Terminal state of one job's retry chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminal {
    Succeeded,
    Exhausted,
}

/// Run a job's retry chain on its own task. The guard is released when the
/// chain reaches a terminal state.
pub(crate) fn spawn(worker: Box<dyn JobWorker>, guard: InFlightGuard) {
    tokio::spawn(async move {
        let _guard = guard;
        run_to_completion(worker).await;
    });
}

/// Drive one worker to a terminal state: run, delay, retry with the
/// worker's own backoff, or give up.
pub(crate) async fn run_to_completion(mut worker: Box<dyn JobWorker>) -> Terminal {
    loop {
        let delay = worker.run_delay();
        if !delay.is_zero() {
            info!(worker = worker.name(), ?delay, "delaying job");
            sleep(delay).await;
        }

        worker.record_attempt();
        info!(
            worker = worker.name(),
            attempt = worker.attempts(),
            max_attempts = worker.max_attempts(),
            "running job"
        );

        match worker.run().await {
            Ok(()) => return Terminal::Succeeded,
            Err(err) if err.is_retryable() => {
                warn!(worker = worker.name(), error = %err, "attempt failed");
                if worker.attempts() >= worker.max_attempts() {
                    error!(
                        worker = worker.name(),
                        attempts = worker.attempts(),
                        "max attempts reached, giving up on job"
                    );
                    return Terminal::Exhausted;
                }
                worker.schedule_retry();
                info!(
                    worker = worker.name(),
                    attempt = worker.attempts() + 1,
                    max_attempts = worker.max_attempts(),
                    "retrying job"
                );
            }
            Err(err) => {
                error!(worker = worker.name(), error = %err, "job failed, not retryable");
                return Terminal::Exhausted;
            }
        }
    }
}
