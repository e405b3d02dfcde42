//! Dispatch loop: the single point where incoming work is accepted or the
//! process begins shutdown.
//!
//! Every iteration races exactly two event sources: the shutdown watch
//! channel and the multiplexed job stream. Accepted jobs are handed off to
//! the executor without awaiting them, so the loop is immediately back at
//! the race.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::error::ConveyorError;
use crate::executor::{self, InFlight};
use crate::mux::Job;
use crate::registry::WorkerRegistry;

/// Programmatic shutdown trigger, equivalent to receiving a termination
/// signal. Clonable; useful for embedding and tests.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub(crate) fn new(tx: watch::Sender<bool>) -> Self {
        Self { tx }
    }

    /// Stop accepting new jobs. In-flight jobs still run to completion.
    pub fn shutdown(&self) {
        // send_replace: a shutdown requested before the loop subscribes must
        // not be lost.
        self.tx.send_replace(true);
    }
}

/// Forward standard termination signals into the shutdown channel.
pub(crate) fn listen_for_signals(tx: watch::Sender<bool>) -> Result<(), ConveyorError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let mut quit = signal(SignalKind::quit())?;

        tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
                _ = hangup.recv() => "SIGHUP",
                _ = quit.recv() => "SIGQUIT",
            };
            info!(signal = name, "received signal, stopping workers");
            tx.send_replace(true);
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received ctrl-c, stopping workers");
                tx.send_replace(true);
            }
        });
    }

    Ok(())
}

/// Run the accept loop until shutdown, then wait for the drain counter to
/// reach zero so no accepted job is abandoned by process exit.
///
/// An unexpected close of the job stream is an error distinct from normal
/// shutdown; in-flight jobs are still drained before it is returned.
pub(crate) async fn dispatch_loop(
    mut jobs: mpsc::Receiver<Job>,
    registry: &WorkerRegistry,
    in_flight: &Arc<InFlight>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), ConveyorError> {
    info!("listening for work");

    let result = loop {
        // A shutdown requested before we subscribed still counts.
        if *shutdown.borrow_and_update() {
            info!("shutdown requested, no longer accepting jobs");
            break Ok(());
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Sender gone; treat as shutdown.
                    break Ok(());
                }
                // Re-check at the top of the loop.
            }
            job = jobs.recv() => match job {
                Some(job) => accept(job, registry, in_flight),
                None => {
                    error!("job stream closed while still listening");
                    break Err(ConveyorError::StreamClosed);
                }
            }
        }
    };

    let outstanding = in_flight.count();
    if outstanding > 0 {
        info!(jobs = outstanding, "waiting for in-flight jobs to finish");
    }
    in_flight.drained().await;

    result
}

fn accept(job: Job, registry: &WorkerRegistry, in_flight: &Arc<InFlight>) {
    let Some(factory) = registry.get(&job.topic) else {
        // Streams are built from the registry, so this means the queue
        // delivered for a topic we never bound.
        error!(topic = %job.topic, "no worker registered for topic, dropping job");
        return;
    };

    match factory.decode(&job.body) {
        // Acquired only after a successful decode: dropped jobs are not
        // counted against the drain.
        Ok(worker) => executor::spawn(worker, in_flight.acquire()),
        Err(source) => {
            let err = ConveyorError::Decode {
                topic: job.topic,
                source,
            };
            error!(error = %err, "dropping job");
        }
    }
}
