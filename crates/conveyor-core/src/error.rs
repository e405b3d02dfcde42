use thiserror::Error;

/// Errors surfaced by the core itself.
///
/// Per-attempt worker failures are *not* here: those are `worker::RunError`
/// and stay inside the retry executor. Only configuration errors abort
/// startup; a single job can never take the process down.
#[derive(Debug, Error)]
pub enum ConveyorError {
    #[error("cannot {0} after the runner has started")]
    AlreadyStarted(&'static str),

    #[error("no workers have been registered")]
    NoWorkers,

    #[error("queue: {0}")]
    Queue(String),

    #[error("decode failed for topic={topic}: {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("job stream closed unexpectedly")]
    StreamClosed,

    #[error("signal handler: {0}")]
    Signal(#[from] std::io::Error),
}
