//! conveyor-core
//!
//! A dispatch-and-retry execution engine sitting between a message-queue
//! abstraction and user-supplied workers: one byte stream per registered
//! topic, deserialization into stateful [`Worker`] instances, bounded
//! retries with optional delay, and a drain counter so graceful shutdown
//! never abandons an accepted job.
//!
//! # Modules
//! - **worker**: the Worker contract, retry bookkeeping, backoff helpers
//! - **registry**: topic -> decode-and-run factories (the codec seam)
//! - **queue**: the Queue contract + the in-memory implementation
//! - **mux**: fan-in of topic streams into one tagged job channel
//! - **dispatch**: the accept loop racing jobs against shutdown
//! - **executor**: the per-job retry state machine and the drain counter
//! - **runner**: the composition root (register / set queue / listen)

pub mod error;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod worker;

mod dispatch;
mod executor;
mod mux;

pub use dispatch::ShutdownHandle;
pub use error::ConveyorError;
pub use queue::{InMemoryQueue, Publisher, Queue, QueueConfig, Topic};
pub use registry::WorkerRegistry;
pub use runner::Runner;
pub use worker::{Backoff, RetryState, RunError, Worker};
