//! Worker registry: topic name -> decode-and-run factory.
//!
//! Type erasure works the same way as a typed handler registry: the generic
//! [`Worker`] impl is wrapped into an object-safe [`JobWorker`] so the
//! dispatch loop and executor can hold `Box<dyn JobWorker>` without knowing
//! the concrete type.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::worker::{RunError, Worker};

/// Object-safe view of a deserialized worker, as the executor drives it.
#[async_trait]
pub(crate) trait JobWorker: Send {
    fn name(&self) -> &str;

    fn attempts(&self) -> u32;

    fn max_attempts(&self) -> u32;

    fn record_attempt(&mut self);

    fn run_delay(&self) -> Duration;

    /// Stamp the next start from the worker's own retry-delay policy.
    fn schedule_retry(&mut self);

    async fn run(&mut self) -> Result<(), RunError>;
}

#[async_trait]
impl<W: Worker> JobWorker for W {
    fn name(&self) -> &str {
        Worker::name(self)
    }

    fn attempts(&self) -> u32 {
        Worker::attempts(self)
    }

    fn max_attempts(&self) -> u32 {
        Worker::max_attempts(self)
    }

    fn record_attempt(&mut self) {
        Worker::record_attempt(self);
    }

    fn run_delay(&self) -> Duration {
        Worker::run_delay(self)
    }

    fn schedule_retry(&mut self) {
        let at = self.next_start(self.retry_delay());
        self.set_next_start(at);
    }

    async fn run(&mut self) -> Result<(), RunError> {
        Worker::run(self).await
    }
}

/// Decode raw topic bytes into a runnable worker.
pub(crate) trait WorkerFactory: Send + Sync {
    fn topic(&self) -> &'static str;

    fn decode(&self, body: &[u8]) -> Result<Box<dyn JobWorker>, serde_json::Error>;
}

/// JSON factory for one worker type. The codec lives here so a future
/// non-JSON format only touches this seam.
struct JsonFactory<W: Worker> {
    _marker: PhantomData<fn() -> W>,
}

impl<W: Worker> JsonFactory<W> {
    fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<W: Worker> WorkerFactory for JsonFactory<W> {
    fn topic(&self) -> &'static str {
        W::TOPIC
    }

    fn decode(&self, body: &[u8]) -> Result<Box<dyn JobWorker>, serde_json::Error> {
        let worker: W = serde_json::from_slice(body)?;
        Ok(Box::new(worker))
    }
}

/// Registry of worker factories (topic -> factory).
///
/// Design:
/// - Built during configuration (mutable), read-only once the runner starts.
/// - Duplicate topic registration overwrites: last write wins.
#[derive(Default)]
pub struct WorkerRegistry {
    factories: HashMap<&'static str, Arc<dyn WorkerFactory>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub(crate) fn insert<W: Worker>(&mut self) {
        self.factories.insert(W::TOPIC, Arc::new(JsonFactory::<W>::new()));
    }

    pub(crate) fn get(&self, topic: &str) -> Option<&Arc<dyn WorkerFactory>> {
        self.factories.get(topic)
    }

    pub(crate) fn topics(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
