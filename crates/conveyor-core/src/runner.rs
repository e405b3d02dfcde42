//! Runner: composition root owning the queue, the worker registry, and
//! lifecycle (initialize / listen / close).
//!
//! Explicitly constructed and passed around, not a process-wide global.
//! Registry and queue are only mutable before [`Runner::listen`] marks the
//! runner as started; from then on both are read-only for the process
//! lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::dispatch::{self, ShutdownHandle};
use crate::error::ConveyorError;
use crate::executor::InFlight;
use crate::mux::multiplex;
use crate::queue::{InMemoryQueue, Queue, QueueConfig};
use crate::registry::WorkerRegistry;
use crate::worker::Worker;

pub struct Runner {
    queue: Option<Box<dyn Queue>>,
    config: QueueConfig,
    registry: WorkerRegistry,
    started: bool,
    in_flight: Arc<InFlight>,
    shutdown_tx: watch::Sender<bool>,
}

impl Runner {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue: None,
            config: QueueConfig::default(),
            registry: WorkerRegistry::new(),
            started: false,
            in_flight: InFlight::new(),
            shutdown_tx,
        }
    }

    /// Register a worker type for its topic. Registering the same topic
    /// twice keeps the later registration.
    pub fn register<W: Worker>(&mut self) -> Result<(), ConveyorError> {
        if self.started {
            return Err(ConveyorError::AlreadyStarted("register a worker"));
        }
        self.registry.insert::<W>();
        Ok(())
    }

    /// Select the queue implementation and its configuration. When never
    /// called, the in-memory queue is used.
    pub fn set_queue(
        &mut self,
        queue: Box<dyn Queue>,
        config: QueueConfig,
    ) -> Result<(), ConveyorError> {
        if self.started {
            return Err(ConveyorError::AlreadyStarted("set the queue"));
        }
        self.queue = Some(queue);
        self.config = config;
        Ok(())
    }

    /// Trigger the same shutdown path as a termination signal.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shutdown_tx.clone())
    }

    /// The blocking entry point: initialize, consume until a shutdown
    /// signal, drain in-flight jobs, close the queue.
    ///
    /// The queue is closed on every exit path that got past queue setup,
    /// error or not.
    pub async fn listen(&mut self) -> Result<(), ConveyorError> {
        info!("starting up");
        self.started = true;

        // Checked before any queue connection attempt.
        if self.registry.is_empty() {
            return Err(ConveyorError::NoWorkers);
        }

        let result = self.consume().await;

        if let Some(queue) = self.queue.as_mut() {
            queue.close().await;
        }
        info!("shut down");
        result
    }

    async fn consume(&mut self) -> Result<(), ConveyorError> {
        let queue = self.queue.get_or_insert_with(|| {
            info!("queue not set, defaulting to in-memory");
            Box::new(InMemoryQueue::new())
        });

        queue.initialize(&self.config).await?;

        // One stream per registered topic.
        let topics: Vec<&'static str> = self.registry.topics().collect();
        let mut streams = HashMap::new();
        for name in topics {
            let mut topic = queue.topic(name).await?;
            let stream = topic.stream().await?;
            info!(topic = name, "consuming topic");
            streams.insert(name.to_string(), stream);
        }

        let jobs = multiplex(streams);

        dispatch::listen_for_signals(self.shutdown_tx.clone())?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        dispatch::dispatch_loop(jobs, &self.registry, &self.in_flight, &mut shutdown_rx).await
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use crate::queue::Topic;
    use crate::worker::{RetryState, RunError};

    static INVOICE_RUNS: AtomicU32 = AtomicU32::new(0);

    #[derive(Serialize, Deserialize)]
    struct Invoice {
        amount: u64,
        #[serde(flatten)]
        retry: RetryState,
    }

    #[async_trait]
    impl Worker for Invoice {
        const TOPIC: &'static str = "invoices";

        fn name(&self) -> &str {
            "invoice"
        }

        fn max_attempts(&self) -> u32 {
            3
        }

        async fn run(&mut self) -> Result<(), RunError> {
            INVOICE_RUNS.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn retry_state(&self) -> &RetryState {
            &self.retry
        }

        fn retry_state_mut(&mut self) -> &mut RetryState {
            &mut self.retry
        }
    }

    /// Queue probe recording which lifecycle calls were made.
    #[derive(Clone, Default)]
    struct ProbeQueue {
        initialized: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
        fail_init: bool,
    }

    struct ProbeTopic;

    #[async_trait]
    impl Topic for ProbeTopic {
        async fn stream(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, ConveyorError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    #[async_trait]
    impl Queue for ProbeQueue {
        async fn initialize(&mut self, _config: &QueueConfig) -> Result<(), ConveyorError> {
            self.initialized.store(true, Ordering::Relaxed);
            if self.fail_init {
                return Err(ConveyorError::Queue("connection refused".into()));
            }
            Ok(())
        }

        async fn topic(&mut self, _name: &str) -> Result<Box<dyn Topic>, ConveyorError> {
            Ok(Box::new(ProbeTopic))
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn listen_processes_published_jobs_until_shutdown() {
        let queue = InMemoryQueue::new();
        let publisher = queue.publisher();

        let mut runner = Runner::new();
        runner.register::<Invoice>().unwrap();
        runner
            .set_queue(Box::new(queue), QueueConfig::default())
            .unwrap();
        let handle = runner.shutdown_handle();

        let before = INVOICE_RUNS.load(Ordering::Relaxed);
        let listener = tokio::spawn(async move { runner.listen().await });

        for amount in [100u64, 250, 400] {
            let body = serde_json::to_vec(&serde_json::json!({ "amount": amount })).unwrap();
            publisher.publish("invoices", body).await.unwrap();
        }

        sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        timeout(Duration::from_secs(1), listener)
            .await
            .expect("listen should return after shutdown")
            .unwrap()
            .unwrap();
        assert_eq!(INVOICE_RUNS.load(Ordering::Relaxed), before + 3);
    }

    #[tokio::test]
    async fn zero_workers_fails_before_any_queue_contact() {
        let probe = ProbeQueue::default();
        let initialized = Arc::clone(&probe.initialized);

        let mut runner = Runner::new();
        runner
            .set_queue(Box::new(probe), QueueConfig::default())
            .unwrap();

        let err = runner.listen().await.unwrap_err();
        assert!(matches!(err, ConveyorError::NoWorkers));
        assert!(!initialized.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn queue_init_failure_propagates_and_still_closes() {
        let probe = ProbeQueue {
            fail_init: true,
            ..ProbeQueue::default()
        };
        let closed = Arc::clone(&probe.closed);

        let mut runner = Runner::new();
        runner.register::<Invoice>().unwrap();
        runner
            .set_queue(Box::new(probe), QueueConfig::default())
            .unwrap();

        let err = runner.listen().await.unwrap_err();
        assert!(matches!(err, ConveyorError::Queue(_)));
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn configuration_is_frozen_after_start() {
        let mut runner = Runner::new();
        runner.started = true;

        let registered = runner.registry.len();
        assert!(matches!(
            runner.register::<Invoice>(),
            Err(ConveyorError::AlreadyStarted(_))
        ));
        assert_eq!(runner.registry.len(), registered);

        assert!(matches!(
            runner.set_queue(Box::new(InMemoryQueue::new()), QueueConfig::default()),
            Err(ConveyorError::AlreadyStarted(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_before_listen_still_stops_promptly() {
        let queue = InMemoryQueue::new();

        let mut runner = Runner::new();
        runner.register::<Invoice>().unwrap();
        runner
            .set_queue(Box::new(queue), QueueConfig::default())
            .unwrap();

        runner.shutdown_handle().shutdown();

        timeout(Duration::from_secs(1), runner.listen())
            .await
            .expect("pre-arranged shutdown must not hang")
            .unwrap();
    }
}
