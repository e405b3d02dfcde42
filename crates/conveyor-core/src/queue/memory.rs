//! In-memory queue implementation.
//!
//! Backed by one bounded channel per topic. The queue half hands receivers
//! to the core; the clonable [`Publisher`] half feeds payloads in from tests
//! and demos. Either side may touch a topic first: the channel is created on
//! first use.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::{Queue, QueueConfig, Topic};
use crate::error::ConveyorError;

/// Per-topic buffer. Bounded so a stalled consumer eventually throttles
/// publishers instead of growing without limit.
const TOPIC_BUFFER: usize = 32;

struct TopicChannel {
    tx: mpsc::Sender<Vec<u8>>,
    /// Taken by the first `stream()` call.
    rx: Option<mpsc::Receiver<Vec<u8>>>,
}

#[derive(Default)]
struct Shared {
    topics: HashMap<String, TopicChannel>,
    closed: bool,
}

impl Shared {
    fn channel(&mut self, name: &str) -> Result<&mut TopicChannel, ConveyorError> {
        if self.closed {
            return Err(ConveyorError::Queue("queue is closed".into()));
        }
        Ok(self.topics.entry(name.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(TOPIC_BUFFER);
            TopicChannel { tx, rx: Some(rx) }
        }))
    }
}

/// In-memory queue. Clones share the same topic channels, so a clone kept
/// outside the runner still reaches the topics the runner consumes.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishing handle for this queue's topics.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn initialize(&mut self, _config: &QueueConfig) -> Result<(), ConveyorError> {
        let mut shared = self.shared.lock().await;
        shared.closed = false;
        Ok(())
    }

    async fn topic(&mut self, name: &str) -> Result<Box<dyn Topic>, ConveyorError> {
        let mut shared = self.shared.lock().await;
        shared.channel(name)?;
        Ok(Box::new(MemoryTopic {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&mut self) {
        let mut shared = self.shared.lock().await;
        // Dropping the senders ends every stream.
        shared.topics.clear();
        shared.closed = true;
    }
}

struct MemoryTopic {
    name: String,
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl Topic for MemoryTopic {
    async fn stream(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, ConveyorError> {
        let mut shared = self.shared.lock().await;
        shared
            .channel(&self.name)?
            .rx
            .take()
            .ok_or_else(|| ConveyorError::Queue(format!("topic {} is already streamed", self.name)))
    }
}

/// Publishing half of [`InMemoryQueue`].
#[derive(Clone)]
pub struct Publisher {
    shared: Arc<Mutex<Shared>>,
}

impl Publisher {
    /// Push one payload onto a topic. Waits when the topic buffer is full.
    pub async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), ConveyorError> {
        // Clone the sender out so the map lock is not held across the send.
        let tx = {
            let mut shared = self.shared.lock().await;
            shared.channel(topic)?.tx.clone()
        };
        tx.send(body)
            .await
            .map_err(|_| ConveyorError::Queue(format!("topic {topic} is no longer consumed")))
    }
}
