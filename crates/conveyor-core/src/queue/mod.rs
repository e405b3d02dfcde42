//! Queue contract: the abstraction over a message source.
//!
//! The core only ever consumes per-topic byte streams; connection handling,
//! acknowledgement protocols and wire formats belong to the implementation
//! behind this trait. [`InMemoryQueue`] is the bundled development backend
//! and the default when no queue is selected.

mod memory;

pub use memory::{InMemoryQueue, Publisher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ConveyorError;

/// Opaque queue configuration: an optional endpoint plus free-form
/// implementation-specific parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    pub url: Option<String>,

    #[serde(default)]
    pub params: serde_json::Value,
}

/// A bound topic, ready to be consumed.
#[async_trait]
pub trait Topic: Send {
    /// Begin consuming. Yields raw message payloads in arrival order.
    async fn stream(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, ConveyorError>;
}

/// Queue port. Mutated only during initialization and at close; between the
/// two the runner treats it as read-only.
#[async_trait]
pub trait Queue: Send {
    /// Establish the connection/session using the stored configuration.
    async fn initialize(&mut self, config: &QueueConfig) -> Result<(), ConveyorError>;

    /// Declare/bind a topic.
    async fn topic(&mut self, name: &str) -> Result<Box<dyn Topic>, ConveyorError>;

    /// Release all resources. Expected to be idempotent.
    async fn close(&mut self);
}
