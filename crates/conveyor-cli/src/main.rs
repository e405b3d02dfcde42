use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conveyor_core::{
    Backoff, InMemoryQueue, QueueConfig, RetryState, RunError, Runner, Worker,
};

/// Demo worker: "sends" an email, failing the first `flaky_failures`
/// attempts with a retryable error.
#[derive(Debug, Serialize, Deserialize)]
struct SendEmail {
    to: String,
    subject: String,
    #[serde(default)]
    flaky_failures: u32,
    #[serde(flatten)]
    retry: RetryState,
}

#[async_trait]
impl Worker for SendEmail {
    const TOPIC: &'static str = "emails";

    fn name(&self) -> &str {
        "send-email"
    }

    fn max_attempts(&self) -> u32 {
        4
    }

    fn retry_delay(&self) -> Duration {
        Backoff::Exponential {
            base: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: true,
        }
        .delay_for(self.attempts())
    }

    async fn run(&mut self) -> Result<(), RunError> {
        if self.attempts() <= self.flaky_failures {
            return Err(RunError::retryable("smtp connection reset"));
        }
        info!(to = %self.to, subject = %self.subject, "email sent");
        Ok(())
    }

    fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    fn retry_state_mut(&mut self) -> &mut RetryState {
        &mut self.retry
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let queue = InMemoryQueue::new();
    let publisher = queue.publisher();

    let mut runner = Runner::new();
    runner.register::<SendEmail>()?;
    runner.set_queue(Box::new(queue), QueueConfig::default())?;
    let shutdown = runner.shutdown_handle();

    // Feed a few jobs in, then stop once they have had time to resolve.
    // A ctrl-c would stop the runner the same way.
    tokio::spawn(async move {
        for (n, flaky_failures) in [(1u32, 0u32), (2, 2), (3, 0)] {
            let body = serde_json::to_vec(&serde_json::json!({
                "to": format!("user{n}@example.com"),
                "subject": format!("hello #{n}"),
                "flaky_failures": flaky_failures,
            }))
            .expect("demo payload serializes");
            if let Err(err) = publisher.publish("emails", body).await {
                eprintln!("publish failed: {err}");
            }
        }

        sleep(Duration::from_secs(3)).await;
        shutdown.shutdown();
    });

    runner.listen().await?;
    Ok(())
}
