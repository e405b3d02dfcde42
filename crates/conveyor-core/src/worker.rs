//! Worker contract: the polymorphic unit of work.
//!
//! A `Worker` is one deserialized job bound to exactly one topic. The same
//! instance is mutated across retries; it is never re-deserialized. Shared
//! retry bookkeeping lives in [`RetryState`] so a worker type only has to
//! embed it (usually `#[serde(flatten)]`-ed) and hand out accessors.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single execution attempt.
///
/// The worker decides retry eligibility itself; the executor never
/// classifies errors.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RunError {
    message: String,
    retryable: bool,
}

impl RunError {
    /// A failure the executor may retry (within the attempt budget).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that abandons the job immediately, regardless of the
    /// remaining attempt budget.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Attempt counter + scheduled start stamp for one logical job.
///
/// Design:
/// - Monotonic: `attempts` only ever grows over the job's lifetime
///   (original delivery + all retries share this counter).
/// - All fields default, so wire payloads do not need to carry them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    #[serde(default)]
    attempts: u32,

    /// When the next attempt should start (set by the executor before a
    /// retry). `None` means run immediately.
    #[serde(default)]
    next_start: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Bump the attempt counter. Called once per attempt, including the first.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn set_next_start(&mut self, at: DateTime<Utc>) {
        self.next_start = Some(at);
    }

    /// How long to wait before the next attempt may start. Zero when no
    /// stamp is set or the stamp is already in the past.
    pub fn run_delay(&self) -> Duration {
        match self.next_start {
            Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}

/// Retry delay policy helper for workers.
///
/// Workers define their own delay policy; this type covers the common
/// cases so most `retry_delay` impls are one-liners.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),

    /// `base * multiplier^(attempts - 1)`, optionally jittered by a factor
    /// in `[0.5, 1.5)` to avoid thundering herds.
    Exponential {
        base: Duration,
        multiplier: f64,
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before the retry following the given attempt count (1-indexed).
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                base,
                multiplier,
                jitter,
            } => {
                let exponent = attempts.saturating_sub(1) as i32;
                let mut secs = base.as_secs_f64() * multiplier.powi(exponent);
                if *jitter {
                    secs *= rand::thread_rng().gen_range(0.5..1.5);
                }
                Duration::from_secs_f64(secs)
            }
        }
    }
}

/// The unit-of-work contract, implemented by users.
///
/// `DeserializeOwned` is the decode boundary: the registry turns raw topic
/// bytes into a populated instance of the registered type. Today that is
/// JSON; the codec is a registry concern, not a worker one.
#[async_trait]
pub trait Worker: DeserializeOwned + Send + 'static {
    /// The topic this worker type consumes from. One worker type per topic.
    const TOPIC: &'static str;

    /// Display name used in logs.
    fn name(&self) -> &str;

    /// Execute one attempt. A [`RunError`] carries the worker's own verdict
    /// on whether the executor may retry.
    async fn run(&mut self) -> Result<(), RunError>;

    fn retry_state(&self) -> &RetryState;

    fn retry_state_mut(&mut self) -> &mut RetryState;

    /// Attempt budget for one logical job.
    fn max_attempts(&self) -> u32 {
        1
    }

    /// Delay before the next retry. Invoked by the executor, never computed
    /// by it.
    fn retry_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn attempts(&self) -> u32 {
        self.retry_state().attempts()
    }

    fn record_attempt(&mut self) {
        self.retry_state_mut().record_attempt();
    }

    /// Delay before the next attempt may start, derived from the stored
    /// start stamp.
    fn run_delay(&self) -> Duration {
        self.retry_state().run_delay()
    }

    fn set_next_start(&mut self, at: DateTime<Utc>) {
        self.retry_state_mut().set_next_start(at);
    }

    /// Start stamp for an attempt `delay` from now.
    fn next_start(&self, delay: Duration) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64)
    }
}
