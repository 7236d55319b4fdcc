//! Retry utilities with exponential backoff and jitter.
//!
//! Two flavours are provided:
//!
//! - [`retry_with_backoff`] retries any failure, used for startup calls such
//!   as CRD installation.
//! - [`retry_on_conflict`] retries only optimistic-concurrency conflicts
//!   (HTTP 409) and fails fast on everything else. Every read-modify-write of
//!   a Browser goes through it.
//!
//! # Example
//!
//! ```ignore
//! use selenosis_common::retry::{retry_on_conflict, RetryConfig};
//!
//! retry_on_conflict(&RetryConfig::optimistic(), "chrome-abc", || async {
//!     let current = client.get_browser(&name, &ns).await?;
//!     client.patch_browser(&name, &ns, &delta_against(current)).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::Error;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Bounded config for optimistic read-modify-write loops:
    /// 5 attempts, 100ms doubling per attempt.
    pub fn optimistic() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

/// Jittered delay (0.5x to 1.5x) for the current backoff step
fn jittered(delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}

/// Next backoff step, capped at `max_delay`
fn next_delay(config: &RetryConfig, delay: Duration) -> Duration {
    Duration::from_secs_f64(
        (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
    )
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries indefinitely (or up to max_attempts if set) until success.
///
/// # Returns
/// The result of the operation, or the last error if max_attempts is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let jittered_delay = jittered(delay);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;
                delay = next_delay(config, delay);
            }
        }
    }
}

/// Execute an optimistic read-modify-write, retrying only on 409 Conflict.
///
/// `operation` must re-read the object on every call so each attempt patches
/// against a fresh resourceVersion. Any non-conflict error is returned
/// immediately. Running out of attempts yields [`Error::Conflict`].
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    resource: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                if attempt == max_attempts {
                    break;
                }
                let jittered_delay = jittered(delay);
                debug!(
                    resource = %resource,
                    attempt = attempt,
                    delay_ms = jittered_delay.as_millis(),
                    "Conflict on update, retrying against fresh state"
                );
                tokio::time::sleep(jittered_delay).await;
                delay = next_delay(config, delay);
            }
            Err(e) => return Err(e),
        }
    }

    warn!(resource = %resource, attempts = max_attempts, "Giving up after repeated conflicts");
    Err(Error::conflict(resource, max_attempts))
}
