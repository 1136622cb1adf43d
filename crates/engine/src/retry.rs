//! Deadline-bounded retry with exponential backoff.
//!
//! Only two places retry: the default-singleton create loop and the read that
//! follows a write. Both stop early enough to leave a reserve before the verb's
//! deadline so the final error still reaches the host in time.

use std::future::Future;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};
use tracing::{debug, warn};

use crate::context::VerbContext;
use crate::error::{Error, Result};

/// Backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// First wait in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound of a single wait in milliseconds
    pub max_backoff_ms: u64,
    /// Growth factor between waits
    pub backoff_multiplier: f64,
    /// Time kept free before the verb's deadline
    pub deadline_reserve: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            deadline_reserve: Duration::from_secs(5),
        }
    }
}

/// Retries `f` while `should_retry` accepts the error and the next wait still
/// fits before the deadline minus the reserve.
///
/// # Errors
///
/// Returns the last error once retrying stops, or `Cancelled` when the verb is
/// cancelled during a wait.
pub async fn retry_until_deadline<F, Fut, T, R>(
    ctx: &VerbContext,
    config: &RetryConfig,
    operation_name: &str,
    should_retry: R,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let mut backoff = create_backoff(config);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts = attempts,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !should_retry(&err) {
                    debug!(
                        operation = operation_name,
                        error = %err,
                        "Error is not retryable, failing immediately"
                    );
                    return Err(err);
                }

                let budget = ctx.remaining().saturating_sub(config.deadline_reserve);
                match backoff.next_backoff() {
                    Some(duration) if duration <= budget => {
                        warn!(
                            operation = operation_name,
                            attempts = attempts,
                            error = %err,
                            retry_in_ms = duration.as_millis(),
                            "Operation failed, retrying"
                        );
                        ctx.sleep(duration).await?;
                    }
                    _ => {
                        warn!(
                            operation = operation_name,
                            attempts = attempts,
                            error = %err,
                            "Retry budget exhausted"
                        );
                        return Err(err);
                    }
                }
            }
        }
    }
}

/// Create exponential backoff from config
fn create_backoff(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.initial_backoff_ms))
        .with_max_interval(Duration::from_millis(config.max_backoff_ms))
        .with_multiplier(config.backoff_multiplier)
        .with_max_elapsed_time(None) // bounded by the verb deadline instead
        .build()
}
