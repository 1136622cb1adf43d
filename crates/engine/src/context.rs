//! Per-verb deadline and cancellation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Lifecycle verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Plan-time diff
    Plan,
    /// Create
    Create,
    /// Read (refresh)
    Read,
    /// Update
    Update,
    /// Delete
    Delete,
    /// Import
    Import,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plan => "plan",
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Import => "import",
        };
        f.write_str(name)
    }
}

/// Deadline and cancellation token shared by every call a verb makes.
#[derive(Debug, Clone)]
pub struct VerbContext {
    resource_type: String,
    verb: Verb,
    deadline: Instant,
    cancel: CancellationToken,
}

impl VerbContext {
    /// Starts the clock for a verb.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, verb: Verb, timeout: Duration) -> Self {
        Self {
            resource_type: resource_type.into(),
            verb,
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses the given cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resource type the verb runs for.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The running verb.
    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Absolute deadline.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns true once the host cancelled the verb.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn operation(&self) -> String {
        format!("{} {}", self.verb, self.resource_type)
    }

    /// Runs a future under the deadline and cancellation token.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `Timeout` when the future does not finish in
    /// time, otherwise the future's own result.
    pub async fn run<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled { operation: self.operation() }),
            result = tokio::time::timeout_at(self.deadline, future) => match result {
                Ok(inner) => inner,
                Err(_) => Err(Error::Timeout { operation: self.operation() }),
            },
        }
    }

    /// Sleeps unless cancelled first.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token fires during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled { operation: self.operation() }),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
