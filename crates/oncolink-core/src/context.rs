//! Request-scoped context
//!
//! A narrow, typed carrier for the request id, a cancellation token, and an optional
//! deadline. Service operations take it explicitly.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// New context with a fresh request id, no deadline, and its own cancellation token.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Set the deadline to `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Replace the cancellation token (e.g. with a child of a process-wide shutdown token).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self, operation: &str) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled(operation.to_string()));
        }
        if matches!(self.remaining(), Some(left) if left.is_zero()) {
            return Err(AppError::DeadlineExceeded(operation.to_string()));
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or its deadline passes first.
    ///
    /// When the context wins, `fut` is dropped at its current await point.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        self.check(operation)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled(operation.to_string())),
            _ = sleep_until_deadline(self.deadline) => {
                Err(AppError::DeadlineExceeded(operation.to_string()))
            }
            result = fut => result,
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
