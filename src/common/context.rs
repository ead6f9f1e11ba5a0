//! Cancellation and deadline scope threaded through every dial

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller scope for a dial or listen call.
///
/// Cloning is cheap; clones share the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Context {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Child scope: cancelled with the parent, optionally with an earlier deadline.
    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child scope that also expires after `timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Context {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(d) if d < deadline => d,
                _ => deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` unless the scope is cancelled or its deadline passes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(Error::Canceled);
        }

        match self.deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return Err(Error::timeout("context deadline exceeded"));
                }
                tokio::select! {
                    res = fut => res,
                    _ = self.token.cancelled() => Err(Error::Canceled),
                    _ = tokio::time::sleep_until(deadline) => {
                        Err(Error::timeout("context deadline exceeded"))
                    }
                }
            }
            None => {
                tokio::select! {
                    res = fut => res,
                    _ = self.token.cancelled() => Err(Error::Canceled),
                }
            }
        }
    }
}
