//! Upload context: a cancellation signal plus an optional deadline
//!
//! Every client call receives an `UploadContext`. Derived contexts inherit
//! the cancellation of their parent and can only tighten its deadline.

use std::future::pending;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Why a context is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal and optional deadline shared by a group of uploads
#[derive(Debug, Clone, Default)]
pub struct UploadContext {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels the context it was created with, and every context derived from it
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl UploadContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that is additionally cancelled through the returned handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut signals = self.signals.clone();
        signals.push(rx);

        (
            Self {
                signals,
                deadline: self.deadline,
            },
            CancelHandle { tx },
        )
    }

    /// Derive a context with a deadline, keeping the parent's if it is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };

        Self {
            signals: self.signals.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check. Cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.signals.iter().any(|rx| *rx.borrow()) {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }

        let canceled = async {
            if self.signals.is_empty() {
                return pending::<()>().await;
            }
            let waits = self
                .signals
                .iter()
                .cloned()
                .map(|rx| Box::pin(wait_canceled(rx)));
            select_all(waits).await;
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = canceled => ContextError::Canceled,
            _ = expired => ContextError::DeadlineExceeded,
        }
    }
}

async fn wait_canceled(mut rx: watch::Receiver<bool>) {
    // A dropped handle can no longer cancel, so the signal never fires.
    if rx.wait_for(|canceled| *canceled).await.is_err() {
        pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_never_done() {
        let ctx = UploadContext::background();
        assert_eq!(ctx.err(), None);

        let done = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(done.is_err());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let (parent, cancel) = UploadContext::background().with_cancel();
        let (child, _child_cancel) = parent.with_cancel();

        let waiter = tokio::spawn(async move { child.done().await });
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), ContextError::Canceled);
        assert_eq!(parent.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_alone() {
        let (parent, _cancel) = UploadContext::background().with_cancel();
        let (child, child_cancel) = parent.with_cancel();

        child_cancel.cancel();

        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(parent.err(), None);
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (ctx, cancel) = UploadContext::background().with_cancel();
        drop(cancel);

        let done = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(done.is_err());
        assert_eq!(ctx.err(), None);
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = UploadContext::background().with_timeout(Duration::from_millis(10));

        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_deadline_only_tightens() {
        let early = Instant::now() + Duration::from_secs(1);
        let ctx = UploadContext::background().with_deadline(early);

        let later = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(later.deadline(), Some(early));

        let sooner = ctx.with_deadline(early - Duration::from_millis(500));
        assert_eq!(sooner.deadline(), Some(early - Duration::from_millis(500)));
    }
}
