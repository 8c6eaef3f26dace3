//! Cancellation and deadline propagation for pipeline calls

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("the operation was cancelled")]
    Cancelled,

    #[error("the operation deadline was exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Request-scoped context handed to every stage of the pipeline.
///
/// Clones share the same cancellation state. A deadline applies to the clone
/// it was set on and every clone derived from it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

/// Handle that cancels every clone of the context it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }
}

impl Context {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let ctx = Self::default();
        let handle = CancelHandle {
            state: ctx.state.clone(),
        };
        (ctx, handle)
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            state: self.state.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the reason this context is finished, if it is
    pub fn err(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> ContextError {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(err) = self.err() {
                return err;
            }

            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            return ContextError::DeadlineExceeded;
                        }
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Runs the future unless the context finishes first
    pub async fn run<F, T>(&self, future: F) -> Result<T, ContextError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            value = future => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_context_runs_future() {
        let ctx = Context::background();
        let value = ctx.run(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let (ctx, handle) = Context::with_cancel();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.run(std::future::pending::<()>()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let result = waiter.await.unwrap();
        assert_eq!(result, Err(ContextError::Cancelled));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_interrupts_pending_future() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let result = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[test]
    fn test_child_keeps_earlier_deadline() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let parent = Context::background().with_timeout(Duration::from_secs(1));
            let child = parent.with_timeout(Duration::from_secs(60));
            assert_eq!(parent.deadline(), child.deadline());
        });
    }
}
