//! Cancellation and deadline handle shared by everything that runs a command.
//!
//! An [`ExecContext`] is cheap to clone; clones observe the same state.
//! Derived contexts see their parent's cancellation and inherit the earlier
//! of the two deadlines. The first recorded error wins.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct ExecContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    parent: Option<ExecContext>,
    deadline: Option<Instant>,
    err: Mutex<Option<ContextError>>,
    cond: Condvar,
}

impl ExecContext {
    /// Root context: never done unless canceled.
    pub fn background() -> Self {
        Self::new(None, None)
    }

    fn new(parent: Option<ExecContext>, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                parent,
                deadline,
                err: Mutex::new(None),
                cond: Condvar::new(),
            }),
        }
    }

    /// Derive a context that can be canceled independently of `self`.
    pub fn child(&self) -> Self {
        Self::new(Some(self.clone()), self.deadline())
    }

    /// Derive a context that expires at `at` (or earlier if `self` does).
    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.deadline() {
            Some(existing) => existing.min(at),
            None => at,
        };
        Self::new(Some(self.clone()), Some(deadline))
    }

    /// A timeout too large to represent as an `Instant` means no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(at) => self.with_deadline(at),
            None => self.child(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn cancel(&self) {
        self.cancel_with(ContextError::Canceled);
    }

    /// Record `cause` unless the context is already done.
    pub fn cancel_with(&self, cause: ContextError) {
        let mut guard = self.lock_err();
        if guard.is_none() {
            *guard = Some(cause);
            self.inner.cond.notify_all();
        }
    }

    /// `None` while the context is live.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(err) = *self.lock_err() {
            return Some(err);
        }
        if let Some(deadline) = self.inner.deadline
            && Instant::now() >= deadline
        {
            return Some(ContextError::DeadlineExceeded);
        }
        self.inner.parent.as_ref().and_then(ExecContext::err)
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Block until this context is canceled, its deadline passes, or
    /// `timeout` elapses. Parent cancellation is observed when the wait ends.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ContextError> {
        let mut wait = timeout;
        if let Some(deadline) = self.inner.deadline {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }
        let guard = self.lock_err();
        if guard.is_none() && !wait.is_zero() {
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout_while(guard, wait, |err| err.is_none())
                .unwrap_or_else(PoisonError::into_inner);
            drop(guard);
        } else {
            drop(guard);
        }
        self.err()
    }

    fn lock_err(&self) -> MutexGuard<'_, Option<ContextError>> {
        self.inner.err.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::background()
    }
}
