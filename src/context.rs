//! Cancellation scopes for calls.
//!
//! A [`CallContext`] is a cloneable handle to a cancellation scope. Child
//! contexts observe their parent's cancellation and deadline; canceling a
//! child never affects the parent. Timeouts are expressed as a deadline on a
//! context.
//!
//! ```
//! use muxwire::{CallContext, CancelReason};
//!
//! let root = CallContext::background();
//! let call = root.child();
//! root.cancel();
//! assert_eq!(call.reason(), Some(CancelReason::Canceled));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::MuxError;

/// Why a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel` was called on this context or an ancestor.
    Canceled,
    /// The deadline of this context or an ancestor passed.
    DeadlineExceeded,
}

impl From<CancelReason> for MuxError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Canceled => MuxError::Canceled,
            CancelReason::DeadlineExceeded => MuxError::DeadlineExceeded,
        }
    }
}

struct Inner {
    state: watch::Sender<Option<CancelReason>>,
    parent: Option<CallContext>,
    deadline: Option<Instant>,
}

/// Cancellation scope shared by a call and everything derived from it.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<Inner>,
}

impl CallContext {
    fn with_parts(parent: Option<CallContext>, deadline: Option<Instant>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                state,
                parent,
                deadline,
            }),
        }
    }

    /// A root context that is never canceled on its own.
    pub fn background() -> Self {
        Self::with_parts(None, None)
    }

    /// Derive a context canceled together with `self`.
    pub fn child(&self) -> Self {
        Self::with_parts(Some(self.clone()), None)
    }

    /// Derive a context that also expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that also expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self::with_parts(Some(self.clone()), Some(deadline))
    }

    /// Cancel this context and all of its children.
    ///
    /// The first reason recorded wins.
    pub fn cancel(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(CancelReason::Canceled);
            true
        });
    }

    /// The reason this context ended, if it has.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = *self.inner.state.borrow() {
            return Some(reason);
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Some(CancelReason::DeadlineExceeded);
            }
        }
        self.inner.parent.as_ref().and_then(|p| p.reason())
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// The earliest deadline of this context and its ancestors.
    pub fn deadline(&self) -> Option<Instant> {
        let parent = self.inner.parent.as_ref().and_then(|p| p.deadline());
        match (self.inner.deadline, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Wait until this context ends and return why.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = CancelReason> + Send + '_>> {
        Box::pin(async move {
            if let Some(reason) = self.reason() {
                return reason;
            }

            let mut rx = self.inner.state.subscribe();
            let own = async {
                let changed = rx.wait_for(|state| state.is_some()).await.map(|s| *s);
                match changed {
                    Ok(state) => state.unwrap_or(CancelReason::Canceled),
                    Err(_) => std::future::pending().await,
                }
            };
            let deadline = async {
                match self.inner.deadline {
                    Some(at) => {
                        tokio::time::sleep_until(at).await;
                        CancelReason::DeadlineExceeded
                    }
                    None => std::future::pending().await,
                }
            };
            let parent = async {
                match &self.inner.parent {
                    Some(parent) => parent.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                reason = own => reason,
                reason = deadline => reason,
                reason = parent => reason,
            }
        })
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("reason", &self.reason())
            .field("deadline", &self.deadline())
            .finish()
    }
}
