//! One-shot completion results.
//!
//! Every asynchronous operation (open, close, send, drain, declare,
//! discharge) is a `tokio::sync::oneshot` channel. The engine keeps the
//! [`Completer`] and hands the caller an [`AsyncResult`]. The first
//! completion wins; completing again is a no-op. The result can be polled
//! with [`AsyncResult::try_take`] or awaited as a `Future`.
//!
//! Only the `sync` feature of tokio is used: no runtime is needed to
//! complete or poll a result.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::EngineError;

type Outcome<T> = Result<T, EngineError>;

/// A pending operation, plus the result the caller waits on.
pub(crate) fn pending<T>() -> (Completer<T>, AsyncResult<T>) {
    pending_op(0)
}

/// Like [`pending`], tagging the result with `op` so the engine can find
/// the operation again from the caller's handle.
pub(crate) fn pending_op<T>(op: u64) -> (Completer<T>, AsyncResult<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer { tx: Some(tx) },
        AsyncResult {
            rx,
            ready: None,
            taken: false,
            op,
        },
    )
}

/// The engine's half of an operation.
pub struct Completer<T> {
    tx: Option<oneshot::Sender<Outcome<T>>>,
}

impl<T> Completer<T> {
    /// Complete successfully. Returns false if already complete.
    pub fn complete(&mut self, value: T) -> bool {
        self.finish(Ok(value))
    }

    /// Complete with an error. Returns false if already complete.
    pub fn fail(&mut self, error: EngineError) -> bool {
        self.finish(Err(error))
    }

    fn finish(&mut self, outcome: Outcome<T>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // the caller may have dropped its handle
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.tx.is_none()
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("done", &self.is_done())
            .finish()
    }
}

/// The caller's half of an operation.
pub struct AsyncResult<T> {
    rx: oneshot::Receiver<Outcome<T>>,
    ready: Option<Outcome<T>>,
    taken: bool,
    op: u64,
}

impl<T> AsyncResult<T> {
    /// A result that is already complete.
    pub fn ready(outcome: Result<T, EngineError>) -> Self {
        let (mut completer, result) = pending();
        completer.finish(outcome);
        result
    }

    pub(crate) fn op(&self) -> u64 {
        self.op
    }

    fn poll_ready(&mut self) {
        if self.ready.is_some() || self.taken {
            return;
        }
        match self.rx.try_recv() {
            Ok(outcome) => self.ready = Some(outcome),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Closed) => self.ready = Some(Err(abandoned())),
        }
    }

    pub fn is_done(&mut self) -> bool {
        self.poll_ready();
        self.taken || self.ready.is_some()
    }

    /// True once completed with an error.
    pub fn is_failed(&mut self) -> bool {
        self.poll_ready();
        matches!(self.ready, Some(Err(_)))
    }

    /// Take the outcome if complete. Later calls return `None`.
    pub fn try_take(&mut self) -> Option<Result<T, EngineError>> {
        self.poll_ready();
        let outcome = self.ready.take();
        if outcome.is_some() {
            self.taken = true;
        }
        outcome
    }
}

fn abandoned() -> EngineError {
    EngineError::EngineFailed("engine dropped the operation".into())
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (&self.ready, self.taken) {
            (_, true) => "taken",
            (Some(Ok(_)), _) => "complete",
            (Some(Err(_)), _) => "failed",
            (None, _) => "pending",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

// No pinned projection of `T` is ever made.
impl<T> Unpin for AsyncResult<T> {}

impl<T> Future for AsyncResult<T> {
    type Output = Result<T, EngineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.ready.take() {
            this.taken = true;
            return Poll::Ready(outcome);
        }
        if this.taken {
            return Poll::Ready(Err(EngineError::local("result already taken")));
        }
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(outcome) => {
                this.taken = true;
                Poll::Ready(outcome.unwrap_or_else(|_| Err(abandoned())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_completion_wins() {
        let (mut completer, mut result) = pending();
        assert!(!result.is_done());
        assert!(completer.complete(1));
        assert!(!completer.complete(2));
        assert!(!completer.fail(EngineError::Timeout("late".into())));
        assert!(result.is_done());
        assert_eq!(result.try_take(), Some(Ok(1)));
        assert_eq!(result.try_take(), None);
        assert!(result.is_done());
    }

    #[test]
    fn test_failure_visible_to_caller() {
        let (mut completer, mut result) = pending::<()>();
        completer.fail(EngineError::ResourceClosed("gone".into()));
        assert!(result.is_failed());
        assert!(matches!(result.try_take(), Some(Err(EngineError::ResourceClosed(_)))));
    }

    #[test]
    fn test_dropped_completer_fails_result() {
        let (completer, mut result) = pending::<u8>();
        drop(completer);
        assert!(matches!(result.try_take(), Some(Err(EngineError::EngineFailed(_)))));
    }

    #[test]
    fn test_op_tag() {
        let (_completer, result) = pending_op::<u8>(7);
        assert_eq!(result.op(), 7);
    }

    #[tokio::test]
    async fn test_await_completed() {
        let (mut completer, result) = pending();
        completer.complete("done");
        assert_eq!(result.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_await_ready_error() {
        let result: AsyncResult<u8> = AsyncResult::ready(Err(EngineError::Timeout("open".into())));
        assert!(matches!(result.await, Err(EngineError::Timeout(_))));
    }
}
