//! Completion channels and cancellable tasks
//!
//! Engines hand results back to the control thread through a [`Completer`] /
//! [`Pending`] pair backed by a single-slot `flume` channel. Stages wrap every
//! outstanding [`Pending`] in a [`CancelableTask`] so that a superseded
//! operation can never write into stage state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::{Receiver, Sender, TryRecvError};

/// The producing side went away without settling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("operation was dropped before it completed")]
pub struct Dropped;

/// Shared cancellation flag.
///
/// Cloned into engine work so long operations can bail out early. Setting it
/// is idempotent and never fails.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Create a connected completer/pending pair.
#[must_use]
pub fn pending<T, E>() -> (Completer<T, E>, Pending<T, E>) {
    let (tx, rx) = flume::bounded(1);
    (Completer { tx }, Pending { rx })
}

/// Producer half: settles a [`Pending`] exactly once.
pub struct Completer<T, E> {
    tx: Sender<Result<T, E>>,
}

impl<T, E> Completer<T, E> {
    /// Deliver the outcome. Returns `false` when nobody is listening any more;
    /// the value is dropped in that case.
    pub fn settle(self, outcome: Result<T, E>) -> bool {
        self.tx.send(outcome).is_ok()
    }

    pub fn resolve(self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// True once the consumer has dropped its [`Pending`].
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_disconnected()
    }
}

/// Outcome of a non-blocking check on a [`Pending`].
#[derive(Debug)]
pub enum PollState<T, E> {
    Waiting,
    Ready(Result<T, E>),
}

/// Consumer half of an asynchronous operation.
pub struct Pending<T, E> {
    rx: Receiver<Result<T, E>>,
}

impl<T, E: From<Dropped>> Pending<T, E> {
    /// An already-settled operation.
    #[must_use]
    pub fn settled(outcome: Result<T, E>) -> Self {
        let (completer, pending) = pending();
        completer.settle(outcome);
        pending
    }

    #[must_use]
    pub fn try_take(&self) -> PollState<T, E> {
        match self.rx.try_recv() {
            Ok(outcome) => PollState::Ready(outcome),
            Err(TryRecvError::Empty) => PollState::Waiting,
            Err(TryRecvError::Disconnected) => PollState::Ready(Err(Dropped.into())),
        }
    }

    /// Block the calling thread until the operation settles.
    pub fn wait(self) -> Result<T, E> {
        self.rx.recv().unwrap_or_else(|_| Err(Dropped.into()))
    }
}

/// A [`Pending`] plus a cancellation flag.
///
/// Once cancelled the wrapped completion is suppressed: [`poll`](Self::poll)
/// never yields it, and the receiver is dropped so the producer sees the
/// operation as abandoned.
pub struct CancelableTask<T, E> {
    pending: Option<Pending<T, E>>,
    token: CancelToken,
    cancelled: bool,
}

impl<T, E: From<Dropped>> CancelableTask<T, E> {
    #[must_use]
    pub fn new(pending: Pending<T, E>) -> Self {
        Self::with_token(pending, CancelToken::new())
    }

    /// Wrap a pending operation whose producer already observes `token`.
    #[must_use]
    pub fn with_token(pending: Pending<T, E>, token: CancelToken) -> Self {
        Self {
            pending: Some(pending),
            token,
            cancelled: false,
        }
    }

    /// Suppress the completion. No-op after cancellation or natural completion.
    pub fn cancel(&mut self) {
        if self.cancelled || self.pending.is_none() {
            return;
        }
        self.cancelled = true;
        self.token.cancel();
        self.pending = None;
    }

    /// Check for a completion. Yields it at most once and never after `cancel`.
    pub fn poll(&mut self) -> Option<Result<T, E>> {
        if self.cancelled {
            return None;
        }
        let state = self.pending.as_ref()?.try_take();
        match state {
            PollState::Waiting => None,
            PollState::Ready(outcome) => {
                self.pending = None;
                Some(outcome)
            }
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// True once the completion has been delivered through [`poll`](Self::poll).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.cancelled && self.pending.is_none()
    }

    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("abandoned", &self.tx.is_disconnected())
            .finish()
    }
}

impl<T, E> fmt::Debug for Pending<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("ready", &!self.rx.is_empty())
            .finish()
    }
}

impl<T, E> fmt::Debug for CancelableTask<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelableTask")
            .field("cancelled", &self.cancelled)
            .field("finished", &(!self.cancelled && self.pending.is_none()))
            .finish()
    }
}
