//! Capability contract with the external document engine
//!
//! The pipeline only ever talks to an engine through these traits. Engines
//! may run work on their own threads; results come back as [`Pending`]
//! values that the stages poll from the control thread.

use std::sync::Arc;

use flume::{Receiver, Sender};

use super::canvas::SharedCanvas;
use super::error::EngineError;
use super::password::{PasswordReason, PasswordResponder};
use super::source::LoadDescriptor;
use super::task::{CancelToken, Completer, Pending, PollState, pending};
use super::viewport::{PageGeometry, Viewport};

pub type DocumentRef = Arc<dyn DocumentProxy>;
pub type PageRef = Arc<dyn PageProxy>;

/// Random access to document bytes that live elsewhere.
pub trait RangeTransport: Send + Sync {
    /// Total document length in bytes.
    fn length(&self) -> u64;

    /// Bytes `begin..end`.
    fn read_range(&self, begin: u64, end: u64) -> std::io::Result<Vec<u8>>;
}

pub trait DocumentEngine {
    fn load_document(&self, descriptor: LoadDescriptor) -> LoadingTask;
}

/// A loaded document. Destroying it invalidates every page fetched from it.
pub trait DocumentProxy: Send + Sync {
    fn page_count(&self) -> u32;

    /// Fetch a page; numbering starts at 1.
    fn get_page(&self, page_number: u32) -> Pending<PageRef, EngineError>;

    /// Release engine resources. Idempotent.
    fn destroy(&self);
}

pub trait PageProxy: PageGeometry + Send + Sync {
    fn page_number(&self) -> u32;

    /// Paint the page into `canvas` using `viewport`.
    fn render(&self, canvas: SharedCanvas, viewport: Viewport) -> RenderJob;

    /// Release page-level resources. Idempotent.
    fn cleanup(&self);
}

/// Handle identity, not structural equality.
#[must_use]
pub fn same_document(a: &DocumentRef, b: &DocumentRef) -> bool {
    Arc::ptr_eq(a, b)
}

#[must_use]
pub fn same_page(a: &PageRef, b: &PageRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// An in-flight paint.
///
/// [`cancel`](Self::cancel) asks the engine to stop; the completion then fails
/// with [`EngineError::RenderCancelled`].
#[derive(Debug)]
pub struct RenderJob {
    completion: Pending<(), EngineError>,
    token: CancelToken,
}

impl RenderJob {
    #[must_use]
    pub fn new(completion: Pending<(), EngineError>, token: CancelToken) -> Self {
        Self { completion, token }
    }

    /// A job whose outcome is already known.
    #[must_use]
    pub fn settled(outcome: Result<(), EngineError>) -> Self {
        Self::new(Pending::settled(outcome), CancelToken::new())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn try_take(&self) -> PollState<(), EngineError> {
        self.completion.try_take()
    }

    pub fn wait(self) -> Result<(), EngineError> {
        self.completion.wait()
    }
}

/// Control-thread side of a document load.
#[derive(Debug)]
pub struct LoadingTask {
    completion: Pending<DocumentRef, EngineError>,
    control: LoadControl,
}

/// Password plumbing and the abort switch of a [`LoadingTask`].
#[derive(Debug)]
pub struct LoadControl {
    password_requests: Receiver<PasswordReason>,
    passwords: Sender<String>,
    token: CancelToken,
}

/// Engine side of a document load.
#[derive(Debug)]
pub struct LoadSession {
    completer: Completer<DocumentRef, EngineError>,
    password_requests: Sender<PasswordReason>,
    passwords: Receiver<String>,
    token: CancelToken,
}

impl LoadingTask {
    /// Create a connected session/task pair.
    #[must_use]
    pub fn channel() -> (LoadSession, LoadingTask) {
        let (completer, completion) = pending();
        let (request_tx, request_rx) = flume::unbounded();
        let (password_tx, password_rx) = flume::unbounded();
        let token = CancelToken::new();

        let session = LoadSession {
            completer,
            password_requests: request_tx,
            passwords: password_rx,
            token: token.clone(),
        };
        let task = LoadingTask {
            completion,
            control: LoadControl {
                password_requests: request_rx,
                passwords: password_tx,
                token,
            },
        };
        (session, task)
    }

    /// A load that already failed.
    #[must_use]
    pub fn failed(error: EngineError) -> Self {
        let (session, task) = Self::channel();
        session.fail(error);
        task
    }

    pub fn destroy(&self) {
        self.control.destroy();
    }

    #[must_use]
    pub fn control(&self) -> &LoadControl {
        &self.control
    }

    /// Block until the load settles. Password requests are not serviced.
    pub fn wait(self) -> Result<DocumentRef, EngineError> {
        self.completion.wait()
    }

    /// Split for wrapping the completion in a
    /// [`CancelableTask`](super::task::CancelableTask).
    #[must_use]
    pub fn into_parts(self) -> (Pending<DocumentRef, EngineError>, LoadControl) {
        (self.completion, self.control)
    }
}

impl LoadControl {
    /// Abort the load. A document that still arrives is destroyed by the
    /// engine side.
    pub fn destroy(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Next outstanding password request, if any.
    #[must_use]
    pub fn next_password_request(&self) -> Option<PasswordReason> {
        self.password_requests.try_recv().ok()
    }

    #[must_use]
    pub fn responder(&self) -> PasswordResponder {
        PasswordResponder::new(self.passwords.clone())
    }
}

impl LoadSession {
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.completer.is_abandoned()
    }

    /// Ask the control thread for a password.
    pub fn request_password(&self, reason: PasswordReason) -> bool {
        self.password_requests.send(reason).is_ok()
    }

    /// Non-blocking check for an answer.
    #[must_use]
    pub fn try_password(&self) -> Option<String> {
        self.passwords.try_recv().ok()
    }

    /// Block until a password arrives. `None` when the load was abandoned.
    #[must_use]
    pub fn wait_password(&self) -> Option<String> {
        loop {
            match self.passwords.recv_timeout(std::time::Duration::from_millis(50)) {
                Ok(password) => return Some(password),
                Err(flume::RecvTimeoutError::Disconnected) => return None,
                Err(flume::RecvTimeoutError::Timeout) if self.is_cancelled() => return None,
                Err(flume::RecvTimeoutError::Timeout) => {}
            }
        }
    }

    /// Hand the document over. When the load was cancelled in the meantime
    /// the document is destroyed instead.
    pub fn finish(self, document: DocumentRef) {
        if self.token.is_cancelled() {
            document.destroy();
            return;
        }
        let keep = Arc::clone(&document);
        if !self.completer.resolve(document) {
            keep.destroy();
        }
    }

    pub fn fail(self, error: EngineError) {
        self.completer.reject(error);
    }
}
