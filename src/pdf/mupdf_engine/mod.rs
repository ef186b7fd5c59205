//! MuPDF-backed document engine
//!
//! Every loaded document owns one worker thread. MuPDF documents are not
//! `Send`, so the thread opens the document itself and serves page fetches
//! and render jobs over a `flume` channel until the document is destroyed.

mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::Sender;
use log::debug;

use super::canvas::SharedCanvas;
use super::engine::{DocumentEngine, DocumentProxy, LoadingTask, PageProxy, PageRef, RenderJob};
use super::error::EngineError;
use super::source::LoadDescriptor;
use super::task::{CancelToken, Completer, Pending, pending};
use super::viewport::{PageGeometry, Rotation, Viewport};

pub(crate) enum WorkerRequest {
    Page {
        number: u32,
        completer: Completer<PageRef, EngineError>,
    },
    Render {
        number: u32,
        intrinsic: Rotation,
        canvas: SharedCanvas,
        viewport: Viewport,
        token: CancelToken,
        completer: Completer<(), EngineError>,
    },
    Cleanup {
        number: u32,
    },
    Shutdown,
}

/// Opens documents from bytes, local paths, `file://` URLs and range
/// transports.
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfEngine;

impl MupdfEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DocumentEngine for MupdfEngine {
    fn load_document(&self, descriptor: LoadDescriptor) -> LoadingTask {
        let (session, task) = LoadingTask::channel();
        let (tx, rx) = flume::unbounded();

        std::thread::spawn(move || {
            worker::document_worker(descriptor, session, tx, rx);
        });

        task
    }
}

pub(crate) struct MupdfDocument {
    page_count: u32,
    requests: Sender<WorkerRequest>,
    destroyed: AtomicBool,
}

impl MupdfDocument {
    pub(crate) fn new(page_count: u32, requests: Sender<WorkerRequest>) -> Self {
        Self {
            page_count,
            requests,
            destroyed: AtomicBool::new(false),
        }
    }
}

impl DocumentProxy for MupdfDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn get_page(&self, page_number: u32) -> Pending<PageRef, EngineError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Pending::settled(Err(EngineError::Destroyed));
        }

        let (completer, pending) = pending();
        let request = WorkerRequest::Page {
            number: page_number,
            completer,
        };
        if self.requests.send(request).is_err() {
            return Pending::settled(Err(EngineError::Destroyed));
        }
        pending
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            debug!("Shutting down document worker");
            let _ = self.requests.send(WorkerRequest::Shutdown);
        }
    }
}

impl Drop for MupdfDocument {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Unrotated page size in points plus the page's `/Rotate`.
///
/// Dropping the last handle evicts the page from the worker's cache.
pub(crate) struct MupdfPage {
    number: u32,
    width: f32,
    height: f32,
    rotation: Rotation,
    requests: Sender<WorkerRequest>,
}

impl MupdfPage {
    pub(crate) fn new(
        number: u32,
        (width, height): (f32, f32),
        rotation: Rotation,
        requests: Sender<WorkerRequest>,
    ) -> Self {
        Self {
            number,
            width,
            height,
            rotation,
            requests,
        }
    }
}

impl PageGeometry for MupdfPage {
    fn rotation(&self) -> Rotation {
        self.rotation
    }

    fn viewport(&self, scale: f32, rotation: Rotation) -> Viewport {
        Viewport::from_page_size(self.width, self.height, scale, rotation)
    }
}

impl PageProxy for MupdfPage {
    fn page_number(&self) -> u32 {
        self.number
    }

    fn render(&self, canvas: SharedCanvas, viewport: Viewport) -> RenderJob {
        let (completer, pending) = pending();
        let token = CancelToken::new();
        let request = WorkerRequest::Render {
            number: self.number,
            intrinsic: self.rotation,
            canvas,
            viewport,
            token: token.clone(),
            completer,
        };
        if self.requests.send(request).is_err() {
            return RenderJob::settled(Err(EngineError::Destroyed));
        }
        RenderJob::new(pending, token)
    }

    fn cleanup(&self) {
        let _ = self.requests.send(WorkerRequest::Cleanup {
            number: self.number,
        });
    }
}

impl std::fmt::Debug for MupdfPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MupdfPage")
            .field("number", &self.number)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation", &self.rotation)
            .finish()
    }
}

impl Drop for MupdfPage {
    fn drop(&mut self) {
        self.cleanup();
    }
}

pub(crate) fn page_ref(page: MupdfPage) -> PageRef {
    Arc::new(page)
}
