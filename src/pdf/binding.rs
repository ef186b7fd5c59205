//! Host binding - chains document, page and render stages

use std::fmt;
use std::sync::Arc;

use log::debug;

use super::canvas::SharedCanvas;
use super::document::DocumentStage;
use super::engine::{DocumentEngine, DocumentRef, PageRef};
use super::error::{InvariantViolation, StageError};
use super::page::PageStage;
use super::password::LoadOptions;
use super::render::RenderStage;
use super::source::DocumentSource;
use super::status::Status;
use super::viewport::RenderOptions;
use crate::environment::Environment;

/// Upper bound on propagation rounds in one [`PdfBinding::poll`].
const MAX_POLL_ROUNDS: usize = 16;

/// Snapshot of the whole pipeline.
#[derive(Clone)]
pub struct PdfState {
    pub document: Option<DocumentRef>,
    pub page: Option<PageRef>,
    pub canvas: Option<SharedCanvas>,
    pub document_status: Status,
    pub page_status: Status,
    pub render_status: Status,
    /// Any stage settled on `error`.
    pub is_error: bool,
}

impl fmt::Debug for PdfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfState")
            .field("document", &self.document.as_ref().map(|d| d.page_count()))
            .field("page", &self.page.as_ref().map(|p| p.page_number()))
            .field("canvas", &self.canvas.is_some())
            .field("document_status", &self.document_status)
            .field("page_status", &self.page_status)
            .field("render_status", &self.render_status)
            .field("is_error", &self.is_error)
            .finish()
    }
}

/// Drives one document → page → render pipeline from the control thread.
///
/// Inputs can change at any time; call [`poll`](Self::poll) to pick up
/// engine completions and push them downstream.
pub struct PdfBinding {
    document: DocumentStage,
    page: PageStage,
    render: RenderStage,
    page_number: u32,
    render_options: RenderOptions,
}

impl PdfBinding {
    #[must_use]
    pub fn new(engine: Arc<dyn DocumentEngine>, env: Environment, load_options: LoadOptions) -> Self {
        Self {
            document: DocumentStage::new(engine, env, load_options),
            page: PageStage::new(),
            render: RenderStage::new(env.pixel_ratio),
            page_number: 1,
            render_options: RenderOptions::default(),
        }
    }

    /// Switch documents. Everything derived from the previous one is released
    /// before it is destroyed.
    pub fn set_source(&mut self, source: Option<DocumentSource>) {
        if self.document.has_source(source.as_ref()) {
            return;
        }
        debug!("Document source changed");
        self.render.sync(None, self.render_options);
        self.page.sync(None, self.page_number);
        self.document.set_source(source);
        self.propagate();
    }

    /// Re-run the load for the current source.
    pub fn reload(&mut self) {
        self.render.sync(None, self.render_options);
        self.page.sync(None, self.page_number);
        self.document.reload();
        self.propagate();
    }

    /// Page `0` leaves the page and render stages idle.
    pub fn set_page(&mut self, page_number: u32) {
        self.page_number = page_number;
        self.propagate();
    }

    pub fn set_render_options(&mut self, options: RenderOptions) {
        self.render_options = options;
        self.propagate();
    }

    pub fn set_load_options(&mut self, options: LoadOptions) {
        self.document.set_options(options);
    }

    pub fn attach_canvas(&mut self, canvas: SharedCanvas) {
        self.render.attach_canvas(canvas);
    }

    pub fn detach_canvas(&mut self) {
        self.render.detach_canvas();
    }

    /// Cancel the running render job.
    pub fn cancel_render(&mut self) {
        self.render.cancel();
    }

    fn propagate(&mut self) -> bool {
        let page_changed = self.page.sync(self.document.document(), self.page_number);
        let render_changed = self.render.sync(self.page.page(), self.render_options);
        page_changed || render_changed
    }

    /// Drain every stage until nothing moves. Returns `true` when anything
    /// changed.
    pub fn poll(&mut self) -> bool {
        let mut any = false;
        for _ in 0..MAX_POLL_ROUNDS {
            let mut changed = self.document.poll();
            changed |= self.propagate();
            changed |= self.page.poll();
            changed |= self.propagate();
            changed |= self.render.poll();
            if !changed {
                break;
            }
            any = true;
        }
        any
    }

    /// True once no stage is loading and nothing is in flight.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.document.is_busy()
            && !self.page.is_busy()
            && !self.render.is_busy()
            && self.document.status().is_settled()
            && self.page.status().is_settled()
            && self.render.status().is_settled()
    }

    pub fn snapshot(&self) -> Result<PdfState, InvariantViolation> {
        let document = self.document.view()?;
        let page = self.page.view()?;
        let render_status = self.render.status();

        Ok(PdfState {
            is_error: document.is_error() || page.is_error() || render_status.is_error(),
            document: document.handle,
            page: page.handle,
            canvas: self.render.canvas().cloned(),
            document_status: document.status,
            page_status: page.status,
            render_status,
        })
    }

    /// Most relevant failure, downstream first.
    #[must_use]
    pub fn last_error(&self) -> Option<StageError> {
        self.render
            .last_error()
            .or(self.page.last_error())
            .cloned()
            .map(StageError::from)
            .or_else(|| self.document.last_error().cloned())
    }

    #[must_use]
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    #[must_use]
    pub fn render_options(&self) -> RenderOptions {
        self.render_options
    }

    #[must_use]
    pub fn render_stage(&self) -> &RenderStage {
        &self.render
    }

    /// Tear down in dependency order: render, page, document.
    pub fn detach(&mut self) {
        self.render.detach();
        self.page.detach();
        self.document.detach();
    }
}

impl Drop for PdfBinding {
    fn drop(&mut self) {
        self.detach();
    }
}
