//! Page fetch stage
//!
//! Tracks `(document, page number)`. Any change cancels the outstanding fetch
//! and cleans up the page handed out before; only the latest request can ever
//! land in the stage.

use log::{debug, warn};

use super::engine::{DocumentRef, PageRef, same_document};
use super::error::{EngineError, InvariantViolation};
use super::status::{StageView, Status};
use super::task::CancelableTask;

#[derive(Default)]
pub struct PageStage {
    document: Option<DocumentRef>,
    page_number: u32,
    status: Status,
    page: Option<PageRef>,
    fetch: Option<CancelableTask<PageRef, EngineError>>,
    last_error: Option<EngineError>,
}

impl PageStage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow the upstream document and requested page. Returns `true` when a
    /// new fetch was started or the stage went idle.
    ///
    /// Page `0` means "no page".
    pub fn sync(&mut self, document: Option<&DocumentRef>, page_number: u32) -> bool {
        let same_doc = match (&self.document, document) {
            (Some(current), Some(next)) => same_document(current, next),
            (None, None) => true,
            _ => false,
        };
        if same_doc && self.page_number == page_number {
            return false;
        }

        self.release();
        self.document = document.cloned();
        self.page_number = page_number;

        let Some(document) = document.filter(|_| page_number > 0) else {
            self.status = Status::Idle;
            return true;
        };

        debug!("Fetching page {page_number}");
        self.status = Status::Loading;
        self.fetch = Some(CancelableTask::new(document.get_page(page_number)));
        true
    }

    fn release(&mut self) {
        if let Some(mut fetch) = self.fetch.take() {
            fetch.cancel();
        }
        if let Some(page) = self.page.take() {
            page.cleanup();
        }
        self.last_error = None;
    }

    /// Drain the fetch. Returns `true` when the stage changed.
    pub fn poll(&mut self) -> bool {
        let Some(outcome) = self.fetch.as_mut().and_then(CancelableTask::poll) else {
            return false;
        };
        self.fetch = None;

        match outcome {
            Ok(page) => {
                self.page = Some(page);
                self.status = Status::Success;
            }
            Err(e) => {
                warn!("Failed to load page {}: {e}", self.page_number);
                self.status = Status::Error;
                self.last_error = Some(e);
            }
        }
        true
    }

    pub fn detach(&mut self) {
        self.release();
        self.document = None;
        self.page_number = 0;
        self.status = Status::Idle;
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn page(&self) -> Option<&PageRef> {
        self.page.as_ref()
    }

    #[must_use]
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.fetch.is_some()
    }

    pub fn view(&self) -> Result<StageView<PageRef>, InvariantViolation> {
        StageView::checked("page", self.status, self.page.as_ref())
    }
}

impl Drop for PageStage {
    fn drop(&mut self) {
        self.release();
    }
}
