//! Document load stage
//!
//! `idle → loading → {success, error}`. A new source tears everything down
//! first: the running read or load is cancelled and the held document is
//! destroyed before the replacement starts.

use std::sync::Arc;

use log::{debug, warn};

use super::engine::{DocumentEngine, DocumentRef, LoadControl};
use super::error::{EngineError, InvariantViolation, SourceError, StageError};
use super::password::LoadOptions;
use super::source::{DocumentSource, LoadDescriptor, Resolution, Resolving, resolve_source};
use super::status::{StageView, Status};
use super::task::CancelableTask;
use crate::environment::Environment;

struct ActiveLoad {
    task: CancelableTask<DocumentRef, EngineError>,
    control: LoadControl,
}

pub struct DocumentStage {
    engine: Arc<dyn DocumentEngine>,
    env: Environment,
    options: LoadOptions,
    source: Option<DocumentSource>,
    status: Status,
    document: Option<DocumentRef>,
    read: Option<CancelableTask<Vec<u8>, SourceError>>,
    load: Option<ActiveLoad>,
    last_error: Option<StageError>,
}

impl DocumentStage {
    #[must_use]
    pub fn new(engine: Arc<dyn DocumentEngine>, env: Environment, options: LoadOptions) -> Self {
        Self {
            engine,
            env,
            options,
            source: None,
            status: Status::Idle,
            document: None,
            read: None,
            load: None,
            last_error: None,
        }
    }

    /// Point the stage at a new source. Returns `false` when `source` is the
    /// one already in use.
    pub fn set_source(&mut self, source: Option<DocumentSource>) -> bool {
        if self.has_source(source.as_ref()) {
            return false;
        }

        self.source = source;
        self.restart();
        true
    }

    /// True when `source` is the one already in use.
    #[must_use]
    pub fn has_source(&self, source: Option<&DocumentSource>) -> bool {
        match (&self.source, source) {
            (Some(current), Some(next)) => current.same_as(next),
            (None, None) => true,
            _ => false,
        }
    }

    /// Start over with the current source.
    pub fn reload(&mut self) {
        self.restart();
    }

    /// Replace the load options without restarting. The next password request
    /// goes to the new callback.
    pub fn set_options(&mut self, options: LoadOptions) {
        self.options = options;
    }

    fn restart(&mut self) {
        self.teardown();

        let resolving = match resolve_source(self.source.as_ref(), &self.env) {
            Ok(resolving) => resolving,
            Err(e) => {
                self.fail(e.into());
                return;
            }
        };

        match resolving {
            Resolving::Ready(resolution) => self.start_from(resolution),
            Resolving::Reading(read) => {
                debug!("Reading document source from file");
                self.read = Some(CancelableTask::with_token(read.pending, read.token));
            }
        }
    }

    fn start_from(&mut self, resolution: Resolution) {
        for advisory in &resolution.advisories {
            warn!("{advisory}");
        }
        match resolution.descriptor {
            Some(descriptor) => self.start_load(descriptor),
            None => {
                debug!("No document source; staying idle");
                self.status = Status::Idle;
            }
        }
    }

    fn start_load(&mut self, descriptor: LoadDescriptor) {
        debug!("Loading document from {:?}", descriptor.data());
        self.status = Status::Loading;
        self.document = None;

        let (completion, control) = self.engine.load_document(descriptor).into_parts();
        let task = CancelableTask::with_token(completion, control.token().clone());
        self.load = Some(ActiveLoad { task, control });
    }

    /// Cancel in-flight work and destroy the held document.
    fn teardown(&mut self) {
        if let Some(mut read) = self.read.take() {
            read.cancel();
        }
        if let Some(mut load) = self.load.take() {
            load.task.cancel();
            load.control.destroy();
        }
        if let Some(document) = self.document.take() {
            debug!("Destroying previous document");
            document.destroy();
        }
        self.status = Status::Idle;
        self.last_error = None;
    }

    fn fail(&mut self, error: StageError) {
        warn!("Document failed to load: {error}");
        self.read = None;
        self.load = None;
        self.document = None;
        self.status = Status::Error;
        self.last_error = Some(error);
    }

    /// Drain completions. Returns `true` when the stage changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;

        if let Some(outcome) = self.read.as_mut().and_then(CancelableTask::poll) {
            self.read = None;
            changed = true;
            match outcome {
                Ok(bytes) => self.start_load(LoadDescriptor::from_bytes(bytes)),
                Err(e) => self.fail(e.into()),
            }
        }

        let Some(load) = self.load.as_mut() else {
            return changed;
        };

        while let Some(reason) = load.control.next_password_request() {
            debug!("Engine requests a password ({reason})");
            self.options.dispatch(load.control.responder(), reason);
        }

        if let Some(outcome) = load.task.poll() {
            self.load = None;
            changed = true;
            match outcome {
                Ok(document) => {
                    debug!("Document loaded with {} pages", document.page_count());
                    self.document = Some(document);
                    self.status = Status::Success;
                }
                Err(e) => self.fail(e.into()),
            }
        }

        changed
    }

    /// The consumer goes away: cancel and release everything.
    pub fn detach(&mut self) {
        self.teardown();
        self.source = None;
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&StageError> {
        self.last_error.as_ref()
    }

    /// True while a file read or engine load is outstanding.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.read.is_some() || self.load.is_some()
    }

    pub fn view(&self) -> Result<StageView<DocumentRef>, InvariantViolation> {
        StageView::checked("document", self.status, self.document.as_ref())
    }
}

impl Drop for DocumentStage {
    fn drop(&mut self) {
        self.teardown();
    }
}
