//! Scripted in-memory engine for driving the pipeline from tests
//!
//! Nothing completes on its own: tests settle loads, page fetches and render
//! jobs explicitly, in whatever order the scenario needs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::pdf::{
    CancelToken, Completer, DocumentEngine, DocumentProxy, EngineError, LoadDescriptor,
    LoadSession, LoadingTask, PageGeometry, PageProxy, PageRef, PasswordReason, Pending,
    RenderJob, Rotation, SharedCanvas, Viewport, pending,
};

/// Default page size handed out by [`FakeDocument`], in points.
pub const PAGE_WIDTH: f32 = 100.0;
pub const PAGE_HEIGHT: f32 = 200.0;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

thread_local! {
    static CAPTURED: RefCell<Option<Vec<(Level, String)>>> = const { RefCell::new(None) };
}

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let line = record.args().to_string();
        CAPTURED.with(|captured| {
            if let Some(records) = captured.borrow_mut().as_mut() {
                records.push((record.level(), line));
            }
        });
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;
static INSTALL_LOGGER: Once = Once::new();

/// Run `f` and collect what it logged on the current thread.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<(Level, String)>) {
    INSTALL_LOGGER.call_once(|| {
        if log::set_logger(&CAPTURE_LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
    CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
    let result = f();
    let records = CAPTURED.with(|captured| captured.borrow_mut().take().unwrap_or_default());
    (result, records)
}

struct ScriptedLoad {
    descriptor: LoadDescriptor,
    session: Option<LoadSession>,
    token: CancelToken,
}

#[derive(Default)]
struct EngineInner {
    loads: Vec<ScriptedLoad>,
    documents: HashMap<usize, Arc<FakeDocument>>,
}

/// Engine whose loads wait until the test settles them.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    inner: Arc<Mutex<EngineInner>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_count(&self) -> usize {
        locked(&self.inner).loads.len()
    }

    pub fn descriptor(&self, load: usize) -> LoadDescriptor {
        locked(&self.inner).loads[load].descriptor.clone()
    }

    /// The control side destroyed this load.
    pub fn load_destroyed(&self, load: usize) -> bool {
        locked(&self.inner).loads[load].token.is_cancelled()
    }

    fn take_session(&self, load: usize) -> LoadSession {
        locked(&self.inner).loads[load]
            .session
            .take()
            .expect("load already settled")
    }

    /// Settle a load with a fresh document of `pages` pages.
    pub fn finish_load(&self, load: usize, pages: u32) -> Arc<FakeDocument> {
        let document = FakeDocument::new(pages);
        locked(&self.inner)
            .documents
            .insert(load, Arc::clone(&document));
        self.take_session(load).finish(document.clone());
        document
    }

    pub fn fail_load(&self, load: usize, error: EngineError) {
        self.take_session(load).fail(error);
    }

    /// Document produced by [`finish_load`](Self::finish_load).
    pub fn document(&self, load: usize) -> Arc<FakeDocument> {
        Arc::clone(&locked(&self.inner).documents[&load])
    }

    /// Ask the control thread for a password on behalf of a load.
    pub fn request_password(&self, load: usize, reason: PasswordReason) -> bool {
        let inner = locked(&self.inner);
        inner.loads[load]
            .session
            .as_ref()
            .is_some_and(|session| session.request_password(reason))
    }

    /// Password handed back for a load, if any arrived.
    pub fn received_password(&self, load: usize) -> Option<String> {
        let inner = locked(&self.inner);
        inner.loads[load]
            .session
            .as_ref()
            .and_then(LoadSession::try_password)
    }
}

impl DocumentEngine for ScriptedEngine {
    fn load_document(&self, descriptor: LoadDescriptor) -> LoadingTask {
        let (session, task) = LoadingTask::channel();
        locked(&self.inner).loads.push(ScriptedLoad {
            descriptor,
            token: session.token().clone(),
            session: Some(session),
        });
        task
    }
}

struct PageRequest {
    number: u32,
    completer: Option<Completer<PageRef, EngineError>>,
    page: Option<Arc<FakePage>>,
}

/// Document whose page fetches wait until the test settles them.
pub struct FakeDocument {
    page_count: u32,
    requests: Mutex<Vec<PageRequest>>,
    destroyed: AtomicBool,
    destroy_calls: AtomicUsize,
}

impl FakeDocument {
    pub fn new(page_count: u32) -> Arc<Self> {
        Arc::new(Self {
            page_count,
            requests: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            destroy_calls: AtomicUsize::new(0),
        })
    }

    pub fn requested_pages(&self) -> Vec<u32> {
        locked(&self.requests).iter().map(|r| r.number).collect()
    }

    /// Settle the `request`-th page fetch with a [`PAGE_WIDTH`] × [`PAGE_HEIGHT`] page.
    pub fn finish_page(&self, request: usize) -> Arc<FakePage> {
        let mut requests = locked(&self.requests);
        let entry = &mut requests[request];
        let page = FakePage::new(entry.number, PAGE_WIDTH, PAGE_HEIGHT);
        entry.page = Some(Arc::clone(&page));
        if let Some(completer) = entry.completer.take() {
            completer.resolve(page.clone());
        }
        page
    }

    pub fn fail_page(&self, request: usize, error: EngineError) {
        if let Some(completer) = locked(&self.requests)[request].completer.take() {
            completer.reject(error);
        }
    }

    /// Page produced by [`finish_page`](Self::finish_page).
    pub fn page(&self, request: usize) -> Arc<FakePage> {
        locked(&self.requests)[request]
            .page
            .clone()
            .expect("page request not finished")
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_calls.load(Ordering::Acquire)
    }
}

impl DocumentProxy for FakeDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn get_page(&self, page_number: u32) -> Pending<PageRef, EngineError> {
        if self.is_destroyed() {
            return Pending::settled(Err(EngineError::Destroyed));
        }
        let (completer, pending) = pending();
        locked(&self.requests).push(PageRequest {
            number: page_number,
            completer: Some(completer),
            page: None,
        });
        pending
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::AcqRel);
        self.destroyed.store(true, Ordering::Release);
    }
}

struct RenderRecord {
    canvas: SharedCanvas,
    viewport: Viewport,
    token: CancelToken,
    completer: Option<Completer<(), EngineError>>,
}

/// Page whose render jobs wait until the test settles them.
pub struct FakePage {
    number: u32,
    width: f32,
    height: f32,
    rotation: Rotation,
    renders: Mutex<Vec<RenderRecord>>,
    cleanups: AtomicUsize,
}

impl FakePage {
    pub fn new(number: u32, width: f32, height: f32) -> Arc<Self> {
        Self::with_rotation(number, width, height, Rotation::Deg0)
    }

    pub fn with_rotation(number: u32, width: f32, height: f32, rotation: Rotation) -> Arc<Self> {
        Arc::new(Self {
            number,
            width,
            height,
            rotation,
            renders: Mutex::new(Vec::new()),
            cleanups: AtomicUsize::new(0),
        })
    }

    pub fn render_count(&self) -> usize {
        locked(&self.renders).len()
    }

    pub fn last_viewport(&self) -> Option<Viewport> {
        locked(&self.renders).last().map(|r| r.viewport)
    }

    pub fn render_cancelled(&self, render: usize) -> bool {
        locked(&self.renders)[render].token.is_cancelled()
    }

    /// Finish a render job the way an engine does: a cancelled job fails with
    /// [`EngineError::RenderCancelled`], anything else paints opaque white.
    pub fn finish_render(&self, render: usize) {
        let mut renders = locked(&self.renders);
        let record = &mut renders[render];
        let Some(completer) = record.completer.take() else {
            return;
        };
        if record.token.is_cancelled() {
            completer.reject(EngineError::RenderCancelled);
            return;
        }
        record.canvas.lock().pixels_mut().fill(u8::MAX);
        completer.resolve(());
    }

    pub fn fail_render(&self, render: usize, error: EngineError) {
        if let Some(completer) = locked(&self.renders)[render].completer.take() {
            completer.reject(error);
        }
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::Acquire)
    }
}

impl PageGeometry for FakePage {
    fn rotation(&self) -> Rotation {
        self.rotation
    }

    fn viewport(&self, scale: f32, rotation: Rotation) -> Viewport {
        Viewport::from_page_size(self.width, self.height, scale, rotation)
    }
}

impl PageProxy for FakePage {
    fn page_number(&self) -> u32 {
        self.number
    }

    fn render(&self, canvas: SharedCanvas, viewport: Viewport) -> RenderJob {
        let (completer, pending) = pending();
        let token = CancelToken::new();
        locked(&self.renders).push(RenderRecord {
            canvas,
            viewport,
            token: token.clone(),
            completer: Some(completer),
        });
        RenderJob::new(pending, token)
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::AcqRel);
    }
}
