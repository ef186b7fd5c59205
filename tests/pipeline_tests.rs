use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use folio::pdf::{
    DocumentSource, EngineError, LoadOptions, PasswordReason, PdfBinding, ReadFailure,
    RenderOptions, SharedCanvas, SourceError, StageError, Status,
};
use folio::test_utils::{ScriptedEngine, capture_logs};
use log::Level;
use folio::Environment;

fn binding(engine: &ScriptedEngine) -> PdfBinding {
    PdfBinding::new(
        Arc::new(engine.clone()),
        Environment::default(),
        LoadOptions::default(),
    )
}

/// Poll until `done` holds or two seconds pass.
fn poll_until(binding: &mut PdfBinding, mut done: impl FnMut(&PdfBinding) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done(binding) {
        assert!(Instant::now() < deadline, "pipeline did not get there in time");
        if !binding.poll() {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

#[test]
fn renders_first_page_end_to_end() {
    let engine = ScriptedEngine::new();
    let canvas = SharedCanvas::new();
    let mut binding = binding(&engine);
    binding.attach_canvas(canvas.clone());
    binding.set_render_options(RenderOptions::default().with_width(200.0));
    binding.set_source(Some(DocumentSource::from(vec![1, 2, 3])));

    let state = binding.snapshot().unwrap();
    assert_eq!(state.document_status, Status::Loading);
    assert_eq!(state.page_status, Status::Idle);

    engine.finish_load(0, 3);
    binding.poll();
    let doc = engine.document(0);
    assert_eq!(doc.requested_pages(), vec![1]);

    let page = doc.finish_page(0);
    binding.poll();
    assert_eq!(binding.snapshot().unwrap().render_status, Status::Loading);
    assert_eq!(page.last_viewport().map(|v| v.scale), Some(2.0));

    page.finish_render(0);
    binding.poll();

    let state = binding.snapshot().unwrap();
    assert!(!state.is_error);
    assert_eq!(state.document_status, Status::Success);
    assert_eq!(state.page_status, Status::Success);
    assert_eq!(state.render_status, Status::Success);
    assert_eq!(state.page.map(|p| p.page_number()), Some(1));
    assert!(binding.is_settled());

    let surface = canvas.lock();
    assert_eq!((surface.width(), surface.height()), (200, 400));
    assert_eq!(surface.display_size(), (200, 400));
    assert!(surface.pixels().iter().all(|&b| b == u8::MAX));
}

#[test]
fn last_requested_page_wins() {
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.attach_canvas(SharedCanvas::new());
    binding.set_source(Some(DocumentSource::url("doc.pdf")));
    engine.finish_load(0, 5);
    binding.poll();

    binding.set_page(2);
    binding.set_page(3);
    let doc = engine.document(0);
    assert_eq!(doc.requested_pages(), vec![1, 2, 3]);

    // Completions arrive in the wrong order.
    doc.finish_page(2);
    doc.finish_page(0);
    doc.finish_page(1);
    binding.poll();

    let state = binding.snapshot().unwrap();
    assert_eq!(state.page.map(|p| p.page_number()), Some(3));
    assert_eq!(doc.page(2).render_count(), 1);
    assert_eq!(doc.page(0).render_count(), 0);
    assert_eq!(doc.page(1).render_count(), 0);
}

#[test]
fn dependents_go_idle_when_document_changes() {
    let engine = ScriptedEngine::new();
    let canvas = SharedCanvas::new();
    let mut binding = binding(&engine);
    binding.attach_canvas(canvas.clone());
    binding.set_source(Some(DocumentSource::url("a.pdf")));
    engine.finish_load(0, 2);
    binding.poll();
    let page = engine.document(0).finish_page(0);
    binding.poll();
    page.finish_render(0);
    binding.poll();
    assert_eq!(binding.snapshot().unwrap().render_status, Status::Success);

    binding.set_source(Some(DocumentSource::url("b.pdf")));

    let state = binding.snapshot().unwrap();
    assert_eq!(state.document_status, Status::Loading);
    assert_eq!(state.page_status, Status::Idle);
    assert_eq!(state.render_status, Status::Idle);
    assert!(state.document.is_none());
    assert!(state.page.is_none());
    assert!(engine.document(0).is_destroyed());
    assert!(page.cleanup_count() >= 1);
    assert!(canvas.lock().pixels().is_empty());
}

#[test]
fn stale_document_never_reaches_the_binding() {
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.set_source(Some(DocumentSource::url("a.pdf")));
    binding.set_source(Some(DocumentSource::url("b.pdf")));

    engine.finish_load(0, 7);
    binding.poll();
    assert_eq!(binding.snapshot().unwrap().document_status, Status::Loading);
    assert!(engine.document(0).is_destroyed());

    engine.finish_load(1, 2);
    binding.poll();
    let state = binding.snapshot().unwrap();
    assert_eq!(state.document.map(|d| d.page_count()), Some(2));
}

#[test]
fn cancelled_render_is_silent() {
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.attach_canvas(SharedCanvas::new());
    binding.set_source(Some(DocumentSource::url("a.pdf")));
    engine.finish_load(0, 1);
    binding.poll();
    let page = engine.document(0).finish_page(0);
    binding.poll();

    let ((), records) = capture_logs(|| {
        binding.cancel_render();
        page.finish_render(0);
        binding.poll();
    });
    assert!(page.render_cancelled(0));

    let state = binding.snapshot().unwrap();
    assert_eq!(state.render_status, Status::Error);
    assert!(state.is_error);
    assert!(binding.last_error().is_none());
    assert!(
        records.iter().all(|(level, _)| *level > Level::Warn),
        "cancellation logged a diagnostic: {records:?}"
    );
}

#[test]
fn render_failure_is_reported() {
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.attach_canvas(SharedCanvas::new());
    binding.set_source(Some(DocumentSource::url("a.pdf")));
    engine.finish_load(0, 1);
    binding.poll();
    let page = engine.document(0).finish_page(0);
    binding.poll();

    let ((), records) = capture_logs(|| {
        page.fail_render(0, EngineError::Render("broken content stream".into()));
        binding.poll();
    });
    assert!(
        records
            .iter()
            .any(|(level, line)| *level == Level::Warn && line.contains("broken content stream"))
    );

    assert!(binding.snapshot().unwrap().is_error);
    assert_eq!(
        binding.last_error(),
        Some(StageError::Engine(EngineError::Render(
            "broken content stream".into()
        )))
    );
}

#[test]
fn page_failure_leaves_render_idle() {
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.attach_canvas(SharedCanvas::new());
    binding.set_source(Some(DocumentSource::url("a.pdf")));
    engine.finish_load(0, 1);
    binding.set_page(9);
    binding.poll();

    engine
        .document(0)
        .fail_page(0, EngineError::Page("Invalid page request.".into()));
    binding.poll();

    let state = binding.snapshot().unwrap();
    assert_eq!(state.page_status, Status::Error);
    assert_eq!(state.render_status, Status::Idle);
    assert!(state.is_error);
}

#[test]
fn page_zero_means_no_page() {
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.set_page(0);
    binding.set_source(Some(DocumentSource::url("a.pdf")));
    engine.finish_load(0, 3);
    binding.poll();

    let state = binding.snapshot().unwrap();
    assert_eq!(state.document_status, Status::Success);
    assert_eq!(state.page_status, Status::Idle);
    assert!(engine.document(0).requested_pages().is_empty());
}

#[test]
fn detaching_while_loading_releases_the_late_document() {
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.set_source(Some(DocumentSource::url("a.pdf")));

    binding.detach();
    assert!(engine.load_destroyed(0));

    engine.finish_load(0, 1);
    binding.poll();
    assert!(engine.document(0).is_destroyed());
    assert_eq!(binding.snapshot().unwrap().document_status, Status::Idle);
}

#[test]
fn dropping_the_binding_tears_everything_down() {
    let engine = ScriptedEngine::new();
    let canvas = SharedCanvas::new();
    let mut binding = binding(&engine);
    binding.attach_canvas(canvas.clone());
    binding.set_source(Some(DocumentSource::url("a.pdf")));
    engine.finish_load(0, 1);
    binding.poll();
    let page = engine.document(0).finish_page(0);
    binding.poll();

    drop(binding);

    assert!(engine.document(0).is_destroyed());
    assert!(page.render_cancelled(0));
    assert!(page.cleanup_count() >= 1);
    assert!(canvas.lock().pixels().is_empty());
}

#[test]
fn password_requests_use_the_latest_callback() {
    let engine = ScriptedEngine::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_first = Arc::clone(&seen);
    let options = LoadOptions::default().with_password_callback(move |responder, reason| {
        seen_first.lock().unwrap().push(reason);
        responder.respond("first");
    });
    let mut binding = PdfBinding::new(Arc::new(engine.clone()), Environment::default(), options);
    binding.set_source(Some(DocumentSource::url("locked.pdf")));

    assert!(engine.request_password(0, PasswordReason::NEED_PASSWORD));
    binding.poll();
    assert_eq!(engine.received_password(0).as_deref(), Some("first"));

    binding.set_load_options(LoadOptions::default().with_password_callback(
        |responder, _| {
            responder.respond("second");
        },
    ));
    assert!(engine.request_password(0, PasswordReason::INCORRECT_PASSWORD));
    binding.poll();
    assert_eq!(engine.received_password(0).as_deref(), Some("second"));

    assert_eq!(*seen.lock().unwrap(), vec![PasswordReason::NEED_PASSWORD]);
    assert_eq!(binding.snapshot().unwrap().document_status, Status::Loading);
}

#[test]
fn rejected_fixed_password_is_not_retried() {
    let engine = ScriptedEngine::new();
    let options = LoadOptions::default().with_password("wrong");
    let mut binding = PdfBinding::new(Arc::new(engine.clone()), Environment::default(), options);
    binding.set_source(Some(DocumentSource::url("locked.pdf")));

    assert!(engine.request_password(0, PasswordReason::NEED_PASSWORD));
    binding.poll();
    assert_eq!(engine.received_password(0).as_deref(), Some("wrong"));

    assert!(engine.request_password(0, PasswordReason::INCORRECT_PASSWORD));
    for _ in 0..100 {
        binding.poll();
    }
    assert_eq!(engine.received_password(0), None);
    assert_eq!(binding.snapshot().unwrap().document_status, Status::Loading);
}

#[test]
fn file_sources_are_read_before_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.pdf");
    std::fs::write(&path, b"%PDF-1.7 test").unwrap();

    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.set_source(Some(DocumentSource::file(&path)));
    assert_eq!(binding.snapshot().unwrap().document_status, Status::Idle);
    assert!(!binding.is_settled());

    poll_until(&mut binding, |_| engine.load_count() == 1);
    assert_eq!(engine.descriptor(0).bytes(), Some(&b"%PDF-1.7 test"[..]));
    assert_eq!(binding.snapshot().unwrap().document_status, Status::Loading);
}

#[test]
fn missing_file_settles_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.set_source(Some(DocumentSource::file(dir.path().join("nope.pdf"))));

    poll_until(&mut binding, PdfBinding::is_settled);

    assert_eq!(binding.snapshot().unwrap().document_status, Status::Error);
    assert_eq!(
        binding.last_error(),
        Some(StageError::Source(SourceError::Read(ReadFailure::NotFound)))
    );
    assert_eq!(engine.load_count(), 0);
}

#[test]
fn base64_data_uri_loads_decoded_bytes() {
    let engine = ScriptedEngine::new();
    let mut binding = binding(&engine);
    binding.set_source(Some(DocumentSource::url("data:text/plain;base64,AAA=")));

    assert_eq!(engine.load_count(), 1);
    assert_eq!(engine.descriptor(0).bytes(), Some(&[0u8, 0][..]));
}

#[test]
fn same_source_does_not_reload() {
    let engine = ScriptedEngine::new();
    let bytes: Arc<[u8]> = Arc::from(&b"%PDF"[..]);
    let mut binding = binding(&engine);

    binding.set_source(Some(DocumentSource::Bytes(Arc::clone(&bytes))));
    binding.set_source(Some(DocumentSource::Bytes(Arc::clone(&bytes))));
    assert_eq!(engine.load_count(), 1);

    binding.reload();
    assert_eq!(engine.load_count(), 2);
    assert!(engine.load_destroyed(0));
}
