//! Render stage
//!
//! Keyed by page identity, target canvas and render options. Every change
//! cancels the running job before sizing the canvas and submitting a new one.

use log::{debug, warn};

use super::canvas::SharedCanvas;
use super::engine::{PageRef, RenderJob, same_page};
use super::error::EngineError;
use super::status::Status;
use super::task::PollState;
use super::viewport::{RenderOptions, RenderViewports, render_viewports, sanitize_pixel_ratio};

pub struct RenderStage {
    canvas: Option<SharedCanvas>,
    page: Option<PageRef>,
    options: RenderOptions,
    pixel_ratio: f32,
    job: Option<RenderJob>,
    status: Status,
    viewports: Option<RenderViewports>,
    last_error: Option<EngineError>,
}

impl RenderStage {
    #[must_use]
    pub fn new(pixel_ratio: f32) -> Self {
        Self {
            canvas: None,
            page: None,
            options: RenderOptions::default(),
            pixel_ratio: sanitize_pixel_ratio(pixel_ratio),
            job: None,
            status: Status::Idle,
            viewports: None,
            last_error: None,
        }
    }

    /// Follow the upstream page and the requested options. Returns `true`
    /// when the stage restarted.
    pub fn sync(&mut self, page: Option<&PageRef>, options: RenderOptions) -> bool {
        let same = match (&self.page, page) {
            (Some(current), Some(next)) => same_page(current, next),
            (None, None) => true,
            _ => false,
        };
        if same && self.options == options {
            return false;
        }

        if !same {
            // The previous page is gone: release it and the pixels it produced.
            self.cancel_job();
            self.dispose_page();
            self.release_canvas();
        }
        self.page = page.cloned();
        self.options = options;
        self.restart();
        true
    }

    /// Point the stage at a render target. Returns `true` when it changed.
    pub fn attach_canvas(&mut self, canvas: SharedCanvas) -> bool {
        if self.canvas.as_ref().is_some_and(|c| c.same_as(&canvas)) {
            return false;
        }
        self.detach_canvas();
        self.canvas = Some(canvas);
        self.restart();
        true
    }

    /// The target goes away: cancel, clean up the page, free its pixels.
    pub fn detach_canvas(&mut self) {
        if self.canvas.is_none() {
            return;
        }
        self.cancel_job();
        self.dispose_page();
        self.release_canvas();
        self.canvas = None;
        self.status = Status::Idle;
        self.viewports = None;
    }

    fn restart(&mut self) {
        self.cancel_job();
        self.last_error = None;

        let (Some(page), Some(canvas)) = (self.page.as_ref(), self.canvas.as_ref()) else {
            self.status = Status::Idle;
            self.viewports = None;
            return;
        };

        let viewports = render_viewports(&**page, &self.options, self.pixel_ratio);
        let (raster_w, raster_h) = viewports.raster.pixel_size();
        let (display_w, display_h) = viewports.display.pixel_size();
        let sized = {
            let mut surface = canvas.lock();
            let sized = surface.resize(raster_w, raster_h);
            if sized.is_ok() {
                surface.set_display_size(display_w, display_h);
            }
            sized
        };
        if let Err(e) = sized {
            warn!("Not rendering page {}: {e}", page.page_number());
            canvas.lock().release();
            self.status = Status::Error;
            self.viewports = None;
            self.last_error = Some(e);
            return;
        }

        debug!(
            "Rendering page {} at {raster_w}x{raster_h} (display {display_w}x{display_h})",
            page.page_number()
        );
        self.status = Status::Loading;
        self.viewports = Some(viewports);
        self.job = Some(page.render(canvas.clone(), viewports.raster));
    }

    /// A superseded job is cancelled and dropped; its completion is never seen.
    fn cancel_job(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel();
        }
    }

    fn dispose_page(&mut self) {
        if let Some(page) = &self.page {
            page.cleanup();
        }
    }

    fn release_canvas(&mut self) {
        if let Some(canvas) = &self.canvas {
            canvas.lock().release();
        }
    }

    /// Cancel the running job at engine level. Its cancellation failure then
    /// settles the stage as `error` without being reported.
    pub fn cancel(&mut self) {
        if let Some(job) = &self.job {
            debug!("Cancelling render job");
            job.cancel();
        }
    }

    /// Drain the job. Returns `true` when the stage changed.
    pub fn poll(&mut self) -> bool {
        let Some(job) = &self.job else {
            return false;
        };
        let outcome = match job.try_take() {
            PollState::Waiting => return false,
            PollState::Ready(outcome) => outcome,
        };
        self.job = None;

        match outcome {
            Ok(()) => self.status = Status::Success,
            Err(e) if e.is_cancellation() => {
                debug!("Render cancelled");
                self.status = Status::Error;
            }
            Err(e) => {
                warn!("Failed to render page: {e}");
                self.status = Status::Error;
                self.last_error = Some(e);
            }
        }
        true
    }

    /// The consumer goes away.
    pub fn detach(&mut self) {
        self.cancel_job();
        self.dispose_page();
        self.release_canvas();
        self.page = None;
        self.canvas = None;
        self.status = Status::Idle;
        self.viewports = None;
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn canvas(&self) -> Option<&SharedCanvas> {
        self.canvas.as_ref()
    }

    #[must_use]
    pub fn options(&self) -> RenderOptions {
        self.options
    }

    /// Viewports of the most recent submission.
    #[must_use]
    pub fn viewports(&self) -> Option<RenderViewports> {
        self.viewports
    }

    /// Failure of the current submission, other than a cancellation.
    #[must_use]
    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.job.is_some()
    }
}

impl Drop for RenderStage {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakePage;

    fn page_ref(page: &std::sync::Arc<FakePage>) -> PageRef {
        page.clone()
    }

    #[test]
    fn idle_without_target_or_page() {
        let page = FakePage::new(1, 100.0, 200.0);
        let mut stage = RenderStage::new(1.0);

        stage.sync(Some(&page_ref(&page)), RenderOptions::default());
        assert_eq!(stage.status(), Status::Idle);
        assert_eq!(page.render_count(), 0);

        let mut stage = RenderStage::new(1.0);
        stage.attach_canvas(SharedCanvas::new());
        assert_eq!(stage.status(), Status::Idle);
    }

    #[test]
    fn sizes_canvas_before_rendering() {
        let page = FakePage::new(1, 100.0, 200.0);
        let canvas = SharedCanvas::new();
        let mut stage = RenderStage::new(2.0);

        stage.attach_canvas(canvas.clone());
        stage.sync(
            Some(&page_ref(&page)),
            RenderOptions::default().with_width(200.0),
        );

        assert_eq!(stage.status(), Status::Loading);
        {
            let surface = canvas.lock();
            assert_eq!((surface.width(), surface.height()), (400, 800));
            assert_eq!(surface.display_size(), (200, 400));
        }
        assert_eq!(page.last_viewport().map(|v| v.scale), Some(4.0));

        page.finish_render(0);
        assert!(stage.poll());
        assert_eq!(stage.status(), Status::Success);
    }

    #[test]
    fn option_change_cancels_running_job() {
        let page = FakePage::new(1, 100.0, 100.0);
        let mut stage = RenderStage::new(1.0);
        stage.attach_canvas(SharedCanvas::new());
        stage.sync(Some(&page_ref(&page)), RenderOptions::default());

        stage.sync(
            Some(&page_ref(&page)),
            RenderOptions::default().with_scale(2.0),
        );
        assert!(page.render_cancelled(0));
        assert_eq!(page.render_count(), 2);

        page.finish_render(1);
        stage.poll();
        assert_eq!(stage.status(), Status::Success);
    }

    #[test]
    fn explicit_cancel_is_silent_error() {
        let page = FakePage::new(1, 100.0, 100.0);
        let mut stage = RenderStage::new(1.0);
        stage.attach_canvas(SharedCanvas::new());
        stage.sync(Some(&page_ref(&page)), RenderOptions::default());

        stage.cancel();
        assert!(page.render_cancelled(0));
        // The engine notices the token once it finishes rasterizing.
        page.finish_render(0);
        assert!(stage.poll());
        assert_eq!(stage.status(), Status::Error);
        assert!(stage.last_error().is_none());
    }

    #[test]
    fn render_failure_is_reported() {
        let page = FakePage::new(1, 100.0, 100.0);
        let mut stage = RenderStage::new(1.0);
        stage.attach_canvas(SharedCanvas::new());
        stage.sync(Some(&page_ref(&page)), RenderOptions::default());

        page.fail_render(0, EngineError::Render("bad stream".into()));
        stage.poll();
        assert_eq!(stage.status(), Status::Error);
        assert_eq!(
            stage.last_error(),
            Some(&EngineError::Render("bad stream".into()))
        );
    }

    #[test]
    fn oversized_raster_settles_error_without_rendering() {
        let page = FakePage::new(1, 100.0, 200.0);
        let canvas = SharedCanvas::new();
        let mut stage = RenderStage::new(1.0);
        stage.attach_canvas(canvas.clone());

        stage.sync(
            Some(&page_ref(&page)),
            RenderOptions::default().with_width(1.0e12),
        );
        assert_eq!(stage.status(), Status::Error);
        assert!(matches!(stage.last_error(), Some(EngineError::Render(_))));
        assert_eq!(page.render_count(), 0);
        assert!(canvas.lock().pixels().is_empty());
        assert!(!stage.is_busy());

        stage.sync(
            Some(&page_ref(&page)),
            RenderOptions::default().with_width(1.0e5),
        );
        assert_eq!(stage.status(), Status::Error);
        assert_eq!(page.render_count(), 0);

        stage.sync(
            Some(&page_ref(&page)),
            RenderOptions::default().with_width(50.0),
        );
        assert_eq!(stage.status(), Status::Loading);
        assert!(stage.last_error().is_none());
        assert_eq!(canvas.lock().pixels().len(), 50 * 100 * 4);
    }

    #[test]
    fn restart_forgets_previous_failure() {
        let page = FakePage::new(1, 100.0, 100.0);
        let mut stage = RenderStage::new(1.0);
        stage.attach_canvas(SharedCanvas::new());
        stage.sync(Some(&page_ref(&page)), RenderOptions::default());
        page.fail_render(0, EngineError::Render("bad stream".into()));
        stage.poll();
        assert!(stage.last_error().is_some());

        stage.sync(
            Some(&page_ref(&page)),
            RenderOptions::default().with_scale(2.0),
        );
        assert!(stage.last_error().is_none());
        stage.cancel();
        page.finish_render(1);
        stage.poll();
        assert_eq!(stage.status(), Status::Error);
        assert!(stage.last_error().is_none());
    }

    #[test]
    fn detaching_target_frees_pixels_and_cleans_page() {
        let page = FakePage::new(1, 10.0, 10.0);
        let canvas = SharedCanvas::new();
        let mut stage = RenderStage::new(1.0);
        stage.attach_canvas(canvas.clone());
        stage.sync(Some(&page_ref(&page)), RenderOptions::default());
        page.finish_render(0);
        stage.poll();

        stage.detach_canvas();
        assert!(canvas.lock().pixels().is_empty());
        assert!(page.cleanup_count() >= 1);
        assert_eq!(stage.status(), Status::Idle);
    }
}
