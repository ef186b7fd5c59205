//! Document worker thread

use std::collections::HashMap;
use std::sync::Arc;

use flume::{Receiver, Sender};
use log::{debug, warn};
use mupdf::pdf::PdfPage;
use mupdf::{Colorspace, Document, Matrix, Page, Pixmap};

use super::{MupdfDocument, MupdfPage, WorkerRequest, page_ref};
use crate::pdf::canvas::{Canvas, SharedCanvas};
use crate::pdf::engine::{LoadSession, RangeTransport};
use crate::pdf::error::EngineError;
use crate::pdf::password::PasswordReason;
use crate::pdf::source::{DescriptorData, LoadDescriptor};
use crate::pdf::task::CancelToken;
use crate::pdf::viewport::{Rotation, Viewport};

const PDF_MAGIC: &str = "application/pdf";

/// Open the document, settle the load, then serve requests until shutdown.
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub(super) fn document_worker(
    descriptor: LoadDescriptor,
    session: LoadSession,
    requests_tx: Sender<WorkerRequest>,
    requests: Receiver<WorkerRequest>,
) {
    if session.is_cancelled() {
        debug!("Load cancelled before opening");
        return;
    }

    let mut doc = match open_document(&descriptor) {
        Ok(doc) => doc,
        Err(e) => {
            session.fail(e);
            return;
        }
    };

    match authenticate(&mut doc, &descriptor, &session) {
        Ok(true) => {}
        Ok(false) => {
            debug!("Load abandoned while waiting for a password");
            return;
        }
        Err(e) => {
            session.fail(e);
            return;
        }
    }

    let page_count = match doc.page_count() {
        Ok(count) => u32::try_from(count).unwrap_or(0),
        Err(e) => {
            session.fail(EngineError::Load(e.to_string()));
            return;
        }
    };

    debug!("Opened document with {page_count} pages");
    let proxy = Arc::new(MupdfDocument::new(page_count, requests_tx.clone()));
    session.finish(proxy);

    let mut worker = Worker {
        doc,
        page_count,
        pages: HashMap::new(),
        requests_tx,
    };
    for request in requests {
        match request {
            WorkerRequest::Page { number, completer } => {
                completer.settle(worker.fetch_page(number));
            }
            WorkerRequest::Render {
                number,
                intrinsic,
                canvas,
                viewport,
                token,
                completer,
            } => {
                let outcome = worker.render(number, intrinsic, &canvas, viewport, &token);
                completer.settle(outcome);
            }
            WorkerRequest::Cleanup { number } => {
                worker.pages.remove(&number);
            }
            WorkerRequest::Shutdown => break,
        }
    }
    debug!("Document worker stopped");
}

fn open_document(descriptor: &LoadDescriptor) -> Result<Document, EngineError> {
    let load_err = |e: mupdf::error::Error| EngineError::Load(e.to_string());

    match descriptor.data() {
        DescriptorData::Bytes(bytes) => Document::from_bytes(bytes, PDF_MAGIC).map_err(load_err),
        DescriptorData::Url(url) => {
            let path = local_path(url).ok_or_else(|| {
                EngineError::Load(format!("only local files can be opened, got {url}"))
            })?;
            Document::open(path).map_err(load_err)
        }
        DescriptorData::Transport(transport) => {
            let bytes = read_transport(transport.as_ref())?;
            Document::from_bytes(&bytes, PDF_MAGIC).map_err(load_err)
        }
    }
}

/// `file://` URLs and plain paths; anything with another scheme is remote.
fn local_path(url: &str) -> Option<&str> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(path);
    }
    if url.contains("://") {
        return None;
    }
    Some(url)
}

fn read_transport(transport: &dyn RangeTransport) -> Result<Vec<u8>, EngineError> {
    transport
        .read_range(0, transport.length())
        .map_err(|e| EngineError::Load(format!("range transport failed: {e}")))
}

/// Returns `Ok(false)` when the load was abandoned before a password worked.
fn authenticate(
    doc: &mut Document,
    descriptor: &LoadDescriptor,
    session: &LoadSession,
) -> Result<bool, EngineError> {
    let needs_password = doc
        .needs_password()
        .map_err(|e| EngineError::Load(e.to_string()))?;
    if !needs_password {
        return Ok(true);
    }

    let mut reason = PasswordReason::NEED_PASSWORD;
    if let Some(password) = &descriptor.extras().password {
        if try_password(doc, password)? {
            return Ok(true);
        }
        reason = PasswordReason::INCORRECT_PASSWORD;
    }

    loop {
        if !session.request_password(reason) {
            return Ok(false);
        }
        let Some(password) = session.wait_password() else {
            return Ok(false);
        };
        if try_password(doc, &password)? {
            return Ok(true);
        }
        reason = PasswordReason::INCORRECT_PASSWORD;
    }
}

fn try_password(doc: &mut Document, password: &str) -> Result<bool, EngineError> {
    doc.authenticate(password)
        .map_err(|e| EngineError::Load(e.to_string()))
}

struct Worker {
    doc: Document,
    page_count: u32,
    pages: HashMap<u32, Page>,
    requests_tx: Sender<WorkerRequest>,
}

impl Worker {
    fn page(&mut self, number: u32) -> Result<&Page, EngineError> {
        if number == 0 || number > self.page_count {
            return Err(EngineError::Page("Invalid page request.".into()));
        }
        if !self.pages.contains_key(&number) {
            let page = self
                .doc
                .load_page((number - 1) as i32)
                .map_err(|e| EngineError::Page(e.to_string()))?;
            self.pages.insert(number, page);
        }
        self.pages
            .get(&number)
            .ok_or_else(|| EngineError::Page(format!("page {number} not cached")))
    }

    /// The page's `/Rotate`. Non-PDF documents have none.
    fn intrinsic_rotation(&self, number: u32) -> Rotation {
        let degrees = self
            .doc
            .load_page((number - 1) as i32)
            .ok()
            .and_then(|page| PdfPage::try_from(page).ok())
            .and_then(|page| page.rotation().ok());
        degrees.and_then(Rotation::from_degrees).unwrap_or_default()
    }

    fn fetch_page(&mut self, number: u32) -> Result<crate::pdf::engine::PageRef, EngineError> {
        let requests = self.requests_tx.clone();
        let bounds = self
            .page(number)?
            .bounds()
            .map_err(|e| EngineError::Page(e.to_string()))?;
        let rotation = self.intrinsic_rotation(number);
        // MuPDF bounds already include `/Rotate`.
        let (width, height) = (bounds.x1 - bounds.x0, bounds.y1 - bounds.y0);
        let size = if rotation.is_sideways() {
            (height, width)
        } else {
            (width, height)
        };
        Ok(page_ref(MupdfPage::new(number, size, rotation, requests)))
    }

    fn render(
        &mut self,
        number: u32,
        intrinsic: Rotation,
        canvas: &SharedCanvas,
        viewport: Viewport,
        token: &CancelToken,
    ) -> Result<(), EngineError> {
        if token.is_cancelled() {
            return Err(EngineError::RenderCancelled);
        }

        let page = self.page(number)?;
        let transform = transform_for(viewport, intrinsic);
        let rgb = Colorspace::device_rgb();
        let pixmap = page
            .to_pixmap(&transform, &rgb, false, false)
            .map_err(|e| EngineError::Render(e.to_string()))?;

        if token.is_cancelled() {
            return Err(EngineError::RenderCancelled);
        }

        let mut surface = canvas.lock();
        copy_into_canvas(&pixmap, &mut surface)
    }
}

/// Scale plus the quarter turn from the page's own rotation, which MuPDF
/// always applies, to the requested one. MuPDF rasterizes the transformed
/// bounding box, so no translation is needed.
fn transform_for(viewport: Viewport, intrinsic: Rotation) -> Matrix {
    let s = viewport.scale;
    match viewport.rotation.relative_to(intrinsic) {
        Rotation::Deg0 => Matrix::new(s, 0.0, 0.0, s, 0.0, 0.0),
        Rotation::Deg90 => Matrix::new(0.0, s, -s, 0.0, 0.0, 0.0),
        Rotation::Deg180 => Matrix::new(-s, 0.0, 0.0, -s, 0.0, 0.0),
        Rotation::Deg270 => Matrix::new(0.0, -s, s, 0.0, 0.0, 0.0),
    }
}

/// Copy an RGB(A) pixmap into the RGBA canvas, clipped to the smaller of the
/// two. MuPDF may round the raster one pixel off the canvas size.
fn copy_into_canvas(pixmap: &Pixmap, canvas: &mut Canvas) -> Result<(), EngineError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(EngineError::Render(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let src_width = pixmap.width() as usize;
    let src_height = pixmap.height() as usize;
    let src_stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    if samples.len() < src_stride.saturating_mul(src_height) || src_width * n > src_stride {
        return Err(EngineError::Render("Pixmap buffer size mismatch".into()));
    }

    let width = src_width.min(canvas.width() as usize);
    let height = src_height.min(canvas.height() as usize);
    if width != canvas.width() as usize || height != canvas.height() as usize {
        warn!(
            "Raster {src_width}x{src_height} does not match canvas {}x{}",
            canvas.width(),
            canvas.height()
        );
    }

    let dst_stride = canvas.stride();
    let pixels = canvas.pixels_mut();
    for y in 0..height {
        let src_row = &samples[y * src_stride..y * src_stride + width * n];
        let dst_row = &mut pixels[y * dst_stride..y * dst_stride + width * Canvas::BYTES_PER_PIXEL];
        for (src, dst) in src_row
            .chunks_exact(n)
            .zip(dst_row.chunks_exact_mut(Canvas::BYTES_PER_PIXEL))
        {
            dst[..3].copy_from_slice(&src[..3]);
            dst[3] = if n > 3 { src[3] } else { u8::MAX };
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_paths_accept_file_urls_and_plain_paths() {
        assert_eq!(local_path("file:///tmp/a.pdf"), Some("/tmp/a.pdf"));
        assert_eq!(local_path("docs/a.pdf"), Some("docs/a.pdf"));
        assert_eq!(local_path("https://example.com/a.pdf"), None);
    }

    #[test]
    fn quarter_turn_swaps_axes() {
        let viewport = Viewport::from_page_size(10.0, 20.0, 2.0, Rotation::Deg90);
        let m = transform_for(viewport, Rotation::Deg0);
        assert_eq!((m.a, m.b, m.c, m.d), (0.0, 2.0, -2.0, 0.0));
    }

    #[test]
    fn requested_rotation_replaces_page_rotation() {
        // `/Rotate 90` asked for at 90: MuPDF's own turn is enough.
        let viewport = Viewport::from_page_size(10.0, 20.0, 2.0, Rotation::Deg90);
        let m = transform_for(viewport, Rotation::Deg90);
        assert_eq!((m.a, m.b, m.c, m.d), (2.0, 0.0, 0.0, 2.0));

        // `/Rotate 90` asked for upright: undo it.
        let viewport = Viewport::from_page_size(10.0, 20.0, 2.0, Rotation::Deg0);
        let m = transform_for(viewport, Rotation::Deg90);
        assert_eq!((m.a, m.b, m.c, m.d), (0.0, -2.0, 2.0, 0.0));
    }
}
