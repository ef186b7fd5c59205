//! Render target surface

use std::sync::{Arc, Mutex, MutexGuard};

use super::error::EngineError;

/// RGBA backing store plus the logical box it is displayed in.
///
/// The backing store may be larger than the display box on high-density
/// displays.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Canvas {
    width: u32,
    height: u32,
    display_width: u32,
    display_height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub const BYTES_PER_PIXEL: usize = 4;
    /// Largest backing store handed out, in pixels (8192 × 8192).
    pub const MAX_PIXELS: u64 = 1 << 26;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte length of a `width × height` store, or `None` past [`Self::MAX_PIXELS`].
    #[must_use]
    pub fn byte_len(width: u32, height: u32) -> Option<usize> {
        let area = u64::from(width) * u64::from(height);
        if area > Self::MAX_PIXELS {
            return None;
        }
        usize::try_from(area).ok()?.checked_mul(Self::BYTES_PER_PIXEL)
    }

    /// Resize the backing store, clearing it to transparent. An oversized
    /// request leaves the canvas untouched.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        let len = Self::byte_len(width, height).ok_or_else(|| {
            EngineError::Render(format!(
                "raster {width}x{height} exceeds the {} pixel limit",
                Self::MAX_PIXELS
            ))
        })?;
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(len, 0);
        if len == 0 {
            self.pixels.shrink_to_fit();
        }
        Ok(())
    }

    pub fn set_display_size(&mut self, width: u32, height: u32) {
        self.display_width = width;
        self.display_height = height;
    }

    /// Drop the backing store so no pixel memory stays retained.
    pub fn release(&mut self) {
        self.width = 0;
        self.height = 0;
        self.pixels = Vec::new();
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn display_size(&self) -> (u32, u32) {
        (self.display_width, self.display_height)
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Bytes per row of the backing store.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }
}

/// Canvas shared between the render stage (sizing) and render jobs (pixels).
#[derive(Clone, Debug, Default)]
pub struct SharedCanvas {
    inner: Arc<Mutex<Canvas>>,
}

impl SharedCanvas {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Canvas> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_allocates_rgba() {
        let mut canvas = Canvas::new();
        canvas.resize(3, 2).unwrap();
        assert_eq!(canvas.pixels().len(), 24);
        assert_eq!(canvas.stride(), 12);
    }

    #[test]
    fn release_frees_backing_store_but_keeps_display_box() {
        let mut canvas = Canvas::new();
        canvas.resize(10, 10).unwrap();
        canvas.set_display_size(5, 5);
        canvas.release();

        assert_eq!((canvas.width(), canvas.height()), (0, 0));
        assert!(canvas.pixels().is_empty());
        assert_eq!(canvas.display_size(), (5, 5));
    }

    #[test]
    fn oversized_resize_is_refused() {
        let mut canvas = Canvas::new();
        canvas.resize(4, 4).unwrap();

        assert!(canvas.resize(u32::MAX, u32::MAX).is_err());
        assert!(canvas.resize(100_000, 100_000).is_err());
        assert_eq!((canvas.width(), canvas.height()), (4, 4));
        assert_eq!(canvas.pixels().len(), 64);

        assert_eq!(Canvas::byte_len(8192, 8192), Some(8192 * 8192 * 4));
        assert_eq!(Canvas::byte_len(8192, 8193), None);
    }

    #[test]
    fn shared_canvas_identity() {
        let a = SharedCanvas::new();
        let b = a.clone();
        let c = SharedCanvas::new();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
