//! Render scale and viewport arithmetic
//!
//! The effective scale is `scale × ratio`, where `ratio` fits the page to a
//! requested width (or, failing that, height) at unit scale. Two viewports
//! come out of it: the raster viewport multiplies in the device pixel ratio
//! and sizes the backing store, the display viewport sizes the logical box.

/// Page rotation in quarter turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalize any multiple of 90 degrees, negative values included.
    #[must_use]
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    #[must_use]
    pub const fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Clockwise turn that takes `base` to `self`.
    #[must_use]
    pub fn relative_to(self, base: Self) -> Self {
        let turn = i32::from(self.degrees()) - i32::from(base.degrees());
        Self::from_degrees(turn).unwrap_or_default()
    }

    /// Width and height swap at 90 and 270 degrees.
    #[must_use]
    pub const fn is_sideways(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// How a page maps to pixels at a given scale and rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
    pub rotation: Rotation,
}

impl Viewport {
    /// Viewport for an unrotated page of `page_width × page_height` points.
    #[must_use]
    pub fn from_page_size(page_width: f32, page_height: f32, scale: f32, rotation: Rotation) -> Self {
        let (width, height) = if rotation.is_sideways() {
            (page_height, page_width)
        } else {
            (page_width, page_height)
        };
        Self {
            width: width * scale,
            height: height * scale,
            scale,
            rotation,
        }
    }

    /// Integer pixel size, floored.
    #[must_use]
    pub fn pixel_size(&self) -> (u32, u32) {
        (floor_px(self.width), floor_px(self.height))
    }
}

fn floor_px(value: f32) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.floor() as u32
    } else {
        0
    }
}

/// Geometry a page exposes at unit scale.
pub trait PageGeometry {
    /// Rotation stored in the document for this page.
    fn rotation(&self) -> Rotation;

    fn viewport(&self, scale: f32, rotation: Rotation) -> Viewport;
}

/// Caller-requested sizing. Width/height override scale-derived sizing,
/// `rotate` overrides the page's own rotation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderOptions {
    pub scale: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub rotate: Option<Rotation>,
}

impl RenderOptions {
    #[must_use]
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    #[must_use]
    pub fn with_width(mut self, width: f32) -> Self {
        self.width = Some(width);
        self
    }

    #[must_use]
    pub fn with_height(mut self, height: f32) -> Self {
        self.height = Some(height);
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotate = Some(rotation);
        self
    }
}

fn usable(value: Option<f32>) -> Option<f32> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

#[must_use]
pub fn effective_rotation<P: PageGeometry + ?Sized>(page: &P, options: &RenderOptions) -> Rotation {
    options.rotate.unwrap_or_else(|| page.rotation())
}

/// `scale × fit ratio`; width takes precedence over height for the ratio.
#[must_use]
pub fn effective_scale<P: PageGeometry + ?Sized>(page: &P, options: &RenderOptions) -> f32 {
    let scale = usable(options.scale).unwrap_or(1.0);

    let width = usable(options.width);
    let height = usable(options.height);
    if width.is_none() && height.is_none() {
        return scale;
    }

    let unit = page.viewport(1.0, effective_rotation(page, options));
    let ratio = match (width, height) {
        (Some(w), _) if unit.width > 0.0 => w / unit.width,
        (None, Some(h)) if unit.height > 0.0 => h / unit.height,
        _ => 1.0,
    };

    scale * ratio
}

/// Raster and display viewports for one render.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderViewports {
    /// Physical pixels: backing store size and the viewport handed to the engine.
    pub raster: Viewport,
    /// Logical layout box.
    pub display: Viewport,
}

#[must_use]
pub fn render_viewports<P: PageGeometry + ?Sized>(
    page: &P,
    options: &RenderOptions,
    pixel_ratio: f32,
) -> RenderViewports {
    let rotation = effective_rotation(page, options);
    let scale = effective_scale(page, options);
    let pixel_ratio = sanitize_pixel_ratio(pixel_ratio);

    RenderViewports {
        raster: page.viewport(scale * pixel_ratio, rotation),
        display: page.viewport(scale, rotation),
    }
}

/// Anything that is not a positive finite number becomes 1.
#[must_use]
pub fn sanitize_pixel_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() && ratio > 0.0 {
        ratio
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sheet {
        width: f32,
        height: f32,
        rotation: Rotation,
    }

    impl PageGeometry for Sheet {
        fn rotation(&self) -> Rotation {
            self.rotation
        }

        fn viewport(&self, scale: f32, rotation: Rotation) -> Viewport {
            Viewport::from_page_size(self.width, self.height, scale, rotation)
        }
    }

    fn sheet() -> Sheet {
        Sheet {
            width: 100.0,
            height: 200.0,
            rotation: Rotation::Deg0,
        }
    }

    #[test]
    fn no_hints_means_unit_scale() {
        assert_eq!(effective_scale(&sheet(), &RenderOptions::default()), 1.0);
    }

    #[test]
    fn width_fits_page() {
        let options = RenderOptions::default().with_width(200.0);
        assert_eq!(effective_scale(&sheet(), &options), 2.0);
    }

    #[test]
    fn scale_multiplies_width_ratio() {
        let options = RenderOptions::default().with_scale(2.0).with_width(50.0);
        assert_eq!(effective_scale(&sheet(), &options), 1.0);
    }

    #[test]
    fn width_wins_over_height() {
        let options = RenderOptions::default().with_width(50.0).with_height(800.0);
        assert_eq!(effective_scale(&sheet(), &options), 0.5);
    }

    #[test]
    fn height_used_when_width_missing() {
        let options = RenderOptions::default().with_height(100.0);
        assert_eq!(effective_scale(&sheet(), &options), 0.5);
    }

    #[test]
    fn ratio_uses_rotated_geometry() {
        let options = RenderOptions::default()
            .with_width(400.0)
            .with_rotation(Rotation::Deg90);
        // Sideways the page is 200 wide.
        assert_eq!(effective_scale(&sheet(), &options), 2.0);
    }

    #[test]
    fn intrinsic_rotation_applies_without_override() {
        let page = Sheet {
            rotation: Rotation::Deg270,
            ..sheet()
        };
        assert_eq!(
            effective_rotation(&page, &RenderOptions::default()),
            Rotation::Deg270
        );
        let options = RenderOptions::default().with_rotation(Rotation::Deg0);
        assert_eq!(effective_rotation(&page, &options), Rotation::Deg0);
    }

    #[test]
    fn degenerate_hints_are_ignored() {
        let options = RenderOptions {
            scale: Some(f32::NAN),
            width: Some(0.0),
            height: Some(-3.0),
            rotate: None,
        };
        assert_eq!(effective_scale(&sheet(), &options), 1.0);
    }

    #[test]
    fn raster_viewport_carries_pixel_ratio() {
        let options = RenderOptions::default().with_width(150.0);
        let viewports = render_viewports(&sheet(), &options, 2.0);

        assert_eq!(viewports.display.pixel_size(), (150, 300));
        assert_eq!(viewports.raster.pixel_size(), (300, 600));
    }

    #[test]
    fn pixel_size_floors() {
        let viewport = Viewport::from_page_size(10.7, 20.2, 1.0, Rotation::Deg0);
        assert_eq!(viewport.pixel_size(), (10, 20));
    }

    #[test]
    fn rotation_from_degrees_normalizes() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn relative_rotation() {
        assert_eq!(Rotation::Deg90.relative_to(Rotation::Deg90), Rotation::Deg0);
        assert_eq!(Rotation::Deg0.relative_to(Rotation::Deg90), Rotation::Deg270);
        assert_eq!(Rotation::Deg90.relative_to(Rotation::Deg270), Rotation::Deg180);
        assert_eq!(Rotation::Deg180.relative_to(Rotation::Deg0), Rotation::Deg180);
    }
}
