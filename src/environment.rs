//! Process-wide capabilities, resolved once at startup and passed down

use crate::pdf::sanitize_pixel_ratio;
use crate::settings::Settings;

/// What the host process can do. Built once and handed to the pipeline instead
/// of being probed wherever it is needed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Environment {
    /// Device pixels per logical pixel.
    pub pixel_ratio: f32,
    /// Documents are served from the local file system rather than over HTTP(S).
    /// URL sources only trigger the cross-origin advisory outside this context.
    pub local_file_context: bool,
    /// File paths can be read as document sources.
    pub file_access: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            pixel_ratio: 1.0,
            local_file_context: false,
            file_access: true,
        }
    }
}

impl Environment {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            pixel_ratio: settings
                .pixel_ratio
                .map_or(1.0, sanitize_pixel_ratio),
            local_file_context: settings.local_file_context,
            file_access: settings.file_access,
        }
    }

    #[must_use]
    pub fn with_pixel_ratio(mut self, ratio: f32) -> Self {
        self.pixel_ratio = sanitize_pixel_ratio(ratio);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unit_pixel_ratio() {
        let env = Environment::from_settings(&Settings::default());
        assert_eq!(env.pixel_ratio, 1.0);
        assert!(env.file_access);
        assert!(!env.local_file_context);
    }

    #[test]
    fn invalid_pixel_ratio_falls_back() {
        let settings = Settings {
            pixel_ratio: Some(-2.0),
            ..Settings::default()
        };
        assert_eq!(Environment::from_settings(&settings).pixel_ratio, 1.0);
        assert_eq!(Environment::default().with_pixel_ratio(2.0).pixel_ratio, 2.0);
    }
}
