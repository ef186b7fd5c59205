pub mod environment;
pub mod panic_handler;
pub mod pdf;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use environment::Environment;
pub use pdf::{
    DocumentSource, LoadOptions, PdfBinding, PdfState, RenderOptions, Rotation, SharedCanvas,
    Status,
};
