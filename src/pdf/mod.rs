//! PDF load → page → render pipeline

mod binding;
mod canvas;
mod document;
mod engine;
mod error;
mod page;
mod password;
mod render;
mod source;
mod status;
mod task;
mod viewport;

#[cfg(feature = "mupdf")]
mod mupdf_engine;

pub use binding::{PdfBinding, PdfState};
pub use canvas::{Canvas, SharedCanvas};
pub use document::DocumentStage;
pub use engine::{
    DocumentEngine, DocumentProxy, DocumentRef, LoadControl, LoadSession, LoadingTask, PageProxy,
    PageRef, RangeTransport, RenderJob, same_document, same_page,
};
pub use error::{EngineError, InvariantViolation, ReadFailure, SourceError, StageError};
#[cfg(feature = "mupdf")]
pub use mupdf_engine::MupdfEngine;
pub use page::PageStage;
pub use password::{
    LoadOptions, PasswordCallback, PasswordReason, PasswordResponder, prompt_on_terminal,
};
pub use render::RenderStage;
pub use source::{
    Advisory, DescriptorData, DocumentSource, FileRead, LoadDescriptor, LoadExtras, LoadParams,
    Resolution, Resolving, decode_data_uri, is_data_uri, read_file, resolve_source,
};
pub use status::{StageView, Status};
pub use task::{CancelToken, CancelableTask, Completer, Dropped, Pending, PollState, pending};
pub use viewport::{
    PageGeometry, RenderOptions, RenderViewports, Rotation, Viewport, effective_rotation,
    effective_scale, render_viewports, sanitize_pixel_ratio,
};
