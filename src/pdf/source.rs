//! Document source resolution
//!
//! Turns whatever the caller handed us (a URL or `data:` URI string, raw
//! bytes, a range transport, a file path or a structured parameter object)
//! into a [`LoadDescriptor`] the engine can open.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use super::engine::RangeTransport;
use super::error::{ReadFailure, SourceError};
use super::task::{CancelToken, Pending, pending};
use crate::environment::Environment;

const CROSS_ORIGIN_TIP: &str =
    "Loading PDF as base64 strings/URLs may not work on protocols other than HTTP/HTTPS.";

/// Lenient like a browser's `atob`: padding optional.
const DATA_URI_BASE64: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Extra load parameters a structured source may carry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadExtras {
    pub password: Option<String>,
    pub http_headers: Vec<(String, String)>,
    pub with_credentials: bool,
}

/// Structured document source. At least one of `url`, `bytes`, `transport`
/// must be set.
#[derive(Clone, Default)]
pub struct LoadParams {
    pub url: Option<String>,
    pub bytes: Option<Arc<[u8]>>,
    pub transport: Option<Arc<dyn RangeTransport>>,
    pub extras: LoadExtras,
}

impl fmt::Debug for LoadParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadParams")
            .field("url", &self.url)
            .field("bytes_len", &self.bytes.as_ref().map(|b| b.len()))
            .field("transport", &self.transport.is_some())
            .field("extras", &self.extras)
            .finish()
    }
}

/// A document reference as supplied by the host.
#[derive(Clone)]
pub enum DocumentSource {
    /// A URL, or a `data:` URI carrying the document inline.
    Url(String),
    Bytes(Arc<[u8]>),
    Transport(Arc<dyn RangeTransport>),
    /// A file on disk, read asynchronously when file access is available.
    File(PathBuf),
    Params(LoadParams),
}

impl DocumentSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(bytes.into())
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    /// Identity comparison: strings and paths by value, buffers and
    /// transports by allocation.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Url(a), Self::Url(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => Arc::ptr_eq(a, b),
            (Self::Transport(a), Self::Transport(b)) => Arc::ptr_eq(a, b),
            (Self::File(a), Self::File(b)) => a == b,
            (Self::Params(a), Self::Params(b)) => {
                a.url == b.url
                    && opt_ptr_eq(&a.bytes, &b.bytes)
                    && opt_ptr_eq(&a.transport, &b.transport)
                    && a.extras == b.extras
            }
            _ => false,
        }
    }
}

fn opt_ptr_eq<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) if is_data_uri(url) => write!(f, "Url(data: {} chars)", url.len()),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Transport(transport) => write!(f, "Transport({} bytes)", transport.length()),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Params(params) => params.fmt(f),
        }
    }
}

impl From<&str> for DocumentSource {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for DocumentSource {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<Vec<u8>> for DocumentSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<LoadParams> for DocumentSource {
    fn from(params: LoadParams) -> Self {
        Self::Params(params)
    }
}

/// Exactly one way to get at the document bytes.
#[derive(Clone)]
pub enum DescriptorData {
    Bytes(Arc<[u8]>),
    Url(String),
    Transport(Arc<dyn RangeTransport>),
}

impl fmt::Debug for DescriptorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Transport(transport) => write!(f, "Transport({} bytes)", transport.length()),
        }
    }
}

/// Normalized, immutable input to the engine's load operation.
#[derive(Clone, Debug)]
pub struct LoadDescriptor {
    data: DescriptorData,
    extras: LoadExtras,
}

impl LoadDescriptor {
    #[must_use]
    pub fn new(data: DescriptorData, extras: LoadExtras) -> Self {
        Self { data, extras }
    }

    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(DescriptorData::Bytes(bytes.into()), LoadExtras::default())
    }

    #[must_use]
    pub fn data(&self) -> &DescriptorData {
        &self.data
    }

    #[must_use]
    pub fn extras(&self) -> &LoadExtras {
        &self.extras
    }

    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.data {
            DescriptorData::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match &self.data {
            DescriptorData::Url(url) => Some(url),
            _ => None,
        }
    }
}

/// Non-fatal notice produced while resolving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advisory {
    CrossOrigin,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrossOrigin => f.write_str(CROSS_ORIGIN_TIP),
        }
    }
}

/// Result of a synchronous resolution. `descriptor` is `None` when there is
/// nothing to load.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub descriptor: Option<LoadDescriptor>,
    pub advisories: Vec<Advisory>,
}

impl Resolution {
    fn nothing() -> Self {
        Self::default()
    }

    fn of(descriptor: LoadDescriptor) -> Self {
        Self {
            descriptor: Some(descriptor),
            advisories: Vec::new(),
        }
    }
}

/// A file read in flight.
#[derive(Debug)]
pub struct FileRead {
    pub pending: Pending<Vec<u8>, SourceError>,
    pub token: CancelToken,
}

/// Either resolved right away, or waiting on file contents.
#[derive(Debug)]
pub enum Resolving {
    Ready(Resolution),
    Reading(FileRead),
}

#[must_use]
pub fn is_data_uri(value: &str) -> bool {
    value.starts_with("data:")
}

/// Decode the payload of a `data:` URI: base64 when the header says so,
/// percent-decoding otherwise.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, SourceError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| SourceError::invalid("not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| SourceError::invalid("data URI has no payload"))?;

    if header.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        let compact: Vec<u8> = payload
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        DATA_URI_BASE64
            .decode(compact)
            .map_err(|e| SourceError::invalid(format!("bad base64 in data URI: {e}")))
    } else {
        Ok(urlencoding::decode_binary(payload.as_bytes()).into_owned())
    }
}

fn cross_origin_advisory(env: &Environment, advisories: &mut Vec<Advisory>) {
    if !env.local_file_context {
        advisories.push(Advisory::CrossOrigin);
    }
}

/// Resolve a document reference.
pub fn resolve_source(
    source: Option<&DocumentSource>,
    env: &Environment,
) -> Result<Resolving, SourceError> {
    let Some(source) = source else {
        return Ok(Resolving::Ready(Resolution::nothing()));
    };

    let resolution = match source {
        DocumentSource::Url(url) if url.is_empty() => Resolution::nothing(),
        DocumentSource::Url(url) if is_data_uri(url) => {
            Resolution::of(LoadDescriptor::from_bytes(decode_data_uri(url)?))
        }
        DocumentSource::Url(url) => {
            let mut resolution = Resolution::of(LoadDescriptor::new(
                DescriptorData::Url(url.clone()),
                LoadExtras::default(),
            ));
            cross_origin_advisory(env, &mut resolution.advisories);
            resolution
        }
        DocumentSource::Transport(transport) => Resolution::of(LoadDescriptor::new(
            DescriptorData::Transport(Arc::clone(transport)),
            LoadExtras::default(),
        )),
        DocumentSource::Bytes(bytes) => Resolution::of(LoadDescriptor::from_bytes(Arc::clone(bytes))),
        DocumentSource::File(path) => {
            if !env.file_access {
                return Err(SourceError::invalid(
                    "file sources need file system access",
                ));
            }
            return Ok(Resolving::Reading(read_file(path.clone())));
        }
        DocumentSource::Params(params) => resolve_params(params, env)?,
    };

    Ok(Resolving::Ready(resolution))
}

fn resolve_params(params: &LoadParams, env: &Environment) -> Result<Resolution, SourceError> {
    if params.url.is_none() && params.bytes.is_none() && params.transport.is_none() {
        return Err(SourceError::invalid(
            "parameter object needs bytes, transport or url",
        ));
    }

    let mut advisories = Vec::new();
    let decoded = match params.url.as_deref() {
        Some(url) if is_data_uri(url) => Some(Arc::<[u8]>::from(decode_data_uri(url)?)),
        Some(_) => {
            cross_origin_advisory(env, &mut advisories);
            None
        }
        None => None,
    };

    // Explicit bytes win over a decoded data URI, then transport, then url.
    let data = if let Some(bytes) = params.bytes.clone().or(decoded) {
        DescriptorData::Bytes(bytes)
    } else if let Some(transport) = &params.transport {
        DescriptorData::Transport(Arc::clone(transport))
    } else if let Some(url) = &params.url {
        DescriptorData::Url(url.clone())
    } else {
        return Err(SourceError::invalid("parameter object has no usable field"));
    };

    Ok(Resolution {
        descriptor: Some(LoadDescriptor::new(data, params.extras.clone())),
        advisories,
    })
}

/// Read a whole file on a background thread.
#[must_use]
pub fn read_file(path: PathBuf) -> FileRead {
    let (completer, pending) = pending();
    let token = CancelToken::new();
    let observed = token.clone();

    std::thread::spawn(move || {
        if observed.is_cancelled() {
            completer.reject(SourceError::Read(ReadFailure::Aborted));
            return;
        }
        let outcome = std::fs::read(&path).map_err(|e| {
            log::debug!("Reading {path:?} failed: {e}");
            SourceError::Read(ReadFailure::from_io(&e))
        });
        completer.settle(outcome);
    });

    FileRead { pending, token }
}
