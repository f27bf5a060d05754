use thiserror::Error;

use crate::resolver::PartialChain;
use crate::validator::ValidationError;

/// Errors that can occur when parsing, validating or resolving VAST documents
#[derive(Error, Debug)]
pub enum VastError {
    #[error("Failed to parse XML: {0}")]
    XmlParseError(#[from] quick_xml::Error),

    #[error("Invalid XML attribute: {0}")]
    InvalidAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("Malformed VAST document: {0}")]
    MalformedDocument(String),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid VAST version: {0}")]
    InvalidVersion(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("Fetching {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Max wrapper depth exceeded ({max_depth})")]
    DepthExceeded { max_depth: usize },

    #[error("Unknown error: {0}")]
    Other(String),
}

/// Coarse classification of every failure a caller can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SchemaViolation,
    UnknownTag,
    ParseFailure,
    FetchFailure,
    DepthExceeded,
    Aborted,
}

impl VastError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VastError::Validation(err) => err.kind,
            VastError::XmlParseError(_)
            | VastError::InvalidAttribute(_)
            | VastError::MalformedDocument(_)
            | VastError::InvalidVersion(_)
            | VastError::MissingField(_) => ErrorKind::ParseFailure,
            VastError::IoError(_)
            | VastError::UrlError(_)
            | VastError::FetchFailed { .. }
            | VastError::Timeout { .. }
            | VastError::Other(_) => ErrorKind::FetchFailure,
            VastError::DepthExceeded { .. } => ErrorKind::DepthExceeded,
        }
    }
}

/// Outcome of a wrapper resolution that did not reach an InLine ad
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The chain broke; everything merged before the break is kept.
    #[error("Wrapper chain stopped: {source}")]
    Chain {
        source: VastError,
        partial: PartialChain,
    },

    /// The caller cancelled the resolution. Partial data is discarded.
    #[error("Resolution aborted")]
    Aborted,
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::Chain { source, .. } => source.kind(),
            ResolveError::Aborted => ErrorKind::Aborted,
        }
    }

    /// Data merged from the completed chain steps, if any was kept
    pub fn partial(&self) -> Option<&PartialChain> {
        match self {
            ResolveError::Chain { partial, .. } => Some(partial),
            ResolveError::Aborted => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VastError>;
