//! Client error types
//!
//! Three layers fail independently: the encoder (local file I/O), the
//! transport (network, deadline, cancellation) and the batch that groups
//! uploads together.

use std::path::PathBuf;

use thiserror::Error;

use super::context::ContextError;

/// Failure while producing the multipart body for one file
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("open file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file path {0:?} points to a directory")]
    IsDirectory(PathBuf),

    #[error("read file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write multipart body for {0:?}: body stream closed")]
    BodyClosed(PathBuf),

    #[error("encoder for {0:?} stopped without reporting")]
    Aborted(PathBuf),
}

/// Failure of the request itself
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Failure of a single upload
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("url is required")]
    MissingUrl,

    #[error("file path is required")]
    MissingPath,

    #[error("stat file {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file path {0:?} points to a directory")]
    IsDirectory(PathBuf),

    #[error("invalid encoder config: {0}")]
    InvalidConfig(&'static str),

    /// Transport failed while the encoder had already failed too
    #[error("send request: {source} (stream error: {stream})")]
    SendWithStream {
        #[source]
        source: TransportError,
        stream: EncodeError,
    },

    #[error("send request: {0}")]
    Context(#[source] ContextError),

    #[error("send request: {0}")]
    Send(#[source] TransportError),

    #[error("stream multipart body: {0}")]
    Stream(#[source] EncodeError),
}

impl UploadError {
    /// The encoder failure behind this error, if any
    pub fn stream_error(&self) -> Option<&EncodeError> {
        match self {
            Self::SendWithStream { stream, .. } | Self::Stream(stream) => Some(stream),
            _ => None,
        }
    }
}

/// Failure of a whole batch; the first upload error wins
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("upload file {path:?}: {source}")]
    Upload {
        path: PathBuf,
        #[source]
        source: UploadError,
    },

    #[error("upload file {0:?}: empty response")]
    EmptyResponse(PathBuf),

    #[error("upload task for {path:?} failed: {message}")]
    Internal { path: PathBuf, message: String },
}
