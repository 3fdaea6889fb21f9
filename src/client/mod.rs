//! Upload client
//!
//! - `encoder`: streams one file into a multipart body while hashing it
//! - `transport`: sends one request per file and reconciles failures
//! - `batch`: bounded, fail-fast fan-out over many files
//! - `context`: cancellation and deadlines threaded through every call

pub mod batch;
pub mod context;
pub mod encoder;
pub mod error;
pub mod transport;

pub use batch::{BatchUploader, UploadResultPayload};
pub use context::{CancelHandle, ContextError, UploadContext};
pub use encoder::{EncodeSummary, EncoderConfig};
pub use error::{BatchError, EncodeError, TransportError, UploadError};
pub use transport::{FileUploader, UploadClient, UploadRequest, UploadResponse};
