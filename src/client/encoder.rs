//! Streaming Multipart Encoder
//!
//! Turns one file into a `multipart/form-data` body without holding the file
//! in memory. Every chunk read from disk is fed to the SHA-256 accumulator and
//! to the body channel in the same step, so the trailing `checksum_sha256`
//! part describes exactly the bytes that were sent.
//!
//! Body layout:
//! 1. file part under the configured field name
//! 2. value part `checksum_sha256` with the hex digest
//! 3. closing boundary

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::SinkExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

use super::error::{EncodeError, UploadError};
use crate::CHECKSUM_FIELD_SHA256;

/// Chunks buffered between the encoder task and the transport
const BODY_CHANNEL_DEPTH: usize = 4;

/// Encoder settings shared by every upload of a process
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Bytes read from disk per step
    pub chunk_size: usize,
    /// Multipart field name of the file part
    pub field_name: String,
    /// Fallback deadline when the caller's context has none
    pub request_timeout: Option<Duration>,
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfig("chunk_size must be positive"));
        }
        if self.field_name.is_empty() {
            return Err(UploadError::InvalidConfig("field name is required"));
        }
        if matches!(self.request_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(UploadError::InvalidConfig("request_timeout must be positive"));
        }
        Ok(())
    }
}

/// A validated file to encode
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub path: PathBuf,
    /// Name sent in the `filename` parameter of the file part
    pub name: String,
}

/// What the encoder streamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSummary {
    pub sha256: String,
    pub bytes: u64,
}

pub type BodyChunk = io::Result<Vec<u8>>;

/// Handles to a running encoder
pub struct EncodedBody {
    /// Value for the request's `Content-Type` header
    pub content_type: String,
    /// Body stream; yields an error item if the encoder fails mid-stream
    pub chunks: mpsc::Receiver<BodyChunk>,
    /// Published before the body stream is aborted, so a transport failure
    /// caused by the abort can always see it
    pub outcome: oneshot::Receiver<Result<EncodeSummary, EncodeError>>,
}

/// Start encoding `file` on its own task.
pub fn spawn(file: UploadFile, config: Arc<EncoderConfig>) -> EncodedBody {
    let boundary = new_boundary();
    let content_type = format!("multipart/form-data; boundary={}", boundary);
    let (tx, chunks) = mpsc::channel(BODY_CHANNEL_DEPTH);
    let (outcome_tx, outcome) = oneshot::channel();

    tokio::spawn(async move {
        let mut sink = BodySink {
            tx,
            path: file.path.clone(),
        };
        let result = encode(&file, &config, &boundary, &mut sink).await;

        match &result {
            Ok(summary) => tracing::debug!(
                path = %file.path.display(),
                bytes = summary.bytes,
                sha256 = %summary.sha256,
                "Multipart body encoded"
            ),
            Err(e) => tracing::debug!(path = %file.path.display(), error = %e, "Multipart encoding stopped"),
        }

        let abort = result.as_ref().err().map(|e| e.to_string());
        let _ = outcome_tx.send(result);
        if let Some(message) = abort {
            let _ = sink.tx.send(Err(io::Error::new(io::ErrorKind::Other, message))).await;
        }
    });

    EncodedBody {
        content_type,
        chunks,
        outcome,
    }
}

/// Random boundary, long enough never to collide with file content in practice
pub fn new_boundary() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

struct BodySink {
    tx: mpsc::Sender<BodyChunk>,
    path: PathBuf,
}

impl BodySink {
    async fn write(&mut self, bytes: Vec<u8>) -> Result<(), EncodeError> {
        self.tx
            .send(Ok(bytes))
            .await
            .map_err(|_| EncodeError::BodyClosed(self.path.clone()))
    }
}

async fn encode(
    file: &UploadFile,
    config: &EncoderConfig,
    boundary: &str,
    sink: &mut BodySink,
) -> Result<EncodeSummary, EncodeError> {
    let mut source = File::open(&file.path).await.map_err(|source| EncodeError::Open {
        path: file.path.clone(),
        source,
    })?;
    let metadata = source.metadata().await.map_err(|source| EncodeError::Read {
        path: file.path.clone(),
        source,
    })?;
    if metadata.is_dir() {
        return Err(EncodeError::IsDirectory(file.path.clone()));
    }

    sink.write(file_part_header(boundary, &config.field_name, &file.name).into_bytes())
        .await?;

    let mut hasher = Sha256::new();
    let mut total = 0u64;
    loop {
        let mut buf = vec![0u8; config.chunk_size];
        let n = source.read(&mut buf).await.map_err(|source| EncodeError::Read {
            path: file.path.clone(),
            source,
        })?;
        if n == 0 {
            break;
        }
        buf.truncate(n);

        hasher.update(&buf);
        total += n as u64;
        sink.write(buf).await?;
    }

    let sha256 = hex::encode(hasher.finalize());
    sink.write(value_part(boundary, CHECKSUM_FIELD_SHA256, &sha256).into_bytes())
        .await?;
    sink.write(closing_boundary(boundary).into_bytes()).await?;

    Ok(EncodeSummary { sha256, bytes: total })
}

fn file_part_header(boundary: &str, field_name: &str, file_name: &str) -> String {
    format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
        boundary,
        escape_param(field_name),
        escape_param(file_name),
    )
}

fn value_part(boundary: &str, name: &str, value: &str) -> String {
    format!(
        "\r\n--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
        boundary,
        escape_param(name),
        value,
    )
}

fn closing_boundary(boundary: &str) -> String {
    format!("\r\n--{}--\r\n", boundary)
}

/// Quote-escape a header parameter; CR and LF are percent-encoded so a
/// name can never end the header line.
fn escape_param(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            c => escaped.push(c),
        }
    }
    escaped
}
