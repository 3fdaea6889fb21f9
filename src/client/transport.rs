//! Upload Transport
//!
//! Sends one streaming-encoded request per file. The encoder task fills the
//! body channel while reqwest pulls from it, so the body is never
//! materialized. Transport and encoder fail independently; when both could
//! explain a failure, the transport error is reported with the encoder error
//! attached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::oneshot;

use super::context::UploadContext;
use super::encoder::{self, EncodeSummary, EncoderConfig, UploadFile};
use super::error::{EncodeError, TransportError, UploadError};

/// One file to upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url: String,
    pub file_path: PathBuf,
    /// Overrides the base name of `file_path` in the multipart part
    pub file_name: Option<String>,
}

impl UploadRequest {
    pub fn new(url: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            file_path: file_path.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Server answer, copied out of the connection
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
    /// Digest of the bytes the encoder streamed
    pub sha256: String,
    pub bytes_sent: u64,
}

/// Anything that can upload one file; the batch orchestrator runs on top of this
#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload(
        &self,
        ctx: &UploadContext,
        request: UploadRequest,
    ) -> Result<UploadResponse, UploadError>;
}

/// HTTP uploader backed by reqwest
#[derive(Clone)]
pub struct UploadClient {
    http: reqwest::Client,
    config: Arc<EncoderConfig>,
}

impl UploadClient {
    pub fn new(http: reqwest::Client, config: EncoderConfig) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Upload one file.
    ///
    /// Deadline: the context's if set, else the configured request timeout,
    /// else none.
    pub async fn upload_file(
        &self,
        ctx: &UploadContext,
        request: UploadRequest,
    ) -> Result<UploadResponse, UploadError> {
        let (url, file) = validate_upload_request(request).await?;

        if let Some(err) = ctx.err() {
            return Err(UploadError::Context(err));
        }

        let path = file.path.clone();
        let encoded = encoder::spawn(file, self.config.clone());
        let mut outcome = encoded.outcome;

        let mut builder = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, encoded.content_type)
            .body(reqwest::Body::wrap_stream(encoded.chunks));
        if ctx.deadline().is_none() {
            if let Some(timeout) = self.config.request_timeout {
                builder = builder.timeout(timeout);
            }
        }

        let exchange = async {
            let response = builder.send().await?;
            let status_code = response.status().as_u16();
            let body = response.bytes().await?.to_vec();
            Ok::<_, reqwest::Error>((status_code, body))
        };

        let result: Result<(u16, Vec<u8>), TransportError> = tokio::select! {
            result = exchange => result.map_err(TransportError::from),
            err = ctx.done() => Err(TransportError::from(err)),
        };

        let (status_code, body) = match result {
            Ok(answer) => answer,
            Err(source) => return Err(reconcile_failure(ctx, source, &mut outcome)),
        };

        let summary = match finish_encoder(outcome, path).await {
            Ok(summary) => summary,
            Err(EncodeError::BodyClosed(path)) => {
                // The server answered before draining the body (e.g. 503).
                tracing::debug!(
                    path = %path.display(),
                    status = status_code,
                    "Server responded before consuming the full body"
                );
                EncodeSummary {
                    sha256: String::new(),
                    bytes: 0,
                }
            }
            Err(e) => return Err(UploadError::Stream(e)),
        };

        Ok(UploadResponse {
            status_code,
            body,
            sha256: summary.sha256,
            bytes_sent: summary.bytes,
        })
    }
}

#[async_trait]
impl FileUploader for UploadClient {
    async fn upload(
        &self,
        ctx: &UploadContext,
        request: UploadRequest,
    ) -> Result<UploadResponse, UploadError> {
        self.upload_file(ctx, request).await
    }
}

/// Pick the most precise cause for a failed request.
///
/// A closed body is a consequence of the transport giving up, not a cause,
/// so it is not attached.
fn reconcile_failure(
    ctx: &UploadContext,
    source: TransportError,
    outcome: &mut oneshot::Receiver<Result<EncodeSummary, EncodeError>>,
) -> UploadError {
    match outcome.try_recv() {
        Ok(Err(EncodeError::BodyClosed(_))) | Ok(Ok(_)) | Err(_) => {}
        Ok(Err(stream)) => return UploadError::SendWithStream { source, stream },
    }
    if let Some(err) = ctx.err() {
        return UploadError::Context(err);
    }
    UploadError::Send(source)
}

async fn finish_encoder(
    outcome: oneshot::Receiver<Result<EncodeSummary, EncodeError>>,
    path: PathBuf,
) -> Result<EncodeSummary, EncodeError> {
    match outcome.await {
        Ok(result) => result,
        Err(_) => Err(EncodeError::Aborted(path)),
    }
}

async fn validate_upload_request(request: UploadRequest) -> Result<(String, UploadFile), UploadError> {
    if request.url.is_empty() {
        return Err(UploadError::MissingUrl);
    }
    if request.file_path.as_os_str().is_empty() {
        return Err(UploadError::MissingPath);
    }

    let metadata = tokio::fs::metadata(&request.file_path)
        .await
        .map_err(|source| UploadError::Stat {
            path: request.file_path.clone(),
            source,
        })?;
    if metadata.is_dir() {
        return Err(UploadError::IsDirectory(request.file_path));
    }

    let name = request
        .file_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| base_name(&request.file_path));

    Ok((
        request.url,
        UploadFile {
            path: request.file_path,
            name,
        },
    ))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
