//! Batch Orchestrator
//!
//! Uploads a list of files with bounded parallelism:
//! - one task per file, gated by a semaphore sized to `max_concurrent`
//! - results stored by input index, independent of completion order
//! - the first failure is recorded and cancels every other unit

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::Semaphore;

use super::context::UploadContext;
use super::error::BatchError;
use super::transport::{FileUploader, UploadRequest, UploadResponse};
use crate::format;

/// JSON result rendered by the server, success or error
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UploadResultPayload {
    pub status: String,
    pub files: usize,
    pub size: String,
    pub duration: String,
    pub speed: String,
    pub sha256: String,
    pub error: String,
    pub expected_checksum: String,
    pub actual_checksum: String,
}

/// Fans a batch of files out over a bounded worker pool
#[derive(Clone)]
pub struct BatchUploader {
    uploader: Arc<dyn FileUploader>,
    url: String,
    max_concurrent: usize,
}

impl BatchUploader {
    pub fn new(uploader: Arc<dyn FileUploader>, url: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            uploader,
            url: url.into(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Upload every file; `result[i]` belongs to `files[i]`.
    ///
    /// Any single failure fails the whole batch and partial results are
    /// discarded.
    pub async fn upload_all(
        &self,
        ctx: &UploadContext,
        files: &[PathBuf],
    ) -> Result<Vec<UploadResponse>, BatchError> {
        let (ctx, cancel) = ctx.with_cancel();
        let cancel = Arc::new(cancel);
        let slots = Arc::new(Semaphore::new(self.max_concurrent));
        let first_err: Arc<Mutex<Option<BatchError>>> = Arc::new(Mutex::new(None));

        let handles: Vec<_> = files
            .iter()
            .cloned()
            .map(|path| {
                let ctx = ctx.clone();
                let cancel = cancel.clone();
                let slots = slots.clone();
                let first_err = first_err.clone();
                let uploader = self.uploader.clone();
                let url = self.url.clone();

                tokio::spawn(async move {
                    let _permit = tokio::select! {
                        biased;
                        _ = ctx.done() => return None,
                        permit = slots.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return None,
                        },
                    };

                    match uploader.upload(&ctx, UploadRequest::new(url, path.clone())).await {
                        Ok(response) => Some(response),
                        Err(source) => {
                            let mut slot = first_err.lock();
                            if slot.is_none() {
                                tracing::debug!(path = %path.display(), error = %source, "Upload failed, cancelling batch");
                                *slot = Some(BatchError::Upload { path, source });
                                cancel.cancel();
                            }
                            None
                        }
                    }
                })
            })
            .collect();

        let joined = join_all(handles).await;

        if let Some(err) = first_err.lock().take() {
            return Err(err);
        }

        joined
            .into_iter()
            .zip(files)
            .map(|(joined, path)| match joined {
                Ok(Some(response)) => Ok(response),
                Ok(None) => Err(BatchError::EmptyResponse(path.clone())),
                Err(e) => Err(BatchError::Internal {
                    path: path.clone(),
                    message: e.to_string(),
                }),
            })
            .collect()
    }

    /// Upload the batch and log one result line per file plus a summary.
    pub async fn run(&self, ctx: &UploadContext, files: &[PathBuf]) -> Result<Vec<UploadResponse>, BatchError> {
        let start = Instant::now();
        let responses = self.upload_all(ctx, files).await?;

        for (path, response) in files.iter().zip(&responses) {
            log_result(path, response);
        }

        tracing::info!(
            files = files.len(),
            total_duration = %format::duration(start.elapsed()),
            "upload batch complete"
        );

        Ok(responses)
    }
}

fn log_result(path: &Path, response: &UploadResponse) {
    let payload: UploadResultPayload = match serde_json::from_slice(&response.body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::info!(
                file = %path.display(),
                http_status = response.status_code,
                response_parse_error = %e,
                response_bytes = response.body.len(),
                "upload result"
            );
            return;
        }
    };

    tracing::info!(
        file = %path.display(),
        http_status = response.status_code,
        status = %payload.status,
        files = payload.files,
        size = %payload.size,
        duration = %payload.duration,
        speed = %payload.speed,
        sha256 = %payload.sha256,
        error = %payload.error,
        expected_checksum = %payload.expected_checksum,
        actual_checksum = %payload.actual_checksum,
        "upload result"
    );

    if !payload.sha256.is_empty() && !response.sha256.is_empty() && payload.sha256 != response.sha256 {
        tracing::warn!(
            file = %path.display(),
            local_sha256 = %response.sha256,
            remote_sha256 = %payload.sha256,
            "Server digest differs from the streamed digest"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::client::error::UploadError;

    /// Fake uploader that tracks concurrency and fails on chosen paths
    #[derive(Default)]
    struct MockUploader {
        delay: Duration,
        fail_on: HashSet<PathBuf>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
        cancelled: AtomicUsize,
    }

    impl MockUploader {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn failing(mut self, path: &str) -> Self {
            self.fail_on.insert(PathBuf::from(path));
            self
        }
    }

    #[async_trait]
    impl FileUploader for MockUploader {
        async fn upload(
            &self,
            ctx: &UploadContext,
            request: UploadRequest,
        ) -> Result<UploadResponse, UploadError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let result = if self.fail_on.contains(&request.file_path) {
                Err(UploadError::MissingUrl)
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => Ok(UploadResponse {
                        status_code: 201,
                        body: request.file_path.to_string_lossy().into_owned().into_bytes(),
                        sha256: String::new(),
                        bytes_sent: 0,
                    }),
                    err = ctx.done() => {
                        self.cancelled.fetch_add(1, Ordering::SeqCst);
                        Err(UploadError::Context(err))
                    }
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let mock = Arc::new(MockUploader::new(Duration::from_millis(5)));
        let batch = BatchUploader::new(mock, "http://upload.test/upload", 3);
        let files = paths(&["a.bin", "b.bin", "c.bin", "d.bin", "e.bin"]);

        let responses = batch.upload_all(&UploadContext::background(), &files).await.unwrap();

        assert_eq!(responses.len(), files.len());
        for (path, response) in files.iter().zip(&responses) {
            assert_eq!(Path::new(std::str::from_utf8(&response.body).unwrap()), path.as_path());
        }
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let mock = Arc::new(MockUploader::new(Duration::from_millis(20)));
        let batch = BatchUploader::new(mock.clone(), "http://upload.test/upload", 2);
        let files: Vec<PathBuf> = (0..8).map(|i| PathBuf::from(format!("{}.bin", i))).collect();

        batch.upload_all(&UploadContext::background(), &files).await.unwrap();

        assert_eq!(mock.started.load(Ordering::SeqCst), 8);
        assert!(mock.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(mock.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_failure_fails_batch() {
        let mock = Arc::new(MockUploader::new(Duration::from_secs(5)).failing("2.bin"));
        let batch = BatchUploader::new(mock.clone(), "http://upload.test/upload", 3);
        let files = paths(&["1.bin", "2.bin", "3.bin"]);

        let started = Instant::now();
        let err = batch
            .upload_all(&UploadContext::background(), &files)
            .await
            .unwrap_err();

        match err {
            BatchError::Upload { path, source } => {
                assert_eq!(path, PathBuf::from("2.bin"));
                assert!(matches!(source, UploadError::MissingUrl));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Siblings observed the cancellation instead of sleeping it out
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            mock.cancelled.load(Ordering::SeqCst),
            mock.started.load(Ordering::SeqCst) - 1
        );
    }

    #[tokio::test]
    async fn test_cancelled_units_do_not_start() {
        let mock = Arc::new(MockUploader::new(Duration::from_secs(5)).failing("0.bin"));
        let batch = BatchUploader::new(mock.clone(), "http://upload.test/upload", 1);
        let files: Vec<PathBuf> = (0..4).map(|i| PathBuf::from(format!("{}.bin", i))).collect();

        let err = batch
            .upload_all(&UploadContext::background(), &files)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("0.bin"));
        // The failing unit takes the only slot first; the rest see the
        // cancellation before their permit.
        assert_eq!(mock.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_batch() {
        let mock = Arc::new(MockUploader::new(Duration::from_secs(5)));
        let batch = BatchUploader::new(mock.clone(), "http://upload.test/upload", 2);
        let files = paths(&["a.bin", "b.bin", "c.bin"]);

        let (ctx, cancel) = UploadContext::background().with_cancel();
        let task = tokio::spawn(async move { batch.upload_all(&ctx, &files).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BatchError::Upload { source: UploadError::Context(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mock = Arc::new(MockUploader::new(Duration::ZERO));
        let batch = BatchUploader::new(mock, "http://upload.test/upload", 2);

        let responses = batch.upload_all(&UploadContext::background(), &[]).await.unwrap();
        assert!(responses.is_empty());
    }

    #[test]
    fn test_payload_decodes_partial_json() {
        let payload: UploadResultPayload =
            serde_json::from_slice(br#"{"status":"error","error":"checksum mismatch"}"#).unwrap();

        assert_eq!(payload.status, "error");
        assert_eq!(payload.error, "checksum mismatch");
        assert!(payload.sha256.is_empty());
    }
}
