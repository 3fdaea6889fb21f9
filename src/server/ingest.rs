//! Upload ingestion
//!
//! `POST /upload` takes one or more file parts plus optional
//! `checksum_sha256` values, hashes each file as it streams in and compares
//! the result against whatever the client declared.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::config::ServerConfig;
use crate::format;
use crate::CHECKSUM_FIELD_SHA256;

use super::digest::{request_checksum, total_bytes, FileDigest, FileHasher};
use super::error::{json_response, ApiError};
use super::state::AppState;

/// Success response body
#[derive(Debug, Serialize)]
pub struct UploadSuccess {
    pub status: &'static str,
    pub files: usize,
    pub size: String,
    pub duration: String,
    pub speed: String,
    pub sha256: String,
}

/// Everything pulled out of one multipart form
#[derive(Debug, Default)]
struct ParsedForm {
    files: Vec<FileDigest>,
    declared: Vec<String>,
}

/// `POST /upload`
pub async fn upload(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();

    match ingest(&state, request, start).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}

/// Fallback for unknown paths and methods
pub async fn not_found() -> Response {
    ApiError::NotFound.into_response()
}

async fn ingest(state: &AppState, request: Request, start: Instant) -> Result<Response, ApiError> {
    // Held until the response is built
    let Some(_slot) = state.admission().try_acquire() else {
        tracing::warn!(
            capacity = state.admission().capacity(),
            "Upload rejected, admission pool is full"
        );
        return Err(ApiError::TooManyUploads);
    };

    let config = state.config();
    let mut multipart = open_form(request, config).await?;
    let form = read_form(&mut multipart, &config.file_field).await?;

    if form.files.is_empty() {
        return Err(ApiError::MissingFiles(config.file_field.clone()));
    }

    let expected = declared_checksums(form.declared, form.files.len())?;
    verify(&form.files, &expected)?;

    let sha256 = request_checksum(&form.files).unwrap_or_default();
    let total = total_bytes(&form.files);
    let elapsed = start.elapsed();
    let throughput = if elapsed.is_zero() {
        0.0
    } else {
        total as f64 / elapsed.as_secs_f64()
    };

    tracing::info!(
        files = form.files.len(),
        size = %format::bytes(total),
        duration = %format::duration(elapsed),
        speed = %format::bytes_per_second(throughput),
        sha256 = %sha256,
        "upload complete"
    );

    Ok(json_response(
        StatusCode::CREATED,
        &UploadSuccess {
            status: "ok",
            files: form.files.len(),
            size: format::bytes(total),
            duration: format::duration(elapsed),
            speed: format::bytes_per_second(throughput),
            sha256,
        },
    ))
}

/// Build the multipart reader, buffering the whole body first when
/// streaming is turned off.
async fn open_form(request: Request, config: &ServerConfig) -> Result<Multipart, ApiError> {
    let request = if config.stream_request_body {
        request
    } else {
        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, config.max_request_body_size)
            .await
            .map_err(|e| ApiError::MalformedForm(format!("read request body: {}", e)))?;
        Request::from_parts(parts, Body::from(bytes))
    };

    Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::MalformedForm(e.body_text()))
}

async fn read_form(multipart: &mut Multipart, file_field: &str) -> Result<ParsedForm, ApiError> {
    let mut form = ParsedForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::MalformedForm(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        let filename = field.file_name().map(|s| s.to_string());

        match filename {
            Some(filename) if name == file_field => {
                let mut hasher = FileHasher::new();
                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => hasher.update(&chunk),
                        Ok(None) => break,
                        Err(e) => {
                            return Err(ApiError::ReadFile {
                                filename,
                                message: e.to_string(),
                            })
                        }
                    }
                }

                let digest = hasher.finish(filename);
                tracing::debug!(filename = %digest.filename, bytes = digest.bytes, "Hashed file part");
                form.files.push(digest);
            }
            None if name == CHECKSUM_FIELD_SHA256 => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::MalformedForm(e.to_string()))?;
                form.declared.push(value);
            }
            _ => {
                tracing::debug!(field = %name, "Ignoring multipart field");
            }
        }
    }

    Ok(form)
}

/// Trim the declared checksums and drop blanks. An empty result means
/// nothing was declared; otherwise there must be one per file.
fn declared_checksums(declared: Vec<String>, files: usize) -> Result<Vec<String>, ApiError> {
    let expected: Vec<String> = declared
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();

    if !expected.is_empty() && expected.len() != files {
        return Err(ApiError::ChecksumCount {
            got: expected.len(),
            files,
        });
    }

    Ok(expected)
}

/// Compare digests by position, byte for byte.
fn verify(files: &[FileDigest], expected: &[String]) -> Result<(), ApiError> {
    for (file, expected) in files.iter().zip(expected) {
        if &file.sha256 != expected {
            return Err(ApiError::ChecksumMismatch {
                filename: file.filename.clone(),
                expected: expected.clone(),
                actual: file.sha256.clone(),
            });
        }
    }
    Ok(())
}
