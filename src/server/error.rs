//! Error types for the upload server
//!
//! Every failure is turned into a JSON envelope where it is detected; nothing
//! here ever takes the process down.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const INTERNAL_ERROR_BODY: &str = r#"{"status":"error","error":"internal server error"}"#;

/// API failures, in the order an upload request can hit them
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("too many concurrent uploads")]
    TooManyUploads,

    #[error("read multipart form: {0}")]
    MalformedForm(String),

    #[error("multipart field {0:?} is required")]
    MissingFiles(String),

    #[error("checksum count mismatch: got {got} for {files} file(s)")]
    ChecksumCount { got: usize, files: usize },

    #[error("read uploaded file {filename:?}: {message}")]
    ReadFile { filename: String, message: String },

    #[error("checksum mismatch")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("not found")]
    NotFound,

    #[error("request timed out")]
    RequestTimeout,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TooManyUploads => StatusCode::SERVICE_UNAVAILABLE,
            Self::MalformedForm(_) => StatusCode::BAD_REQUEST,
            Self::MissingFiles(_) => StatusCode::BAD_REQUEST,
            Self::ChecksumCount { .. } => StatusCode::BAD_REQUEST,
            Self::ReadFile { .. } => StatusCode::BAD_REQUEST,
            Self::ChecksumMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_checksum: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = self.to_string();

        let envelope = match self {
            ApiError::ChecksumMismatch {
                filename,
                expected,
                actual,
            } => {
                tracing::warn!(
                    filename = %filename,
                    expected_checksum = %expected,
                    actual_checksum = %actual,
                    "Checksum mismatch"
                );
                ErrorEnvelope {
                    status: "error",
                    error,
                    expected_checksum: Some(expected),
                    actual_checksum: Some(actual),
                }
            }
            _ => {
                tracing::debug!(status = status.as_u16(), error = %error, "Upload rejected");
                ErrorEnvelope {
                    status: "error",
                    error,
                    expected_checksum: None,
                    actual_checksum: None,
                }
            }
        };

        json_response(status, &envelope)
    }
}

/// Serialize `payload` as the response body; a serialization failure becomes
/// a fixed 500 envelope.
pub fn json_response<T: Serialize>(status: StatusCode, payload: &T) -> Response {
    let (status, body) = match serde_json::to_vec(payload) {
        Ok(body) => (status, body),
        Err(e) => {
            tracing::error!("Failed to serialize response: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY.as_bytes().to_vec())
        }
    };

    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        body,
    )
        .into_response()
}
