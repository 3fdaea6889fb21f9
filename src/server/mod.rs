//! Upload server
//!
//! - `admission`: fixed pool of upload slots, rejects instead of queueing
//! - `ingest`: the `POST /upload` handler
//! - `digest`: per-file and aggregate SHA-256
//! - `diagnostics`: optional side listener exposing admission state

use std::future::Future;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    set_header::SetResponseHeaderLayer,
    timeout::{RequestBodyTimeoutLayer, ResponseBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;

pub mod admission;
pub mod diagnostics;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod state;

pub use admission::{AdmissionController, AdmissionSlot};
pub use error::ApiError;
pub use state::AppState;

/// Build the public router
pub fn router(state: AppState) -> Router {
    let config = state.config().clone();

    let mut app: Router<AppState> = Router::new()
        .route("/healthz", get(ingest::healthz).fallback(ingest::not_found))
        .route("/upload", post(ingest::upload).fallback(ingest::not_found))
        .fallback(ingest::not_found)
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(RequestBodyTimeoutLayer::new(config.read_timeout))
        .layer(ResponseBodyTimeoutLayer::new(config.write_timeout))
        .layer(TimeoutLayer::new(config.idle_timeout))
        .layer(middleware::map_response(timeout_envelope));

    match HeaderValue::from_str(&config.name) {
        Ok(name) => app = app.layer(SetResponseHeaderLayer::if_not_present(header::SERVER, name)),
        Err(_) => tracing::warn!(name = %config.name, "Server name is not a valid header value"),
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// `TimeoutLayer` answers with an empty 408; give it the usual envelope.
async fn timeout_envelope(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT
        && !response.headers().contains_key(header::CONTENT_TYPE)
    {
        return ApiError::RequestTimeout.into_response();
    }
    response
}

/// Run the server until `shutdown` resolves.
pub async fn serve<F>(config: ServerConfig, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState::new(config.clone());

    if config.diagnostics_enabled {
        diagnostics::spawn(&config.diagnostics_addr, state.clone()).await?;
    }

    let listener = TcpListener::bind(&config.addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        name = %config.name,
        stream_request_body = config.stream_request_body,
        max_request_body_size = config.max_request_body_size,
        max_concurrent_uploads = config.max_concurrent_uploads,
        "Upload server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use tower::ServiceExt;

    async fn call(method: Method, uri: &str) -> axum::response::Response {
        router(AppState::new(ServerConfig::default()))
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = call(Method::GET, "/healthz").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::SERVER], "hashpost-server");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_path_is_json_404() {
        let response = call(Method::GET, "/nope").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "error": "not found"}));
    }

    #[tokio::test]
    async fn test_wrong_method_is_404() {
        assert_eq!(call(Method::GET, "/upload").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(call(Method::POST, "/healthz").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_idle_timeout_is_json_408() {
        let state = AppState::new(ServerConfig {
            idle_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        });

        // Body that never finishes
        let (_tx, rx) = futures::channel::mpsc::channel::<Result<Vec<u8>, std::io::Error>>(1);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=stalled")
            .body(Body::from_stream(rx))
            .unwrap();

        let response = router(state.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "error": "request timed out"}));
        assert_eq!(state.admission().in_flight(), 0);
    }
}
