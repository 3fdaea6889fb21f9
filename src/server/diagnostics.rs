//! Diagnostics listener
//!
//! Runs on its own address so it never competes with uploads for a slot.

use axum::{extract::State, http::StatusCode, response::Response, routing::get, Router};
use serde::Serialize;
use tokio::{net::TcpListener, task::JoinHandle};

use super::error::json_response;
use super::ingest;
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct AdmissionStats {
    pub enabled: bool,
    pub capacity: usize,
    pub in_flight: usize,
}

async fn admission_stats(State(state): State<AppState>) -> Response {
    let admission = state.admission();

    json_response(
        StatusCode::OK,
        &AdmissionStats {
            enabled: admission.is_enabled(),
            capacity: admission.capacity(),
            in_flight: admission.in_flight(),
        },
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/debug/admission", get(admission_stats))
        .route("/healthz", get(ingest::healthz))
        .fallback(ingest::not_found)
        .with_state(state)
}

/// Bind `addr` and serve diagnostics in the background.
pub async fn spawn(addr: &str, state: AppState) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Diagnostics listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(state)).await {
            tracing::error!("Diagnostics server failed: {}", e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    async fn stats(state: AppState) -> serde_json::Value {
        let response = router(state)
            .oneshot(Request::builder().uri("/debug/admission").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_reports_held_slots() {
        let state = AppState::new(ServerConfig {
            max_concurrent_uploads: 3,
            ..ServerConfig::default()
        });
        let _held = state.admission().try_acquire().unwrap();

        assert_eq!(
            stats(state).await,
            serde_json::json!({"enabled": true, "capacity": 3, "in_flight": 1})
        );
    }

    #[tokio::test]
    async fn test_spawned_listener_answers() {
        let state = AppState::new(ServerConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handle = spawn(&addr.to_string(), state).await.unwrap();
        let body = reqwest::get(format!("http://{}/healthz", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert_eq!(body, "ok");
        handle.abort();
    }
}
