//! Application state management

use std::sync::Arc;

use crate::config::ServerConfig;

use super::admission::AdmissionController;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    admission: AdmissionController,
}

impl AppState {
    /// Create the state; the admission pool is sized here, once.
    pub fn new(config: ServerConfig) -> Self {
        let admission = AdmissionController::new(config.max_concurrent_uploads);

        Self {
            inner: Arc::new(AppStateInner { config, admission }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get the admission controller
    pub fn admission(&self) -> &AdmissionController {
        &self.inner.admission
    }
}
