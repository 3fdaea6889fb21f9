//! Configuration management for the Hashpost binaries
//!
//! Both configs are read from the environment once at startup. An optional
//! `.env.server` / `.env.client` file is loaded first with `dotenvy`.
//! Invalid configuration is a launch failure, never a request-time one.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::client::EncoderConfig;

pub const SERVER_ENV_FILE: &str = ".env.server";
pub const CLIENT_ENV_FILE: &str = ".env.client";

const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_SERVER_NAME: &str = "hashpost-server";
const DEFAULT_FILE_FIELD: &str = "file";
const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024 * 1024;
const DEFAULT_DIAGNOSTICS_ADDR: &str = "127.0.0.1:6060";
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

const DEFAULT_CLIENT_URL: &str = "http://localhost:8080/upload";
const DEFAULT_CHUNK_SIZE: usize = 256;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration errors, all fatal at launch
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {scope} config: {field} is required")]
    Missing { scope: &'static str, field: &'static str },

    #[error("invalid {scope} config: {field} must be positive")]
    NotPositive { scope: &'static str, field: &'static str },

    #[error("invalid {scope} config: {key}={value:?} is not a valid {kind}")]
    Unparsable {
        scope: &'static str,
        key: &'static str,
        value: String,
        kind: &'static str,
    },

    #[error("invalid server config: diagnostics_addr is required when diagnostics are enabled")]
    DiagnosticsAddrMissing,
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub name: String,
    /// Hand the body to the multipart parser as it arrives instead of buffering it first
    pub stream_request_body: bool,
    pub max_request_body_size: usize,
    pub file_field: String,
    pub diagnostics_enabled: bool,
    pub diagnostics_addr: String,
    /// Longest gap allowed between two request body frames
    pub read_timeout: Duration,
    /// Longest gap allowed between two response body frames
    pub write_timeout: Duration,
    /// Upper bound on handling a single request
    pub idle_timeout: Duration,
    pub max_concurrent_uploads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: DEFAULT_SERVER_ADDR.to_string(),
            name: DEFAULT_SERVER_NAME.to_string(),
            stream_request_body: true,
            max_request_body_size: DEFAULT_MAX_REQUEST_BODY_SIZE,
            file_field: DEFAULT_FILE_FIELD.to_string(),
            diagnostics_enabled: false,
            diagnostics_addr: DEFAULT_DIAGNOSTICS_ADDR.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
        }
    }
}

impl ServerConfig {
    /// Load from `.env.server` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::from_filename(SERVER_ENV_FILE).ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, then validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup { scope: "server", lookup };
        let defaults = ServerConfig::default();

        let config = ServerConfig {
            addr: env.string("UPLOAD_SERVER_ADDR").unwrap_or(defaults.addr),
            name: env.string("UPLOAD_SERVER_NAME").unwrap_or(defaults.name),
            stream_request_body: env
                .parsed("UPLOAD_SERVER_STREAM_REQUEST_BODY", "boolean")?
                .unwrap_or(defaults.stream_request_body),
            max_request_body_size: env
                .parsed("UPLOAD_SERVER_MAX_REQUEST_BODY_SIZE", "integer")?
                .unwrap_or(defaults.max_request_body_size),
            file_field: env.string("UPLOAD_SERVER_FILE_FIELD").unwrap_or(defaults.file_field),
            diagnostics_enabled: env
                .parsed("UPLOAD_SERVER_DIAGNOSTICS_ENABLED", "boolean")?
                .unwrap_or(defaults.diagnostics_enabled),
            diagnostics_addr: env
                .string("UPLOAD_SERVER_DIAGNOSTICS_ADDR")
                .unwrap_or(defaults.diagnostics_addr),
            read_timeout: env
                .duration("UPLOAD_SERVER_READ_TIMEOUT")?
                .unwrap_or(defaults.read_timeout),
            write_timeout: env
                .duration("UPLOAD_SERVER_WRITE_TIMEOUT")?
                .unwrap_or(defaults.write_timeout),
            idle_timeout: env
                .duration("UPLOAD_SERVER_IDLE_TIMEOUT")?
                .unwrap_or(defaults.idle_timeout),
            max_concurrent_uploads: env
                .parsed("UPLOAD_SERVER_MAX_CONCURRENT_UPLOADS", "integer")?
                .unwrap_or(defaults.max_concurrent_uploads),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        const SCOPE: &str = "server";

        require_non_empty(SCOPE, "addr", &self.addr)?;
        require_non_empty(SCOPE, "name", &self.name)?;
        require_non_empty(SCOPE, "file_field", &self.file_field)?;
        require_positive(SCOPE, "max_request_body_size", self.max_request_body_size)?;
        if self.diagnostics_enabled && self.diagnostics_addr.trim().is_empty() {
            return Err(ConfigError::DiagnosticsAddrMissing);
        }
        require_positive_duration(SCOPE, "read_timeout", self.read_timeout)?;
        require_positive_duration(SCOPE, "write_timeout", self.write_timeout)?;
        require_positive_duration(SCOPE, "idle_timeout", self.idle_timeout)?;
        require_positive(SCOPE, "max_concurrent_uploads", self.max_concurrent_uploads)?;
        Ok(())
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub files: Vec<PathBuf>,
    /// Bytes moved per read/write step of the encoder
    pub chunk_size: usize,
    pub field_name: String,
    pub request_timeout: Duration,
    pub max_concurrent: usize,
}

impl ClientConfig {
    /// Load from `.env.client` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::from_filename(CLIENT_ENV_FILE).ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, then validate.
    ///
    /// `UPLOAD_CLIENT_FILES` takes a comma-separated list; when it yields
    /// nothing, the single `UPLOAD_CLIENT_FILE` is used instead.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup { scope: "client", lookup };

        let mut files = env
            .string("UPLOAD_CLIENT_FILES")
            .map(|raw| parse_csv(&raw))
            .unwrap_or_default();
        if files.is_empty() {
            if let Some(file) = env.string("UPLOAD_CLIENT_FILE") {
                let file = file.trim();
                if !file.is_empty() {
                    files.push(file.to_string());
                }
            }
        }

        let config = ClientConfig {
            url: env
                .string("UPLOAD_CLIENT_URL")
                .unwrap_or_else(|| DEFAULT_CLIENT_URL.to_string()),
            files: files.into_iter().map(PathBuf::from).collect(),
            chunk_size: env
                .parsed("UPLOAD_CLIENT_CHUNK_SIZE", "integer")?
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            field_name: env
                .string("UPLOAD_CLIENT_FIELD")
                .unwrap_or_else(|| DEFAULT_FILE_FIELD.to_string()),
            request_timeout: env
                .duration("UPLOAD_CLIENT_REQUEST_TIMEOUT")?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_concurrent: env
                .parsed("UPLOAD_CLIENT_MAX_CONCURRENT_UPLOADS", "integer")?
                .unwrap_or(DEFAULT_MAX_CONCURRENT_UPLOADS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        const SCOPE: &str = "client";

        if self.files.is_empty() {
            return Err(ConfigError::Missing { scope: SCOPE, field: "files" });
        }
        require_non_empty(SCOPE, "url", &self.url)?;
        require_positive(SCOPE, "chunk_size", self.chunk_size)?;
        require_non_empty(SCOPE, "field", &self.field_name)?;
        require_positive_duration(SCOPE, "request_timeout", self.request_timeout)?;
        require_positive(SCOPE, "max_concurrent_uploads", self.max_concurrent)?;
        Ok(())
    }

    /// Encoder settings shared by every upload of this process.
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            chunk_size: self.chunk_size,
            field_name: self.field_name.clone(),
            request_timeout: Some(self.request_timeout),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Lookup<F> {
    scope: &'static str,
    lookup: F,
}

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parsed<T: FromStr>(&self, key: &'static str, kind: &'static str) -> Result<Option<T>, ConfigError> {
        match (self.lookup)(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Unparsable {
                scope: self.scope,
                key,
                value: raw,
                kind,
            }),
        }
    }

    fn duration(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        match (self.lookup)(key) {
            None => Ok(None),
            Some(raw) => humantime::parse_duration(raw.trim())
                .map(Some)
                .map_err(|_| ConfigError::Unparsable {
                    scope: self.scope,
                    key,
                    value: raw,
                    kind: "duration",
                }),
        }
    }
}

fn require_non_empty(scope: &'static str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing { scope, field });
    }
    Ok(())
}

fn require_positive(scope: &'static str, field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive { scope, field });
    }
    Ok(())
}

fn require_positive_duration(
    scope: &'static str,
    field: &'static str,
    value: Duration,
) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::NotPositive { scope, field });
    }
    Ok(())
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
