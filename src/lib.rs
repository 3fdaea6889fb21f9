//! Hashpost Library
//!
//! Streaming multipart uploads with SHA-256 verified end to end.
//!
//! # Modules
//!
//! - `client`: Streaming encoder, upload transport and batch orchestrator
//! - `server`: Admission control and the ingestion handler
//! - `config`: Environment-driven configuration for both binaries
//! - `format`: Human-readable sizes, throughput and durations
//! - `telemetry`: Tracing subscriber setup

pub mod client;
pub mod config;
pub mod format;
pub mod server;
pub mod telemetry;

/// Multipart field carrying the declared hex SHA-256 of each file.
pub const CHECKSUM_FIELD_SHA256: &str = "checksum_sha256";
