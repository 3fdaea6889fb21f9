//! Hashpost upload client
//!
//! Uploads every file named in `FILES` (or `FILE`) to `UPLOAD_CLIENT_URL`,
//! a bounded number at a time, stopping at the first failure.

use std::sync::Arc;

use anyhow::Context;

use hashpost::client::{BatchUploader, UploadClient, UploadContext};
use hashpost::config::ClientConfig;
use hashpost::telemetry;

#[tokio::main]
async fn main() {
    telemetry::init();

    if let Err(e) = run().await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("load client config")?;

    tracing::info!(
        url = %config.url,
        files = config.files.len(),
        chunk_size = config.chunk_size,
        max_concurrent = config.max_concurrent,
        "Starting Hashpost Client v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = UploadClient::new(reqwest::Client::new(), config.encoder_config())
        .context("build upload client")?;
    let batch = BatchUploader::new(Arc::new(client), config.url.clone(), config.max_concurrent);

    let (ctx, cancel) = UploadContext::background().with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, cancelling uploads...");
            cancel.cancel();
        }
    });

    batch.run(&ctx, &config.files).await.context("upload batch")?;
    Ok(())
}
