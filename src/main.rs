//! scanforge - resumable-upload document OCR pipeline.
//!
//! Accepts chunked document uploads, splits them into page images, runs a
//! vision-language model over each page, and exposes derived job/session
//! status over a small HTTP API.

mod cli;
mod config;
mod error;
mod job;
mod ocr;
mod server;
mod session;
mod storage;
mod upload;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else).
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "scanforge=info"
    } else {
        "scanforge=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
