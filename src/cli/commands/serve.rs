//! `serve` subcommand: loads configuration and runs the Dispatch API.

use crate::config::Config;

pub async fn cmd_serve(bind_override: Option<String>) -> anyhow::Result<()> {
    let config = Config::load(bind_override).await?;
    tracing::info!(mode = ?config.mode, data_dir = %config.data_dir.display(), "starting scanforge");
    crate::server::serve(config).await
}
