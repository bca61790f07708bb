pub mod aggregation;
pub mod capture;
pub mod cli;
pub mod db;
pub mod models;
pub mod report;
pub mod session;
pub mod settings;
mod utils;

use anyhow::{Context, Result};

use cli::Cli;
use settings::{debug_mode, SettingsStore};

/// Entry point behind the `emotrack` binary.
pub fn run(cli: Cli) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if debug_mode() {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    log::info!("emotrack starting up...");

    let settings_store = SettingsStore::new(cli.config_path())?;
    if let Some(video) = cli.video.clone() {
        settings_store.update_video_path(video)?;
    }
    let settings = settings_store.settings();
    settings
        .aggregation
        .validate()
        .with_context(|| format!("invalid aggregation settings in {}", settings_store.path().display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(cli::execute(cli.command, settings))
}
