//! Entry point: logging, terminal setup, and the upload queue TUI.
//!
//! Usage: `upload_tui [PATH...]`. Each path (file or folder) is queued on
//! start; more can be added from inside the UI.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

mod app;
mod config;
mod events;
mod input;
mod jobs;
mod layout;
mod queue;
mod shortcuts;
mod transfer;
mod ui;

/// File logging; the TUI owns stdout. Keep the guard alive until exit.
fn init_logging() -> Result<WorkerGuard> {
    let log_file = "upload_tui.log";
    let file_appender = tracing_appender::rolling::never(".", log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    tracing::info!("logging to {}", log_file);
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cfg = config::Config::load_or_default(Path::new("config.toml"))?;
    cfg.apply_env();
    cfg.validate()?;

    let _log_guard = if cfg.logging.enabled {
        Some(init_logging()?)
    } else {
        None
    };
    tracing::info!("app starting");

    let initial: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();

    let mut terminal = ui::init_terminal()?;
    let res = app::run_app(&mut terminal, cfg, initial).await;
    ui::restore_terminal()?;

    if let Err(ref e) = res {
        tracing::error!("app error: {e:#}");
    }
    tracing::info!("app exiting");
    res
}
