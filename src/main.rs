//! gphotobackup: mirror a Google Photos library onto the local filesystem.
//!
//! Items are paged from the Library API and downloaded by a small worker pool
//! into `YYYY/MM/DD` directories, with optional `favorites/` and
//! `albums/<title>/` mirrors that are reconciled against what is already on
//! disk. Reruns skip files that already exist.

#![warn(clippy::all)]

mod auth;
mod backup;
mod cli;
mod config;
mod gphotos;
mod print;
mod shutdown;
mod types;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use backup::transport::HttpTransport;
use backup::{Session, SessionConfig};
use cli::{Command, PrintCommand};
use gphotos::PhotosClient;

/// Load the stored credentials and build the authenticated HTTP stack.
async fn connect(config_dir: &Path) -> anyhow::Result<(HttpTransport, PhotosClient)> {
    let tokens = Arc::new(auth::TokenSource::load(config_dir).await?);
    let http = auth::http_client()?;
    let transport = HttpTransport::new(http.clone()).with_tokens(Arc::clone(&tokens));
    let photos = PhotosClient::new(http).with_tokens(tokens);
    Ok((transport, photos))
}

async fn run_backup(args: cli::BackupArgs, config_dir: &Path) -> anyhow::Result<()> {
    let config = config::BackupConfig::from_cli(args)?;
    let (transport, photos) = connect(config_dir).await?;

    tracing::info!(
        out = %config.out.display(),
        workers = config.workers,
        "Starting gphotobackup"
    );

    let shutdown = shutdown::install_signal_handler();
    let session_config = SessionConfig {
        workers: config.workers,
        verbose: config.verbose,
        ..SessionConfig::new(config.out.clone())
    };
    let session = Session::new(
        Arc::new(photos),
        Arc::new(transport),
        session_config,
        shutdown.clone(),
    );

    let mut failures = 0usize;
    let report = session.start(&config.search.to_request()).await;
    failures += usize::from(report.search_failed);

    if config.favorites && !shutdown.is_cancelled() {
        let report = session.start_favorites().await;
        failures += usize::from(report.search_failed);
    }

    if config.albums && !shutdown.is_cancelled() {
        let report = session.start_albums().await;
        failures += usize::from(report.list_failed);
        failures += report
            .searched
            .iter()
            .filter(|(_, r)| r.search_failed)
            .count();
    }

    let (added, completed) = session.counter_totals();
    tracing::debug!(added, completed, "Completion counter totals");

    if shutdown.is_cancelled() {
        tracing::info!("Backup interrupted; rerun to pick up where it stopped");
    } else if failures > 0 {
        tracing::warn!(failures, "Backup finished with incomplete searches");
    } else {
        tracing::info!("Backup finished");
    }
    Ok(())
}

async fn run_print(command: PrintCommand, config_dir: &Path) -> anyhow::Result<()> {
    let (_, photos) = connect(config_dir).await?;
    match command {
        PrintCommand::Albums { out } => {
            let out = out.as_deref().map(config::expand_tilde);
            print::print_albums(&photos, out.as_deref()).await
        }
        PrintCommand::Album { id } => print::print_album(&photos, &id).await,
        PrintCommand::Item { id } => print::print_item(&photos, &id).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config_dir = cli
        .config_dir
        .as_deref()
        .map(config::expand_tilde)
        .unwrap_or_else(auth::default_config_dir);
    tracing::debug!(config_dir = %config_dir.display(), "Using config directory");

    match cli.command {
        Command::Backup(args) => run_backup(args, &config_dir).await,
        Command::Print(command) => run_print(command, &config_dir).await,
    }
}
