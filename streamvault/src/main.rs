use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use streamvault::fleet::FleetOrchestrator;
use streamvault::reporting::{self, StatusBroadcaster};
use streamvault::sync::SyncRunner;
use streamvault::{config, logging, panic_hook};

/// An automatic livestream archiver with time-chunked recording and remote
/// sync.
#[derive(Parser)]
#[command(name = "streamvault", version)]
struct Cli {
    /// Path to the config file.
    #[arg(long)]
    config_file: PathBuf,

    /// Path to the sources file.
    #[arg(long)]
    sources_file: PathBuf,

    /// Disable the periodic remote-sync pass.
    #[arg(long)]
    disable_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config_file)?;
    let _log_guard = logging::init(
        cfg.config.log_filter.as_deref(),
        cfg.config.log_dir.as_deref(),
    )?;
    panic_hook::install();

    info!("streamvault starting");
    debug!("general config: {:?}", cfg.config);
    debug!("sync config: {:?}", cfg.sync);

    let root = CancellationToken::new();

    let status = cfg.status.enabled.then(StatusBroadcaster::new);
    let log_consumer = match (&status, cfg.status.log_payloads) {
        (Some(broadcaster), true) => {
            Some(reporting::spawn_log_consumer(broadcaster, root.child_token()))
        }
        _ => None,
    };

    let fleet = FleetOrchestrator::new(
        cli.sources_file.clone(),
        cfg.config.clone(),
        status.clone(),
    );
    let fleet_task = tokio::spawn(fleet.run(root.child_token()));

    let sync_task = if cli.disable_sync {
        info!("Remote sync disabled");
        None
    } else {
        let runner = SyncRunner::new(cli.sources_file.clone(), cfg.config.clone(), cfg.sync.clone());
        Some(tokio::spawn(runner.run(root.child_token())))
    };

    shutdown_signal().await;
    info!("Shutdown signal received, stopping all sources...");
    root.cancel();

    let _ = fleet_task.await;
    if let Some(task) = sync_task {
        let _ = task.await;
    }
    if let Some(task) = log_consumer {
        let _ = task.await;
    }

    info!("All finished now, exiting. Bye!");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
