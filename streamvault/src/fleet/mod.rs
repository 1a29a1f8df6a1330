//! Fleet orchestration.
//!
//! Keeps the set of running source supervisors in sync with the sources
//! file, which is reloaded every reconcile interval: start supervisors for
//! new sources, stop removed or disabled ones, and restart on config change
//! or supervisor death. One source's problems never stop the reconcile
//! loop from managing the others.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{self, GlobalConfig, SourceConfig};
use crate::reporting::StatusBroadcaster;
use crate::supervisor::SourceSupervisor;

/// How long a supervisor gets to shut down before its task is aborted.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// The fleet's record of one running supervisor.
struct SupervisorHandle {
    config: SourceConfig,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Reconciles running supervisors against the sources file.
pub struct FleetOrchestrator {
    sources_path: PathBuf,
    globals: GlobalConfig,
    status: Option<StatusBroadcaster>,
    running: HashMap<String, SupervisorHandle>,
    disabled: HashSet<String>,
    first_run: bool,
    no_sources_logged: bool,
    /// Total supervisors spawned over this orchestrator's lifetime.
    spawned_total: u64,
}

impl FleetOrchestrator {
    pub fn new(
        sources_path: PathBuf,
        globals: GlobalConfig,
        status: Option<StatusBroadcaster>,
    ) -> Self {
        Self {
            sources_path,
            globals,
            status,
            running: HashMap::new(),
            disabled: HashSet::new(),
            first_run: true,
            no_sources_logged: false,
            spawned_total: 0,
        }
    }

    /// Run reconcile passes until cancelled, then stop every supervisor.
    pub async fn run(mut self, cancel: CancellationToken) {
        let interval = self.globals.intervals.reconcile();
        loop {
            self.reconcile().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Stopping all supervisors");
        self.stop_all().await;
    }

    /// One reconciliation pass.
    async fn reconcile(&mut self) {
        let entries = match config::load_entries(&self.sources_path).await {
            Ok(entries) => entries,
            Err(e) => {
                // Keep the current fleet; a broken file edit should not take
                // recordings down.
                error!("Could not reload sources file: {e}");
                return;
            }
        };

        let mut desired: HashMap<String, SourceConfig> = HashMap::new();
        for (key, entry) in &entries {
            let config = SourceConfig::from_entry(key, entry, &self.globals);

            if !config.enabled {
                if self.disabled.insert(key.clone()) {
                    info!("{key} has been disabled.");
                }
                continue;
            }
            if self.disabled.remove(key) {
                info!("{key} has been enabled.");
            }
            desired.insert(key.clone(), config);
        }

        if self.first_run && !desired.is_empty() {
            info!("Adding {} sources", desired.len());
        }

        if desired.is_empty() && self.running.is_empty() {
            if !self.no_sources_logged {
                info!("No sources (or enabled sources) in the sources file - waiting for any to be added.");
                self.no_sources_logged = true;
            }
        } else {
            self.no_sources_logged = false;
        }

        // Stop supervisors whose source is gone or disabled.
        let removed: Vec<String> = self
            .running
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in removed {
            if self.disabled.contains(&key) {
                info!("{key} has been disabled, terminating.");
            } else {
                info!("{key} has been removed from the sources file, terminating.");
            }
            self.stop_supervisor(&key).await;
        }

        // Start, restart, or leave alone.
        for (key, config) in desired {
            match self.running.get(&key) {
                Some(handle) if handle.config == config => {
                    if !handle.task.is_finished() {
                        continue;
                    }
                    error!("Supervisor for {key} has died, restarting...");
                    self.stop_supervisor(&key).await;
                }
                Some(_) => {
                    info!("{key}'s config has changed, recreating supervisor.");
                    self.stop_supervisor(&key).await;
                }
                None => {
                    if !self.first_run {
                        info!("Adding new source: {}", config.name);
                    }
                }
            }
            self.start_supervisor(key, config);
        }

        self.first_run = false;
    }

    fn start_supervisor(&mut self, key: String, config: SourceConfig) {
        let cancel = CancellationToken::new();
        let supervisor = SourceSupervisor::new(
            config.clone(),
            self.globals.intervals.clone(),
            cancel.clone(),
            self.status.clone(),
        );

        let source = config.name.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = supervisor.run().await {
                error!(source = %source, "Supervisor terminated with error: {e}");
            }
        });

        self.spawned_total += 1;
        debug!(
            "Started supervisor for {key} ({} spawned since startup)",
            self.spawned_total
        );
        self.running.insert(
            key,
            SupervisorHandle {
                config,
                cancel,
                task,
            },
        );
    }

    async fn stop_supervisor(&mut self, key: &str) {
        let Some(mut handle) = self.running.remove(key) else {
            return;
        };
        handle.cancel.cancel();
        match tokio::time::timeout(STOP_TIMEOUT, &mut handle.task).await {
            Ok(_) => debug!("Supervisor for {key} stopped"),
            Err(_) => {
                warn!("Supervisor for {key} did not stop within {STOP_TIMEOUT:?}, aborting its task");
                handle.task.abort();
            }
        }
    }

    /// Stop every running supervisor, concurrently.
    pub async fn stop_all(&mut self) {
        let mut handles: Vec<(String, SupervisorHandle)> = self.running.drain().collect();
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (key, handle) in &mut handles {
            match tokio::time::timeout(STOP_TIMEOUT, &mut handle.task).await {
                Ok(_) => debug!("Supervisor for {key} stopped"),
                Err(_) => {
                    warn!("Supervisor for {key} did not stop within {STOP_TIMEOUT:?}, aborting its task");
                    handle.task.abort();
                }
            }
        }
    }
}
