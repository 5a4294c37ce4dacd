//! Run orchestration: server lifecycle, iteration loop, artifacts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use faultline_core::config::NetworkConfig;
use faultline_core::{HarnessError, NetworkState, StrategyError};

use crate::artifacts::{ActionLog, ArtifactStore};
use crate::bridge::InterceptService;
use crate::context::RunContext;
use crate::iteration::{IterationConfig, IterationController, IterationStatus, RunSummary};
use crate::process::ProcessManager;
use crate::strategy::{Strategy, StrategyEngine};

/// Why a run was told to stop.
#[derive(Debug, Clone)]
pub enum AbortReason {
    /// A strategy failed; the run is unsound past this point.
    Strategy(String),
    /// All iterations completed.
    Finished,
}

/// One-shot stop signal shared by the bridge, the server, and the loop.
/// The first trigger wins; later reasons are ignored.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<Option<AbortReason>>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record the reason if none is set yet.
    pub fn trigger(&self, reason: AbortReason) {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Watch for the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<Option<AbortReason>> {
        self.tx.subscribe()
    }

    /// The recorded reason, if any.
    pub fn current(&self) -> Option<AbortReason> {
        self.tx.borrow().clone()
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a run needs beyond the strategy itself.
pub struct RunConfig {
    /// Address the interception endpoint listens on.
    pub listen: SocketAddr,
    /// Validated network configuration.
    pub network: NetworkConfig,
    /// Root directory for run artifacts.
    pub artifact_dir: PathBuf,
    /// Whether to launch the configured node-network process per
    /// iteration, or expect an externally managed network.
    pub spawn_process: bool,
}

/// Execute a full campaign: serve the interception endpoint, drive the
/// configured number of iterations, persist the summary.
///
/// Strategy failures end the run early with an error; process failures
/// cost only the active iteration.
pub async fn run(config: RunConfig, strategy: Arc<dyn Strategy>) -> Result<RunSummary, HarnessError> {
    let run_id = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let network = Arc::new(NetworkState::new(
        config.network.build_nodes(),
        config.network.partition.clone(),
    )?);
    let context = RunContext::new(
        run_id.clone(),
        network.clone(),
        config.network.iteration.clone(),
    );
    let controller = Arc::new(IterationController::new(
        IterationConfig::from(&config.network.iteration),
        network.clone(),
    ));
    let engine = Arc::new(StrategyEngine::new(context, strategy));
    let artifacts = ArtifactStore::new(&config.artifact_dir, &run_id)?;
    let log = Arc::new(ActionLog::disabled());
    let abort = AbortHandle::new();

    let service = InterceptService::new(
        engine.clone(),
        controller.clone(),
        log.clone(),
        abort.clone(),
    );
    let mut shutdown_rx = abort.subscribe();
    let listen = config.listen;
    let server = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.wait_for(Option::is_some).await;
        };
        tonic::transport::Server::builder()
            .add_service(service.into_server())
            .serve_with_shutdown(listen, shutdown)
            .await
    });
    tracing::info!(
        %listen,
        run_id = %run_id,
        strategy = engine.strategy_name(),
        "interception endpoint up"
    );

    let max_iterations = controller.config().max_iterations;
    let mut summary = RunSummary::default();
    for _ in 0..max_iterations {
        let index = controller.begin_iteration();
        let started = Instant::now();
        if let Err(err) = log.roll(&artifacts.action_log_path(index)) {
            tracing::warn!(%err, "action log unavailable for this iteration");
        }

        let manager = if config.spawn_process {
            match ProcessManager::spawn(
                config.network.process.clone(),
                &config.network.topology_spec(),
            )
            .await
            {
                Ok(manager) => Some(manager),
                Err(err) => {
                    tracing::error!(%err, "network process failed to start");
                    controller.force_error();
                    summary.record(index, IterationStatus::Error, started.elapsed());
                    continue;
                }
            }
        } else {
            None
        };

        let status = match &manager {
            Some(manager) => {
                tokio::select! {
                    status = controller.await_outcome() => status,
                    crash = manager.watch_exit() => {
                        tracing::error!(%crash, "network process died mid-iteration");
                        controller.force_error();
                        controller.await_outcome().await
                    }
                }
            }
            None => controller.await_outcome().await,
        };
        summary.record(index, status, started.elapsed());
        log.flush();

        if let Some(manager) = manager {
            if let Err(err) = manager.shutdown().await {
                tracing::warn!(%err, "network process shutdown failed");
            }
        }
        if matches!(abort.current(), Some(AbortReason::Strategy(_))) {
            break;
        }
    }

    abort.trigger(AbortReason::Finished);
    let served = server
        .await
        .map_err(|err| HarnessError::Transport(err.to_string()))?;
    if let Err(err) = served {
        return Err(HarnessError::Transport(err.to_string()));
    }

    let path = artifacts.write_summary(&run_id, engine.strategy_name(), &summary, engine.stats())?;
    tracing::info!(
        summary = %path.display(),
        healthy = summary.healthy(),
        "run complete"
    );

    match abort.current() {
        Some(AbortReason::Strategy(message)) => Err(StrategyError::Fatal(message).into()),
        _ => Ok(summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use faultline_core::config::{IterationKindSetting, IterationSettings, ProcessConfig};

    use crate::strategy::Passthrough;

    fn quick_config(artifact_dir: PathBuf, iterations: u32) -> RunConfig {
        RunConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            network: NetworkConfig {
                node_count: 3,
                base_peer_port: 60000,
                base_rpc_port: 61000,
                partition: None,
                unl: None,
                process: ProcessConfig::default(),
                iteration: IterationSettings {
                    kind: IterationKindSetting::Ledger,
                    max_iterations: iterations,
                    max_ledger_seq: 5,
                    timeout_secs: 2,
                    startup_timeout_secs: 0,
                },
            },
            artifact_dir,
            spawn_process: false,
        }
    }

    #[tokio::test]
    async fn run_without_interceptors_records_startup_timeouts() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(quick_config(dir.path().to_path_buf(), 2), Arc::new(Passthrough::new()))
            .await
            .unwrap();

        assert_eq!(summary.iterations.len(), 2);
        assert!(summary
            .iterations
            .iter()
            .all(|outcome| outcome.status == IterationStatus::TimeoutBeforeStartup));
        assert!(summary.healthy());

        // One run directory containing summary.json and the action logs.
        let run_dirs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(run_dirs.len(), 1);
        let run_dir = run_dirs[0].as_ref().unwrap().path();
        assert!(run_dir.join("summary.json").exists());
        assert!(run_dir.join("iteration-001.jsonl").exists());
    }

    #[test]
    fn abort_keeps_the_first_reason() {
        let abort = AbortHandle::new();
        abort.trigger(AbortReason::Strategy("boom".to_string()));
        abort.trigger(AbortReason::Finished);
        assert!(matches!(abort.current(), Some(AbortReason::Strategy(_))));
    }
}
