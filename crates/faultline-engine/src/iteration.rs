//! Iteration lifecycle, consensus-progress tracking, and run outcomes.
//!
//! The controller is the single writer of iteration status. The bridge
//! feeds it handshakes and ledger-close reports; the runner awaits the
//! terminal status. Progress classification:
//!
//! - unanimity on the goal ledger across a quorum ends the iteration as
//!   `CorrectRun` (ledger-bounded kind),
//! - divergent hashes for the same sequence end it as `FailedAgreement`,
//! - the overall deadline without the goal is `FailedTermination`,
//! - no handshake before the startup deadline is `TimeoutBeforeStartup`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use faultline_core::config::{IterationKindSetting, IterationSettings};
use faultline_core::{NetworkState, NodeId};

/// Lifecycle status of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    /// Not started yet.
    Pending,
    /// In progress.
    Running,
    /// Reached the goal with unanimous ledger hashes.
    CorrectRun,
    /// Divergent ledger hashes for the same sequence.
    FailedAgreement,
    /// Deadline expired before the goal ledger closed.
    FailedTermination,
    /// No interceptor registered before the startup deadline.
    TimeoutBeforeStartup,
    /// Infrastructure failure, not a consensus verdict.
    Error,
}

impl IterationStatus {
    /// Whether the iteration is over.
    pub fn is_terminal(self) -> bool {
        !matches!(self, IterationStatus::Pending | IterationStatus::Running)
    }

    /// Stable label for summaries and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            IterationStatus::Pending => "pending",
            IterationStatus::Running => "running",
            IterationStatus::CorrectRun => "correct_run",
            IterationStatus::FailedAgreement => "failed_agreement",
            IterationStatus::FailedTermination => "failed_termination",
            IterationStatus::TimeoutBeforeStartup => "timeout_before_startup",
            IterationStatus::Error => "error",
        }
    }
}

/// Which bound ends an iteration.
#[derive(Debug, Clone, Copy)]
pub enum IterationKind {
    /// Ends once ledger `max_ledger_seq` closes unanimously on a quorum.
    Ledger {
        /// Goal ledger sequence.
        max_ledger_seq: u32,
    },
    /// Ends at the deadline; agreement is judged on whatever closed.
    Time,
}

/// Bounds the controller runs one iteration under.
#[derive(Debug, Clone)]
pub struct IterationConfig {
    /// Termination bound.
    pub kind: IterationKind,
    /// Iterations in the run.
    pub max_iterations: u32,
    /// Per-iteration deadline.
    pub timeout: Duration,
    /// Handshake deadline.
    pub startup_timeout: Duration,
}

impl From<&IterationSettings> for IterationConfig {
    fn from(settings: &IterationSettings) -> Self {
        let kind = match settings.kind {
            IterationKindSetting::Ledger => IterationKind::Ledger {
                max_ledger_seq: settings.max_ledger_seq,
            },
            IterationKindSetting::Time => IterationKind::Time,
        };
        Self {
            kind,
            max_iterations: settings.max_iterations,
            timeout: Duration::from_secs(settings.timeout_secs),
            startup_timeout: Duration::from_secs(settings.startup_timeout_secs),
        }
    }
}

struct IterationData {
    index: u32,
    status: IterationStatus,
    handshake: bool,
    /// Reported hashes per ledger sequence per node.
    closes: HashMap<u32, HashMap<NodeId, String>>,
}

/// Tracks one iteration at a time and classifies its outcome.
///
/// All transitions funnel through [`finish`](Self::finish): the first
/// terminal status wins, later signals for the same iteration are
/// ignored.
pub struct IterationController {
    config: IterationConfig,
    network: Arc<NetworkState>,
    data: Mutex<IterationData>,
    status_tx: watch::Sender<IterationStatus>,
}

impl IterationController {
    pub fn new(config: IterationConfig, network: Arc<NetworkState>) -> Self {
        let (status_tx, _) = watch::channel(IterationStatus::Pending);
        Self {
            config,
            network,
            data: Mutex::new(IterationData {
                index: 0,
                status: IterationStatus::Pending,
                handshake: false,
                closes: HashMap::new(),
            }),
            status_tx,
        }
    }

    /// Bounds this controller was built with.
    pub fn config(&self) -> &IterationConfig {
        &self.config
    }

    /// One-based index of the current iteration, zero before the first.
    pub fn iteration_index(&self) -> u32 {
        self.data.lock().index
    }

    /// Current status.
    pub fn status(&self) -> IterationStatus {
        self.data.lock().status
    }

    /// Start the next iteration: clear per-iteration network state and
    /// progress tracking, keep grouping configuration.
    pub fn begin_iteration(&self) -> u32 {
        self.network.reset_iteration();
        let index = {
            let mut data = self.data.lock();
            data.index += 1;
            data.status = IterationStatus::Running;
            data.handshake = false;
            data.closes.clear();
            data.index
        };
        self.status_tx.send_replace(IterationStatus::Running);
        tracing::info!(iteration = index, "iteration started");
        index
    }

    /// Note that an interceptor completed registration.
    pub fn mark_handshake(&self) {
        {
            let mut data = self.data.lock();
            if data.status != IterationStatus::Running {
                return;
            }
            data.handshake = true;
        }
        // Re-arms the startup guard in any pending await.
        self.status_tx.send_replace(IterationStatus::Running);
    }

    /// Record one node's ledger close and re-classify progress.
    pub fn observe_ledger_close(&self, node: NodeId, ledger_seq: u32, ledger_hash: &str) {
        let verdict = {
            let mut data = self.data.lock();
            if data.status != IterationStatus::Running {
                return;
            }
            // A close implies the network came up.
            data.handshake = true;
            let at_seq = data.closes.entry(ledger_seq).or_default();
            at_seq.insert(node, ledger_hash.to_string());
            tracing::debug!(node, ledger_seq, "ledger close observed");

            if at_seq.values().any(|hash| hash != ledger_hash) {
                Some(IterationStatus::FailedAgreement)
            } else if let IterationKind::Ledger { max_ledger_seq } = self.config.kind {
                (ledger_seq >= max_ledger_seq && at_seq.len() >= self.quorum())
                    .then_some(IterationStatus::CorrectRun)
            } else {
                None
            }
        };
        match verdict {
            Some(status) => {
                self.finish(status);
            }
            None => {
                self.status_tx.send_replace(IterationStatus::Running);
            }
        }
    }

    /// Force the iteration into `Error` (process crash, stream failure).
    pub fn force_error(&self) {
        self.finish(IterationStatus::Error);
    }

    /// Distinct reporters needed for a ledger verdict: more than two
    /// thirds of the topology.
    fn quorum(&self) -> usize {
        (2 * self.network.node_count()).div_ceil(3)
    }

    /// Move to a terminal status once; later signals lose.
    fn finish(&self, status: IterationStatus) -> bool {
        {
            let mut data = self.data.lock();
            if data.status.is_terminal() {
                return false;
            }
            data.status = status;
        }
        tracing::info!(status = status.as_str(), "iteration finished");
        self.status_tx.send_replace(status);
        true
    }

    /// Wait for the current iteration to reach a terminal status,
    /// enforcing the startup and overall deadlines.
    pub async fn await_outcome(&self) -> IterationStatus {
        let mut rx = self.status_tx.subscribe();
        let started = Instant::now();
        let startup_deadline = started + self.config.startup_timeout;
        let overall_deadline = started + self.config.timeout;
        loop {
            let current = *rx.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            let handshake = self.data.lock().handshake;
            tokio::select! {
                _ = sleep_until(startup_deadline), if !handshake => {
                    self.finish(IterationStatus::TimeoutBeforeStartup);
                }
                _ = sleep_until(overall_deadline), if handshake => {
                    let status = match self.config.kind {
                        IterationKind::Ledger { .. } => IterationStatus::FailedTermination,
                        // Divergence would have ended the iteration already.
                        IterationKind::Time => IterationStatus::CorrectRun,
                    };
                    self.finish(status);
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return *rx.borrow();
                    }
                }
            }
        }
    }
}

/// Outcome of one iteration, as persisted in the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationOutcome {
    /// One-based iteration index.
    pub index: u32,
    /// Terminal status.
    pub status: IterationStatus,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Accumulated outcomes of a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Per-iteration outcomes in order.
    pub iterations: Vec<IterationOutcome>,
}

impl RunSummary {
    /// Append one iteration's outcome.
    pub fn record(&mut self, index: u32, status: IterationStatus, duration: Duration) {
        self.iterations.push(IterationOutcome {
            index,
            status,
            duration_ms: duration.as_millis() as u64,
        });
    }

    /// Outcome counts keyed by status label.
    pub fn counts(&self) -> BTreeMap<&'static str, u32> {
        let mut counts = BTreeMap::new();
        for outcome in &self.iterations {
            *counts.entry(outcome.status.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// A run is healthy when no iteration surfaced a consensus violation
    /// or an infrastructure error.
    pub fn healthy(&self) -> bool {
        self.iterations.iter().all(|outcome| {
            matches!(
                outcome.status,
                IterationStatus::CorrectRun | IterationStatus::TimeoutBeforeStartup
            )
        })
    }
}
