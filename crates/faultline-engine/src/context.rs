//! Shared per-run context handed to every engine component.

use std::sync::Arc;

use faultline_core::config::IterationSettings;
use faultline_core::NetworkState;

/// Everything a component needs to participate in one run.
///
/// Cloning is cheap; the network state is shared behind an `Arc` and
/// every clone observes the same connectivity, memos, and subsets.
#[derive(Clone)]
pub struct RunContext {
    /// Timestamp-derived identifier, also the artifact directory name.
    pub run_id: String,
    /// Shared network state for the campaign.
    pub network: Arc<NetworkState>,
    /// Iteration policy the controller runs under.
    pub settings: IterationSettings,
}

impl RunContext {
    pub fn new(run_id: String, network: Arc<NetworkState>, settings: IterationSettings) -> Self {
        Self {
            run_id,
            network,
            settings,
        }
    }
}
