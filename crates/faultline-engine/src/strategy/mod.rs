//! Decision policies and the pipeline that wraps them.
//!
//! Every captured message flows through [`StrategyEngine::process`]:
//! partition gate first, then the identical-message shortcut, then the
//! broadcast-grouping shortcut, and only when all three decline does the
//! installed [`Strategy`] get invoked. The shortcuts guarantee that
//! repeated and broadcast payloads receive consistent verdicts without
//! re-rolling whatever randomness the strategy carries.

mod mutator;
mod passthrough;
mod random_fuzzer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use faultline_core::params::{ParamSchema, StrategyParams};
use faultline_core::{ActionDecision, ConfigError, HarnessError, MemoLookup, PacketEvent, StrategyError};

use crate::context::RunContext;

pub use mutator::ByteMutator;
pub use passthrough::Passthrough;
pub use random_fuzzer::RandomFuzzer;

/// Which pipeline shortcuts apply around a strategy.
#[derive(Debug, Clone, Copy)]
pub struct PipelineFlags {
    /// Reuse the prior decision for byte-identical payloads on a pair.
    pub parse_identical: bool,
    /// Reuse one decision across a sender's broadcast group.
    pub parse_subsets: bool,
}

impl Default for PipelineFlags {
    fn default() -> Self {
        Self {
            parse_identical: true,
            parse_subsets: true,
        }
    }
}

/// A decision policy.
///
/// Implementations are shared across pair workers, so any mutable state
/// (typically an RNG) sits behind its own lock. `decide` must be
/// deterministic in its inputs plus that internal state; the pipeline
/// relies on recorded decisions staying valid for replayed payloads.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Registry name of the variant.
    fn name(&self) -> &'static str;

    /// Which shortcuts the pipeline applies around this strategy.
    fn flags(&self) -> PipelineFlags {
        PipelineFlags::default()
    }

    /// One-time hook before the first event, after node registration.
    /// Partition and grouping setup belongs here.
    async fn setup(&self, _ctx: &RunContext) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Decide the action for one captured message.
    async fn decide(&self, event: &PacketEvent) -> Result<ActionDecision, StrategyError>;
}

/// Where a decision came from, for the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Dropped by the partition gate.
    Partition,
    /// Replayed from the pair's memo.
    Identical,
    /// Reused from a broadcast sibling.
    Subset,
    /// Freshly produced by the strategy.
    Strategy,
}

impl DecisionSource {
    /// Stable label for the action log.
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionSource::Partition => "partition",
            DecisionSource::Identical => "identical",
            DecisionSource::Subset => "subset",
            DecisionSource::Strategy => "strategy",
        }
    }
}

/// Counter snapshot for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Events answered by the strategy itself.
    pub strategy_calls: u64,
    /// Events answered by the identical-message shortcut.
    pub identical_hits: u64,
    /// Events answered by the broadcast-grouping shortcut.
    pub subset_hits: u64,
    /// Events dropped by the partition gate.
    pub partition_drops: u64,
}

/// The per-event pipeline around one installed strategy.
pub struct StrategyEngine {
    context: RunContext,
    strategy: Arc<dyn Strategy>,
    flags: PipelineFlags,
    setup_done: tokio::sync::Mutex<bool>,
    strategy_calls: AtomicU64,
    identical_hits: AtomicU64,
    subset_hits: AtomicU64,
    partition_drops: AtomicU64,
}

impl StrategyEngine {
    pub fn new(context: RunContext, strategy: Arc<dyn Strategy>) -> Self {
        let flags = strategy.flags();
        Self {
            context,
            strategy,
            flags,
            setup_done: tokio::sync::Mutex::new(false),
            strategy_calls: AtomicU64::new(0),
            identical_hits: AtomicU64::new(0),
            subset_hits: AtomicU64::new(0),
            partition_drops: AtomicU64::new(0),
        }
    }

    /// Run the strategy's `setup` hook exactly once, no matter how many
    /// interceptors register.
    pub async fn ensure_setup(&self) -> Result<(), HarnessError> {
        let mut done = self.setup_done.lock().await;
        if !*done {
            self.strategy.setup(&self.context).await?;
            *done = true;
            tracing::debug!(strategy = self.strategy.name(), "strategy setup complete");
        }
        Ok(())
    }

    /// Decide the action for one event.
    ///
    /// Order is fixed: partition gate, identical shortcut, grouping
    /// shortcut, strategy. The gate decides without touching the memo;
    /// shortcut hits and fresh decisions each leave exactly one memo
    /// entry on the pair.
    pub async fn process(
        &self,
        event: &PacketEvent,
    ) -> Result<(ActionDecision, DecisionSource), HarnessError> {
        let (from, to) = event.pair();
        let network = &self.context.network;

        if !network.is_connected(from, to)? {
            self.partition_drops.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(from, to, "partition gate drop");
            return Ok((ActionDecision::drop(event.payload.clone()), DecisionSource::Partition));
        }

        if self.flags.parse_identical {
            if let MemoLookup::Duplicate(decision) =
                network.record_and_lookup(from, to, &event.payload)?
            {
                self.identical_hits.fetch_add(1, Ordering::Relaxed);
                return Ok((decision, DecisionSource::Identical));
            }
        }

        let group = if self.flags.parse_subsets {
            network.group_of(from, to)
        } else {
            None
        };
        if let Some((group_index, _)) = &group {
            if let Some(decision) =
                network.reuse_group_decision(from, to, *group_index, &event.payload)?
            {
                self.subset_hits.fetch_add(1, Ordering::Relaxed);
                return Ok((decision, DecisionSource::Subset));
            }
        }

        self.strategy_calls.fetch_add(1, Ordering::Relaxed);
        let decision = self
            .strategy
            .decide(event)
            .await
            .map_err(HarnessError::Strategy)?;

        if self.flags.parse_identical || self.flags.parse_subsets {
            network.record_decision(
                from,
                to,
                &event.payload,
                &decision,
                group.map(|(index, _)| index),
            )?;
        }
        Ok((decision, DecisionSource::Strategy))
    }

    /// Name of the installed strategy.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Shared network state the pipeline consults.
    pub fn network(&self) -> &Arc<faultline_core::NetworkState> {
        &self.context.network
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            strategy_calls: self.strategy_calls.load(Ordering::Relaxed),
            identical_hits: self.identical_hits.load(Ordering::Relaxed),
            subset_hits: self.subset_hits.load(Ordering::Relaxed),
            partition_drops: self.partition_drops.load(Ordering::Relaxed),
        }
    }
}

/// The parameter schema of a registered strategy variant.
pub fn schema_for(name: &str) -> Result<ParamSchema, ConfigError> {
    match name {
        "passthrough" => Ok(Passthrough::schema()),
        "random_fuzzer" => Ok(RandomFuzzer::schema()),
        "byte_mutator" => Ok(ByteMutator::schema()),
        other => Err(ConfigError::UnknownStrategy(other.to_string())),
    }
}

/// Instantiate a registered strategy variant from validated parameters.
pub fn build_strategy(
    name: &str,
    params: &StrategyParams,
) -> Result<Arc<dyn Strategy>, ConfigError> {
    match name {
        "passthrough" => Ok(Arc::new(Passthrough::new())),
        "random_fuzzer" => Ok(Arc::new(RandomFuzzer::from_params(params)?)),
        "byte_mutator" => Ok(Arc::new(ByteMutator::from_params(params)?)),
        other => Err(ConfigError::UnknownStrategy(other.to_string())),
    }
}
