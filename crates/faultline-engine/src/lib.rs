//! Interception-decision engine.
//!
//! This crate hosts everything that runs while a test campaign is live:
//! the strategy pipeline that turns captured packets into verdicts, the
//! iteration controller that watches consensus progress, the gRPC bridge
//! the interceptor processes talk to, and the manager for the spawned
//! validator network process.
//!
//! The shared data model (connectivity, memo buffers, subset maps) lives
//! in `faultline-core`; this crate drives it.

pub mod artifacts;
pub mod bridge;
pub mod context;
pub mod iteration;
pub mod process;
pub mod runner;
pub mod strategy;

/// Generated gRPC bindings for the interception contract.
#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("faultline.v1");
}

pub use context::RunContext;
pub use iteration::{IterationController, IterationStatus, RunSummary};
pub use runner::{run, RunConfig};
pub use strategy::{build_strategy, schema_for, Strategy, StrategyEngine};
