//! Core data model and network state for the faultline harness.
//!
//! This crate holds everything the interception-decision engine needs that
//! does not touch the wire or the async runtime:
//!
//! - Node identity and topology records ([`node`])
//! - Intercepted-message events and network actions ([`action`])
//! - The layered connectivity model: partition assignment plus pairwise
//!   overrides ([`topology`])
//! - Bounded per-pair message memoization ([`memo`])
//! - Broadcast grouping ([`subsets`])
//! - The [`NetworkState`](network::NetworkState) facade tying those together
//!   with the locking discipline the concurrent bridge relies on
//! - Configuration loading and strategy parameter schemas ([`config`],
//!   [`params`])
//!
//! The strategy pipeline, iteration controller and gRPC bridge live in
//! `faultline-engine`; the binary in `faultline-cli`.

pub mod action;
pub mod config;
pub mod error;
pub mod memo;
pub mod network;
pub mod node;
pub mod params;
pub mod subsets;
pub mod topology;

pub use action::{ActionDecision, PacketEvent, DROP_DELAY};
pub use error::{ConfigError, HarnessError, ProcessError, StrategyError};
pub use network::{MemoLookup, NetworkState};
pub use node::{NodeId, NodeInfo, ValidatorKeys};
