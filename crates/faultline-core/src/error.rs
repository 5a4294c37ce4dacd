//! Error taxonomy for the harness.
//!
//! Three fatal error families: configuration errors abort before the run
//! begins, strategy errors abort the run with the current iteration marked
//! `Error`, process errors mark the active iteration `Error`. Agreement and
//! termination violations are classified iteration outcomes, not errors.

use thiserror::Error;

use crate::node::NodeId;

/// Malformed or ambiguous configuration, detected before the run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Partition groups overlap, omit a known id, or reference an unknown one.
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    /// A sender's broadcast groups are not disjoint.
    #[error("overlapping broadcast groups for sender {sender}: id {id} appears in more than one group")]
    OverlappingSubsets {
        /// Sender whose grouping is invalid.
        sender: NodeId,
        /// The id that appears in two groups.
        id: NodeId,
    },

    /// A node id outside the configured topology.
    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    /// A pair operation named the same node twice.
    #[error("node {0} cannot be paired with itself")]
    SelfPair(NodeId),

    /// A peer port with no registered node.
    #[error("unknown peer port {0}")]
    UnknownPort(u16),

    /// No strategy registered under the given name.
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),

    /// A required strategy parameter was not supplied.
    #[error("strategy `{strategy}` is missing required parameter `{key}`")]
    MissingParameter {
        /// Strategy variant name.
        strategy: String,
        /// Missing key.
        key: String,
    },

    /// A parameter key the strategy's schema does not declare.
    #[error("strategy `{strategy}` does not accept parameter `{key}`")]
    UnknownParameter {
        /// Strategy variant name.
        strategy: String,
        /// Offending key.
        key: String,
    },

    /// A parameter value of the wrong type.
    #[error("parameter `{key}` has the wrong type: expected {expected}, got {got}")]
    ParameterType {
        /// Offending key.
        key: String,
        /// Declared kind.
        expected: &'static str,
        /// Supplied kind.
        got: String,
    },

    /// A parameter value that fails the variant's range checks.
    #[error("invalid value for parameter `{key}`: {reason}")]
    InvalidParameter {
        /// Offending key.
        key: String,
        /// Explanation.
        reason: String,
    },

    /// A `key=value` override that could not be parsed.
    #[error("malformed override `{0}`, expected key=value")]
    MalformedOverride(String),

    /// Configuration file could not be read.
    #[error("failed to read config `{path}`: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse config `{path}`: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying toml error.
        #[source]
        source: toml::de::Error,
    },

    /// A field that fails cross-validation (ports, counts, expressions).
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Unhandled failure inside a decision policy. Fatal, never retried:
/// fuzz-test repeatability requires that decision logic never fails silently.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// `setup` failed before the first event.
    #[error("strategy setup failed: {0}")]
    Setup(String),

    /// `decide` failed for a specific pair.
    #[error("strategy `{strategy}` failed deciding {from}->{to}: {reason}")]
    Decide {
        /// Strategy variant name.
        strategy: String,
        /// Sender id.
        from: NodeId,
        /// Receiver id.
        to: NodeId,
        /// Explanation.
        reason: String,
    },

    /// A failure surfaced asynchronously from the decision stream.
    #[error("fatal strategy failure: {0}")]
    Fatal(String),
}

/// External node-network process failure. Fatal for the active iteration;
/// retrying the run is a caller decision.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process could not be spawned.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Configured program.
        program: String,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// The initial topology could not be written to the process.
    #[error("failed to hand topology to the network process: {0}")]
    Handshake(#[source] std::io::Error),

    /// The process exited while an iteration was active.
    #[error("network process exited unexpectedly with {status}")]
    UnexpectedExit {
        /// Exit status reported by the OS.
        status: std::process::ExitStatus,
    },

    /// Waiting on the child failed at the OS level.
    #[error("failed waiting on the network process: {0}")]
    Wait(#[source] std::io::Error),

    /// No child process is being managed.
    #[error("network process is not running")]
    NotRunning,
}

/// Umbrella error for engine and runner surfaces.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// See [`StrategyError`].
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// See [`ProcessError`].
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Transport-level failure on the event/decision channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// Run artifact could not be persisted.
    #[error("failed to write artifact `{path}`: {source}")]
    Artifact {
        /// Target path.
        path: String,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_offender() {
        let err = ConfigError::MissingParameter {
            strategy: "random_fuzzer".into(),
            key: "drop_probability".into(),
        };
        assert!(err.to_string().contains("drop_probability"));
        assert!(err.to_string().contains("random_fuzzer"));
    }

    #[test]
    fn umbrella_preserves_sources() {
        let err: HarnessError = ConfigError::UnknownNode(7).into();
        assert!(matches!(err, HarnessError::Config(_)));
        assert!(err.to_string().contains('7'));
    }
}
