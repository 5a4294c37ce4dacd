//! Run configuration: network topology, external process, iteration bounds.
//!
//! Loaded from TOML with CLI overrides layered on top. Topology override
//! expressions (`--partition "[[0],[1,2]]"`) use the JSON list syntax.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::node::{NodeId, NodeInfo};

fn default_base_peer_port() -> u16 {
    60000
}

fn default_base_rpc_port() -> u16 {
    61000
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_ledger_seq() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

/// How the external node-network process is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    /// Program to execute.
    pub program: String,
    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Grace period between the shutdown signal and a forced kill.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: "faultline-interceptor".to_string(),
            args: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Which bound ends an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationKindSetting {
    /// Ends once the goal ledger sequence closes on a quorum.
    Ledger,
    /// Ends after the configured wall-clock timeout.
    Time,
}

/// Iteration bounds from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IterationSettings {
    /// Iteration kind.
    pub kind: IterationKindSetting,
    /// Number of iterations in the run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Goal ledger sequence (ledger kind only).
    #[serde(default = "default_max_ledger_seq")]
    pub max_ledger_seq: u32,
    /// Per-iteration deadline in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Handshake deadline in seconds.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

impl Default for IterationSettings {
    fn default() -> Self {
        Self {
            kind: IterationKindSetting::Ledger,
            max_iterations: default_max_iterations(),
            max_ledger_seq: default_max_ledger_seq(),
            timeout_secs: default_timeout_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
        }
    }
}

/// Network configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Number of consensus nodes.
    pub node_count: u32,
    /// First peer-to-peer port; node `i` listens at `base + i`.
    #[serde(default = "default_base_peer_port")]
    pub base_peer_port: u16,
    /// First RPC port; node `i` at `base + i`.
    #[serde(default = "default_base_rpc_port")]
    pub base_rpc_port: u16,
    /// Initial partition groups; absent means fully connected.
    #[serde(default)]
    pub partition: Option<Vec<Vec<NodeId>>>,
    /// Trusted-peer list per node; absent means every node trusts all.
    #[serde(default)]
    pub unl: Option<Vec<Vec<NodeId>>>,
    /// External process launch settings.
    #[serde(default)]
    pub process: ProcessConfig,
    /// Iteration bounds.
    #[serde(default)]
    pub iteration: IterationSettings,
}

impl NetworkConfig {
    /// Defaults for every field except the node count, for file-less
    /// invocations.
    pub fn with_node_count(node_count: u32) -> Self {
        Self {
            node_count,
            base_peer_port: default_base_peer_port(),
            base_rpc_port: default_base_rpc_port(),
            partition: None,
            unl: None,
            process: ProcessConfig::default(),
            iteration: IterationSettings::default(),
        }
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation, also applied after overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_count == 0 {
            return Err(ConfigError::Invalid("node_count must be positive".into()));
        }
        for (name, base) in [
            ("base_peer_port", self.base_peer_port),
            ("base_rpc_port", self.base_rpc_port),
        ] {
            if u64::from(base) + u64::from(self.node_count) - 1 > u64::from(u16::MAX) {
                return Err(ConfigError::Invalid(format!(
                    "{name} {base} leaves no room for {} nodes below port 65536",
                    self.node_count
                )));
            }
        }
        if let Some(unl) = &self.unl {
            if unl.len() != self.node_count as usize {
                return Err(ConfigError::Invalid(format!(
                    "unl has {} entries for {} nodes",
                    unl.len(),
                    self.node_count
                )));
            }
        }
        Ok(())
    }

    /// Layer CLI topology overrides on top of the file.
    pub fn apply_overrides(
        &mut self,
        node_count: Option<u32>,
        partition_expr: Option<&str>,
        unl_expr: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(count) = node_count {
            self.node_count = count;
        }
        if let Some(expr) = partition_expr {
            self.partition = Some(parse_groups(expr)?);
        }
        if let Some(expr) = unl_expr {
            self.unl = Some(parse_groups(expr)?);
        }
        self.validate()
    }

    /// Synthesized node records for the configured topology; real
    /// addresses and keys arrive at registration.
    pub fn build_nodes(&self) -> Vec<NodeInfo> {
        let everyone: Vec<NodeId> = (0..self.node_count).collect();
        (0..self.node_count)
            .map(|id| {
                let unl = self
                    .unl
                    .as_ref()
                    .map(|lists| lists[id as usize].clone())
                    .unwrap_or_else(|| everyone.clone());
                NodeInfo::synthesized(
                    id,
                    self.base_peer_port + id as u16,
                    self.base_rpc_port + id as u16,
                    unl,
                )
            })
            .collect()
    }

    /// The startup payload handed to the external process.
    pub fn topology_spec(&self) -> TopologySpec {
        TopologySpec {
            node_count: self.node_count,
            base_peer_port: self.base_peer_port,
            base_rpc_port: self.base_rpc_port,
            partition: self
                .partition
                .clone()
                .unwrap_or_else(|| vec![(0..self.node_count).collect()]),
            unl: self
                .unl
                .clone()
                .unwrap_or_else(|| vec![(0..self.node_count).collect(); self.node_count as usize]),
        }
    }
}

/// Initial configuration payload for the external node-network process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySpec {
    /// Number of nodes to spawn.
    pub node_count: u32,
    /// First peer port.
    pub base_peer_port: u16,
    /// First RPC port.
    pub base_rpc_port: u16,
    /// Initial partition groups.
    pub partition: Vec<Vec<NodeId>>,
    /// Trust list per node.
    pub unl: Vec<Vec<NodeId>>,
}

/// Parse a `[[0],[1,2]]`-style id grouping expression.
pub fn parse_groups(expr: &str) -> Result<Vec<Vec<NodeId>>, ConfigError> {
    serde_json::from_str(expr).map_err(|err| {
        ConfigError::Invalid(format!("malformed group expression `{expr}`: {err}"))
    })
}

/// Load a strategy parameter file: a flat TOML table of key/value pairs.
pub fn load_params_table(path: &Path) -> Result<toml::value::Table, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    text.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Split `key=value` override arguments.
pub fn parse_overrides(raw: &[String]) -> Result<Vec<(String, String)>, ConfigError> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| ConfigError::MalformedOverride(entry.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: NetworkConfig = toml::from_str("node_count = 3").unwrap();
        assert_eq!(config.base_peer_port, 60000);
        assert_eq!(config.iteration.max_iterations, 5);
        assert!(matches!(config.iteration.kind, IterationKindSetting::Ledger));
        let nodes = config.build_nodes();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[2].peer_port, 60002);
        assert_eq!(nodes[0].unl, vec![0, 1, 2]);
    }

    #[test]
    fn load_reads_and_validates_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "node_count = 2\n[iteration]\nkind = \"time\"\ntimeout_secs = 5"
        )
        .unwrap();
        let config = NetworkConfig::load(file.path()).unwrap();
        assert!(matches!(config.iteration.kind, IterationKindSetting::Time));
        assert_eq!(config.iteration.timeout_secs, 5);
    }

    #[test]
    fn unl_length_mismatch_is_invalid() {
        let config: NetworkConfig =
            toml::from_str("node_count = 3\nunl = [[0, 1]]").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn port_range_past_u16_is_invalid() {
        // 65534 + id would pass 65535 for the third node.
        let config: NetworkConfig =
            toml::from_str("node_count = 3\nbase_peer_port = 65534").unwrap();
        assert!(config.validate().is_err());

        let config: NetworkConfig =
            toml::from_str("node_count = 2\nbase_peer_port = 65534").unwrap();
        config.validate().unwrap();
        assert_eq!(config.build_nodes()[1].peer_port, 65535);
    }

    #[test]
    fn overrides_replace_topology() {
        let mut config: NetworkConfig = toml::from_str("node_count = 2").unwrap();
        config
            .apply_overrides(Some(3), Some("[[0],[1,2]]"), None)
            .unwrap();
        assert_eq!(config.node_count, 3);
        assert_eq!(config.partition, Some(vec![vec![0], vec![1, 2]]));
        assert!(config.apply_overrides(None, Some("oops"), None).is_err());
    }

    #[test]
    fn override_pairs_parse() {
        let parsed = parse_overrides(&["seed=7".to_string(), "name = x".to_string()]).unwrap();
        assert_eq!(parsed[0], ("seed".to_string(), "7".to_string()));
        assert_eq!(parsed[1], ("name".to_string(), "x".to_string()));
        assert!(parse_overrides(&["nope".to_string()]).is_err());
    }

    #[test]
    fn topology_spec_round_trips_as_json() {
        let config: NetworkConfig =
            toml::from_str("node_count = 2\npartition = [[0],[1]]").unwrap();
        let spec = config.topology_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: TopologySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.partition, vec![vec![0], vec![1]]);
        assert_eq!(back.unl.len(), 2);
    }
}
