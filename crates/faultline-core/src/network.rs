//! Live network state: connectivity, memoization, broadcast grouping.
//!
//! [`NetworkState`] is the shared, lock-protected state the concurrent
//! bridge consults per event. Locking discipline: the connectivity matrix
//! and subset map sit behind `RwLock` (configuration-style writes, brief
//! staleness toward in-flight events is acceptable), each ordered pair's
//! memo buffer behind its own `Mutex` (byte-level corruption is not), and
//! the group-decision cache behind one `Mutex`. Locks are never held while
//! another one is taken, so unrelated pairs proceed concurrently and no
//! ordering between the maps can deadlock.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::action::ActionDecision;
use crate::error::ConfigError;
use crate::memo::{MemoBuffer, MemoEntry};
use crate::node::{NodeId, NodeInfo};
use crate::subsets::{SubsetMap, SubsetSpec};
use crate::topology::ConnectivityMatrix;

/// Outcome of consulting the per-pair memo for a raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoLookup {
    /// A byte-identical payload was processed before; the prior decision
    /// has been re-appended and must be reused unchanged.
    Duplicate(ActionDecision),
    /// No identical payload in the bounded history; the caller records the
    /// eventual decision via [`NetworkState::record_decision`].
    Miss,
}

/// Connectivity, memoization and grouping state for one run.
pub struct NetworkState {
    node_count: usize,
    nodes: RwLock<Vec<NodeInfo>>,
    port_to_id: RwLock<HashMap<u16, NodeId>>,
    initial_partition: Vec<Vec<NodeId>>,
    matrix: RwLock<ConnectivityMatrix>,
    subsets: RwLock<SubsetMap>,
    /// Indexed `[from][to]`; each slot has its own lock.
    memos: Vec<Vec<Mutex<MemoBuffer>>>,
    /// Per (sender, group) bounded history of decisions taken this
    /// iteration, so sibling reuse survives interleaved broadcasts.
    group_decisions: Mutex<HashMap<(NodeId, usize), MemoBuffer>>,
}

impl NetworkState {
    /// Build the run's network state from the node set and the configured
    /// initial partition (`None` means fully connected).
    pub fn new(
        nodes: Vec<NodeInfo>,
        initial_partition: Option<Vec<Vec<NodeId>>>,
    ) -> Result<Self, ConfigError> {
        let node_count = nodes.len();
        if node_count == 0 {
            return Err(ConfigError::Invalid("network has no nodes".to_string()));
        }
        let initial_partition = initial_partition
            .unwrap_or_else(|| vec![(0..node_count as NodeId).collect::<Vec<_>>()]);

        let mut matrix = ConnectivityMatrix::fully_connected(node_count);
        matrix.partition(&initial_partition)?;

        let port_to_id = nodes
            .iter()
            .map(|node| (node.peer_port, node.id))
            .collect::<HashMap<_, _>>();
        if port_to_id.len() != node_count {
            return Err(ConfigError::Invalid(
                "duplicate peer ports in topology".to_string(),
            ));
        }

        // Capacity node_count + 1 tolerates one resend toward every peer.
        let memos = (0..node_count)
            .map(|_| {
                (0..node_count)
                    .map(|_| Mutex::new(MemoBuffer::new(node_count + 1)))
                    .collect()
            })
            .collect();

        Ok(Self {
            node_count,
            nodes: RwLock::new(nodes),
            port_to_id: RwLock::new(port_to_id),
            initial_partition,
            matrix: RwLock::new(matrix),
            subsets: RwLock::new(SubsetMap::new()),
            memos,
            group_decisions: Mutex::new(HashMap::new()),
        })
    }

    /// Number of nodes in the topology.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Snapshot of one node's record.
    pub fn node(&self, id: NodeId) -> Option<NodeInfo> {
        self.nodes.read().get(id as usize).cloned()
    }

    /// Install the records reported by the external process at registration
    /// (addresses, ports, keys, UNLs). The node count must match.
    pub fn register_nodes(&self, nodes: Vec<NodeInfo>) -> Result<(), ConfigError> {
        if nodes.len() != self.node_count {
            return Err(ConfigError::Invalid(format!(
                "registered {} nodes, expected {}",
                nodes.len(),
                self.node_count
            )));
        }
        for (index, node) in nodes.iter().enumerate() {
            if node.id as usize != index {
                return Err(ConfigError::Invalid(format!(
                    "node ids must be dense from zero, found {} at position {index}",
                    node.id
                )));
            }
        }
        let port_map = nodes
            .iter()
            .map(|node| (node.peer_port, node.id))
            .collect::<HashMap<_, _>>();
        if port_map.len() != self.node_count {
            return Err(ConfigError::Invalid(
                "duplicate peer ports in registration".to_string(),
            ));
        }
        *self.port_to_id.write() = port_map;
        *self.nodes.write() = nodes;
        tracing::debug!(nodes = self.node_count, "node records registered");
        Ok(())
    }

    /// Translate a peer port to its node id.
    pub fn id_for_port(&self, port: u16) -> Result<NodeId, ConfigError> {
        self.port_to_id
            .read()
            .get(&port)
            .copied()
            .ok_or(ConfigError::UnknownPort(port))
    }

    /// Translate a node id to its peer port.
    pub fn port_for_id(&self, id: NodeId) -> Result<u16, ConfigError> {
        self.node(id)
            .map(|node| node.peer_port)
            .ok_or(ConfigError::UnknownNode(id))
    }

    // ---- connectivity -----------------------------------------------------

    /// Replace the partition assignment wholesale, clearing all overrides.
    pub fn partition(&self, groups: &[Vec<NodeId>]) -> Result<(), ConfigError> {
        self.matrix.write().partition(groups)?;
        tracing::debug!(groups = groups.len(), "partition applied, overrides cleared");
        Ok(())
    }

    /// Set a connect override on the pair. Idempotent.
    pub fn connect(&self, a: NodeId, b: NodeId) -> Result<(), ConfigError> {
        self.matrix.write().connect(a, b)
    }

    /// Set a disconnect override on the pair. Idempotent.
    pub fn disconnect(&self, a: NodeId, b: NodeId) -> Result<(), ConfigError> {
        self.matrix.write().disconnect(a, b)
    }

    /// Effective connectivity for the pair.
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> Result<bool, ConfigError> {
        self.matrix.read().is_connected(a, b)
    }

    // ---- broadcast grouping ----------------------------------------------

    /// Upsert one sender's broadcast grouping.
    pub fn set_subset_entry(&self, sender: NodeId, spec: SubsetSpec) -> Result<(), ConfigError> {
        if sender as usize >= self.node_count {
            return Err(ConfigError::UnknownNode(sender));
        }
        self.subsets.write().set_entry(sender, spec)
    }

    /// Replace the whole broadcast grouping map.
    pub fn set_subsets(
        &self,
        entries: impl IntoIterator<Item = (NodeId, SubsetSpec)>,
    ) -> Result<(), ConfigError> {
        self.subsets.write().set_all(entries)
    }

    /// The group index and members `receiver` belongs to for `sender`.
    pub fn group_of(&self, sender: NodeId, receiver: NodeId) -> Option<(usize, Vec<NodeId>)> {
        self.subsets
            .read()
            .group_of(sender, receiver)
            .map(|(index, members)| (index, members.to_vec()))
    }

    // ---- memoization ------------------------------------------------------

    fn check_pair(&self, from: NodeId, to: NodeId) -> Result<(), ConfigError> {
        if from as usize >= self.node_count {
            return Err(ConfigError::UnknownNode(from));
        }
        if to as usize >= self.node_count {
            return Err(ConfigError::UnknownNode(to));
        }
        if from == to {
            return Err(ConfigError::SelfPair(from));
        }
        Ok(())
    }

    /// Scan the pair's memo for a byte-identical raw payload. On a hit the
    /// prior decision is re-appended (every processed message appends one
    /// entry) and returned; on a miss nothing is appended until
    /// [`record_decision`](Self::record_decision).
    pub fn record_and_lookup(
        &self,
        from: NodeId,
        to: NodeId,
        raw: &[u8],
    ) -> Result<MemoLookup, ConfigError> {
        self.check_pair(from, to)?;
        let mut memo = self.memos[from as usize][to as usize].lock();
        match memo.find(raw).map(|entry| entry.decision.clone()) {
            Some(decision) => {
                memo.push(MemoEntry {
                    raw: raw.to_vec(),
                    decision: decision.clone(),
                });
                Ok(MemoLookup::Duplicate(decision))
            }
            None => Ok(MemoLookup::Miss),
        }
    }

    /// Reuse a sibling receiver's decision for this (sender, group) when
    /// one was recorded for the identical raw payload in this iteration.
    /// The group's bounded history is scanned most-recent-first, so a
    /// broadcast interleaved with another still finds its own decision. A
    /// hit is also recorded into this pair's memo.
    pub fn reuse_group_decision(
        &self,
        from: NodeId,
        to: NodeId,
        group_index: usize,
        raw: &[u8],
    ) -> Result<Option<ActionDecision>, ConfigError> {
        self.check_pair(from, to)?;
        let cached = {
            let cache = self.group_decisions.lock();
            cache
                .get(&(from, group_index))
                .and_then(|history| history.find(raw))
                .map(|entry| entry.decision.clone())
        };
        let Some(decision) = cached else {
            return Ok(None);
        };
        self.memos[from as usize][to as usize].lock().push(MemoEntry {
            raw: raw.to_vec(),
            decision: decision.clone(),
        });
        Ok(Some(decision))
    }

    /// Persist a freshly produced decision: append to the pair's memo and,
    /// when the receiver belongs to a group, cache it for sibling reuse.
    pub fn record_decision(
        &self,
        from: NodeId,
        to: NodeId,
        raw: &[u8],
        decision: &ActionDecision,
        group_index: Option<usize>,
    ) -> Result<(), ConfigError> {
        self.check_pair(from, to)?;
        self.memos[from as usize][to as usize].lock().push(MemoEntry {
            raw: raw.to_vec(),
            decision: decision.clone(),
        });
        if let Some(index) = group_index {
            self.group_decisions
                .lock()
                .entry((from, index))
                .or_insert_with(|| MemoBuffer::new(self.node_count + 1))
                .push(MemoEntry {
                    raw: raw.to_vec(),
                    decision: decision.clone(),
                });
        }
        Ok(())
    }

    /// Number of memo entries for a pair. Test and diagnostics hook.
    pub fn memo_len(&self, from: NodeId, to: NodeId) -> usize {
        self.memos[from as usize][to as usize].lock().len()
    }

    // ---- iteration lifecycle ----------------------------------------------

    /// Clear per-iteration state: every memo buffer and the group-decision
    /// cache. Stale history must not leak across iterations.
    pub fn reset_iteration(&self) {
        for row in &self.memos {
            for slot in row {
                slot.lock().clear();
            }
        }
        self.group_decisions.lock().clear();
    }

    /// Restore the configured initial partition, clearing overrides.
    pub fn reset_topology(&self) -> Result<(), ConfigError> {
        self.matrix.write().partition(&self.initial_partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_nodes() -> NetworkState {
        let nodes = (0..3)
            .map(|id| NodeInfo::synthesized(id, 60000 + id as u16, 61000 + id as u16, vec![]))
            .collect();
        NetworkState::new(nodes, None).unwrap()
    }

    #[test]
    fn duplicate_detection_matches_first_payload() {
        let state = three_nodes();
        // X, then Y, then X again: miss, miss, hit with X's decision.
        assert_eq!(state.record_and_lookup(0, 1, b"X").unwrap(), MemoLookup::Miss);
        let x_decision = ActionDecision::delay(b"X".to_vec(), 7);
        state.record_decision(0, 1, b"X", &x_decision, None).unwrap();

        assert_eq!(state.record_and_lookup(0, 1, b"Y").unwrap(), MemoLookup::Miss);
        state
            .record_decision(0, 1, b"Y", &ActionDecision::send(b"Y".to_vec()), None)
            .unwrap();

        match state.record_and_lookup(0, 1, b"X").unwrap() {
            MemoLookup::Duplicate(decision) => assert_eq!(decision, x_decision),
            MemoLookup::Miss => panic!("expected duplicate hit"),
        }
        // Hit re-appended, so every processed message left one entry.
        assert_eq!(state.memo_len(0, 1), 3);
    }

    #[test]
    fn group_decision_reused_only_for_identical_raw() {
        let state = three_nodes();
        state
            .set_subset_entry(1, SubsetSpec::Grouped(vec![vec![0, 2]]))
            .unwrap();
        let (group_index, _) = state.group_of(1, 0).unwrap();
        let decision = ActionDecision::delay(b"m".to_vec(), 11);
        state
            .record_decision(1, 0, b"m", &decision, Some(group_index))
            .unwrap();

        let reused = state.reuse_group_decision(1, 2, group_index, b"m").unwrap();
        assert_eq!(reused, Some(decision));
        assert_eq!(state.memo_len(1, 2), 1);

        let other = state.reuse_group_decision(1, 2, group_index, b"n").unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn group_reuse_survives_interleaved_broadcasts() {
        let state = three_nodes();
        state
            .set_subset_entry(0, SubsetSpec::Grouped(vec![vec![1, 2]]))
            .unwrap();
        let (group_index, _) = state.group_of(0, 1).unwrap();
        // Two broadcasts interleave on the same group: A toward 1, then B
        // toward 1, then A toward 2. A's decision must still be found.
        let dec_a = ActionDecision::delay(b"A".to_vec(), 5);
        state
            .record_decision(0, 1, b"A", &dec_a, Some(group_index))
            .unwrap();
        let dec_b = ActionDecision::drop(b"B".to_vec());
        state
            .record_decision(0, 1, b"B", &dec_b, Some(group_index))
            .unwrap();

        let reused_a = state.reuse_group_decision(0, 2, group_index, b"A").unwrap();
        assert_eq!(reused_a, Some(dec_a));
        let reused_b = state.reuse_group_decision(0, 2, group_index, b"B").unwrap();
        assert_eq!(reused_b, Some(dec_b));
        assert_eq!(state.memo_len(0, 2), 2);
    }

    #[test]
    fn reset_iteration_clears_memo_and_group_cache() {
        let state = three_nodes();
        state
            .set_subset_entry(0, SubsetSpec::Flat(vec![1, 2]))
            .unwrap();
        state
            .record_decision(0, 1, b"m", &ActionDecision::send(b"m".to_vec()), Some(0))
            .unwrap();
        state.reset_iteration();
        assert_eq!(state.memo_len(0, 1), 0);
        assert!(state.reuse_group_decision(0, 2, 0, b"m").unwrap().is_none());
        // Grouping configuration itself survives the iteration boundary.
        assert!(state.group_of(0, 2).is_some());
    }

    #[test]
    fn reset_topology_restores_initial_partition() {
        let nodes = (0..3)
            .map(|id| NodeInfo::synthesized(id, 60000 + id as u16, 61000 + id as u16, vec![]))
            .collect();
        let state = NetworkState::new(nodes, Some(vec![vec![0], vec![1, 2]])).unwrap();
        state.partition(&[vec![0, 1, 2]]).unwrap();
        assert!(state.is_connected(0, 1).unwrap());
        state.reset_topology().unwrap();
        assert!(!state.is_connected(0, 1).unwrap());
        assert!(state.is_connected(1, 2).unwrap());
    }

    #[test]
    fn port_lookup_round_trips() {
        let state = three_nodes();
        assert_eq!(state.id_for_port(60001).unwrap(), 1);
        assert_eq!(state.port_for_id(2).unwrap(), 60002);
        assert!(state.id_for_port(1).is_err());
    }

    #[test]
    fn register_nodes_validates_shape() {
        let state = three_nodes();
        let bad = vec![NodeInfo::synthesized(0, 1, 2, vec![])];
        assert!(state.register_nodes(bad).is_err());

        let good = (0..3)
            .map(|id| NodeInfo::synthesized(id, 7000 + id as u16, 7100 + id as u16, vec![0, 1, 2]))
            .collect();
        state.register_nodes(good).unwrap();
        assert_eq!(state.id_for_port(7001).unwrap(), 1);
        assert_eq!(state.node(1).unwrap().unl, vec![0, 1, 2]);
    }
}
