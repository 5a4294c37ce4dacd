//! Layered connectivity model.
//!
//! Effective connectivity between two nodes is derived from two layers: a
//! partition assignment (same-set pairs connected, cross-set disconnected)
//! and explicit pairwise overrides applied on top. Re-partitioning replaces
//! the partition layer wholesale and clears every override.

use std::collections::{BTreeSet, HashMap};

use crate::error::ConfigError;
use crate::node::NodeId;

/// Square boolean connectivity over node ids, with override layer.
#[derive(Debug, Clone)]
pub struct ConnectivityMatrix {
    node_count: usize,
    /// Layer (a): derived from the current partition assignment.
    partition_link: Vec<Vec<bool>>,
    /// Layer (b): pairwise overrides, keyed by the unordered pair.
    overrides: HashMap<(NodeId, NodeId), bool>,
}

fn pair_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl ConnectivityMatrix {
    /// Fully connected matrix over `node_count` ids (one partition group).
    pub fn fully_connected(node_count: usize) -> Self {
        let mut matrix = Self {
            node_count,
            partition_link: vec![vec![false; node_count]; node_count],
            overrides: HashMap::new(),
        };
        let everyone: Vec<NodeId> = (0..node_count as NodeId).collect();
        // A single covering group is always valid.
        let _ = matrix.partition(&[everyone]);
        matrix
    }

    /// Number of node ids covered by the matrix.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    fn check_id(&self, id: NodeId) -> Result<(), ConfigError> {
        if (id as usize) < self.node_count {
            Ok(())
        } else {
            Err(ConfigError::UnknownNode(id))
        }
    }

    fn check_pair(&self, a: NodeId, b: NodeId) -> Result<(), ConfigError> {
        self.check_id(a)?;
        self.check_id(b)?;
        if a == b {
            return Err(ConfigError::SelfPair(a));
        }
        Ok(())
    }

    /// Replace the partition layer wholesale and clear all overrides.
    ///
    /// Groups must be disjoint and cover every known id.
    pub fn partition(&mut self, groups: &[Vec<NodeId>]) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for group in groups {
            for &id in group {
                self.check_id(id).map_err(|_| {
                    ConfigError::InvalidPartition(format!("id {id} is not part of the network"))
                })?;
                if !seen.insert(id) {
                    return Err(ConfigError::InvalidPartition(format!(
                        "id {id} appears in more than one group"
                    )));
                }
            }
        }
        if seen.len() != self.node_count {
            return Err(ConfigError::InvalidPartition(format!(
                "groups cover {} of {} ids",
                seen.len(),
                self.node_count
            )));
        }

        self.partition_link = vec![vec![false; self.node_count]; self.node_count];
        for group in groups {
            for (i, &a) in group.iter().enumerate() {
                for &b in &group[i + 1..] {
                    self.partition_link[a as usize][b as usize] = true;
                    self.partition_link[b as usize][a as usize] = true;
                }
            }
        }
        self.overrides.clear();
        Ok(())
    }

    /// Allow communication between `a` and `b` regardless of the partition.
    /// Idempotent.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<(), ConfigError> {
        self.check_pair(a, b)?;
        self.overrides.insert(pair_key(a, b), true);
        Ok(())
    }

    /// Forbid communication between `a` and `b` regardless of the partition.
    /// Idempotent.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> Result<(), ConfigError> {
        self.check_pair(a, b)?;
        self.overrides.insert(pair_key(a, b), false);
        Ok(())
    }

    /// Effective connectivity: the override when one is set, the
    /// partition-derived value otherwise. A node is never connected to
    /// itself.
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> Result<bool, ConfigError> {
        self.check_pair(a, b)?;
        if let Some(&forced) = self.overrides.get(&pair_key(a, b)) {
            return Ok(forced);
        }
        Ok(self.partition_link[a as usize][b as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fully_connected_links_every_pair() {
        let matrix = ConnectivityMatrix::fully_connected(4);
        for a in 0..4u32 {
            for b in 0..4u32 {
                if a != b {
                    assert!(matrix.is_connected(a, b).unwrap());
                }
            }
        }
    }

    #[test]
    fn partition_splits_cross_group_pairs() {
        let mut matrix = ConnectivityMatrix::fully_connected(3);
        matrix.partition(&[vec![0], vec![1, 2]]).unwrap();
        assert!(!matrix.is_connected(0, 1).unwrap());
        assert!(!matrix.is_connected(0, 2).unwrap());
        assert!(matrix.is_connected(1, 2).unwrap());
    }

    #[test]
    fn partition_rejects_overlap_and_gaps() {
        let mut matrix = ConnectivityMatrix::fully_connected(3);
        assert!(matrix.partition(&[vec![0, 1], vec![1, 2]]).is_err());
        assert!(matrix.partition(&[vec![0], vec![1]]).is_err());
        assert!(matrix.partition(&[vec![0, 1, 2, 3]]).is_err());
    }

    #[test]
    fn overrides_take_precedence_over_partition() {
        let mut matrix = ConnectivityMatrix::fully_connected(3);
        matrix.partition(&[vec![0], vec![1, 2]]).unwrap();
        matrix.connect(0, 1).unwrap();
        assert!(matrix.is_connected(0, 1).unwrap());
        matrix.disconnect(1, 2).unwrap();
        assert!(!matrix.is_connected(1, 2).unwrap());
    }

    #[test]
    fn connect_and_disconnect_are_idempotent() {
        let mut matrix = ConnectivityMatrix::fully_connected(2);
        matrix.disconnect(0, 1).unwrap();
        matrix.disconnect(0, 1).unwrap();
        assert!(!matrix.is_connected(0, 1).unwrap());
        matrix.connect(0, 1).unwrap();
        matrix.connect(0, 1).unwrap();
        assert!(matrix.is_connected(0, 1).unwrap());
    }

    #[test]
    fn repartition_clears_overrides() {
        let mut matrix = ConnectivityMatrix::fully_connected(3);
        matrix.disconnect(0, 1).unwrap();
        matrix.partition(&[vec![0, 1, 2]]).unwrap();
        assert!(matrix.is_connected(0, 1).unwrap());
    }

    #[test]
    fn self_pair_and_unknown_ids_are_errors() {
        let matrix = ConnectivityMatrix::fully_connected(2);
        assert!(matrix.is_connected(1, 1).is_err());
        assert!(matrix.is_connected(0, 9).is_err());
    }

    /// Random disjoint covering partition over n ids.
    fn arb_partition(n: usize) -> impl Strategy<Value = Vec<Vec<NodeId>>> {
        proptest::collection::vec(0..4usize, n).prop_map(move |assignment| {
            let mut groups: Vec<Vec<NodeId>> = vec![Vec::new(); 4];
            for (id, &slot) in assignment.iter().enumerate() {
                groups[slot].push(id as NodeId);
            }
            groups.retain(|g| !g.is_empty());
            groups
        })
    }

    proptest! {
        #[test]
        fn connectivity_matches_group_membership(groups in arb_partition(6)) {
            let mut matrix = ConnectivityMatrix::fully_connected(6);
            matrix.partition(&groups).unwrap();
            for a in 0..6u32 {
                for b in 0..6u32 {
                    if a == b {
                        continue;
                    }
                    let same_group = groups
                        .iter()
                        .any(|g| g.contains(&a) && g.contains(&b));
                    prop_assert_eq!(matrix.is_connected(a, b).unwrap(), same_group);
                }
            }
        }
    }
}
