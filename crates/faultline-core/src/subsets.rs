//! Broadcast grouping: which simultaneous outbound messages from one
//! sender share a single decision.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::node::NodeId;

/// A sender's grouping as written in configuration: either one flat list
/// (normalized into a single group) or an explicit list of groups.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubsetSpec {
    /// Explicit receiver groups.
    Grouped(Vec<Vec<NodeId>>),
    /// Flat receiver list, treated as one group.
    Flat(Vec<NodeId>),
}

impl SubsetSpec {
    /// Normalize to the grouped form.
    pub fn into_groups(self) -> Vec<Vec<NodeId>> {
        match self {
            SubsetSpec::Grouped(groups) => groups,
            SubsetSpec::Flat(ids) => {
                if ids.is_empty() {
                    Vec::new()
                } else {
                    vec![ids]
                }
            }
        }
    }
}

/// Mapping from sender id to its disjoint receiver groups.
#[derive(Debug, Default)]
pub struct SubsetMap {
    groups: IndexMap<NodeId, Vec<Vec<NodeId>>>,
}

impl SubsetMap {
    /// Empty map: no sender has any grouping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert one sender's grouping. Groups must be disjoint.
    pub fn set_entry(&mut self, sender: NodeId, spec: SubsetSpec) -> Result<(), ConfigError> {
        let groups = spec.into_groups();
        let mut seen = BTreeSet::new();
        for group in &groups {
            for &id in group {
                if !seen.insert(id) {
                    return Err(ConfigError::OverlappingSubsets { sender, id });
                }
            }
        }
        self.groups.insert(sender, groups);
        Ok(())
    }

    /// Replace the whole map, dropping previous entries.
    pub fn set_all(
        &mut self,
        entries: impl IntoIterator<Item = (NodeId, SubsetSpec)>,
    ) -> Result<(), ConfigError> {
        self.groups.clear();
        for (sender, spec) in entries {
            self.set_entry(sender, spec)?;
        }
        Ok(())
    }

    /// The index and members of the `sender` group containing `receiver`.
    pub fn group_of(&self, sender: NodeId, receiver: NodeId) -> Option<(usize, &[NodeId])> {
        self.groups.get(&sender).and_then(|groups| {
            groups
                .iter()
                .enumerate()
                .find(|(_, group)| group.contains(&receiver))
                .map(|(index, group)| (index, group.as_slice()))
        })
    }

    /// Whether any sender has a grouping configured.
    pub fn is_empty(&self) -> bool {
        self.groups.values().all(|groups| groups.is_empty())
    }

    /// Remove every grouping.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_list_normalizes_to_single_group() {
        let mut map = SubsetMap::new();
        map.set_entry(1, SubsetSpec::Flat(vec![0, 2])).unwrap();
        let (index, members) = map.group_of(1, 2).unwrap();
        assert_eq!(index, 0);
        assert_eq!(members, &[0, 2]);
    }

    #[test]
    fn overlapping_groups_rejected() {
        let mut map = SubsetMap::new();
        let err = map
            .set_entry(0, SubsetSpec::Grouped(vec![vec![1, 2], vec![2, 3]]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OverlappingSubsets { sender: 0, id: 2 }
        ));
    }

    #[test]
    fn group_of_picks_the_right_group() {
        let mut map = SubsetMap::new();
        map.set_entry(0, SubsetSpec::Grouped(vec![vec![1], vec![2, 3]]))
            .unwrap();
        assert_eq!(map.group_of(0, 1).unwrap().0, 0);
        assert_eq!(map.group_of(0, 3).unwrap().0, 1);
        assert!(map.group_of(0, 4).is_none());
        assert!(map.group_of(1, 2).is_none());
    }

    #[test]
    fn set_all_replaces_previous_entries() {
        let mut map = SubsetMap::new();
        map.set_entry(0, SubsetSpec::Flat(vec![1, 2])).unwrap();
        map.set_all([(1, SubsetSpec::Flat(vec![0]))]).unwrap();
        assert!(map.group_of(0, 1).is_none());
        assert!(map.group_of(1, 0).is_some());
    }
}
