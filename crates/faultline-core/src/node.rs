//! Node identity records for the network under test.

use serde::{Deserialize, Serialize};

/// Identifier of a consensus-participating node, dense from zero.
pub type NodeId = u32;

/// Hex-encoded validation keypair of a node.
///
/// The harness owns these for lookup only; it never derives network bytes
/// from them (re-signing is the codec collaborator's job).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorKeys {
    /// Hex-encoded validation public key.
    pub public_key: String,
    /// Hex-encoded validation private key.
    pub private_key: String,
}

/// One node of the intercepted network. Created at topology setup and
/// immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Dense node id.
    pub id: NodeId,
    /// Network address the node listens on.
    pub address: String,
    /// Peer-to-peer port, the key the interceptor reports pairs by.
    pub peer_port: u16,
    /// Admin/RPC port used by outcome sampling.
    pub rpc_port: u16,
    /// Validation keypair.
    pub keys: ValidatorKeys,
    /// Trusted-peer list (UNL): ids this node counts toward quorum.
    pub unl: Vec<NodeId>,
}

impl NodeInfo {
    /// Placeholder record used before the external process registers the
    /// real addresses and keys.
    pub fn synthesized(id: NodeId, peer_port: u16, rpc_port: u16, unl: Vec<NodeId>) -> Self {
        Self {
            id,
            address: "127.0.0.1".to_string(),
            peer_port,
            rpc_port,
            keys: ValidatorKeys::default(),
            unl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_node_has_empty_keys() {
        let node = NodeInfo::synthesized(2, 60002, 61002, vec![0, 1]);
        assert_eq!(node.id, 2);
        assert_eq!(node.keys, ValidatorKeys::default());
        assert_eq!(node.unl, vec![0, 1]);
    }
}
