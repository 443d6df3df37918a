//! Serializable view of the graph, for debugging and tests.

use serde::Serialize;

use super::node::{DirtyState, Node, NodeId, NodeKind};
use super::store::Graph;

/// One node as seen in a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub dirty: DirtyState,
    pub version: u64,
    pub connected: bool,
    pub pinned: bool,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub dependencies: Vec<NodeId>,
    pub observers: Vec<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id(),
            kind: node.kind(),
            dirty: node.dirty_state(),
            version: node.version(),
            connected: node.is_connected(),
            pinned: node.is_pinned(),
            is_final: node.is_final(),
            dependencies: node.dependencies().keys().copied().collect(),
            observers: node.observers().iter().copied().collect(),
            origin: node.origin().map(|loc| loc.to_string()),
        }
    }
}

/// Every node in the graph, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Number of nodes currently connected.
    pub fn connected_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.connected).count()
    }
}

impl Graph {
    /// Capture the current shape of the graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<NodeSnapshot> = self.nodes().map(NodeSnapshot::from).collect();
        nodes.sort_by_key(|node| node.id);
        GraphSnapshot { nodes }
    }
}
