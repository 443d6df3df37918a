//! Graph Store
//!
//! The store owns every node entry and keeps the observer/dependency links
//! symmetric. It knows nothing about values: the runtime drives it with
//! node ids and lets it answer structural questions (who observes whom,
//! what is connected, what needs to be re-checked).
//!
//! # Connection
//!
//! A node is connected while it has at least one observer or is pinned.
//! Gaining the first observer connects it, which in turn links it to its own
//! recorded dependencies. Losing the last observer does not disconnect
//! right away: the node is queued and checked again at the next maintenance
//! tick, so a node that is dropped and picked up again within one burst of
//! work keeps its links.
//!
//! # Marking
//!
//! When an atom changes we walk its observers breadth-first. Direct
//! observers become `Dirty`, everything further downstream `MaybeDirty`,
//! and every reactor reached is queued. Nothing is recomputed here; the
//! reactors pull their inputs up to date when they run.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use super::node::{Node, NodeId, NodeKind};

/// A change in a node's connection status, reported to the runtime so it can
/// run integration hooks after releasing the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(NodeId),
    Disconnected(NodeId),
}

/// The dependency graph.
#[derive(Debug, Default)]
pub struct Graph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,

    /// Reactors waiting to be refreshed, in marking order.
    pending_reactors: IndexSet<NodeId>,

    /// Nodes that lost their last observer and should be re-checked.
    pending_disconnect: Vec<NodeId>,

    /// Nodes pinned by auto-cache for the current tick.
    pinned: Vec<NodeId>,

    events: Vec<ConnectionEvent>,

    maintenance_requested: bool,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// The node stops observing its dependencies. Nodes still holding it as a
    /// dependency keep the stale id; it no longer resolves. The entry is
    /// returned so the caller can drop it after releasing the graph.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let mut node = self.nodes.remove(&node_id)?;
        for dep_id in node.clear_dependencies().into_keys() {
            self.unlink(dep_id, node_id);
        }
        for observer_id in node.take_observers() {
            if let Some(observer) = self.nodes.get_mut(&observer_id) {
                observer.mark_dirty();
            }
        }
        self.pending_reactors.shift_remove(&node_id);
        Some(node)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn version(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(Node::version)
    }

    pub fn is_final(&self, node_id: NodeId) -> bool {
        self.nodes.get(&node_id).is_some_and(Node::is_final)
    }

    pub fn is_connected(&self, node_id: NodeId) -> bool {
        self.nodes.get(&node_id).is_some_and(Node::is_connected)
    }

    /// True when `deps` is non-empty and every entry is sealed.
    pub fn all_final<'a>(&self, deps: impl IntoIterator<Item = &'a NodeId>) -> bool {
        let mut any = false;
        for dep in deps {
            any = true;
            if !self.is_final(*dep) {
                return false;
            }
        }
        any
    }

    /// Add a link: `observer` reads `dependency`.
    ///
    /// Connects `dependency` if this is its first observer.
    pub fn add_edge(&mut self, dependency: NodeId, observer: NodeId) {
        let Some(dep_node) = self.nodes.get_mut(&dependency) else {
            return;
        };
        if dep_node.is_final() {
            return;
        }
        dep_node.add_observer(observer);
        self.connect(dependency);
    }

    /// Remove a link. A dependency left without observers is queued for a
    /// deferred disconnect.
    pub fn remove_edge(&mut self, dependency: NodeId, observer: NodeId) {
        self.unlink(dependency, observer);
    }

    fn unlink(&mut self, dependency: NodeId, observer: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            if dep_node.remove_observer(observer) && dep_node.is_unobserved() {
                self.request_disconnect(dependency);
            }
        }
    }

    /// Connect a node and, transitively, its recorded dependencies.
    pub fn connect(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if node.is_connected() || node.is_final() {
            return;
        }
        node.set_connected(true);
        if node.kind().is_derived() {
            // Whatever was cached while disconnected has to be re-verified.
            node.mark_maybe_dirty();
        }
        let deps: Vec<NodeId> = node.dependencies().keys().copied().collect();
        debug!(node = %node_id, deps = deps.len(), "connect");
        self.events.push(ConnectionEvent::Connected(node_id));

        for dep in deps {
            self.add_edge(dep, node_id);
        }
    }

    /// Disconnect a node if nothing keeps it connected, cascading upward.
    pub fn disconnect(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if !node.is_connected() || !node.is_unobserved() || node.kind() == NodeKind::Reactor {
            return;
        }
        node.set_connected(false);
        let deps: Vec<NodeId> = node.dependencies().keys().copied().collect();
        debug!(node = %node_id, "disconnect");
        self.events.push(ConnectionEvent::Disconnected(node_id));

        for dep in deps {
            if let Some(dep_node) = self.nodes.get_mut(&dep) {
                if dep_node.remove_observer(node_id) && dep_node.is_unobserved() {
                    self.disconnect(dep);
                }
            }
        }
    }

    fn request_disconnect(&mut self, node_id: NodeId) {
        self.pending_disconnect.push(node_id);
        self.maintenance_requested = true;
    }

    /// Run the deferred disconnect checks queued since the last tick.
    pub fn process_disconnects(&mut self) {
        let pending = std::mem::take(&mut self.pending_disconnect);
        for node_id in pending {
            self.disconnect(node_id);
        }
    }

    /// Hold a node connected until the next maintenance tick.
    pub fn pin(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if node.is_pinned() || node.is_final() {
            return;
        }
        node.set_pinned(true);
        self.pinned.push(node_id);
        self.maintenance_requested = true;
        self.connect(node_id);
    }

    /// Release every pin taken during this tick.
    pub fn unpin_all(&mut self) {
        for node_id in std::mem::take(&mut self.pinned) {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.set_pinned(false);
                if node.is_unobserved() {
                    self.pending_disconnect.push(node_id);
                }
            }
        }
    }

    /// Replace a node's dependency set after an evaluation.
    ///
    /// Connected nodes have their observer links brought in line with the
    /// new set. The node is marked clean; `changed` bumps its version and
    /// `seal` makes it final.
    pub fn install_dependencies(
        &mut self,
        node_id: NodeId,
        deps: IndexMap<NodeId, u64>,
        changed: bool,
        seal: bool,
    ) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let connected = node.is_connected();
        let old = node.replace_dependencies(deps);
        if changed {
            node.bump_version();
        }
        node.mark_clean();
        let new: Vec<NodeId> = node.dependencies().keys().copied().collect();

        if connected {
            for dep in old.keys() {
                if !new.contains(dep) {
                    self.unlink(*dep, node_id);
                }
            }
            for dep in new {
                self.add_edge(dep, node_id);
            }
        }

        if seal {
            self.seal(node_id);
        }
    }

    /// Make a node final and cut it out of the graph.
    ///
    /// Its dependencies lose it as an observer and its observers are
    /// discarded; they keep it as a (final) dependency.
    pub fn seal(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        node.set_final(true);
        let deps = node.clear_dependencies();
        debug!(node = %node_id, "seal");
        for dep in deps.into_keys() {
            self.unlink(dep, node_id);
        }
        self.discard_observers(node_id);
    }

    /// Drop every observer link of a final node.
    pub fn discard_observers(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        node.take_observers();
        node.set_pinned(false);
        if node.is_connected() {
            node.set_connected(false);
            self.events.push(ConnectionEvent::Disconnected(node_id));
        }
    }

    /// Mark everything downstream of a changed node.
    ///
    /// Returns the nodes marked, in breadth-first order. Reactors reached are
    /// added to the pending queue.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut marked = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        // Start with the source node's direct observers
        if let Some(source) = self.nodes.get(&source_id) {
            for observer_id in source.observers() {
                queue.push_back((*observer_id, true));
            }
        }

        // BFS to propagate dirty status
        while let Some((node_id, direct)) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&node_id) {
                if direct {
                    node.mark_dirty();
                } else {
                    node.mark_maybe_dirty();
                }
                marked.push(node_id);

                if node.kind() == NodeKind::Reactor {
                    self.pending_reactors.insert(node_id);
                    continue;
                }

                for observer_id in node.observers() {
                    queue.push_back((*observer_id, false));
                }
            }
        }

        trace!(source = %source_id, marked = marked.len(), "mark changed");
        marked
    }

    /// Take the next reactor to refresh.
    pub fn next_pending_reactor(&mut self) -> Option<NodeId> {
        self.pending_reactors.shift_remove_index(0)
    }

    pub fn has_pending_reactors(&self) -> bool {
        !self.pending_reactors.is_empty()
    }

    pub fn clear_pending_reactors(&mut self) {
        self.pending_reactors.clear();
    }

    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    /// True once per batch of disconnect or pin requests.
    pub fn take_maintenance_request(&mut self) -> bool {
        std::mem::take(&mut self.maintenance_requested)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
}
