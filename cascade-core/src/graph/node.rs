//! Graph Nodes
//!
//! This module defines the entries that live in the dependency graph. The
//! typed part of a node (its value, recipe or reaction) lives in the
//! `Rc` owned by the user-facing handle; the graph keeps the bookkeeping and
//! a pointer back to the typed behaviour.

use std::fmt;
use std::panic::Location;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::reactive::Reactive;

/// Unique identifier for a node in the dependency graph.
///
/// Ids are never reused, so a stale id simply stops resolving once its node
/// has been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A settable leaf. No dependencies, only observers.
    Atom,

    /// A computed node with a read-only recipe.
    Derivation,

    /// A computed node that can also be written through.
    Lens,

    /// A terminal observer. Dependencies but no observers.
    Reactor,
}

impl NodeKind {
    /// Derivations and lenses share the same evaluation logic.
    pub fn is_derived(self) -> bool {
        matches!(self, Self::Derivation | Self::Lens)
    }
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// Something upstream changed. The node has to check its dependencies'
    /// versions before deciding whether to recompute.
    MaybeDirty,

    /// A direct dependency changed, or the node was never evaluated.
    Dirty,
}

/// Pointer from the graph back to a node's typed behaviour.
///
/// Value nodes are owned by their handles, so the graph only holds a weak
/// pointer. Active reactors have no handle keeping them alive and are owned
/// by the graph until they stop.
pub enum NodeHandle {
    Weak(Weak<dyn Reactive>),
    Owned(Rc<dyn Reactive>),
}

impl NodeHandle {
    pub fn upgrade(&self) -> Option<Rc<dyn Reactive>> {
        match self {
            Self::Weak(weak) => weak.upgrade(),
            Self::Owned(rc) => Some(rc.clone()),
        }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weak(weak) => write!(f, "Weak(alive: {})", weak.strong_count() > 0),
            Self::Owned(_) => f.write_str("Owned"),
        }
    }
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// Current dirty state.
    dirty: DirtyState,

    /// Bumped every time the node's content (state or finality) changes.
    version: u64,

    /// Sealed nodes never change and are never linked into the graph.
    is_final: bool,

    /// Reachable from an active reactor, or pinned.
    connected: bool,

    /// Held connected until the end of the tick by auto-cache.
    pinned: bool,

    /// Set while the node's recipe is running.
    evaluating: bool,

    /// Nodes read during the last evaluation, with the version seen.
    dependencies: IndexMap<NodeId, u64>,

    /// Connected nodes that read this node during their last evaluation.
    observers: IndexSet<NodeId>,

    /// Where the node was created (debug mode only).
    origin: Option<&'static Location<'static>>,

    handle: NodeHandle,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: NodeId, kind: NodeKind, handle: NodeHandle) -> Self {
        Self {
            id,
            kind,
            dirty: match kind {
                NodeKind::Atom => DirtyState::Clean,
                // Start dirty to ensure first computation
                NodeKind::Derivation | NodeKind::Lens => DirtyState::Dirty,
                NodeKind::Reactor => DirtyState::Dirty,
            },
            version: 0,
            is_final: false,
            // Reactors are the roots that keep everything else connected.
            connected: kind == NodeKind::Reactor,
            pinned: false,
            evaluating: false,
            dependencies: IndexMap::new(),
            observers: IndexSet::new(),
            origin: None,
            handle,
        }
    }

    /// Record where the node was created.
    pub fn with_origin(mut self, origin: Option<&'static Location<'static>>) -> Self {
        self.origin = origin;
        self
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current dirty state.
    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// Check if the node needs any processing.
    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    /// Mark the node as clean.
    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty (an upstream node might have changed).
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty (needs recomputation).
    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn set_final(&mut self, is_final: bool) {
        self.is_final = is_final;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub(crate) fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }

    pub fn is_evaluating(&self) -> bool {
        self.evaluating
    }

    pub(crate) fn set_evaluating(&mut self, evaluating: bool) {
        self.evaluating = evaluating;
    }

    pub fn origin(&self) -> Option<&'static Location<'static>> {
        self.origin
    }

    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    /// Get all dependencies with the version seen at last read.
    pub fn dependencies(&self) -> &IndexMap<NodeId, u64> {
        &self.dependencies
    }

    /// Replace the dependency set, returning the previous one.
    pub fn replace_dependencies(&mut self, deps: IndexMap<NodeId, u64>) -> IndexMap<NodeId, u64> {
        std::mem::replace(&mut self.dependencies, deps)
    }

    /// Clear all dependencies.
    pub fn clear_dependencies(&mut self) -> IndexMap<NodeId, u64> {
        std::mem::take(&mut self.dependencies)
    }

    /// Add an observer (a node that reads from this node).
    pub fn add_observer(&mut self, node_id: NodeId) -> bool {
        self.observers.insert(node_id)
    }

    /// Remove an observer.
    pub fn remove_observer(&mut self, node_id: NodeId) -> bool {
        self.observers.shift_remove(&node_id)
    }

    /// Get all observers.
    pub fn observers(&self) -> &IndexSet<NodeId> {
        &self.observers
    }

    /// Drop every observer link from this side.
    pub fn take_observers(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.observers)
    }

    /// No observer or pin is keeping the node connected.
    pub fn is_unobserved(&self) -> bool {
        self.observers.is_empty() && !self.pinned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(kind: NodeKind) -> Node {
        let handle: Weak<dyn Reactive> = Weak::<crate::reactive::Inert>::new();
        Node::new(NodeId::new(), kind, NodeHandle::Weak(handle))
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn atom_node_starts_clean() {
        let node = detached(NodeKind::Atom);
        assert_eq!(node.kind(), NodeKind::Atom);
        assert!(node.is_clean());
        assert!(!node.is_connected());
    }

    #[test]
    fn derived_node_starts_dirty() {
        let node = detached(NodeKind::Derivation);
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
        assert!(node.kind().is_derived());
    }

    #[test]
    fn reactor_node_starts_connected() {
        let node = detached(NodeKind::Reactor);
        assert!(node.is_connected());
        assert!(!node.kind().is_derived());
    }

    #[test]
    fn dependency_management() {
        let mut node = detached(NodeKind::Derivation);
        let dep1 = NodeId::new();
        let dep2 = NodeId::new();

        let mut deps = IndexMap::new();
        deps.insert(dep1, 4);
        deps.insert(dep2, 0);
        assert!(node.replace_dependencies(deps).is_empty());

        assert_eq!(node.dependencies().get(&dep1), Some(&4));
        assert_eq!(node.dependencies().len(), 2);

        let old = node.clear_dependencies();
        assert_eq!(old.len(), 2);
        assert!(node.dependencies().is_empty());
    }

    #[test]
    fn observer_management() {
        let mut node = detached(NodeKind::Atom);
        let obs = NodeId::new();

        assert!(node.is_unobserved());
        assert!(node.add_observer(obs));
        assert!(!node.add_observer(obs));
        assert!(!node.is_unobserved());

        node.set_pinned(true);
        assert!(node.remove_observer(obs));
        assert!(!node.is_unobserved());
        node.set_pinned(false);
        assert!(node.is_unobserved());
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = detached(NodeKind::Derivation);

        // Start dirty
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        // Maybe-dirty never downgrades a dirty node
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        node.mark_clean();
        assert_eq!(node.dirty_state(), DirtyState::Clean);

        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }
}
