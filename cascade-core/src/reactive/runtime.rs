//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects atoms, derived
//! nodes and reactors. It owns the dependency graph and the transaction
//! stack, and decides when queued reactors run.
//!
//! # How It Works
//!
//! 1. Every node registers an entry in the graph when it is created and
//!    removes it when its last handle is dropped.
//!
//! 2. When a derived node or reactor evaluates, the reactive context records
//!    every node it reads together with that node's version. The runtime
//!    installs the recorded set as the node's dependencies and, if the node is
//!    connected, links it as an observer of each of them.
//!
//! 3. When an atom changes, the runtime:
//!    a. Bumps the atom's version
//!    b. Marks direct observers dirty and everything further down maybe-dirty
//!    c. Queues every reactor it reaches
//!    d. Once no transaction is open, refreshes queued reactors one by one
//!
//! 4. Refreshing a node pulls its dependencies up to date first. A maybe-dirty
//!    node compares each dependency's current version to the one it saw last
//!    time and only recomputes if one differs, so a derivation whose output
//!    did not change stops propagation right there.
//!
//! # Threading
//!
//! Everything here is thread-local. Node handles are `Rc`-based and cannot
//! leave the thread that created them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::Location;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::atom::Atom;
use super::context::ReactiveContext;
use crate::config;
use crate::error::ReactiveError;
use crate::graph::{
    ConnectionEvent, DirtyState, Graph, GraphSnapshot, Node, NodeId, NodeKind,
};
use crate::state::CellError;

/// Type-erased behaviour of a node, called by the runtime.
pub trait Reactive {
    /// Recompute a derived node, or run a reactor.
    fn recompute(&self) -> Result<(), ReactiveError>;

    /// The node gained its first observer.
    fn on_connect(&self) {}

    /// The node lost its last observer (after the grace period) or was sealed.
    fn on_disconnect(&self) {}
}

/// A behaviour that does nothing. Used by graph-level tests.
#[cfg(test)]
pub(crate) struct Inert;

#[cfg(test)]
impl Reactive for Inert {
    fn recompute(&self) -> Result<(), ReactiveError> {
        Ok(())
    }
}

/// Writes made inside one transaction scope.
#[derive(Default)]
pub(crate) struct TransactionScope {
    /// Restores the content each atom had before its first write in this
    /// scope. Applied in reverse order on rollback.
    pub(crate) log: IndexMap<NodeId, Box<dyn FnOnce()>>,
    /// Atoms sealed in this scope whose observers are discarded at commit.
    pub(crate) sealed: Vec<NodeId>,
    /// Derived nodes whose dependencies all became final in this scope. They
    /// are sealed by their first evaluation after the outermost commit.
    pub(crate) deferred: Vec<NodeId>,
}

struct Runtime {
    graph: RefCell<Graph>,
    transactions: RefCell<Vec<TransactionScope>>,
    /// Open internal batches (reactor start-up).
    batch_depth: Cell<usize>,
    /// Set while queued reactors are being refreshed.
    draining: Cell<bool>,
    maintenance_scheduled: Cell<bool>,
    /// Lazily created `connected` flags, keyed by the node they describe.
    flags: RefCell<HashMap<NodeId, Atom<bool>>>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: RefCell::new(Graph::new()),
            transactions: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
            draining: Cell::new(false),
            maintenance_scheduled: Cell::new(false),
            flags: RefCell::new(HashMap::new()),
        }
    }
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

pub(crate) fn with_graph<R>(f: impl FnOnce(&Graph) -> R) -> R {
    RUNTIME.with(|rt| f(&rt.graph.borrow()))
}

pub(crate) fn with_graph_mut<R>(f: impl FnOnce(&mut Graph) -> R) -> R {
    RUNTIME.with(|rt| f(&mut rt.graph.borrow_mut()))
}

/// Creation site of the node being constructed, when debug mode is on.
#[track_caller]
pub(crate) fn caller_origin() -> Option<&'static Location<'static>> {
    if config::debug_mode() {
        Some(Location::caller())
    } else {
        None
    }
}

/// Add a node to the graph.
pub(crate) fn register(node: Node) -> NodeId {
    trace!(node = %node.id(), kind = ?node.kind(), "register");
    with_graph_mut(|graph| graph.add_node(node))
}

/// Remove a dropped node from the graph.
///
/// Called from `Drop`, possibly while the thread is shutting down, so every
/// access is fallible.
pub(crate) fn release(id: NodeId) {
    let _ = RUNTIME.try_with(|rt| {
        let removed = match rt.graph.try_borrow_mut() {
            Ok(mut graph) => graph.remove_node(id),
            Err(_) => None,
        };
        drop(removed);
        let flag = match rt.flags.try_borrow_mut() {
            Ok(mut flags) => flags.remove(&id),
            Err(_) => None,
        };
        drop(flag);
    });
}

/// Record a read of `id` in the current frame.
pub(crate) fn observe(id: NodeId) {
    if ReactiveContext::is_active() {
        if let Some(version) = version(id) {
            ReactiveContext::track_dependency(id, version);
        }
    }
}

pub(crate) fn version(id: NodeId) -> Option<u64> {
    with_graph(|graph| graph.version(id))
}

pub(crate) fn is_final(id: NodeId) -> bool {
    with_graph(|graph| graph.is_final(id))
}

pub(crate) fn is_connected(id: NodeId) -> bool {
    with_graph(|graph| graph.is_connected(id))
}

#[cfg(test)]
pub(crate) fn is_evaluating(id: NodeId) -> bool {
    with_graph(|graph| graph.get_node(id).is_some_and(Node::is_evaluating))
}

pub(crate) fn all_final(deps: &IndexMap<NodeId, u64>) -> bool {
    with_graph(|graph| graph.all_final(deps.keys()))
}

/// Clears the evaluating flag when dropped.
pub(crate) struct EvaluationGuard {
    id: NodeId,
}

/// Flag `id` as evaluating, failing if it already is.
pub(crate) fn begin_evaluation(id: NodeId) -> Result<EvaluationGuard, ReactiveError> {
    with_graph_mut(|graph| match graph.get_node_mut(id) {
        Some(node) if node.is_evaluating() => Err(ReactiveError::Cycle(id)),
        Some(node) => {
            node.set_evaluating(true);
            Ok(())
        }
        None => Ok(()),
    })?;
    Ok(EvaluationGuard { id })
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        let _ = RUNTIME.try_with(|rt| {
            if let Ok(mut graph) = rt.graph.try_borrow_mut() {
                if let Some(node) = graph.get_node_mut(self.id) {
                    node.set_evaluating(false);
                }
            }
        });
    }
}

/// Store the result of an evaluation: new dependency set, version bump if
/// the content changed, seal if every dependency is final.
///
/// Inside a transaction the seal is postponed: the final dependencies may be
/// rolled back.
pub(crate) fn install(id: NodeId, deps: IndexMap<NodeId, u64>, changed: bool, seal: bool) {
    let seal = seal && !defer_seal(id);
    with_graph_mut(|graph| graph.install_dependencies(id, deps, changed, seal));
    after_change();
}

/// Bring a connected node (or a reactor) up to date.
///
/// Verification recurses once per derived level, so the depth of a chain of
/// derived nodes is bounded by the thread's stack.
pub(crate) fn refresh(id: NodeId) -> Result<(), ReactiveError> {
    let Some((dirty, deps)) = with_graph(|graph| {
        graph
            .get_node(id)
            .map(|node| (node.dirty_state(), node.dependencies().clone()))
    }) else {
        return Ok(());
    };

    match dirty {
        DirtyState::Clean => return Ok(()),
        DirtyState::Dirty => {}
        DirtyState::MaybeDirty => {
            let mut changed = false;
            for (dep, seen) in deps {
                if needs_refresh(dep) {
                    refresh(dep)?;
                }
                if version(dep) != Some(seen) {
                    changed = true;
                    break;
                }
            }
            if !changed {
                trace!(node = %id, "verified clean");
                with_graph_mut(|graph| {
                    if let Some(node) = graph.get_node_mut(id) {
                        node.mark_clean();
                    }
                });
                return Ok(());
            }
        }
    }

    trace!(node = %id, "recompute");
    let behavior = with_graph(|graph| graph.get_node(id).and_then(|node| node.handle().upgrade()));
    match behavior {
        // The clone keeps the node alive for the duration of the call.
        Some(behavior) => behavior.recompute(),
        None => Ok(()),
    }
}

fn needs_refresh(id: NodeId) -> bool {
    with_graph(|graph| {
        graph.get_node(id).is_some_and(|node| {
            node.kind().is_derived() && node.is_connected() && !node.is_final() && !node.is_clean()
        })
    })
}

/// Mark everything downstream of a changed atom.
pub(crate) fn mark_changed(id: NodeId) {
    with_graph_mut(|graph| {
        graph.mark_changed(id);
    });
}

/// Hold a derived node connected until the end of the tick.
pub(crate) fn pin(id: NodeId) {
    with_graph_mut(|graph| graph.pin(id));
    after_change();
}

/// Discard the observers of a freshly sealed atom, or leave that to the
/// outermost commit when a transaction is open.
pub(crate) fn seal_atom(id: NodeId) {
    let deferred = RUNTIME.with(|rt| match rt.transactions.borrow_mut().last_mut() {
        Some(scope) => {
            scope.sealed.push(id);
            true
        }
        None => false,
    });
    if !deferred {
        with_graph_mut(|graph| graph.seal(id));
    }
}

/// Run connection hooks and schedule maintenance after a graph mutation.
pub(crate) fn after_change() {
    fire_connection_hooks();
    schedule_maintenance_if_requested();
}

fn fire_connection_hooks() {
    loop {
        let events = with_graph_mut(Graph::take_events);
        if events.is_empty() {
            break;
        }
        for event in events {
            let (id, connected) = match event {
                ConnectionEvent::Connected(id) => (id, true),
                ConnectionEvent::Disconnected(id) => (id, false),
            };
            let behavior =
                with_graph(|graph| graph.get_node(id).and_then(|node| node.handle().upgrade()));
            if let Some(behavior) = behavior {
                if connected {
                    behavior.on_connect();
                } else {
                    behavior.on_disconnect();
                }
            }
            let flag = RUNTIME.with(|rt| rt.flags.borrow().get(&id).cloned());
            if let Some(flag) = flag {
                if let Err(err) = flag.set(connected) {
                    warn!(node = %id, error = %err, "connected flag update failed");
                }
            }
        }
    }
}

fn schedule_maintenance_if_requested() {
    if !with_graph_mut(Graph::take_maintenance_request) {
        return;
    }
    if RUNTIME.with(|rt| rt.maintenance_scheduled.replace(true)) {
        return;
    }
    trace!("maintenance scheduled");
    config::scheduler().schedule(Box::new(run_maintenance));
}

/// End-of-tick work: release auto-cache pins and run deferred disconnects.
pub(crate) fn run_maintenance() {
    RUNTIME.with(|rt| rt.maintenance_scheduled.set(false));
    with_graph_mut(|graph| {
        graph.unpin_all();
        graph.process_disconnects();
    });
    after_change();
    if let Err(err) = settle() {
        warn!(error = %err, "reactor failed during maintenance");
    }
}

/// Refresh queued reactors, unless a transaction, batch or evaluation is in
/// progress (whoever is running it settles when it finishes).
pub(crate) fn settle() -> Result<(), ReactiveError> {
    let blocked = RUNTIME.with(|rt| {
        rt.draining.get() || rt.batch_depth.get() > 0 || !rt.transactions.borrow().is_empty()
    });
    if blocked || ReactiveContext::is_evaluating() {
        return Ok(());
    }
    if !with_graph(Graph::has_pending_reactors) {
        return Ok(());
    }

    let _draining = DrainGuard::enter();
    while let Some(reactor) = with_graph_mut(Graph::next_pending_reactor) {
        if let Err(err) = refresh(reactor) {
            debug!(reactor = %reactor, error = %err, "propagation aborted");
            with_graph_mut(Graph::clear_pending_reactors);
            return Err(err);
        }
    }
    Ok(())
}

struct DrainGuard;

impl DrainGuard {
    fn enter() -> Self {
        RUNTIME.with(|rt| rt.draining.set(true));
        Self
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = RUNTIME.try_with(|rt| rt.draining.set(false));
    }
}

/// Run `f` with reactor processing held back until it returns.
pub(crate) fn batch<R>(f: impl FnOnce() -> R) -> R {
    struct BatchGuard;
    impl Drop for BatchGuard {
        fn drop(&mut self) {
            let _ = RUNTIME.try_with(|rt| rt.batch_depth.set(rt.batch_depth.get() - 1));
        }
    }

    RUNTIME.with(|rt| rt.batch_depth.set(rt.batch_depth.get() + 1));
    let _guard = BatchGuard;
    f()
}

/// Remove a stopped reactor. The entry (which owns the reactor) is returned
/// so it is dropped outside the graph borrow.
pub(crate) fn remove_reactor(id: NodeId) -> Option<Node> {
    let removed = with_graph_mut(|graph| graph.remove_node(id));
    after_change();
    removed
}

/// Attach the node's creation site to an error raised through it.
pub(crate) fn annotate(id: NodeId, err: CellError) -> CellError {
    if !config::debug_mode() {
        return err;
    }
    match with_graph(|graph| graph.get_node(id).and_then(Node::origin)) {
        Some(origin) => err.with_origin(origin),
        None => err,
    }
}

/// The boolean node mirroring `id`'s connection status, created on demand.
pub(crate) fn connected_flag(id: NodeId) -> Atom<bool> {
    if let Some(flag) = RUNTIME.with(|rt| rt.flags.borrow().get(&id).cloned()) {
        return flag;
    }
    let flag = Atom::new(is_connected(id));
    RUNTIME.with(|rt| rt.flags.borrow_mut().insert(id, flag.clone()));
    flag
}

// ----------------------------------------------------------------------------
// Transaction scopes
// ----------------------------------------------------------------------------

pub(crate) fn in_transaction() -> bool {
    RUNTIME.with(|rt| !rt.transactions.borrow().is_empty())
}

pub(crate) fn push_scope() {
    RUNTIME.with(|rt| rt.transactions.borrow_mut().push(TransactionScope::default()));
}

pub(crate) fn pop_scope() -> Option<TransactionScope> {
    RUNTIME
        .try_with(|rt| rt.transactions.borrow_mut().pop())
        .ok()
        .flatten()
}

/// Commit a nested scope. Its writes become permanent: the enclosing scope
/// forgets how to restore the atoms it touched, so rolling the enclosing
/// scope back leaves them alone.
pub(crate) fn commit_into_parent(scope: TransactionScope) {
    let mut released = Vec::new();
    RUNTIME.with(|rt| {
        let mut transactions = rt.transactions.borrow_mut();
        if let Some(parent) = transactions.last_mut() {
            for id in scope.log.keys() {
                if let Some(restore) = parent.log.shift_remove(id) {
                    released.push(restore);
                }
            }
            parent.sealed.extend(scope.sealed);
            parent.deferred.extend(scope.deferred);
        }
    });
    drop(released);
    drop(scope.log);
}

fn defer_seal(id: NodeId) -> bool {
    RUNTIME.with(|rt| match rt.transactions.borrow_mut().last_mut() {
        Some(scope) => {
            scope.deferred.push(id);
            true
        }
        None => false,
    })
}

/// Mark derived nodes whose seal was postponed dirty, so their next
/// evaluation looks at the dependencies again.
pub(crate) fn revisit_deferred(deferred: Vec<NodeId>) {
    with_graph_mut(|graph| {
        for id in deferred {
            if let Some(node) = graph.get_node_mut(id) {
                if !node.is_final() {
                    node.mark_dirty();
                }
            }
        }
    });
}

/// Discard observers of atoms that stay sealed after a scope ends, or hand
/// them to the enclosing scope.
pub(crate) fn finish_seals(sealed: Vec<NodeId>) {
    let sealed: Vec<NodeId> = with_graph(|graph| {
        sealed.into_iter().filter(|id| graph.is_final(*id)).collect()
    });
    let deferred = RUNTIME.with(|rt| match rt.transactions.borrow_mut().last_mut() {
        Some(parent) => {
            parent.sealed.extend(sealed.iter().copied());
            true
        }
        None => false,
    });
    if !deferred {
        with_graph_mut(|graph| {
            for id in sealed {
                graph.seal(id);
            }
        });
    }
}

/// Log the first write to `id` in the innermost scope.
pub(crate) fn log_write(id: NodeId, restore: impl FnOnce() -> Box<dyn FnOnce()>) {
    let needed = RUNTIME.with(|rt| {
        rt.transactions
            .borrow()
            .last()
            .is_some_and(|scope| !scope.log.contains_key(&id))
    });
    if needed {
        let restore = restore();
        RUNTIME.with(|rt| {
            if let Some(scope) = rt.transactions.borrow_mut().last_mut() {
                scope.log.insert(id, restore);
            }
        });
    }
}

// ----------------------------------------------------------------------------
// Introspection
// ----------------------------------------------------------------------------

/// Capture the current thread's graph.
pub fn graph_snapshot() -> GraphSnapshot {
    with_graph(Graph::snapshot)
}

/// Number of live nodes on the current thread, reactors included.
pub fn node_count() -> usize {
    with_graph(Graph::node_count)
}

/// Number of reactors currently active on this thread.
pub fn active_reactors() -> usize {
    with_graph(|graph| {
        graph
            .nodes()
            .filter(|node| node.kind() == NodeKind::Reactor)
            .count()
    })
}
