//! Atom Implementation
//!
//! An Atom is the fundamental reactive primitive. It holds a state that the
//! outside world sets, and it is the only kind of node whose content changes
//! on its own.
//!
//! # How Atoms Work
//!
//! 1. When an atom is read while a derivation or reactor is evaluating, the
//!    read is recorded together with the atom's current version.
//!
//! 2. When the atom's content changes, its version is bumped and everything
//!    downstream of it is marked.
//!
//! 3. Once no transaction is open, reactors reached by the marking run.
//!
//! Setting an atom to content equal to what it already holds does nothing:
//! no version bump, no marking, no reactor runs.
//!
//! # Finality
//!
//! An atom set with a [`FinalWrapper`](crate::state::FinalWrapper) (or via
//! [`Atom::set_final`]) is sealed. Later writes fail, and its observers are
//! released since nothing they read from it can change again.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::derivable::{Derivable, Observable};
use super::runtime::{self, Reactive};
use super::source::{Starter, Teardown};
use crate::error::ReactiveError;
use crate::graph::{Node, NodeHandle, NodeId, NodeKind};
use crate::state::{
    default_equals, states_equal, CellError, Equality, FinalWrapper, State, Update, Value,
};

/// A settable reactive cell holding a [`State`].
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(0);
///
/// // Read the value
/// let value = count.get()?;
///
/// // Update the value (marks observers, runs reactors)
/// count.set(5)?;
/// ```
pub struct Atom<V: Value> {
    inner: Rc<AtomInner<V>>,
}

pub(crate) struct AtomInner<V: Value> {
    /// Unique identifier for this atom.
    id: NodeId,

    this: Weak<AtomInner<V>>,

    state: RefCell<State<V>>,

    equality: RefCell<Option<Equality<V>>>,

    /// Integration hook run when the atom becomes connected.
    starter: RefCell<Option<Starter<V>>>,

    /// Returned by the starter, run on disconnect.
    teardown: RefCell<Option<Teardown>>,
}

impl<V: Value> Atom<V> {
    /// Create a new atom with the given initial value.
    #[track_caller]
    pub fn new(value: V) -> Self {
        Self::from_state(State::Value(value))
    }

    /// Create an atom that starts unresolved.
    #[track_caller]
    pub fn unresolved() -> Self {
        Self::from_state(State::Unresolved)
    }

    /// Create an atom with an arbitrary initial state.
    #[track_caller]
    pub fn from_state(state: State<V>) -> Self {
        let origin = runtime::caller_origin();
        Self::build(state, None, origin)
    }

    pub(crate) fn build(
        state: State<V>,
        starter: Option<Starter<V>>,
        origin: Option<&'static std::panic::Location<'static>>,
    ) -> Self {
        let id = NodeId::new();
        let inner = Rc::new_cyclic(|this| AtomInner {
            id,
            this: this.clone(),
            state: RefCell::new(state),
            equality: RefCell::new(None),
            starter: RefCell::new(starter),
            teardown: RefCell::new(None),
        });
        let handle: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        runtime::register(Node::new(id, NodeKind::Atom, NodeHandle::Weak(handle)).with_origin(origin));
        Self { inner }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Replace the comparison used to decide whether a write changes
    /// anything.
    pub fn with_equality<F>(self, equals: F) -> Self
    where
        F: Fn(&V, &V) -> bool + 'static,
    {
        *self.inner.equality.borrow_mut() = Some(Rc::new(equals));
        self
    }

    /// Set a new value.
    ///
    /// Fails with [`ReactiveError::FinalWrite`] once the atom is final. Any
    /// error from a reactor triggered by the change is returned here.
    pub fn set(&self, value: V) -> Result<(), ReactiveError> {
        self.set_state(State::Value(value))
    }

    /// Set an arbitrary state, optionally sealing the atom.
    pub fn set_state(&self, update: impl Into<Update<V>>) -> Result<(), ReactiveError> {
        let (state, seal) = update.into().into_parts();
        self.inner.write(state, seal)
    }

    /// Go back to unresolved.
    pub fn unset(&self) -> Result<(), ReactiveError> {
        self.set_state(State::Unresolved)
    }

    /// Put the atom into the error state.
    pub fn set_error<P>(&self, payload: P) -> Result<(), ReactiveError>
    where
        P: Debug + fmt::Display + PartialEq + 'static,
    {
        self.set_state(State::Error(CellError::new(payload)))
    }

    /// Set a value and seal the atom.
    pub fn set_final(&self, value: V) -> Result<(), ReactiveError> {
        self.set_state(FinalWrapper::wrap(State::Value(value)))
    }

    /// Seal the atom with whatever state it currently holds.
    pub fn make_final(&self) -> Result<(), ReactiveError> {
        let current = self.inner.state.borrow().clone();
        self.set_state(FinalWrapper::wrap(current))
    }

    /// Update the value using a function of the current one.
    ///
    /// Fails with [`ReactiveError::Unresolved`] or the stored error when
    /// there is no value to update.
    pub fn update<F>(&self, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(&V) -> V,
    {
        let current = self.inner.state.borrow().clone().into_result()?;
        self.set(f(&current))
    }

    pub(crate) fn from_inner(inner: Rc<AtomInner<V>>) -> Self {
        Self { inner }
    }
}

impl<V: Value> AtomInner<V> {
    fn equals(&self, a: &State<V>, b: &State<V>) -> bool {
        match &*self.equality.borrow() {
            Some(eq) => states_equal(a, b, &**eq),
            None => states_equal(a, b, &default_equals::<V>),
        }
    }

    fn handle(&self) -> Option<Atom<V>> {
        self.this.upgrade().map(Atom::from_inner)
    }

    fn write(&self, state: State<V>, seal: bool) -> Result<(), ReactiveError> {
        let id = self.id;
        if runtime::is_final(id) {
            return Err(ReactiveError::FinalWrite(id));
        }

        let unchanged = self.equals(&self.state.borrow(), &state);
        if unchanged && !seal {
            trace!(atom = %id, "write skipped, content unchanged");
            return Ok(());
        }

        if runtime::in_transaction() {
            runtime::log_write(id, || {
                let previous = self.state.borrow().clone();
                let atom = self.handle();
                Box::new(move || {
                    if let Some(atom) = atom {
                        atom.inner.restore(previous);
                    }
                })
            });
        }

        if !unchanged {
            *self.state.borrow_mut() = state;
        }
        runtime::with_graph_mut(|graph| {
            if let Some(node) = graph.get_node_mut(id) {
                node.bump_version();
                if seal {
                    node.set_final(true);
                }
            }
            graph.mark_changed(id);
        });
        if seal {
            debug!(atom = %id, "atom sealed");
            runtime::seal_atom(id);
        } else {
            trace!(atom = %id, "atom written");
        }

        runtime::after_change();
        runtime::settle()
    }

    /// Undo a write made inside a rolled-back transaction.
    fn restore(&self, previous: State<V>) {
        let id = self.id;
        *self.state.borrow_mut() = previous;
        runtime::with_graph_mut(|graph| {
            if let Some(node) = graph.get_node_mut(id) {
                node.bump_version();
                node.set_final(false);
            }
            graph.mark_changed(id);
        });
        trace!(atom = %id, "atom restored");
    }
}

impl<V: Value> Reactive for AtomInner<V> {
    fn recompute(&self) -> Result<(), ReactiveError> {
        Ok(())
    }

    fn on_connect(&self) {
        let Some(atom) = self.handle() else {
            return;
        };
        let starter = self.starter.borrow_mut().take();
        if let Some(mut start) = starter {
            debug!(atom = %self.id, "source started");
            let teardown = start(&atom);
            *self.starter.borrow_mut() = Some(start);
            let stale = self.teardown.borrow_mut().replace(teardown);
            if let Some(stale) = stale {
                stale();
            }
        }
    }

    fn on_disconnect(&self) {
        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            debug!(atom = %self.id, "source stopped");
            teardown();
        }
    }
}

impl<V: Value> Drop for AtomInner<V> {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.get_mut().take() {
            teardown();
        }
        runtime::release(self.id);
    }
}

impl<V: Value> Observable<V> for Atom<V> {
    fn id(&self) -> NodeId {
        self.inner.id
    }

    fn get_state(&self) -> Result<State<V>, ReactiveError> {
        runtime::observe(self.inner.id);
        Ok(self.inner.state.borrow().clone())
    }

    fn to_derivable(&self) -> Derivable<V> {
        Derivable::Atom(self.clone())
    }
}

impl<V: Value> Clone for Atom<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V: Value + Debug> Debug for Atom<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.borrow())
            .field("final", &runtime::is_final(self.inner.id))
            .finish()
    }
}
