//! Derivation Implementation
//!
//! A Derivation is a value computed from other nodes by a recipe. The recipe
//! is an ordinary closure; whatever it reads becomes a dependency.
//!
//! # How Derivations Work
//!
//! A derivation runs in one of two modes, decided by whether anything is
//! watching it:
//!
//! 1. Disconnected (nobody watches): every read runs the recipe again. The
//!    result is stored along with the dependency versions it saw, but the
//!    derivation is not linked into the graph and nothing keeps it alive.
//!
//! 2. Connected (a reactor reaches it, directly or through other nodes): the
//!    derivation is linked as an observer of its dependencies and caches its
//!    result. A change upstream marks it; the next read checks whether any
//!    dependency version actually moved and recomputes only then.
//!
//! Switching from the first mode to the second needs no recomputation when
//! nothing changed in between: the versions recorded in disconnected mode
//! are compared like any others.
//!
//! # Why This Matters
//!
//! - An atom changes
//! - 10 derivations depend on it, but only 2 are watched
//! - Only those 2 are marked and re-checked
//! - A re-check that produces an equal result stops propagation there
//!
//! # Auto-cache
//!
//! [`Derivation::auto_cache`] keeps a derivation connected from its first
//! read until the end of the tick, so repeated reads in one burst of
//! imperative code share one computation.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::context::ReactiveContext;
use super::derivable::{Derivable, Observable};
use super::runtime::{self, Reactive};
use crate::error::ReactiveError;
use crate::graph::{Node, NodeHandle, NodeId, NodeKind};
use crate::state::{default_equals, states_equal, Equality, State, Value};

type Recipe<V> = Box<dyn Fn() -> Result<V, ReactiveError>>;

/// Evaluation logic shared by derivations and lenses.
pub(crate) struct DerivedCore<V: Value> {
    id: NodeId,

    /// The computation function.
    recipe: Recipe<V>,

    /// The content produced by the last evaluation.
    state: RefCell<State<V>>,

    equality: RefCell<Option<Equality<V>>>,

    auto_cache: Cell<bool>,
}

impl<V: Value> DerivedCore<V> {
    pub(crate) fn new(
        kind: NodeKind,
        recipe: Recipe<V>,
        origin: Option<&'static std::panic::Location<'static>>,
    ) -> Rc<Self> {
        let id = NodeId::new();
        let core = Rc::new(Self {
            id,
            recipe,
            state: RefCell::new(State::Unresolved),
            equality: RefCell::new(None),
            auto_cache: Cell::new(false),
        });
        let handle: Weak<dyn Reactive> = Rc::downgrade(&core) as Weak<dyn Reactive>;
        runtime::register(Node::new(id, kind, NodeHandle::Weak(handle)).with_origin(origin));
        core
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn set_equality(&self, equality: Equality<V>) {
        *self.equality.borrow_mut() = Some(equality);
    }

    pub(crate) fn set_auto_cache(&self, enabled: bool) {
        self.auto_cache.set(enabled);
    }

    /// Current content, bringing it up to date first.
    pub(crate) fn get_state(&self) -> Result<State<V>, ReactiveError> {
        let id = self.id;
        let Some((connected, is_final, evaluating)) = runtime::with_graph(|graph| {
            graph
                .get_node(id)
                .map(|node| (node.is_connected(), node.is_final(), node.is_evaluating()))
        }) else {
            return Ok(self.state.borrow().clone());
        };
        if evaluating {
            return Err(ReactiveError::Cycle(id));
        }

        if is_final {
            // Sealed content never changes.
        } else if connected {
            runtime::refresh(id)?;
        } else if self.auto_cache.get() {
            runtime::pin(id);
            runtime::refresh(id)?;
        } else {
            self.evaluate()?;
        }

        runtime::observe(id);
        let state = self.state.borrow().clone();
        runtime::settle()?;
        Ok(state)
    }

    /// Run the recipe and install what it read.
    fn evaluate(&self) -> Result<(), ReactiveError> {
        let id = self.id;
        let _guard = runtime::begin_evaluation(id)?;

        let ctx = ReactiveContext::enter(id);
        let outcome = (self.recipe)();
        let deps = ctx.finish();

        let next = State::from_outcome(outcome)?;
        let seal = runtime::all_final(&deps);
        let unchanged = self.equals(&self.state.borrow(), &next);
        if !unchanged {
            *self.state.borrow_mut() = next;
        }
        trace!(node = %id, changed = !unchanged, deps = deps.len(), "evaluated");

        runtime::install(id, deps, !unchanged || seal, seal);
        Ok(())
    }

    fn equals(&self, a: &State<V>, b: &State<V>) -> bool {
        match &*self.equality.borrow() {
            Some(eq) => states_equal(a, b, &**eq),
            None => states_equal(a, b, &default_equals::<V>),
        }
    }

    /// Cached content without bringing it up to date.
    pub(crate) fn peek(&self) -> State<V> {
        self.state.borrow().clone()
    }
}

impl<V: Value> Reactive for DerivedCore<V> {
    fn recompute(&self) -> Result<(), ReactiveError> {
        self.evaluate()
    }
}

impl<V: Value> Drop for DerivedCore<V> {
    fn drop(&mut self) {
        runtime::release(self.id);
    }
}

/// A read-only node computed from other nodes.
///
/// # Example
///
/// ```rust,ignore
/// let celsius = Atom::new(20.0);
/// let c = celsius.clone();
/// let fahrenheit = Derivation::new(move || Ok(c.get()? * 9.0 / 5.0 + 32.0));
///
/// assert_eq!(fahrenheit.get()?, 68.0);
/// ```
pub struct Derivation<V: Value> {
    core: Rc<DerivedCore<V>>,
}

impl<V: Value> Derivation<V> {
    /// Create a new derivation.
    ///
    /// The recipe is not run until the derivation is first read. Returning
    /// `Err(ReactiveError::Unresolved)` makes the derivation unresolved, and
    /// `Err(ReactiveError::Failed(..))` puts it into the error state. Any
    /// other error is raised to the reader.
    #[track_caller]
    pub fn new<F>(recipe: F) -> Self
    where
        F: Fn() -> Result<V, ReactiveError> + 'static,
    {
        let origin = runtime::caller_origin();
        Self {
            core: DerivedCore::new(NodeKind::Derivation, Box::new(recipe), origin),
        }
    }

    /// Get the derivation's unique ID.
    pub fn id(&self) -> NodeId {
        self.core.id()
    }

    /// Keep the derivation connected from its first read until the end of
    /// the tick.
    pub fn auto_cache(self) -> Self {
        self.core.set_auto_cache(true);
        self
    }

    /// Replace the comparison used to decide whether a recomputation changed
    /// anything.
    pub fn with_equality<F>(self, equals: F) -> Self
    where
        F: Fn(&V, &V) -> bool + 'static,
    {
        self.core.set_equality(Rc::new(equals));
        self
    }
}

impl<V: Value> Observable<V> for Derivation<V> {
    fn id(&self) -> NodeId {
        self.core.id()
    }

    fn get_state(&self) -> Result<State<V>, ReactiveError> {
        self.core.get_state()
    }

    fn to_derivable(&self) -> Derivable<V> {
        Derivable::Derivation(self.clone())
    }
}

impl<V: Value> Clone for Derivation<V> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<V: Value + Debug> Debug for Derivation<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivation")
            .field("id", &self.core.id())
            .field("cached", &self.core.peek())
            .field("connected", &runtime::is_connected(self.core.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{tick, Atom};

    fn counted<F>(count: &Rc<Cell<usize>>, f: F) -> Derivation<i32>
    where
        F: Fn() -> Result<i32, ReactiveError> + 'static,
    {
        let count = count.clone();
        Derivation::new(move || {
            count.set(count.get() + 1);
            f()
        })
    }

    #[test]
    fn derivation_basic() {
        let a = Atom::new(2);
        let a2 = a.clone();
        let double = Derivation::new(move || Ok(a2.get()? * 2));

        assert_eq!(double.get(), Ok(4));
        a.set(5).unwrap();
        assert_eq!(double.get(), Ok(10));
    }

    #[test]
    fn disconnected_reads_recompute_every_time() {
        let runs = Rc::new(Cell::new(0));
        let a = Atom::new(1);
        let a2 = a.clone();
        let d = counted(&runs, move || a2.get());

        d.get().unwrap();
        d.get().unwrap();
        assert_eq!(runs.get(), 2);
        assert!(!d.connected());
    }

    #[test]
    fn auto_cache_shares_within_a_tick() {
        let runs = Rc::new(Cell::new(0));
        let a = Atom::new(1);
        let a2 = a.clone();
        let d = counted(&runs, move || a2.get()).auto_cache();

        assert_eq!(d.get(), Ok(1));
        assert_eq!(d.get(), Ok(1));
        assert_eq!(runs.get(), 1);
        assert!(d.connected());

        a.set(2).unwrap();
        assert_eq!(d.get(), Ok(2));
        assert_eq!(runs.get(), 2);

        tick();
        assert!(!d.connected());
    }

    #[test]
    fn unresolved_dependency_makes_derivation_unresolved() {
        let a: Atom<i32> = Atom::unresolved();
        let a2 = a.clone();
        let d = Derivation::new(move || Ok(a2.get()? + 1));

        assert!(!d.resolved());
        assert_eq!(d.get(), Err(ReactiveError::Unresolved));
        a.set(1).unwrap();
        assert_eq!(d.get(), Ok(2));
    }

    #[test]
    fn errors_propagate_as_state() {
        let a = Atom::new(1);
        let a2 = a.clone();
        let d = Derivation::new(move || Ok(a2.get()? + 1));

        a.set_error("bad input").unwrap();
        assert!(d.errored());
        let err = d.get().unwrap_err();
        assert_eq!(
            err.cell_error().and_then(|e| e.downcast_ref::<&str>()),
            Some(&"bad input")
        );
    }

    #[test]
    fn self_read_is_a_cycle() {
        let slot: Rc<RefCell<Option<Derivation<i32>>>> = Rc::new(RefCell::new(None));
        let inner = slot.clone();
        let d = Derivation::new(move || {
            let me = inner.borrow().clone();
            match me {
                Some(me) => me.get(),
                None => Ok(0),
            }
        });
        *slot.borrow_mut() = Some(d.clone());

        assert!(matches!(d.get(), Err(ReactiveError::Cycle(_))));
        slot.borrow_mut().take();
    }

    #[test]
    fn final_dependencies_seal_the_derivation() {
        let a = Atom::new(1);
        let a2 = a.clone();
        let d = Derivation::new(move || Ok(a2.get()? * 10));

        a.set_final(3).unwrap();
        assert_eq!(d.get(), Ok(30));
        assert!(d.is_final());
    }

    #[test]
    fn derivation_without_dependencies_is_not_final() {
        let d = Derivation::new(|| Ok(1));
        assert_eq!(d.get(), Ok(1));
        assert!(!d.is_final());
    }
}
