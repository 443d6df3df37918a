//! Reactor Implementation
//!
//! A Reactor is a side-effecting observer attached to one value node (its
//! parent). It is the only kind of node that keeps other nodes connected.
//!
//! # How Reactors Work
//!
//! 1. When created, the reactor runs once to establish its dependencies.
//!
//! 2. When anything it read changes, the reactor is queued. Queued reactors
//!    run after the outermost write (or transaction) that caused the change.
//!
//! 3. Each run re-reads the lifecycle conditions and the parent, records the
//!    new dependency set, and delivers the parent's value to the reaction if
//!    the parent's state differs from the one seen on the previous run.
//!
//! # Lifecycle Conditions
//!
//! Checked in this order on every run:
//!
//! - `from`: until it first holds, the reactor stays dormant. Checked only
//!   before the first start.
//! - `until`: once it holds, the reactor stops for good.
//! - `when`: while it does not hold, the reactor idles.
//! - `skip_first`: the first value that passes `when` is swallowed.
//! - `once`: the reactor stops after its first delivery.
//!
//! A condition that is unresolved counts as false. A reactor whose
//! dependencies have all become final stops on its own, since nothing it
//! reads can change any more.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use super::atom::Atom;
use super::context::{untracked, ReactiveContext};
use super::derivable::{Derivable, Observable};
use super::derivation::Derivation;
use super::lens::Lens;
use super::runtime::{self, Reactive};
use crate::error::ReactiveError;
use crate::graph::{Node, NodeHandle, NodeId, NodeKind};
use crate::state::{default_equals, states_equal, CellError, State, Value};

type ParentCondition<V> = Box<dyn FnOnce(&Derivable<V>) -> Derivable<bool>>;

/// A lifecycle condition for a reactor.
pub enum Condition<V: Value> {
    /// Always or never holds.
    Constant(bool),
    /// Holds while the node is `true`.
    Node(Derivable<bool>),
    /// A node built from the reactor's parent when the reactor starts.
    FromParent(ParentCondition<V>),
}

impl<V: Value> Condition<V> {
    /// Build the condition from the parent node.
    ///
    /// ```rust,ignore
    /// ReactorOptions::new().until(Condition::from_parent(|p| p.is(0)))
    /// ```
    pub fn from_parent<F, D>(build: F) -> Self
    where
        F: FnOnce(&Derivable<V>) -> D + 'static,
        D: Into<Derivable<bool>>,
    {
        Self::FromParent(Box::new(move |parent| build(parent).into()))
    }

    fn resolve(self, parent: &Derivable<V>) -> Gate {
        match self {
            Self::Constant(value) => Gate::Constant(value),
            Self::Node(node) => Gate::Node(node),
            Self::FromParent(build) => Gate::Node(build(parent)),
        }
    }
}

impl<V: Value> From<bool> for Condition<V> {
    fn from(value: bool) -> Self {
        Self::Constant(value)
    }
}

impl<V: Value> From<Derivable<bool>> for Condition<V> {
    fn from(node: Derivable<bool>) -> Self {
        Self::Node(node)
    }
}

impl<V: Value> From<Atom<bool>> for Condition<V> {
    fn from(node: Atom<bool>) -> Self {
        Self::Node(node.into())
    }
}

impl<V: Value> From<Derivation<bool>> for Condition<V> {
    fn from(node: Derivation<bool>) -> Self {
        Self::Node(node.into())
    }
}

impl<V: Value> From<Lens<bool>> for Condition<V> {
    fn from(node: Lens<bool>) -> Self {
        Self::Node(node.into())
    }
}

/// A resolved condition.
#[derive(Clone)]
enum Gate {
    Constant(bool),
    Node(Derivable<bool>),
}

impl Gate {
    fn state(&self) -> Result<State<bool>, ReactiveError> {
        match self {
            Self::Constant(value) => Ok(State::Value(*value)),
            Self::Node(node) => node.get_state(),
        }
    }
}

/// Options controlling when a reactor fires and when it stops.
pub struct ReactorOptions<V: Value> {
    from: Condition<V>,
    until: Condition<V>,
    when: Condition<V>,
    once: bool,
    skip_first: bool,
    stop_on_error: bool,
    on_error: Option<Box<dyn FnMut(&CellError)>>,
    after_shutdown: Option<Box<dyn FnOnce()>>,
}

impl<V: Value> Default for ReactorOptions<V> {
    fn default() -> Self {
        Self {
            from: Condition::Constant(true),
            until: Condition::Constant(false),
            when: Condition::Constant(true),
            once: false,
            skip_first: false,
            stop_on_error: false,
            on_error: None,
            after_shutdown: None,
        }
    }
}

impl<V: Value> ReactorOptions<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stay dormant until `condition` first holds.
    pub fn from(mut self, condition: impl Into<Condition<V>>) -> Self {
        self.from = condition.into();
        self
    }

    /// Stop as soon as `condition` holds.
    pub fn until(mut self, condition: impl Into<Condition<V>>) -> Self {
        self.until = condition.into();
        self
    }

    /// Only deliver while `condition` holds.
    pub fn when(mut self, condition: impl Into<Condition<V>>) -> Self {
        self.when = condition.into();
        self
    }

    /// Stop after the first delivery.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Swallow the first value that would be delivered.
    pub fn skip_first(mut self) -> Self {
        self.skip_first = true;
        self
    }

    /// Stop after handing an error to the `on_error` handler.
    pub fn stop_on_error(mut self) -> Self {
        self.stop_on_error = true;
        self
    }

    /// Handle error states of the parent or a condition. Without a handler,
    /// an error stops the reactor and is raised to whoever caused it.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&CellError) + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Called exactly once when the reactor stops, for whatever reason.
    pub fn after_shutdown<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        self.after_shutdown = Some(Box::new(callback));
        self
    }
}

/// What one run decided to do.
enum Step<V> {
    Idle,
    Deliver(V),
    Stop,
    Failed(CellError),
}

struct ReactorCore<V: Value> {
    id: NodeId,
    parent: Derivable<V>,
    reaction: RefCell<Box<dyn FnMut(&V)>>,

    /// Pending start condition. Cleared once it held.
    from: RefCell<Option<Gate>>,
    until: Gate,
    when: Gate,

    once: bool,
    skip_first: bool,
    stop_on_error: bool,

    /// Set once the value `skip_first` swallows has gone by.
    skipped: Cell<bool>,

    /// Parent state seen by the last run that got past the conditions.
    last: RefCell<Option<State<V>>>,

    on_error: RefCell<Option<Box<dyn FnMut(&CellError)>>>,
    after_shutdown: RefCell<Option<Box<dyn FnOnce()>>>,

    stopped: Cell<bool>,

    /// Number of times the reaction has been called.
    run_count: Cell<usize>,
}

impl<V: Value> ReactorCore<V> {
    fn step(&self) -> Result<Step<V>, ReactiveError> {
        let from = self.from.borrow().clone();
        if let Some(from) = from {
            match from.state()? {
                State::Value(true) => {
                    trace!(reactor = %self.id, "start condition met");
                    self.from.borrow_mut().take();
                }
                State::Error(err) => return Ok(Step::Failed(err)),
                State::Value(false) | State::Unresolved => return Ok(Step::Idle),
            }
        }

        match self.until.state()? {
            State::Value(true) => return Ok(Step::Stop),
            State::Error(err) => return Ok(Step::Failed(err)),
            State::Value(false) | State::Unresolved => {}
        }

        match self.when.state()? {
            State::Value(true) => {}
            State::Error(err) => return Ok(Step::Failed(err)),
            State::Value(false) | State::Unresolved => return Ok(Step::Idle),
        }

        let state = self.parent.get_state()?;
        let repeated = self
            .last
            .borrow()
            .as_ref()
            .is_some_and(|last| states_equal(last, &state, &default_equals::<V>));
        if repeated {
            return Ok(Step::Idle);
        }
        *self.last.borrow_mut() = Some(state.clone());

        let value = match state {
            State::Value(value) => value,
            State::Unresolved => return Ok(Step::Idle),
            State::Error(err) => return Ok(Step::Failed(err)),
        };

        if self.skip_first && !self.skipped.replace(true) {
            trace!(reactor = %self.id, "first value skipped");
            return Ok(Step::Idle);
        }
        Ok(Step::Deliver(value))
    }

    fn run(&self) -> Result<(), ReactiveError> {
        if self.stopped.get() {
            return Ok(());
        }

        let ctx = ReactiveContext::enter(self.id);
        let step = self.step();
        let deps = ctx.finish();

        let step = match step {
            Ok(step) => step,
            Err(err) => {
                self.shutdown();
                return Err(err);
            }
        };
        let sources_final = runtime::all_final(&deps);
        runtime::install(self.id, deps, false, false);

        match step {
            Step::Idle => {}
            Step::Deliver(value) => {
                self.run_count.set(self.run_count.get() + 1);
                trace!(reactor = %self.id, "deliver");
                untracked(|| {
                    let mut reaction = self.reaction.borrow_mut();
                    (*reaction)(&value)
                });
                if self.once {
                    self.shutdown();
                    return Ok(());
                }
            }
            Step::Stop => {
                self.shutdown();
                return Ok(());
            }
            Step::Failed(err) => {
                let handler = self.on_error.borrow_mut().take();
                let Some(mut handler) = handler else {
                    self.shutdown();
                    return Err(ReactiveError::Failed(runtime::annotate(self.id, err)));
                };
                untracked(|| handler(&err));
                if self.stop_on_error {
                    self.shutdown();
                    return Ok(());
                }
                *self.on_error.borrow_mut() = Some(handler);
            }
        }

        if sources_final && !self.stopped.get() {
            debug!(reactor = %self.id, "all dependencies final");
            self.shutdown();
        }
        Ok(())
    }

    /// Stop the reactor. Idempotent.
    ///
    /// Callers hold a strong reference, so removing the graph's entry does
    /// not free `self`.
    fn shutdown(&self) {
        if self.stopped.replace(true) {
            return;
        }
        let entry = runtime::remove_reactor(self.id);
        debug!(reactor = %self.id, runs = self.run_count.get(), "reactor stopped");

        let callback = self.after_shutdown.borrow_mut().take();
        if let Some(callback) = callback {
            untracked(callback);
        }
        drop(entry);
    }
}

impl<V: Value> Reactive for ReactorCore<V> {
    fn recompute(&self) -> Result<(), ReactiveError> {
        self.run()
    }
}

/// Type-erased control surface used by [`ReactorHandle`].
trait ReactorControl {
    fn stop(&self);
    fn is_active(&self) -> bool;
    fn run_count(&self) -> usize;
    fn id(&self) -> NodeId;
}

impl<V: Value> ReactorControl for ReactorCore<V> {
    fn stop(&self) {
        self.shutdown();
    }

    fn is_active(&self) -> bool {
        !self.stopped.get()
    }

    fn run_count(&self) -> usize {
        self.run_count.get()
    }

    fn id(&self) -> NodeId {
        self.id
    }
}

/// Handle to a running reactor.
///
/// Dropping the handle does not stop the reactor; it keeps running until a
/// stop condition is met or [`stop`](ReactorHandle::stop) is called.
#[derive(Clone)]
pub struct ReactorHandle {
    control: Rc<dyn ReactorControl>,
}

impl ReactorHandle {
    /// Stop the reactor. Calling it again does nothing.
    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_active(&self) -> bool {
        self.control.is_active()
    }

    /// How many times the reaction has been called.
    pub fn run_count(&self) -> usize {
        self.control.run_count()
    }

    pub fn id(&self) -> NodeId {
        self.control.id()
    }
}

impl fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("id", &self.control.id())
            .field("active", &self.control.is_active())
            .field("run_count", &self.control.run_count())
            .finish()
    }
}

/// Create a reactor on `parent` and run it once.
#[track_caller]
pub(crate) fn start<V: Value>(
    parent: Derivable<V>,
    reaction: Box<dyn FnMut(&V)>,
    options: ReactorOptions<V>,
) -> Result<ReactorHandle, ReactiveError> {
    let origin = runtime::caller_origin();
    let ReactorOptions {
        from,
        until,
        when,
        once,
        skip_first,
        stop_on_error,
        on_error,
        after_shutdown,
    } = options;

    let from = match from.resolve(&parent) {
        Gate::Constant(true) => None,
        gate => Some(gate),
    };
    let until = until.resolve(&parent);
    let when = when.resolve(&parent);

    let id = NodeId::new();
    let core = Rc::new(ReactorCore {
        id,
        parent,
        reaction: RefCell::new(reaction),
        from: RefCell::new(from),
        until,
        when,
        once,
        skip_first,
        stop_on_error,
        skipped: Cell::new(false),
        last: RefCell::new(None),
        on_error: RefCell::new(on_error),
        after_shutdown: RefCell::new(after_shutdown),
        stopped: Cell::new(false),
        run_count: Cell::new(0),
    });

    let behavior: Rc<dyn Reactive> = core.clone();
    runtime::register(Node::new(id, NodeKind::Reactor, NodeHandle::Owned(behavior)).with_origin(origin));
    debug!(reactor = %id, "reactor started");

    runtime::batch(|| runtime::refresh(id))?;
    runtime::settle()?;
    Ok(ReactorHandle { control: core })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<V: Value>() -> (Rc<RefCell<Vec<V>>>, impl FnMut(&V) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, move |value: &V| sink.borrow_mut().push(value.clone()))
    }

    #[test]
    fn reactor_runs_initially_and_on_change() {
        let a = Atom::new(1);
        let (log, sink) = recorder::<i32>();
        let handle = a.react(sink).unwrap();

        a.set(2).unwrap();
        a.set(2).unwrap();
        a.set(3).unwrap();

        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert_eq!(handle.run_count(), 3);
        assert!(handle.is_active());
    }

    #[test]
    fn reactor_waits_for_resolution() {
        let a: Atom<i32> = Atom::unresolved();
        let (log, sink) = recorder::<i32>();
        let _handle = a.react(sink).unwrap();
        assert!(log.borrow().is_empty());

        a.set(5).unwrap();
        assert_eq!(*log.borrow(), vec![5]);
    }

    #[test]
    fn stop_is_idempotent_and_disconnects() {
        let a = Atom::new(0);
        let shutdowns = Rc::new(Cell::new(0));
        let counter = shutdowns.clone();
        let (log, sink) = recorder::<i32>();
        let handle = a
            .react_with(
                sink,
                ReactorOptions::new().after_shutdown(move || counter.set(counter.get() + 1)),
            )
            .unwrap();
        assert!(a.connected());
        assert_eq!(runtime::active_reactors(), 1);

        handle.stop();
        handle.stop();
        assert_eq!(runtime::active_reactors(), 0);
        assert!(!handle.is_active());
        assert_eq!(shutdowns.get(), 1);

        a.set(1).unwrap();
        assert_eq!(*log.borrow(), vec![0]);

        crate::reactive::tick();
        assert!(!a.connected());
    }

    #[test]
    fn until_stops_the_reactor() {
        let a = Atom::new(1);
        let (log, sink) = recorder::<i32>();
        let handle = a
            .react_with(sink, ReactorOptions::new().until(Condition::from_parent(|p: &Derivable<i32>| p.is(3))))
            .unwrap();

        a.set(2).unwrap();
        a.set(3).unwrap();
        a.set(4).unwrap();

        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(!handle.is_active());
    }

    #[test]
    fn when_gates_delivery() {
        let a = Atom::new(1);
        let enabled = Atom::new(false);
        let (log, sink) = recorder::<i32>();
        let _handle = a
            .react_with(sink, ReactorOptions::new().when(enabled.clone()))
            .unwrap();

        a.set(2).unwrap();
        enabled.set(true).unwrap();
        a.set(3).unwrap();
        enabled.set(false).unwrap();
        a.set(4).unwrap();

        assert_eq!(*log.borrow(), vec![2, 3]);
    }

    #[test]
    fn error_without_handler_stops_and_raises() {
        let a = Atom::new(1);
        let (log, sink) = recorder::<i32>();
        let handle = a.react(sink).unwrap();

        let err = a.set_error("boom").unwrap_err();
        assert_eq!(
            err.cell_error().and_then(|e| e.downcast_ref::<&str>()),
            Some(&"boom")
        );
        assert!(!handle.is_active());
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn error_handler_keeps_reactor_alive() {
        let a = Atom::new(1);
        let errors = Rc::new(Cell::new(0));
        let seen = errors.clone();
        let (log, sink) = recorder::<i32>();
        let handle = a
            .react_with(sink, ReactorOptions::new().on_error(move |_| seen.set(seen.get() + 1)))
            .unwrap();

        a.set_error("boom").unwrap();
        a.set(2).unwrap();

        assert_eq!(errors.get(), 1);
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(handle.is_active());
    }

    #[test]
    fn value_after_error_is_delivered_again() {
        let a = Atom::new(1);
        let (log, sink) = recorder::<i32>();
        let _handle = a
            .react_with(sink, ReactorOptions::new().on_error(|_| {}))
            .unwrap();

        a.set_error("E").unwrap();
        a.set(1).unwrap();

        assert_eq!(*log.borrow(), vec![1, 1]);
    }

    #[test]
    fn value_after_unset_is_delivered_again() {
        let a = Atom::new(1);
        let (log, sink) = recorder::<i32>();
        let _handle = a.react(sink).unwrap();

        a.unset().unwrap();
        a.set(1).unwrap();

        assert_eq!(*log.borrow(), vec![1, 1]);
    }

    #[test]
    fn repeated_error_reaches_handler_once() {
        let a = Atom::new(1);
        let enabled = Atom::new(true);
        let errors = Rc::new(Cell::new(0));
        let seen = errors.clone();
        let (log, sink) = recorder::<i32>();
        let _handle = a
            .react_with(
                sink,
                ReactorOptions::new()
                    .when(enabled.clone())
                    .on_error(move |_| seen.set(seen.get() + 1)),
            )
            .unwrap();

        a.set_error("E").unwrap();
        enabled.set(false).unwrap();
        enabled.set(true).unwrap();
        assert_eq!(errors.get(), 1);

        a.set_error("F").unwrap();
        assert_eq!(errors.get(), 2);

        a.set(1).unwrap();
        assert_eq!(*log.borrow(), vec![1, 1]);
    }

    #[test]
    fn stop_on_error_stops_after_handler() {
        let a = Atom::new(1);
        let (_log, sink) = recorder::<i32>();
        let handle = a
            .react_with(
                sink,
                ReactorOptions::new().on_error(|_| {}).stop_on_error(),
            )
            .unwrap();

        a.set_error("boom").unwrap();
        assert!(!handle.is_active());
    }

    #[test]
    fn final_parent_stops_reactor() {
        let a = Atom::new(1);
        let (log, sink) = recorder::<i32>();
        let handle = a.react(sink).unwrap();

        a.set_final(2).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(!handle.is_active());
    }
}
