//! Node State Model
//!
//! Every node in the graph holds exactly one [`State`]: a plain value, the
//! unresolved marker, or a wrapped error. Finality is layered on top: a node
//! written with a [`FinalWrapper`] will never change again.
//!
//! # Errors as state
//!
//! Error payloads are type-erased behind [`CellError`] so that a derivation
//! over `i32` can carry an error produced by an atom of `String`. Two
//! `CellError`s are equal when their payloads have the same type and compare
//! equal, which lets the equality dedup gates suppress repeated identical
//! errors the same way they suppress repeated values.

mod equality;

use std::any::Any;
use std::fmt::{self, Debug, Display};
use std::panic::Location;
use std::rc::Rc;

use crate::error::ReactiveError;

pub use equality::{default_equals, states_equal, Equality};

/// Bound shared by every value stored in the graph.
pub trait Value: Clone + PartialEq + 'static {}

impl<T> Value for T where T: Clone + PartialEq + 'static {}

/// Object-safe view of an error payload.
trait ErrorPayload: Debug + Display {
    fn as_any(&self) -> &dyn Any;
    fn payload_eq(&self, other: &dyn ErrorPayload) -> bool;
}

impl<T> ErrorPayload for T
where
    T: Debug + Display + PartialEq + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn payload_eq(&self, other: &dyn ErrorPayload) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// An error payload carried by a node.
///
/// Cheap to clone; the payload is shared.
#[derive(Clone)]
pub struct CellError {
    payload: Rc<dyn ErrorPayload>,
    /// Creation sites of the nodes this error passed through (debug mode).
    trace: Vec<&'static Location<'static>>,
}

impl CellError {
    /// Wrap a payload.
    pub fn new<P>(payload: P) -> Self
    where
        P: Debug + Display + PartialEq + 'static,
    {
        Self {
            payload: Rc::new(payload),
            trace: Vec::new(),
        }
    }

    /// Borrow the payload as `P`, if that is its type.
    pub fn downcast_ref<P: 'static>(&self) -> Option<&P> {
        self.payload.as_any().downcast_ref::<P>()
    }

    /// Creation sites appended while the error travelled through nodes.
    pub fn trace(&self) -> &[&'static Location<'static>] {
        &self.trace
    }

    /// Return a copy with `origin` appended to the trace.
    pub(crate) fn with_origin(mut self, origin: &'static Location<'static>) -> Self {
        if !self.trace.contains(&origin) {
            self.trace.push(origin);
        }
        self
    }
}

impl PartialEq for CellError {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.payload, &other.payload)
            || self.payload.payload_eq(other.payload.as_ref())
    }
}

impl Debug for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellError")
            .field("payload", &self.payload)
            .field("trace", &self.trace)
            .finish()
    }
}

impl Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.payload, f)?;
        for origin in &self.trace {
            write!(f, "\n    via node created at {origin}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CellError {}

/// The content of a node.
#[derive(Clone, Debug)]
pub enum State<V> {
    /// A plain value.
    Value(V),
    /// No value yet.
    Unresolved,
    /// An error payload.
    Error(CellError),
}

impl<V> State<V> {
    /// Wrap an error payload.
    pub fn error<P>(payload: P) -> Self
    where
        P: Debug + Display + PartialEq + 'static,
    {
        Self::Error(CellError::new(payload))
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The plain value, if there is one.
    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The error payload, if there is one.
    pub fn cell_error(&self) -> Option<&CellError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Convert to the `get()` contract: values pass, unresolved and errors raise.
    pub fn into_result(self) -> Result<V, ReactiveError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Unresolved => Err(ReactiveError::Unresolved),
            Self::Error(err) => Err(ReactiveError::Failed(err)),
        }
    }

    /// Map the plain value, keeping unresolved and error states as they are.
    pub fn map<W>(self, f: impl FnOnce(V) -> W) -> State<W> {
        match self {
            Self::Value(value) => State::Value(f(value)),
            Self::Unresolved => State::Unresolved,
            Self::Error(err) => State::Error(err),
        }
    }

    /// Build a state from a recipe outcome.
    ///
    /// Unresolved and failed outcomes become states; misuse errors are
    /// handed back so they can be raised.
    pub fn from_outcome(outcome: Result<V, ReactiveError>) -> Result<Self, ReactiveError> {
        match outcome {
            Ok(value) => Ok(Self::Value(value)),
            Err(ReactiveError::Unresolved) => Ok(Self::Unresolved),
            Err(ReactiveError::Failed(err)) => Ok(Self::Error(err)),
            Err(misuse) => Err(misuse),
        }
    }
}

impl<V: PartialEq> PartialEq for State<V> {
    fn eq(&self, other: &Self) -> bool {
        states_equal(self, other, &|a: &V, b: &V| a == b)
    }
}

impl<V> From<V> for State<V> {
    fn from(value: V) -> Self {
        Self::Value(value)
    }
}

/// An immutable seal around a state.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalWrapper<V> {
    state: State<V>,
}

impl<V> FinalWrapper<V> {
    pub fn wrap(state: State<V>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &State<V> {
        &self.state
    }

    pub fn into_inner(self) -> State<V> {
        self.state
    }
}

/// Input accepted by [`Atom::set_state`](crate::reactive::Atom::set_state).
#[derive(Clone, Debug)]
pub enum Update<V> {
    /// Replace the content; the node stays writable.
    Live(State<V>),
    /// Replace the content and seal the node.
    Final(FinalWrapper<V>),
}

impl<V> Update<V> {
    pub(crate) fn into_parts(self) -> (State<V>, bool) {
        match self {
            Self::Live(state) => (state, false),
            Self::Final(sealed) => (sealed.into_inner(), true),
        }
    }
}

impl<V> From<State<V>> for Update<V> {
    fn from(state: State<V>) -> Self {
        Self::Live(state)
    }
}

impl<V> From<FinalWrapper<V>> for Update<V> {
    fn from(sealed: FinalWrapper<V>) -> Self {
        Self::Final(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Code(u32);

    impl Display for Code {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "code {}", self.0)
        }
    }

    #[test]
    fn errors_compare_by_payload() {
        assert_eq!(CellError::new("E"), CellError::new("E"));
        assert_ne!(CellError::new("E"), CellError::new("F"));
        assert_eq!(CellError::new(Code(7)), CellError::new(Code(7)));
        // Same display, different payload type.
        assert_ne!(CellError::new(Code(7)), CellError::new("code 7".to_string()));
    }

    #[test]
    fn trace_does_not_affect_equality() {
        let plain = CellError::new("E");
        let traced = plain.clone().with_origin(Location::caller());
        assert_eq!(plain, traced);
        assert_eq!(traced.trace().len(), 1);
        assert!(traced.to_string().starts_with("E\n"));
    }

    #[test]
    fn state_equality() {
        assert_eq!(State::Value(1), State::Value(1));
        assert_ne!(State::Value(1), State::Value(2));
        assert_eq!(State::<i32>::Unresolved, State::Unresolved);
        assert_ne!(State::Value(1), State::Unresolved);
        assert_eq!(State::<i32>::error("E"), State::error("E"));
        assert_ne!(State::<i32>::error("E"), State::Unresolved);
    }

    #[test]
    fn into_result_follows_get_contract() {
        assert_eq!(State::Value(3).into_result().ok(), Some(3));
        assert!(matches!(
            State::<i32>::Unresolved.into_result(),
            Err(ReactiveError::Unresolved)
        ));
        match State::<i32>::error("E").into_result() {
            Err(ReactiveError::Failed(err)) => assert_eq!(err, CellError::new("E")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn outcome_keeps_misuse_out_of_state() {
        assert!(matches!(
            State::<i32>::from_outcome(Err(ReactiveError::Unresolved)),
            Ok(State::Unresolved)
        ));
        let misuse = State::<i32>::from_outcome(Err(ReactiveError::Cycle(1.into())));
        assert!(matches!(misuse, Err(ReactiveError::Cycle(_))));
    }

    #[test]
    fn update_parts() {
        let (state, sealed) = Update::from(FinalWrapper::wrap(State::Value(1))).into_parts();
        assert!(sealed);
        assert_eq!(state, State::Value(1));
        let (_, sealed) = Update::from(State::Value(1)).into_parts();
        assert!(!sealed);
    }
}
