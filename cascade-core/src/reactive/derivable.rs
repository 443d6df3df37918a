//! The read interface shared by every value node.
//!
//! [`Observable`] is implemented by [`Atom`], [`Derivation`] and [`Lens`].
//! It provides reads, state inspection and the combinators that build new
//! nodes on top of existing ones. [`Derivable`] is the closed sum of the three
//! for code that stores "some node" without caring which.

use std::fmt::{self, Debug};

use super::atom::Atom;
use super::context::untracked;
use super::derivation::Derivation;
use super::lens::Lens;
use super::reactor::{self, ReactorHandle, ReactorOptions};
use super::runtime;
use crate::error::ReactiveError;
use crate::graph::NodeId;
use crate::state::{CellError, State, Value};

/// Reading from a value node.
pub trait Observable<V: Value> {
    /// The node's id in the graph.
    fn id(&self) -> NodeId;

    /// Current content, including the unresolved and error states.
    ///
    /// Only misuse (a cyclic read) is reported as `Err`.
    fn get_state(&self) -> Result<State<V>, ReactiveError>;

    /// A type-erased handle to the same node.
    fn to_derivable(&self) -> Derivable<V>;

    /// Current value.
    ///
    /// Fails with [`ReactiveError::Unresolved`] or [`ReactiveError::Failed`]
    /// when the node has no value.
    fn get(&self) -> Result<V, ReactiveError> {
        match self.get_state()? {
            State::Value(value) => Ok(value),
            State::Unresolved => Err(ReactiveError::Unresolved),
            State::Error(err) => Err(ReactiveError::Failed(runtime::annotate(self.id(), err))),
        }
    }

    /// Current value, or `fallback` when unresolved. Errors still fail.
    fn get_or(&self, fallback: V) -> Result<V, ReactiveError> {
        match self.get() {
            Err(ReactiveError::Unresolved) => Ok(fallback),
            other => other,
        }
    }

    /// Read without recording a dependency.
    fn get_untracked(&self) -> Result<V, ReactiveError> {
        untracked(|| self.get())
    }

    fn resolved(&self) -> bool {
        matches!(self.get_state(), Ok(State::Value(_)) | Ok(State::Error(_)))
    }

    fn errored(&self) -> bool {
        matches!(self.get_state(), Ok(State::Error(_)))
    }

    /// The stored error payload, if any.
    fn error(&self) -> Option<CellError> {
        match self.get_state() {
            Ok(State::Error(err)) => Some(err),
            _ => None,
        }
    }

    fn is_final(&self) -> bool {
        runtime::is_final(self.id())
    }

    /// Whether an active reactor (or an auto-cache pin) keeps this node
    /// linked into the graph.
    fn connected(&self) -> bool {
        runtime::is_connected(self.id())
    }

    /// A boolean node tracking [`connected`](Observable::connected).
    fn connected_flag(&self) -> Derivation<bool> {
        let flag = runtime::connected_flag(self.id());
        Derivation::new(move || flag.get())
    }

    /// Derive a new node by applying `f` to this node's value.
    fn map<W, F>(&self, f: F) -> Derivation<W>
    where
        W: Value,
        F: Fn(&V) -> W + 'static,
    {
        let parent = self.to_derivable();
        Derivation::new(move || Ok(f(&parent.get()?)))
    }

    /// Derive a new node from this node's full state.
    fn derive<W, F>(&self, f: F) -> Derivation<W>
    where
        W: Value,
        F: Fn(State<V>) -> Result<W, ReactiveError> + 'static,
    {
        let parent = self.to_derivable();
        Derivation::new(move || f(parent.get_state()?))
    }

    /// A boolean node: does this node equal `value`?
    fn is(&self, value: V) -> Derivation<bool> {
        self.map(move |current| crate::state::default_equals(current, &value))
    }

    /// Run `reaction` for every new value, until stopped.
    fn react<F>(&self, reaction: F) -> Result<ReactorHandle, ReactiveError>
    where
        F: FnMut(&V) + 'static,
    {
        reactor::start(self.to_derivable(), Box::new(reaction), ReactorOptions::default())
    }

    /// Like [`react`](Observable::react), with lifecycle options.
    fn react_with<F>(
        &self,
        reaction: F,
        options: ReactorOptions<V>,
    ) -> Result<ReactorHandle, ReactiveError>
    where
        F: FnMut(&V) + 'static,
    {
        reactor::start(self.to_derivable(), Box::new(reaction), options)
    }
}

impl Derivation<bool> {
    /// Logical negation.
    pub fn not(&self) -> Derivation<bool> {
        self.map(|value| !value)
    }
}

/// Any value node.
pub enum Derivable<V: Value> {
    Atom(Atom<V>),
    Derivation(Derivation<V>),
    Lens(Lens<V>),
}

impl<V: Value> Derivable<V> {
    /// Write through the node. Derivations have no write path.
    pub fn set(&self, value: V) -> Result<(), ReactiveError> {
        match self {
            Self::Atom(atom) => atom.set(value),
            Self::Lens(lens) => lens.set(value),
            Self::Derivation(derivation) => Err(ReactiveError::ReadOnly(derivation.id())),
        }
    }

    pub fn is_settable(&self) -> bool {
        !matches!(self, Self::Derivation(_))
    }
}

impl<V: Value> Observable<V> for Derivable<V> {
    fn id(&self) -> NodeId {
        match self {
            Self::Atom(atom) => atom.id(),
            Self::Derivation(derivation) => derivation.id(),
            Self::Lens(lens) => lens.id(),
        }
    }

    fn get_state(&self) -> Result<State<V>, ReactiveError> {
        match self {
            Self::Atom(atom) => atom.get_state(),
            Self::Derivation(derivation) => derivation.get_state(),
            Self::Lens(lens) => lens.get_state(),
        }
    }

    fn to_derivable(&self) -> Derivable<V> {
        self.clone()
    }
}

impl<V: Value> Clone for Derivable<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Atom(atom) => Self::Atom(atom.clone()),
            Self::Derivation(derivation) => Self::Derivation(derivation.clone()),
            Self::Lens(lens) => Self::Lens(lens.clone()),
        }
    }
}

impl<V: Value> From<Atom<V>> for Derivable<V> {
    fn from(atom: Atom<V>) -> Self {
        Self::Atom(atom)
    }
}

impl<V: Value> From<Derivation<V>> for Derivable<V> {
    fn from(derivation: Derivation<V>) -> Self {
        Self::Derivation(derivation)
    }
}

impl<V: Value> From<Lens<V>> for Derivable<V> {
    fn from(lens: Lens<V>) -> Self {
        Self::Lens(lens)
    }
}

impl<V: Value + Debug> Debug for Derivable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(atom) => atom.fmt(f),
            Self::Derivation(derivation) => derivation.fmt(f),
            Self::Lens(lens) => lens.fmt(f),
        }
    }
}
