//! Reactive Primitives
//!
//! This module implements the core reactive system: atoms, derivations,
//! lenses and reactors. Together they form a dependency graph that keeps
//! derived values consistent with their inputs and runs side effects when
//! they change.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An Atom is a container for mutable state. When an atom is read while a
//! derivation or reactor evaluates, the read is recorded as a dependency.
//! When the atom changes, everything that depends on it is marked.
//!
//! ## Derivations and Lenses
//!
//! A Derivation is a value computed by a recipe from other nodes. While
//! something watches it, it caches its result and recomputes only when a
//! dependency actually changed. A Lens is a derivation that can also be
//! written through.
//!
//! ## Reactors
//!
//! A Reactor runs a side effect with each new value of its parent node.
//! Active reactors are what keep the rest of the graph connected; anything
//! no reactor reaches is evaluated on demand and otherwise left alone.
//!
//! ## Transactions
//!
//! Writes inside [`transaction`] are seen by reactors all at once after the
//! outermost transaction commits, or not at all if it fails.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies. When a node is read, we check if there is an active
//! tracking frame and, if so, record the read there. The dependency set of
//! a node is exactly what its last evaluation read.

mod atom;
mod context;
mod derivable;
mod derivation;
mod lens;
mod reactor;
mod runtime;
mod scheduler;
mod source;
mod transaction;

pub use atom::Atom;
pub use context::{untracked, ReactiveContext};
pub use derivable::{Derivable, Observable};
pub use derivation::Derivation;
pub use lens::Lens;
pub use reactor::{Condition, ReactorHandle, ReactorOptions};
pub use runtime::{active_reactors, graph_snapshot, node_count, Reactive};
pub use scheduler::{tick, Scheduler, Task, TickQueue};
pub use source::{source, Teardown};
pub use transaction::{atomically, in_transaction, transaction};

#[cfg(test)]
pub(crate) use runtime::Inert;
