//! Cascade Core
//!
//! This crate provides a synchronous, dependency-tracking reactive value
//! runtime. It implements:
//!
//! - Reactive primitives (atoms, derivations, lenses, reactors)
//! - Automatic dependency discovery and minimal recomputation
//! - Transactions with rollback
//! - An explicit state model: value, unresolved, error, and finality
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, dependency tracking and transactions
//! - `graph`: The dependency graph the primitives are registered in
//! - `state`: Node content (value, unresolved, error) and equality
//! - `error`: Errors raised by reads, writes and reactors
//! - `config`: Per-thread settings (debug mode, equality, scheduler)
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::prelude::*;
//!
//! // Create an atom
//! let count = Atom::new(0);
//!
//! // Create a derived value
//! let doubled = count.map(|v| v * 2);
//!
//! // Create a reactor
//! let handle = doubled.react(|v| println!("Doubled: {v}"))?;
//!
//! // Update the atom
//! count.set(5)?;
//! // Reactor runs, prints: "Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod state;

pub use error::ReactiveError;

/// Everything needed to build and observe a graph.
pub mod prelude {
    pub use crate::error::ReactiveError;
    pub use crate::reactive::{
        atomically, source, tick, transaction, untracked, Atom, Condition, Derivable, Derivation,
        Lens, Observable, ReactorHandle, ReactorOptions, Teardown,
    };
    pub use crate::state::{CellError, FinalWrapper, State, Update};
}
