//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between
//! reactive values and the computations that read them.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent atoms, derivations, lenses and reactors
//! - Edges represent reads: if A read B during its last evaluation, B is a
//!   dependency of A and, while A is connected, A is an observer of B
//!
//! When an atom changes we walk the observer edges to find all affected
//! nodes and mark them dirty. Reactors then pull their inputs up to date,
//! and each node decides by comparing dependency versions whether it
//! actually has to recompute.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a central arena keyed by [`NodeId`] rather than pointing
//!    at each other. Observer/dependency cycles are plain id sets, so there
//!    are no reference cycles to leak and no dangling pointers to chase.
//!
//! 2. Only connected nodes hold observer links. A node nobody watches
//!    keeps its recorded dependencies (for a later reconnect) but is
//!    invisible to propagation.
//!
//! 3. We maintain both forward (dependencies) and reverse (observers) edges
//!    to enable efficient traversal in both directions.

mod node;
mod snapshot;
mod store;

pub use node::{DirtyState, Node, NodeHandle, NodeId, NodeKind};
pub use snapshot::{GraphSnapshot, NodeSnapshot};
pub use store::{ConnectionEvent, Graph};
