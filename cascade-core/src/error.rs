//! Error types for the reactive runtime.
//!
//! Three kinds of failure flow through the graph:
//!
//! - The unresolved signal. Not an error state; a derivation that hits it
//!   becomes unresolved itself.
//! - Wrapped error payloads ([`CellError`]), set explicitly on an atom or
//!   produced by a recipe. They propagate through derived nodes as state.
//! - Programming misuse (writing to a final node, cyclic reads). These are
//!   raised synchronously and never stored in a node.

use thiserror::Error;

use crate::graph::NodeId;
use crate::state::CellError;

/// Errors surfaced by reads, writes, transactions and reactors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// The node has no value yet.
    #[error("value is unresolved")]
    Unresolved,

    /// The node (or one of its dependencies) holds an error payload.
    #[error(transparent)]
    Failed(CellError),

    /// A write targeted a node that has been sealed as final.
    #[error("cannot write to final node {0}")]
    FinalWrite(NodeId),

    /// A write targeted a node without a write path.
    #[error("node {0} is read-only")]
    ReadOnly(NodeId),

    /// A node was read while it was being evaluated.
    #[error("cyclic read of node {0} during its own evaluation")]
    Cycle(NodeId),
}

impl ReactiveError {
    /// Wrap an arbitrary payload as a [`ReactiveError::Failed`].
    pub fn failed<P>(payload: P) -> Self
    where
        P: std::fmt::Debug + std::fmt::Display + PartialEq + 'static,
    {
        Self::Failed(CellError::new(payload))
    }

    /// True for errors that indicate incorrect use of the API rather than a
    /// state carried by the graph.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::FinalWrite(_) | Self::ReadOnly(_) | Self::Cycle(_)
        )
    }

    /// The wrapped payload, if this is a [`ReactiveError::Failed`].
    pub fn cell_error(&self) -> Option<&CellError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CellError> for ReactiveError {
    fn from(err: CellError) -> Self {
        Self::Failed(err)
    }
}
