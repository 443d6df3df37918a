//! Reactive Context
//!
//! The reactive context records which nodes are read while a computation
//! runs. This enables automatic dependency tracking: when a node is read,
//! it is appended to the innermost recording frame.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a frame pushes it; the
//! returned guard pops it when finished or dropped, so the stack stays
//! balanced even if the computation panics.
//!
//! Frames nest. A derivation evaluated while another one is recording gets
//! its own frame, and its reads do not leak into the outer one. The outer
//! frame only records the derivation itself. This is what makes dependency
//! discovery independent of how the recipe is split into ordinary functions.

use std::cell::RefCell;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The node being evaluated, or `None` for an untracked frame.
    owner: Option<NodeId>,
    /// Nodes read so far, with the version observed. First read wins.
    dependencies: SmallVec<[(NodeId, u64); 8]>,
}

/// Guard for one recording frame.
#[derive(Debug)]
pub struct ReactiveContext {
    owner: Option<NodeId>,
    popped: bool,
}

impl ReactiveContext {
    /// Start recording reads on behalf of `owner`.
    pub fn enter(owner: NodeId) -> Self {
        Self::push(Some(owner))
    }

    /// Start a frame in which reads are not recorded.
    pub fn enter_untracked() -> Self {
        Self::push(None)
    }

    fn push(owner: Option<NodeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                owner,
                dependencies: SmallVec::new(),
            });
        });

        Self {
            owner,
            popped: false,
        }
    }

    /// Check if reads are currently being recorded.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.owner.is_some())
        })
    }

    /// Check if any frame on the stack belongs to a node, even when an
    /// untracked frame sits on top of it.
    pub fn is_evaluating() -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().any(|entry| entry.owner.is_some()))
    }

    /// Get the node currently being evaluated, if any.
    pub fn current_owner() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.owner))
    }

    /// Record a read of `node` at `version` in the innermost frame.
    pub fn track_dependency(node: NodeId, version: u64) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.owner.is_none() {
                    return;
                }
                if !entry.dependencies.iter().any(|(id, _)| *id == node) {
                    entry.dependencies.push((node, version));
                }
            }
        });
    }

    /// Stop recording and return what was read, in read order.
    pub fn finish(mut self) -> IndexMap<NodeId, u64> {
        let entry = self.pop();
        entry
            .map(|entry| entry.dependencies.into_iter().collect())
            .unwrap_or_default()
    }

    fn pop(&mut self) -> Option<ContextEntry> {
        if self.popped {
            return None;
        }
        self.popped = true;
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right context.
            // This helps catch bugs where contexts are mismatched.
            if let Some(entry) = &popped {
                debug_assert_eq!(
                    entry.owner, self.owner,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.owner, entry.owner
                );
            }
            popped
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        self.pop();
    }
}

/// Run `f` without recording any reads it makes.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}
