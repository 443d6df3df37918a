//! Equality used by the dedup gates.
//!
//! Values are compared with an identity fast path first, then the
//! thread's equality override (see [`crate::config`]), then `PartialEq`.
//! Nodes may replace the whole chain with their own function.

use std::any::Any;
use std::rc::Rc;

use super::State;
use crate::config;

/// A per-node equality function.
pub type Equality<V> = Rc<dyn Fn(&V, &V) -> bool>;

/// Default value equality.
pub fn default_equals<V>(a: &V, b: &V) -> bool
where
    V: PartialEq + 'static,
{
    if std::ptr::eq(a, b) {
        return true;
    }
    if let Some(decided) = config::equality_override(a as &dyn Any, b as &dyn Any) {
        return decided;
    }
    a == b
}

/// Compare two states, using `eq` for plain values.
pub fn states_equal<V>(a: &State<V>, b: &State<V>, eq: &dyn Fn(&V, &V) -> bool) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    match (a, b) {
        (State::Value(a), State::Value(b)) => eq(a, b),
        (State::Unresolved, State::Unresolved) => true,
        (State::Error(a), State::Error(b)) => a == b,
        _ => false,
    }
}
