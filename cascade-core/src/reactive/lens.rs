//! Lens Implementation
//!
//! A Lens reads like a derivation and writes through a user-supplied
//! function, usually into the atoms its read recipe depends on. Every write
//! runs inside a transaction, so a setter that fails halfway leaves nothing
//! behind.
//!
//! When several source atoms are written by one setter, the lens recomputes
//! from them afterwards like any derivation would; the forward recipe is
//! authoritative about what the lens holds.

use std::fmt::{self, Debug};
use std::rc::Rc;

use super::atom::Atom;
use super::derivable::{Derivable, Observable};
use super::derivation::DerivedCore;
use super::runtime;
use super::transaction::transaction;
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};
use crate::state::{State, Value};

type Setter<V> = Rc<dyn Fn(V) -> Result<(), ReactiveError>>;

/// A derived node with a write path.
///
/// # Example
///
/// ```rust,ignore
/// let celsius = Atom::new(0.0);
/// let fahrenheit = celsius.lens(|c| c * 9.0 / 5.0 + 32.0, |f| (f - 32.0) * 5.0 / 9.0);
///
/// fahrenheit.set(212.0)?;
/// assert_eq!(celsius.get()?, 100.0);
/// ```
pub struct Lens<V: Value> {
    core: Rc<DerivedCore<V>>,
    setter: Setter<V>,
}

impl<V: Value> Lens<V> {
    /// Create a lens from a read recipe and a write function.
    #[track_caller]
    pub fn new<R, W>(read: R, write: W) -> Self
    where
        R: Fn() -> Result<V, ReactiveError> + 'static,
        W: Fn(V) -> Result<(), ReactiveError> + 'static,
    {
        let origin = runtime::caller_origin();
        Self {
            core: DerivedCore::new(NodeKind::Lens, Box::new(read), origin),
            setter: Rc::new(write),
        }
    }

    /// Get the lens's unique ID.
    pub fn id(&self) -> NodeId {
        self.core.id()
    }

    /// Write a value through the lens.
    ///
    /// Fails with [`ReactiveError::FinalWrite`] once the lens is final.
    pub fn set(&self, value: V) -> Result<(), ReactiveError> {
        if runtime::is_final(self.core.id()) {
            return Err(ReactiveError::FinalWrite(self.core.id()));
        }
        let setter = self.setter.clone();
        transaction(move || setter(value))
    }

    /// Keep the lens connected from its first read until the end of the
    /// tick.
    pub fn auto_cache(self) -> Self {
        self.core.set_auto_cache(true);
        self
    }

    pub fn with_equality<F>(self, equals: F) -> Self
    where
        F: Fn(&V, &V) -> bool + 'static,
    {
        self.core.set_equality(Rc::new(equals));
        self
    }
}

impl<V: Value> Atom<V> {
    /// A two-way view of this atom.
    ///
    /// Reading applies `forward` to the atom's value; writing applies
    /// `reverse` and sets the atom.
    #[track_caller]
    pub fn lens<W, F, R>(&self, forward: F, reverse: R) -> Lens<W>
    where
        W: Value,
        F: Fn(&V) -> W + 'static,
        R: Fn(&W) -> V + 'static,
    {
        let source = self.clone();
        let target = self.clone();
        Lens::new(
            move || Ok(forward(&source.get()?)),
            move |value| target.set(reverse(&value)),
        )
    }
}

impl<V: Value> Observable<V> for Lens<V> {
    fn id(&self) -> NodeId {
        self.core.id()
    }

    fn get_state(&self) -> Result<State<V>, ReactiveError> {
        self.core.get_state()
    }

    fn to_derivable(&self) -> Derivable<V> {
        Derivable::Lens(self.clone())
    }
}

impl<V: Value> Clone for Lens<V> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            setter: Rc::clone(&self.setter),
        }
    }
}

impl<V: Value + Debug> Debug for Lens<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lens")
            .field("id", &self.core.id())
            .field("cached", &self.core.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lens_reads_and_writes_through() {
        let celsius = Atom::new(0);
        let fahrenheit = celsius.lens(|c| c * 9 / 5 + 32, |f| (f - 32) * 5 / 9);

        assert_eq!(fahrenheit.get(), Ok(32));
        fahrenheit.set(212).unwrap();
        assert_eq!(celsius.get(), Ok(100));
        assert_eq!(fahrenheit.get(), Ok(212));
    }

    #[test]
    fn forward_recipe_wins() {
        let base = Atom::new(10);
        // Rounds on the way in, so reading back may differ from the write.
        let tens = base.lens(|v| *v, |v| v / 10 * 10);

        tens.set(37).unwrap();
        assert_eq!(tens.get(), Ok(30));
    }

    #[test]
    fn multi_source_setter_is_atomic() {
        let first = Atom::new(String::from("Ada"));
        let last = Atom::new(String::from("Lovelace"));
        let (f, l) = (first.clone(), last.clone());
        let (wf, wl) = (first.clone(), last.clone());
        let full = Lens::new(
            move || Ok(format!("{} {}", f.get()?, l.get()?)),
            move |name: String| {
                let (a, b) = name
                    .split_once(' ')
                    .ok_or_else(|| ReactiveError::failed("need two words"))?;
                wf.set(a.to_string())?;
                wl.set(b.to_string())
            },
        );

        full.set(String::from("Grace Hopper")).unwrap();
        assert_eq!(full.get(), Ok(String::from("Grace Hopper")));

        assert!(full.set(String::from("Nobody")).is_err());
        assert_eq!(first.get(), Ok(String::from("Grace")));
        assert_eq!(last.get(), Ok(String::from("Hopper")));
    }

    #[test]
    fn failing_setter_rolls_back_partial_writes() {
        let a = Atom::new(1);
        let b = Atom::new(2);
        let (ra, rb) = (a.clone(), b.clone());
        let (wa, wb) = (a.clone(), b.clone());
        let sum = Lens::new(
            move || Ok(ra.get()? + rb.get()?),
            move |v: i32| {
                wa.set(v)?;
                wb.set_final(0)?;
                wb.set(v)
            },
        );

        assert!(matches!(sum.set(10), Err(ReactiveError::FinalWrite(_))));
        assert_eq!(a.get(), Ok(1));
        assert_eq!(b.get(), Ok(2));
        assert!(!b.is_final());
    }

    #[test]
    fn final_lens_rejects_writes() {
        let base = Atom::new(1);
        let view = base.lens(|v| v + 1, |v| v - 1);
        base.set_final(5).unwrap();

        assert_eq!(view.get(), Ok(6));
        assert!(view.is_final());
        assert_eq!(view.set(1), Err(ReactiveError::FinalWrite(view.id())));
    }
}
