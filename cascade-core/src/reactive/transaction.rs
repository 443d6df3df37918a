//! Transactions
//!
//! A transaction groups writes so that reactors observe them all at once,
//! or not at all. While one is open:
//!
//! - atom writes take effect immediately and reads see them,
//! - reactors reached by the writes are queued but do not run,
//! - the first write to each atom logs how to restore it.
//!
//! On success the outermost transaction releases the queued reactors. On
//! failure (an `Err` from the body, or a panic) every logged atom goes back
//! to its old content, finality included.
//!
//! Transactions nest. Reactors wait for the outermost commit either way, but
//! rollback only reaches as far as the failing scope: writes made by an inner
//! transaction that already committed stay in place when the outer one fails.

use tracing::{debug, warn};

use super::runtime;
use crate::error::ReactiveError;

/// Restores the scope's writes unless committed.
struct ScopeGuard {
    committed: bool,
}

impl ScopeGuard {
    fn open() -> Self {
        runtime::push_scope();
        Self { committed: false }
    }

    fn commit(mut self) -> Result<(), ReactiveError> {
        self.committed = true;
        let Some(scope) = runtime::pop_scope() else {
            return Ok(());
        };

        if runtime::in_transaction() {
            runtime::commit_into_parent(scope);
            return Ok(());
        }

        debug!(writes = scope.log.len(), "transaction committed");
        runtime::finish_seals(scope.sealed);
        runtime::revisit_deferred(scope.deferred);
        drop(scope.log);
        runtime::after_change();
        runtime::settle()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let Some(scope) = runtime::pop_scope() else {
            return;
        };
        debug!(writes = scope.log.len(), "transaction rolled back");
        for (_, restore) in scope.log.into_iter().rev() {
            restore();
        }
        // Atoms sealed by a committed inner scope stay sealed.
        runtime::finish_seals(scope.sealed);
        runtime::revisit_deferred(scope.deferred);

        if std::thread::panicking() || runtime::in_transaction() {
            return;
        }
        runtime::after_change();
        if let Err(err) = runtime::settle() {
            warn!(error = %err, "reactor failed after rollback");
        }
    }
}

/// Run `body` as a transaction.
///
/// Writes made by `body` are visible to reads inside it right away, but no
/// reactor runs until the outermost transaction commits. If `body` returns
/// `Err` or panics, every atom it wrote goes back to its previous content.
///
/// # Example
///
/// ```rust,ignore
/// transaction(|| {
///     from.update(|v| v - amount)?;
///     to.update(|v| v + amount)?;
///     Ok::<_, ReactiveError>(())
/// })?;
/// ```
pub fn transaction<R, E, F>(body: F) -> Result<R, E>
where
    F: FnOnce() -> Result<R, E>,
    E: From<ReactiveError>,
{
    let scope = ScopeGuard::open();
    match body() {
        Ok(value) => {
            scope.commit()?;
            Ok(value)
        }
        Err(err) => {
            drop(scope);
            Err(err)
        }
    }
}

/// Like [`transaction`], but joins the enclosing transaction if one is open
/// instead of nesting.
pub fn atomically<R, E, F>(body: F) -> Result<R, E>
where
    F: FnOnce() -> Result<R, E>,
    E: From<ReactiveError>,
{
    if runtime::in_transaction() {
        body()
    } else {
        transaction(body)
    }
}

/// Whether a transaction is open on this thread.
pub fn in_transaction() -> bool {
    runtime::in_transaction()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Atom, Observable};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn commit_defers_reactors() {
        let a = Atom::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let _reactor = a.react(move |v| sink.borrow_mut().push(*v)).unwrap();

        transaction(|| {
            a.set(1)?;
            a.set(2)?;
            assert_eq!(a.get(), Ok(2));
            assert_eq!(*log.borrow(), vec![0]);
            Ok::<_, ReactiveError>(())
        })
        .unwrap();

        assert_eq!(*log.borrow(), vec![0, 2]);
    }

    #[test]
    fn rollback_restores_content() {
        let a = Atom::new(1);
        let result: Result<(), ReactiveError> = transaction(|| {
            a.set(5)?;
            Err(ReactiveError::failed("abort"))
        });

        assert!(result.is_err());
        assert_eq!(a.get(), Ok(1));
        assert!(!in_transaction());
    }

    #[test]
    fn rollback_runs_no_reactor() {
        let a = Atom::new(1);
        let runs = Rc::new(RefCell::new(0));
        let counter = runs.clone();
        let _reactor = a.react(move |_| *counter.borrow_mut() += 1).unwrap();

        let _ = transaction(|| {
            a.set(9)?;
            Err::<(), _>(ReactiveError::failed("abort"))
        });

        assert_eq!(*runs.borrow(), 1);
    }

    #[test]
    fn inner_rollback_keeps_outer_writes() {
        let a = Atom::new(0);
        let b = Atom::new(0);

        transaction(|| {
            a.set(1)?;
            let inner: Result<(), ReactiveError> = transaction(|| {
                b.set(1)?;
                a.set(2)?;
                Err(ReactiveError::failed("inner"))
            });
            assert!(inner.is_err());
            assert_eq!(a.get(), Ok(1));
            assert_eq!(b.get(), Ok(0));
            Ok::<_, ReactiveError>(())
        })
        .unwrap();

        assert_eq!(a.get(), Ok(1));
    }

    #[test]
    fn committed_inner_survives_outer_rollback() {
        let a = Atom::new(0);
        let b = Atom::new(0);
        let result: Result<(), ReactiveError> = transaction(|| {
            b.set(1)?;
            transaction(|| a.set(7))?;
            assert_eq!(a.get(), Ok(7));
            Err(ReactiveError::failed("outer"))
        });

        assert!(result.is_err());
        assert_eq!(a.get(), Ok(7));
        assert_eq!(b.get(), Ok(0));
    }

    #[test]
    fn atomically_joins_open_transaction() {
        let a = Atom::new(0);
        let result: Result<(), ReactiveError> = transaction(|| {
            atomically(|| a.set(3))?;
            Err(ReactiveError::failed("outer"))
        });

        assert!(result.is_err());
        assert_eq!(a.get(), Ok(0));
    }

    #[test]
    fn rollback_unseals() {
        let a = Atom::new(1);
        let _ = transaction(|| {
            a.set_final(2)?;
            Err::<(), _>(ReactiveError::failed("abort"))
        });

        assert!(!a.is_final());
        a.set(3).unwrap();
        assert_eq!(a.get(), Ok(3));
    }

    #[test]
    fn rollback_does_not_seal_readers() {
        let a = Atom::new(1);
        let d = a.map(|v| v * 10);

        let result: Result<(), ReactiveError> = transaction(|| {
            a.set_final(2)?;
            assert_eq!(d.get(), Ok(20));
            Err(ReactiveError::failed("abort"))
        });

        assert!(result.is_err());
        assert!(!d.is_final());
        a.set(3).unwrap();
        assert_eq!(d.get(), Ok(30));
    }

    #[test]
    fn commit_seals_readers() {
        let a = Atom::new(1);
        let d = a.map(|v| v * 10);
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let reactor = d.react(move |v| sink.borrow_mut().push(*v)).unwrap();

        transaction(|| {
            a.set_final(2)?;
            assert_eq!(d.get(), Ok(20));
            assert!(!d.is_final());
            Ok::<_, ReactiveError>(())
        })
        .unwrap();

        assert!(d.is_final());
        assert!(!reactor.is_active());
        assert_eq!(*log.borrow(), vec![10, 20]);
    }

    #[test]
    fn panic_rolls_back() {
        let a = Atom::new(1);
        let writer = a.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = transaction(|| -> Result<(), ReactiveError> {
                writer.set(2)?;
                panic!("boom");
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(a.get(), Ok(1));
        assert!(!in_transaction());
    }
}
